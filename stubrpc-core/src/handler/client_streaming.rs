use super::{CallTarget, Decision, decode_body, trailers_of};
use crate::context::{CallContextGuard, CallScope};
use crate::headers::HttpHeaders;
use crate::status::not_found_status;
use prost_reflect::DynamicMessage;
use tonic::{
    Request, Response, Status, Streaming, codegen::BoxFuture, server::ClientStreamingService,
};
use tracing::debug;

/// The first decisive result of a client-streaming call.
struct Latched {
    trailers: HttpHeaders,
    result: Result<DynamicMessage, Status>,
}

#[derive(Debug, Clone)]
pub struct ClientStreamingHandler {
    target: CallTarget,
}

impl ClientStreamingHandler {
    pub fn new(target: CallTarget) -> Self {
        Self { target }
    }

    /// Dispatches inbound messages one at a time, in arrival order.
    ///
    /// `NotFound` answers never settle the call. Once a message got any other answer, the
    /// rest of the stream is read but not dispatched, and that answer is returned when the
    /// client half-closes.
    async fn handle(
        self,
        request: Request<Streaming<DynamicMessage>>,
    ) -> Result<Response<DynamicMessage>, Status> {
        let (_, extensions, mut stream) = request.into_parts();
        let scope = CallScope::from_tonic_extensions(&extensions);

        let mut context: Option<CallContextGuard> = None;
        let mut latched: Option<Latched> = None;
        let mut received = 0usize;

        while let Some(message) = stream.message().await? {
            received += 1;

            if latched.is_some() {
                continue;
            }

            match &context {
                Some(guard) => guard.set_message(message),
                None => context = Some(self.target.open(&scope, message)),
            }

            latched = self.dispatch_one(&scope).await;
        }

        debug!(call_id = %scope.call_id, received, settled = latched.is_some(), "Client stream completed");

        match latched {
            Some(Latched { trailers, result }) => {
                scope.trailers.publish(trailers);
                result.map(Response::new)
            }
            None => Err(not_found_status()),
        }
    }

    /// Dispatches the current message, returning its outcome if it settles the call.
    async fn dispatch_one(&self, scope: &CallScope) -> Option<Latched> {
        let response = match self.target.dispatch(scope.call_id).await {
            Ok(response) => response,
            Err(status) => {
                return Some(Latched {
                    trailers: HttpHeaders::new(),
                    result: Err(status),
                });
            }
        };

        let decision = Decision::of(&response);
        if !decision.is_decisive() {
            return None;
        }

        let result = match decision.into_status() {
            Some(status) => Err(status),
            None => decode_body(&self.target.codec, &response, &self.target.method.output()),
        };

        Some(Latched {
            trailers: trailers_of(&response),
            result,
        })
    }
}

impl ClientStreamingService<DynamicMessage> for ClientStreamingHandler {
    type Response = DynamicMessage;
    type Future = BoxFuture<Response<DynamicMessage>, Status>;

    fn call(&mut self, request: Request<Streaming<DynamicMessage>>) -> Self::Future {
        Box::pin(self.clone().handle(request))
    }
}
