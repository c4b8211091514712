use super::{CallTarget, Decision, decode_body_stream, trailers_of};
use crate::context::CallScope;
use prost_reflect::DynamicMessage;
use tonic::{
    Request, Response, Status,
    codegen::{BoxFuture, BoxStream},
    server::ServerStreamingService,
};
use tracing::debug;

/// Answers a server-streaming call from a single dispatch.
///
/// A successful body may hold several JSON values; each becomes one response message.
#[derive(Debug, Clone)]
pub struct ServerStreamingHandler {
    target: CallTarget,
}

impl ServerStreamingHandler {
    pub fn new(target: CallTarget) -> Self {
        Self { target }
    }

    async fn handle(
        self,
        request: Request<DynamicMessage>,
    ) -> Result<Response<BoxStream<DynamicMessage>>, Status> {
        let (_, extensions, message) = request.into_parts();
        let scope = CallScope::from_tonic_extensions(&extensions);

        let _context = self.target.open(&scope, message);
        let response = self.target.dispatch(scope.call_id).await?;

        scope.trailers.publish(trailers_of(&response));

        let decision = Decision::of(&response);
        debug!(call_id = %scope.call_id, ?decision, "Server streaming call decided");

        if let Some(status) = decision.into_status() {
            return Err(status);
        }

        let messages =
            decode_body_stream(&self.target.codec, &response, &self.target.method.output())?;
        let stream: BoxStream<DynamicMessage> =
            Box::pin(tokio_stream::iter(messages.into_iter().map(Ok)));

        Ok(Response::new(stream))
    }
}

impl ServerStreamingService<DynamicMessage> for ServerStreamingHandler {
    type Response = DynamicMessage;
    type ResponseStream = BoxStream<DynamicMessage>;
    type Future = BoxFuture<Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: Request<DynamicMessage>) -> Self::Future {
        Box::pin(self.clone().handle(request))
    }
}
