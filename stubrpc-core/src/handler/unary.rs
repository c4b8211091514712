use super::{CallTarget, Decision, decode_body, trailers_of};
use crate::context::CallScope;
use prost_reflect::DynamicMessage;
use tonic::{Request, Response, Status, codegen::BoxFuture, server::UnaryService};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct UnaryHandler {
    target: CallTarget,
}

impl UnaryHandler {
    pub fn new(target: CallTarget) -> Self {
        Self { target }
    }

    async fn handle(
        self,
        request: Request<DynamicMessage>,
    ) -> Result<Response<DynamicMessage>, Status> {
        let (_, extensions, message) = request.into_parts();
        let scope = CallScope::from_tonic_extensions(&extensions);

        let _context = self.target.open(&scope, message);
        let response = self.target.dispatch(scope.call_id).await?;

        // Stub headers reach the client whatever the outcome.
        scope.trailers.publish(trailers_of(&response));

        let decision = Decision::of(&response);
        debug!(call_id = %scope.call_id, ?decision, "Unary call decided");

        match decision.into_status() {
            Some(status) => Err(status),
            None => decode_body(&self.target.codec, &response, &self.target.method.output())
                .map(Response::new),
        }
    }
}

impl UnaryService<DynamicMessage> for UnaryHandler {
    type Response = DynamicMessage;
    type Future = BoxFuture<Response<DynamicMessage>, Status>;

    fn call(&mut self, request: Request<DynamicMessage>) -> Self::Future {
        Box::pin(self.clone().handle(request))
    }
}
