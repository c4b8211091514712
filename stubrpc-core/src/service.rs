//! # Service Builder
//!
//! Synthesizes servable gRPC services from a [`Schema`], with no generated code.
//!
//! Every method of every service in the schema becomes an [`RpcEntry`]: its HTTP/2 path,
//! its [`CallType`], a wire codec for its input type and the [`CallHandler`] matching the
//! call type. A `grpc.reflection` service describing the whole schema is always added.
//!
//! A [`ServiceGraph`] is immutable. Reloading the schema builds a new graph next to the
//! live one and swaps them (see [`crate::reload`]).
use crate::codec::{MessageCodec, TypeRegistry};
use crate::descriptor::Schema;
use crate::grpc::codec::DynamicCodec;
use crate::handler::{
    CallTarget, ClientStreamingHandler, Dispatcher, ServerStreamingHandler, UnaryHandler,
};
use prost_reflect::{MethodDescriptor, ServiceDescriptor};
use std::{collections::HashMap, sync::Arc};
use tonic::{Status, body::Body, server::Grpc, service::Routes};
use tower::ServiceExt;

/// Path prefix shared by the `v1` and `v1alpha` reflection services.
pub const REFLECTION_PREFIX: &str = "/grpc.reflection.";

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Failed to build the reflection service: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),
}

/// The shape of a method, derived only from its streaming flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallType {
    Unary,
    ClientStreaming,
    ServerStreaming,
    Bidi,
}

impl CallType {
    pub fn from_flags(client_streaming: bool, server_streaming: bool) -> Self {
        match (client_streaming, server_streaming) {
            (false, false) => CallType::Unary,
            (true, false) => CallType::ClientStreaming,
            (false, true) => CallType::ServerStreaming,
            (true, true) => CallType::Bidi,
        }
    }

    pub fn of(method: &MethodDescriptor) -> Self {
        Self::from_flags(method.is_client_streaming(), method.is_server_streaming())
    }
}

#[derive(Debug, Clone)]
pub enum CallHandler {
    Unary(UnaryHandler),
    ClientStreaming(ClientStreamingHandler),
    ServerStreaming(ServerStreamingHandler),
    /// Answers every call with `UNIMPLEMENTED`.
    Unimplemented,
}

/// One bindable method.
#[derive(Debug, Clone)]
pub struct RpcEntry {
    path: String,
    call_type: CallType,
    method: MethodDescriptor,
    codec: DynamicCodec,
    handler: CallHandler,
}

impl RpcEntry {
    fn new(method: MethodDescriptor, codec: MessageCodec, dispatcher: Dispatcher) -> Self {
        let call_type = CallType::of(&method);
        let target = CallTarget::new(method.clone(), codec, dispatcher);

        let handler = match call_type {
            CallType::Unary => CallHandler::Unary(UnaryHandler::new(target)),
            CallType::ClientStreaming => {
                CallHandler::ClientStreaming(ClientStreamingHandler::new(target))
            }
            CallType::ServerStreaming => {
                CallHandler::ServerStreaming(ServerStreamingHandler::new(target))
            }
            CallType::Bidi => CallHandler::Unimplemented,
        };

        Self {
            path: method_path(&method),
            call_type,
            codec: DynamicCodec::new(method.input()),
            method,
            handler,
        }
    }

    /// `/package.Service/Method`
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    pub fn handler(&self) -> &CallHandler {
        &self.handler
    }

    /// Runs one call of this method to completion of its response head.
    pub async fn serve(&self, request: http::Request<Body>) -> http::Response<Body> {
        let mut grpc = Grpc::new(self.codec.clone());

        match &self.handler {
            CallHandler::Unary(handler) => grpc.unary(handler.clone(), request).await,
            CallHandler::ClientStreaming(handler) => {
                grpc.client_streaming(handler.clone(), request).await
            }
            CallHandler::ServerStreaming(handler) => {
                grpc.server_streaming(handler.clone(), request).await
            }
            CallHandler::Unimplemented => Status::unimplemented(format!(
                "Method '{}' is {:?}, which is not supported",
                self.path, self.call_type
            ))
            .into_http(),
        }
    }
}

/// The methods of one protobuf service.
#[derive(Debug, Clone)]
pub struct BridgeService {
    descriptor: ServiceDescriptor,
    entries: Vec<Arc<RpcEntry>>,
}

impl BridgeService {
    pub fn name(&self) -> &str {
        self.descriptor.full_name()
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn entries(&self) -> &[Arc<RpcEntry>] {
        &self.entries
    }
}

/// Everything served for one schema generation.
#[derive(Clone)]
pub struct ServiceGraph {
    generation: u64,
    schema: Schema,
    codec: MessageCodec,
    services: Vec<BridgeService>,
    entries: HashMap<String, Arc<RpcEntry>>,
    reflection: Routes,
}

impl std::fmt::Debug for ServiceGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceGraph")
            .field("generation", &self.generation)
            .field("services", &self.service_names())
            .finish_non_exhaustive()
    }
}

impl ServiceGraph {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn codec(&self) -> &MessageCodec {
        &self.codec
    }

    pub fn services(&self) -> &[BridgeService] {
        &self.services
    }

    pub fn service_names(&self) -> Vec<&str> {
        self.services.iter().map(BridgeService::name).collect()
    }

    pub fn entry(&self, path: &str) -> Option<&Arc<RpcEntry>> {
        self.entries.get(path)
    }

    /// Serves a `grpc.reflection` request.
    pub async fn reflect(&self, request: http::Request<Body>) -> http::Response<Body> {
        match self.reflection.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

/// Builds [`ServiceGraph`]s that dispatch through one [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct ServiceBuilder {
    dispatcher: Dispatcher,
}

impl ServiceBuilder {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn build(&self, schema: Schema, generation: u64) -> Result<ServiceGraph, BuildError> {
        let codec = MessageCodec::new(TypeRegistry::new(schema.pool().clone()));

        let mut services = Vec::new();
        let mut entries = HashMap::new();

        for descriptor in schema.services() {
            let service_entries: Vec<Arc<RpcEntry>> = descriptor
                .methods()
                .map(|method| {
                    Arc::new(RpcEntry::new(
                        method,
                        codec.clone(),
                        self.dispatcher.clone(),
                    ))
                })
                .collect();

            for entry in &service_entries {
                entries.insert(entry.path().to_string(), entry.clone());
            }

            services.push(BridgeService {
                descriptor,
                entries: service_entries,
            });
        }

        let reflection = reflection_routes(&schema)?;

        Ok(ServiceGraph {
            generation,
            schema,
            codec,
            services,
            entries,
            reflection,
        })
    }
}

fn reflection_routes(schema: &Schema) -> Result<Routes, BuildError> {
    let v1 = tonic_reflection::server::Builder::configure()
        .register_file_descriptor_set(schema.file_descriptor_set())
        .build_v1()?;

    let v1alpha = tonic_reflection::server::Builder::configure()
        .register_file_descriptor_set(schema.file_descriptor_set())
        .build_v1alpha()?;

    Ok(Routes::new(v1).add_service(v1alpha))
}

/// The HTTP/2 path of a method.
pub fn method_path(method: &MethodDescriptor) -> String {
    format!("/{}/{}", method.parent_service().full_name(), method.name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_type_follows_streaming_flags() {
        assert_eq!(CallType::from_flags(false, false), CallType::Unary);
        assert_eq!(CallType::from_flags(true, false), CallType::ClientStreaming);
        assert_eq!(CallType::from_flags(false, true), CallType::ServerStreaming);
        assert_eq!(CallType::from_flags(true, true), CallType::Bidi);
    }

    fn dispatcher() -> Dispatcher {
        use crate::context::{CallContexts, ServerAddressCell};
        use crate::engine::{BridgeRequest, Responder};

        let engine = |_request: BridgeRequest, responder: Responder| drop(responder);
        Dispatcher::new(
            Arc::new(engine),
            ServerAddressCell::new(),
            CallContexts::new(),
            std::time::Duration::from_secs(1),
        )
    }

    fn loaded_schema() -> Schema {
        use crate::descriptor::{RawDescriptorSets, SchemaSource};
        use stubrpc_fixtures::schema::{booking_set, greeting_set};

        RawDescriptorSets::new([greeting_set(), booking_set()])
            .load()
            .unwrap()
    }

    #[test]
    fn one_service_per_descriptor_and_one_entry_per_method() {
        let schema = loaded_schema();
        let graph = ServiceBuilder::new(dispatcher())
            .build(schema.clone(), 1)
            .unwrap();

        let descriptors: Vec<ServiceDescriptor> = schema.services().collect();
        assert_eq!(graph.services().len(), descriptors.len());
        assert_eq!(graph.services().len(), 2);

        for descriptor in &descriptors {
            let service = graph
                .services()
                .iter()
                .find(|service| service.name() == descriptor.full_name())
                .unwrap();
            assert_eq!(service.entries().len(), descriptor.methods().count());

            for method in descriptor.methods() {
                let entry = graph.entry(&method_path(&method)).unwrap();
                assert_eq!(entry.method().full_name(), method.full_name());
                assert_eq!(entry.call_type(), CallType::of(&method));
            }
        }

        assert_eq!(graph.generation(), 1);
        assert!(graph.entry("/com.example.grpc.GreetingService/missing").is_none());
    }

    #[test]
    fn handlers_follow_the_call_type() {
        let graph = ServiceBuilder::new(dispatcher())
            .build(loaded_schema(), 1)
            .unwrap();
        let handler = |method: &str| {
            graph
                .entry(&format!("/com.example.grpc.GreetingService/{method}"))
                .unwrap()
                .handler()
                .clone()
        };

        assert!(matches!(handler("greeting"), CallHandler::Unary(_)));
        assert!(matches!(handler("oneGreetingEmptyReply"), CallHandler::Unary(_)));
        assert!(matches!(
            handler("manyGreetingsOneReply"),
            CallHandler::ClientStreaming(_)
        ));
        assert!(matches!(
            handler("oneGreetingManyReplies"),
            CallHandler::ServerStreaming(_)
        ));
        assert!(matches!(handler("chat"), CallHandler::Unimplemented));
    }
}
