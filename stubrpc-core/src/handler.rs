//! # Call Handlers
//!
//! One handler per supported call shape. Each handler turns the messages of a call into
//! [`BridgeRequest`]s through a shared [`Dispatcher`], classifies the engine's answers with
//! [`Decision::of`] and projects them back onto the call.
//!
//! * [`UnaryHandler`]: one message in, one dispatch, one message out.
//! * [`ClientStreamingHandler`]: every inbound message is dispatched in order until one of
//!   them gets a decisive answer.
//! * [`ServerStreamingHandler`]: one dispatch whose body may hold several messages.
mod client_streaming;
mod outcome;
mod server_streaming;
mod unary;

pub use client_streaming::ClientStreamingHandler;
pub use outcome::{
    Decision, RESERVED_RESPONSE_HEADERS, decode_body, decode_body_stream, trailers_of,
};
pub use server_streaming::ServerStreamingHandler;
pub use unary::UnaryHandler;

use crate::codec::MessageCodec;
use crate::context::{
    CallContext, CallContextGuard, CallContexts, CallId, CallScope, ServerAddressCell,
};
use crate::engine::{BridgeRequest, BridgeResponse, MatchingEngine, Responder};
use prost_reflect::{DynamicMessage, MethodDescriptor, ServiceDescriptor};
use std::{fmt, sync::Arc, time::Duration};
use tonic::Status;
use tracing::debug;

/// Sends one message of a call to the matching engine and waits for its answer.
#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<dyn MatchingEngine>,
    address: ServerAddressCell,
    contexts: CallContexts,
    address_timeout: Duration,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("address", &self.address)
            .field("address_timeout", &self.address_timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher handing requests to `engine`.
    ///
    /// Every dispatch waits at most `address_timeout` for `address` to be published.
    pub fn new(
        engine: Arc<dyn MatchingEngine>,
        address: ServerAddressCell,
        contexts: CallContexts,
        address_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            address,
            contexts,
            address_timeout,
        }
    }

    /// The contexts of the calls this dispatcher is serving.
    pub fn contexts(&self) -> &CallContexts {
        &self.contexts
    }

    /// The cell requests take their scheme, host and port from.
    pub fn address(&self) -> &ServerAddressCell {
        &self.address
    }

    /// Dispatches the message currently registered for `call_id`.
    ///
    /// The returned response has already been delayed as it asked for. Failures to build
    /// the request, and an engine that drops the [`Responder`], end the call.
    pub async fn dispatch(&self, call_id: CallId) -> Result<BridgeResponse, Status> {
        let address = self
            .address
            .wait(self.address_timeout)
            .await
            .map_err(|e| Status::unavailable(e.to_string()))?;

        let context = self
            .contexts
            .get(call_id)
            .ok_or_else(|| Status::internal(format!("No context registered for {call_id}")))?;

        let body = context
            .codec
            .to_json(&context.message)
            .map_err(|e| Status::internal(e.to_string()))?;

        let request = BridgeRequest::new(
            call_id,
            &address,
            context.service.full_name(),
            context.method.name(),
            context.headers.clone(),
            body,
        );

        debug!(%call_id, path = %request.path(), "Dispatching message to the stub engine");

        let (responder, rx) = Responder::channel();
        self.engine.handle(request, responder);

        let response = rx.await.map_err(|_| {
            Status::cancelled("Stub engine dropped the request without responding")
        })?;

        if let Some(delay) = response.delay {
            let delay = delay.sample();
            debug!(%call_id, ?delay, "Delaying stub response");
            tokio::time::sleep(delay).await;
        }

        Ok(response)
    }
}

/// The method a handler serves, plus what it needs to dispatch calls to it.
#[derive(Debug, Clone)]
pub struct CallTarget {
    service: ServiceDescriptor,
    method: MethodDescriptor,
    codec: MessageCodec,
    dispatcher: Dispatcher,
}

impl CallTarget {
    pub fn new(method: MethodDescriptor, codec: MessageCodec, dispatcher: Dispatcher) -> Self {
        Self {
            service: method.parent_service().clone(),
            method,
            codec,
            dispatcher,
        }
    }

    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    fn open(&self, scope: &CallScope, message: DynamicMessage) -> CallContextGuard {
        self.dispatcher.contexts().open(
            scope.call_id,
            CallContext {
                service: self.service.clone(),
                method: self.method.clone(),
                codec: self.codec.clone(),
                headers: scope.headers.0.clone(),
                message,
            },
        )
    }

    async fn dispatch(&self, call_id: CallId) -> Result<BridgeResponse, Status> {
        self.dispatcher.dispatch(call_id).await
    }
}
