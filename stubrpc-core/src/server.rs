//! # Bridge Server
//!
//! The transport boundary. [`BridgeServer`] is a `tower::Service` over HTTP requests that:
//!
//! 1. answers anything that is not gRPC with `404`,
//! 2. hands `grpc.reflection` calls to the live graph's reflection service,
//! 3. tags every other call with its [`CallScope`], routes it to its [`RpcEntry`] and adds
//!    the trailers the handler published to the response.
//!
//! It can be mounted in any `tower` compatible server, turned into an `axum::Router` with
//! the reload route attached ([`BridgeServer::into_router`]), or served directly on a
//! `TcpListener` ([`BridgeServer::serve`]).
//!
//! [`RpcEntry`]: crate::service::RpcEntry
mod trailers;

use crate::BoxError;
use crate::context::{CallContexts, CallScope, ServerAddress, ServerAddressCell};
use crate::descriptor::SchemaSource;
use crate::engine::MatchingEngine;
use crate::handler::Dispatcher;
use crate::reload::{ConfigurationError, ReloadController, ReloadError};
use crate::service::{REFLECTION_PREFIX, ServiceBuilder, ServiceGraph};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response as AxumResponse},
    routing::post,
};
use bytes::Bytes;
use std::{
    convert::Infallible,
    future::Future,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio::net::TcpListener;
use tonic::{Status, body::Body, codegen::BoxFuture};
use tracing::{debug, info};
use trailers::attach_trailers;

pub const DEFAULT_ADMIN_PATH: &str = "/__admin/ext/grpc/reset";
pub const DEFAULT_ADDRESS_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// How long a call waits for the server address to be published.
    pub address_timeout: Duration,
    /// Path of the reload route mounted by [`BridgeServer::admin_router`].
    pub admin_path: String,
    /// Registry of in-flight call contexts, shared with the caller if given.
    pub call_contexts: CallContexts,
    /// Where engine requests say the server lives. [`BridgeServer::serve`] fills it in.
    pub address: ServerAddressCell,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            address_timeout: DEFAULT_ADDRESS_TIMEOUT,
            admin_path: DEFAULT_ADMIN_PATH.to_string(),
            call_contexts: CallContexts::new(),
            address: ServerAddressCell::new(),
        }
    }
}

pub struct BridgeServerBuilder {
    engine: Arc<dyn MatchingEngine>,
    options: BridgeOptions,
}

impl BridgeServerBuilder {
    pub fn address_timeout(mut self, timeout: Duration) -> Self {
        self.options.address_timeout = timeout;
        self
    }

    pub fn admin_path(mut self, path: impl Into<String>) -> Self {
        self.options.admin_path = path.into();
        self
    }

    pub fn call_contexts(mut self, contexts: CallContexts) -> Self {
        self.options.call_contexts = contexts;
        self
    }

    pub fn address_cell(mut self, address: ServerAddressCell) -> Self {
        self.options.address = address;
        self
    }

    pub fn options(mut self, options: BridgeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> BridgeServer {
        let dispatcher = Dispatcher::new(
            self.engine,
            self.options.address.clone(),
            self.options.call_contexts.clone(),
            self.options.address_timeout,
        );

        BridgeServer {
            inner: Arc::new(Inner {
                controller: ReloadController::new(ServiceBuilder::new(dispatcher)),
                options: self.options,
            }),
        }
    }
}

#[derive(Debug)]
struct Inner {
    controller: ReloadController,
    options: BridgeOptions,
}

/// Serves gRPC calls from the live service graph. Clones share all state.
#[derive(Debug, Clone)]
pub struct BridgeServer {
    inner: Arc<Inner>,
}

impl BridgeServer {
    pub fn builder(engine: impl MatchingEngine) -> BridgeServerBuilder {
        BridgeServerBuilder {
            engine: Arc::new(engine),
            options: BridgeOptions::default(),
        }
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.inner.options
    }

    pub fn call_contexts(&self) -> &CallContexts {
        &self.inner.options.call_contexts
    }

    /// Installs the schema source and loads it. Fails if a source was installed before.
    pub fn init_schema_source(&self, source: impl SchemaSource) -> Result<(), ReloadError> {
        self.inner.controller.init_schema_source(source)
    }

    /// Reloads the schema. See [`ReloadController::reload`].
    pub fn reload(&self) -> Result<(), ReloadError> {
        self.inner.controller.reload()
    }

    pub fn current(&self) -> Result<Arc<ServiceGraph>, ConfigurationError> {
        self.inner.controller.current()
    }

    /// Publishes where the server can be reached. Only the first address is kept.
    pub fn publish_address(&self, address: ServerAddress) -> bool {
        self.inner.options.address.publish(address)
    }

    /// Mounts the reload route.
    ///
    /// `POST` on the admin path reloads the schema and answers `200` with an empty body, or
    /// `500` with the error when the reload failed.
    pub fn admin_router(&self) -> Router {
        Router::new()
            .route(&self.inner.options.admin_path, post(reset))
            .with_state(self.clone())
    }

    /// The reload route plus the bridge as fallback for every other request.
    pub fn into_router(self) -> Router {
        self.admin_router().fallback_service(self)
    }

    /// Serves HTTP/1 and cleartext HTTP/2 on `listener` until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener.local_addr()?;
        self.publish_address(advertised_address(local));

        info!(address = %local, "Serving gRPC bridge");

        axum::serve(listener, self.into_router())
            .with_graceful_shutdown(shutdown)
            .await
    }

    async fn route(self, mut request: http::Request<Body>) -> http::Response<Body> {
        if !is_grpc(&request) {
            let mut response = http::Response::new(Body::default());
            *response.status_mut() = StatusCode::NOT_FOUND;
            return response;
        }

        let graph = match self.current() {
            Ok(graph) => graph,
            Err(e) => return Status::internal(e.to_string()).into_http(),
        };

        let path = request.uri().path().to_string();

        if path.starts_with(REFLECTION_PREFIX) {
            return graph.reflect(request).await;
        }

        let Some(entry) = graph.entry(&path).cloned() else {
            debug!(path, "No gRPC method bound to path");
            return Status::unimplemented(format!("Method not found: {path}")).into_http();
        };

        let scope = CallScope::intercept(&mut request);
        let response = entry.serve(request).await;

        attach_trailers(response, scope.trailers)
    }
}

/// The address engine requests name for a listener bound to `local`.
///
/// Wildcard binds are advertised as `localhost`.
fn advertised_address(local: SocketAddr) -> ServerAddress {
    let host = match local.ip() {
        ip if ip.is_unspecified() => "localhost".to_string(),
        IpAddr::V6(ip) => format!("[{ip}]"),
        IpAddr::V4(ip) => ip.to_string(),
    };

    ServerAddress::new("http", host, local.port())
}

fn is_grpc<B>(request: &http::Request<B>) -> bool {
    request
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/grpc"))
}

async fn reset(State(server): State<BridgeServer>) -> AxumResponse {
    match tokio::task::spawn_blocking(move || server.reload()).await {
        Ok(Ok(())) => StatusCode::OK.into_response(),
        Ok(Err(e)) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

impl<B> tower::Service<http::Request<B>> for BridgeServer
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        let server = self.clone();
        Box::pin(async move { Ok(server.route(request.map(Body::new)).await) })
    }
}
