//! # Matching Engine Seam
//!
//! The bridge never matches stubs itself. Every gRPC message that needs an answer becomes a
//! [`BridgeRequest`] which is handed, together with a [`Responder`], to a [`MatchingEngine`].
//! The engine answers exactly once with a [`BridgeResponse`], either inline or later from
//! any thread.
//!
//! A gRPC status can be expressed directly by a stub through the `grpc-status-name`,
//! `grpc-status-reason` and `grpc-status-details-bin` response headers. Any other status is
//! derived from the HTTP status code (see [`crate::status`]).
use crate::context::{CallId, ServerAddress};
use crate::headers::{HttpHeaders, encode_binary};
use crate::status::{code_name, http_status_for};
use bytes::Bytes;
use rand::Rng;
use std::time::Duration;
use tokio::sync::oneshot;
use tonic::{Code, Status};
use tracing::debug;

/// Response header carrying the canonical name of the gRPC status to return.
pub const GRPC_STATUS_NAME: &str = "grpc-status-name";
/// Response header carrying the status message that goes with [`GRPC_STATUS_NAME`].
pub const GRPC_STATUS_REASON: &str = "grpc-status-reason";
/// Response header carrying base64 encoded status details.
pub const GRPC_STATUS_DETAILS: &str = "grpc-status-details-bin";

/// An HTTP-shaped view of one gRPC message.
///
/// Always a `POST` to `/<service>/<method>` with the message rendered as JSON.
#[derive(Debug, Clone)]
pub struct BridgeRequest {
    call_id: CallId,
    scheme: String,
    host: String,
    port: u16,
    service: String,
    method: String,
    headers: HttpHeaders,
    body: String,
}

impl BridgeRequest {
    pub fn new(
        call_id: CallId,
        address: &ServerAddress,
        service: impl Into<String>,
        method: impl Into<String>,
        headers: HttpHeaders,
        body: impl Into<String>,
    ) -> Self {
        Self {
            call_id,
            scheme: address.scheme.clone(),
            host: address.host.clone(),
            port: address.port,
            service: service.into(),
            method: method.into(),
            headers,
            body: body.into(),
        }
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Fully qualified service name, e.g. `com.example.grpc.GreetingService`.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Method name as declared in the proto file.
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    /// The inbound message as proto3 JSON.
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn http_method(&self) -> &'static str {
        "POST"
    }

    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }

    pub fn url(&self) -> String {
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path())
    }
}

/// How long to hold a response back before it is projected onto the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelaySpec {
    Fixed(Duration),
    /// Sampled uniformly in `[lower, upper]` on every dispatch.
    Uniform { lower: Duration, upper: Duration },
}

impl DelaySpec {
    pub fn sample(&self) -> Duration {
        match *self {
            DelaySpec::Fixed(delay) => delay,
            DelaySpec::Uniform { lower, upper } if upper <= lower => lower,
            DelaySpec::Uniform { lower, upper } => rand::thread_rng().gen_range(lower..=upper),
        }
    }
}

/// Simulated transport failures a stub can ask for instead of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    ConnectionResetByPeer,
    EmptyResponse,
    MalformedResponseChunk,
    RandomDataThenClose,
}

impl Fault {
    /// The status a gRPC client observes when this fault is served.
    pub fn to_status(self) -> Status {
        match self {
            Fault::EmptyResponse => Status::cancelled("Stub returned an empty response"),
            Fault::ConnectionResetByPeer => Status::unknown("Connection reset by peer"),
            Fault::MalformedResponseChunk => Status::unknown("Malformed response chunk"),
            Fault::RandomDataThenClose => Status::unknown("Random data sent, then closed"),
        }
    }
}

/// The engine's answer to a [`BridgeRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeResponse {
    pub status: u16,
    pub headers: HttpHeaders,
    pub body: Bytes,
    pub delay: Option<DelaySpec>,
    pub fault: Option<Fault>,
}

impl BridgeResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HttpHeaders::new(),
            body: Bytes::new(),
            delay: None,
            fault: None,
        }
    }

    /// A `200` response carrying a JSON body.
    pub fn ok_json(body: impl Into<String>) -> Self {
        Self::new(200)
            .with_header("content-type", "application/json")
            .with_body(body.into())
    }

    /// The answer for a request no stub matched.
    pub fn not_found() -> Self {
        Self::new(404)
    }

    /// A response that carries an explicit gRPC status through the status headers.
    pub fn grpc_status(code: Code, reason: impl Into<String>) -> Self {
        Self::new(200)
            .with_header(GRPC_STATUS_NAME, code_name(code))
            .with_header(GRPC_STATUS_REASON, reason)
    }

    /// Expresses a gRPC status as a response.
    ///
    /// `OK` becomes an empty `200`. Every other code keeps its name, message and details in
    /// the status headers, with the HTTP status taken from the reverse table.
    pub fn from_status(status: &Status) -> Self {
        if status.code() == Code::Ok {
            return Self::new(200);
        }

        let mut response = Self::new(http_status_for(status.code()))
            .with_header(GRPC_STATUS_NAME, code_name(status.code()))
            .with_header(GRPC_STATUS_REASON, status.message());

        if !status.details().is_empty() {
            response = response.with_status_details(status.details());
        }

        response
    }

    pub fn with_header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json(self, value: &serde_json::Value) -> Self {
        self.with_body(value.to_string())
    }

    pub fn with_status_details(self, details: &[u8]) -> Self {
        self.with_header(GRPC_STATUS_DETAILS, encode_binary(details))
    }

    pub fn with_delay(mut self, delay: DelaySpec) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_fixed_delay(self, delay: Duration) -> Self {
        self.with_delay(DelaySpec::Fixed(delay))
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }
}

/// Single-use handle an engine answers a request through.
///
/// Dropping it without calling [`Responder::respond`] cancels the call.
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<BridgeResponse>,
}

impl Responder {
    /// Creates a responder and the receiving end the call handler awaits.
    pub fn channel() -> (Self, oneshot::Receiver<BridgeResponse>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn respond(self, response: BridgeResponse) {
        if self.tx.send(response).is_err() {
            debug!("Call went away before the stub response arrived");
        }
    }
}

/// The external stub engine.
///
/// `handle` must not block for long: it is invoked from the call's task. Long running work
/// should keep the [`Responder`] and answer from elsewhere.
pub trait MatchingEngine: Send + Sync + 'static {
    fn handle(&self, request: BridgeRequest, responder: Responder);
}

impl<F> MatchingEngine for F
where
    F: Fn(BridgeRequest, Responder) + Send + Sync + 'static,
{
    fn handle(&self, request: BridgeRequest, responder: Responder) {
        self(request, responder)
    }
}
