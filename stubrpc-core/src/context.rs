//! # Call & Transport Context
//!
//! State that has to travel between the transport boundary and the call handlers without
//! going through the call signatures:
//!
//! * [`CallScope`] tags every inbound request with a [`CallId`], its inbound headers and an
//!   [`OutboundTrailers`] cell, all stored in the request extensions.
//! * [`CallContexts`] maps a [`CallId`] to the [`CallContext`] of that call while it is
//!   being dispatched. Concurrent calls never share a slot.
//! * [`ServerAddressCell`] holds the address the server is bound to, published once.
use crate::codec::MessageCodec;
use crate::headers::HttpHeaders;
use parking_lot::Mutex;
use prost_reflect::{DynamicMessage, MethodDescriptor, ServiceDescriptor};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::sync::watch;
use tonic::metadata::MetadataMap;

/// Request headers handled by the gRPC transport itself, never shown to the engine.
pub const TRANSPORT_RESERVED_HEADERS: [&str; 6] = [
    "te",
    "content-type",
    "user-agent",
    "grpc-message",
    "grpc-message-type",
    "grpc-status",
];

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// Process unique identifier of one inbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl CallId {
    /// Allocates the next id. Ids are never reused within a process.
    pub fn next() -> Self {
        Self(NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps an id allocated elsewhere, e.g. one read back from an engine's journal.
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// The metadata a client sent with a call, minus the transport reserved headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundHeaders(pub HttpHeaders);

/// Headers to be sent as gRPC trailers when the call completes.
///
/// Cloning shares the cell. Handlers publish into it, the transport boundary takes the
/// content right before the trailers leave.
#[derive(Debug, Clone, Default)]
pub struct OutboundTrailers {
    cell: Arc<Mutex<Option<HttpHeaders>>>,
}

impl OutboundTrailers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces whatever was published before.
    pub fn publish(&self, headers: HttpHeaders) {
        *self.cell.lock() = Some(headers);
    }

    pub fn take(&self) -> Option<HttpHeaders> {
        self.cell.lock().take()
    }

    pub fn get(&self) -> Option<HttpHeaders> {
        self.cell.lock().clone()
    }
}

/// The per-call values [`CallScope::intercept`] stores in the request extensions.
#[derive(Debug, Clone)]
pub struct CallScope {
    pub call_id: CallId,
    pub headers: InboundHeaders,
    pub trailers: OutboundTrailers,
}

impl CallScope {
    /// Tags `request` with a fresh call scope and returns it.
    pub fn intercept<B>(request: &mut http::Request<B>) -> Self {
        let metadata = MetadataMap::from_headers(request.headers().clone());

        let mut headers = HttpHeaders::from_metadata(&metadata);
        for reserved in TRANSPORT_RESERVED_HEADERS {
            headers.remove(reserved);
        }

        let scope = Self {
            call_id: CallId::next(),
            headers: InboundHeaders(headers),
            trailers: OutboundTrailers::new(),
        };

        let extensions = request.extensions_mut();
        extensions.insert(scope.call_id);
        extensions.insert(scope.headers.clone());
        extensions.insert(scope.trailers.clone());

        scope
    }

    /// Reads the scope back from request extensions.
    ///
    /// A request that never went through [`CallScope::intercept`] gets a fresh id, no
    /// headers and a trailers cell nobody reads.
    pub fn from_extensions(extensions: &http::Extensions) -> Self {
        Self {
            call_id: extensions.get().copied().unwrap_or_else(CallId::next),
            headers: extensions.get().cloned().unwrap_or_default(),
            trailers: extensions.get().cloned().unwrap_or_default(),
        }
    }

    /// Like [`CallScope::from_extensions`], for the extensions a handler receives.
    pub fn from_tonic_extensions(extensions: &tonic::Extensions) -> Self {
        Self {
            call_id: extensions.get().copied().unwrap_or_else(CallId::next),
            headers: extensions.get().cloned().unwrap_or_default(),
            trailers: extensions.get().cloned().unwrap_or_default(),
        }
    }
}

/// Everything a dispatch needs to know about the call it serves.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub service: ServiceDescriptor,
    pub method: MethodDescriptor,
    pub codec: MessageCodec,
    pub headers: HttpHeaders,
    /// The message currently being dispatched.
    pub message: DynamicMessage,
}

/// Registry of the contexts of every call currently being dispatched.
#[derive(Debug, Clone, Default)]
pub struct CallContexts {
    inner: Arc<Mutex<HashMap<CallId, Arc<CallContext>>>>,
}

impl CallContexts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the context of call `id` until the returned guard is dropped.
    pub fn open(&self, id: CallId, context: CallContext) -> CallContextGuard {
        self.inner.lock().insert(id, Arc::new(context));
        CallContextGuard {
            id,
            contexts: self.clone(),
        }
    }

    pub fn get(&self, id: CallId) -> Option<Arc<CallContext>> {
        self.inner.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Keeps a call's context registered. Dropping it, cancellation included, removes the entry.
#[derive(Debug)]
pub struct CallContextGuard {
    id: CallId,
    contexts: CallContexts,
}

impl CallContextGuard {
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Swaps the message the next dispatch of this call will send.
    pub fn set_message(&self, message: DynamicMessage) {
        if let Some(context) = self.contexts.inner.lock().get_mut(&self.id) {
            Arc::make_mut(context).message = message;
        }
    }
}

impl Drop for CallContextGuard {
    fn drop(&mut self) {
        self.contexts.inner.lock().remove(&self.id);
    }
}

/// Where the server accepting gRPC traffic can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Server address was not published within {0:?}")]
pub struct AddressTimeout(pub Duration);

/// A write-once slot for the [`ServerAddress`], readable with a bounded wait.
#[derive(Debug, Clone)]
pub struct ServerAddressCell {
    tx: Arc<watch::Sender<Option<ServerAddress>>>,
}

impl Default for ServerAddressCell {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerAddressCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Publishes `address` unless one was published already. Returns whether it was stored.
    pub fn publish(&self, address: ServerAddress) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(address);
            true
        })
    }

    pub fn get(&self) -> Option<ServerAddress> {
        self.tx.borrow().clone()
    }

    /// Waits up to `timeout` for the address to be published.
    pub async fn wait(&self, timeout: Duration) -> Result<ServerAddress, AddressTimeout> {
        let mut rx = self.tx.subscribe();

        match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(address)) => address.clone().ok_or(AddressTimeout(timeout)),
            _ => Err(AddressTimeout(timeout)),
        }
    }
}
