//! # Stubrpc Core
//!
//! `stubrpc-core` lets an HTTP-style stub matching engine serve gRPC traffic. Services are
//! built at runtime from protobuf descriptor sets, so no generated code is involved: every
//! inbound call is turned into a plain `POST /package.Service/Method` request with a JSON
//! body, handed to a [`MatchingEngine`], and the engine's answer is projected back into
//! gRPC semantics (messages, status codes, trailers, delays and faults).
//!
//! ## Key Components
//!
//! * **[`BridgeServer`]:** The entry point. A `tower` service that routes gRPC requests to the
//!   live service graph, plus an admin route that hot-reloads the schema.
//! * **[`MatchingEngine`]:** The seam towards the stub engine. It receives a [`BridgeRequest`]
//!   and answers exactly once through a [`Responder`] with a [`BridgeResponse`].
//! * **[`descriptor`]:** Loads `FileDescriptorSet` blobs into a linked [`descriptor::Schema`].
//! * **[`codec`]:** JSON <-> `DynamicMessage` conversion backed by a per-schema type registry.
//! * **[`service`]:** Synthesizes one bindable service per protobuf service, plus reflection.
//! * **[`handler`]:** Unary, client-streaming and server-streaming call handlers.
//! * **[`reload`]:** Atomic swap of the live service graph.
//!
//! ## Example
//!
//! ```rust,no_run
//! use stubrpc_core::descriptor::{DescriptorStore, DirectoryBlobStore};
//! use stubrpc_core::{BridgeRequest, BridgeResponse, BridgeServer, Responder};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = BridgeServer::builder(|_request: BridgeRequest, responder: Responder| {
//!     responder.respond(BridgeResponse::not_found());
//! })
//! .build();
//!
//! server.init_schema_source(DescriptorStore::new(DirectoryBlobStore::new("grpc")))?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! server.serve(listener, std::future::pending::<()>()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod codec;
pub mod context;
pub mod descriptor;
pub mod engine;
pub mod grpc;
pub mod handler;
pub mod headers;
pub mod reload;
pub mod server;
pub mod service;
pub mod status;

pub use engine::{BridgeRequest, BridgeResponse, DelaySpec, Fault, MatchingEngine, Responder};
pub use headers::HttpHeaders;
pub use server::{BridgeOptions, BridgeServer};

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
