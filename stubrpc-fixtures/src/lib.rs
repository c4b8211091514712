//! # Stubrpc Fixtures
//!
//! **INTERNAL USE ONLY.** Shared by the `stubrpc-core` integration tests: proto schemas
//! built in code, matching engines a test can script, and a JSON driven gRPC client.
pub mod client;
pub mod engine;
pub mod schema;

pub use client::{DynamicClient, StreamedReply};
pub use engine::{DeferredEngine, StubEngine, StubRule};
