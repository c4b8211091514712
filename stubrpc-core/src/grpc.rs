//! # Dynamic gRPC Transport
//!
//! Wire-level building blocks shared by the synthesized services and by clients that talk
//! to them. Messages travel as `DynamicMessage`s, so no generated code is needed on either
//! side.
pub mod codec;
