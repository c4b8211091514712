#![allow(dead_code)]

use prost_reflect::MethodDescriptor;
use stubrpc_core::context::ServerAddress;
use stubrpc_core::descriptor::RawDescriptorSets;
use stubrpc_core::tonic::metadata::MetadataMap;
use stubrpc_core::{BridgeServer, MatchingEngine};
use stubrpc_fixtures::DynamicClient;
use stubrpc_fixtures::schema::{self, GREETING_SERVICE};
use tracing_subscriber::EnvFilter;

pub const HOST: &str = "localhost";
pub const PORT: u16 = 8080;

/// Logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A bridge serving `sets`, with its address already published.
pub fn bridge(engine: impl MatchingEngine, sets: Vec<Vec<u8>>) -> BridgeServer {
    init_tracing();

    let server = BridgeServer::builder(engine).build();
    server
        .init_schema_source(RawDescriptorSets::new(sets))
        .expect("fixture schema should load");
    server.publish_address(ServerAddress::new("http", HOST, PORT));
    server
}

pub fn greeter(engine: impl MatchingEngine) -> BridgeServer {
    bridge(engine, vec![schema::greeting_set()])
}

pub fn client(server: &BridgeServer) -> DynamicClient<BridgeServer> {
    DynamicClient::new(server.clone())
}

pub fn greeting_method(name: &str) -> MethodDescriptor {
    schema::method(GREETING_SERVICE, name)
}

pub fn no_metadata() -> MetadataMap {
    MetadataMap::new()
}
