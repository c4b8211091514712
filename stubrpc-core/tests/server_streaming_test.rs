use serde_json::json;
use stubrpc_core::BridgeResponse;
use stubrpc_core::status::NOT_FOUND_REASON;
use stubrpc_core::tonic::Code;
use stubrpc_fixtures::schema::GREETING_SERVICE;
use stubrpc_fixtures::{StubEngine, StubRule};

mod bridge_support;

use bridge_support::{client, greeter, greeting_method, no_metadata};

const METHOD: &str = "oneGreetingManyReplies";

fn rule() -> StubRule {
    StubRule::for_method(GREETING_SERVICE, METHOD).with_body(json!({ "name": "Tom" }))
}

#[tokio::test]
async fn test_each_json_value_becomes_a_message() {
    let engine = StubEngine::new();
    engine.add(rule().respond(BridgeResponse::ok_json(
        r#"{"greeting":"Hi Tom"} {"greeting":"Hey Tom"}
        {"greeting":"Hello Tom"}"#,
    )));

    let server = greeter(engine);
    let reply = client(&server)
        .server_streaming(&greeting_method(METHOD), json!({ "name": "Tom" }), no_metadata())
        .await
        .unwrap();

    assert_eq!(
        reply.messages,
        vec![
            json!({ "greeting": "Hi Tom" }),
            json!({ "greeting": "Hey Tom" }),
            json!({ "greeting": "Hello Tom" }),
        ]
    );
}

#[tokio::test]
async fn test_single_value_streams_one_message() {
    let engine = StubEngine::new();
    engine.add(rule().respond_json(json!({ "greeting": "Just one" })));

    let server = greeter(engine);
    let reply = client(&server)
        .server_streaming(&greeting_method(METHOD), json!({ "name": "Tom" }), no_metadata())
        .await
        .unwrap();

    assert_eq!(reply.messages, vec![json!({ "greeting": "Just one" })]);
}

#[tokio::test]
async fn test_stream_ends_with_published_trailers() {
    let engine = StubEngine::new();
    engine.add(
        rule().respond(
            BridgeResponse::ok_json(r#"{"greeting":"Hi"}"#).with_header("x-stream", "done"),
        ),
    );

    let server = greeter(engine);
    let reply = client(&server)
        .server_streaming(&greeting_method(METHOD), json!({ "name": "Tom" }), no_metadata())
        .await
        .unwrap();

    let trailers = reply.trailers.unwrap();
    assert_eq!(trailers.get("x-stream").unwrap().to_str().unwrap(), "done");
}

#[tokio::test]
async fn test_unmatched_request_is_unimplemented() {
    let server = greeter(StubEngine::new());

    let status = client(&server)
        .server_streaming(&greeting_method(METHOD), json!({ "name": "Jerry" }), no_metadata())
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unimplemented);
    assert_eq!(status.message(), NOT_FOUND_REASON);
}

#[tokio::test]
async fn test_explicit_status_ends_the_stream() {
    let engine = StubEngine::new();
    engine.add(rule().respond(BridgeResponse::grpc_status(Code::OutOfRange, "No more")));

    let server = greeter(engine);
    let status = client(&server)
        .server_streaming(&greeting_method(METHOD), json!({ "name": "Tom" }), no_metadata())
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::OutOfRange);
    assert_eq!(status.message(), "No more");
}

#[tokio::test]
async fn test_invalid_value_in_the_stream_is_internal() {
    let engine = StubEngine::new();
    engine.add(rule().respond(BridgeResponse::ok_json(
        r#"{"greeting":"Hi"} {"unknownField":true}"#,
    )));

    let server = greeter(engine);
    let status = client(&server)
        .server_streaming(&greeting_method(METHOD), json!({ "name": "Tom" }), no_metadata())
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Internal);
}

#[tokio::test]
async fn test_bidirectional_methods_are_unimplemented() {
    let engine = StubEngine::new();
    let server = greeter(engine.clone());

    let status = client(&server)
        .bidi(&greeting_method("chat"), vec![json!({ "name": "Tom" })])
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unimplemented);
    assert!(engine.requests().is_empty());
}
