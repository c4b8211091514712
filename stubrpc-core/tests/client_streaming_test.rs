use serde_json::{Value, json};
use std::time::Duration;
use stubrpc_core::{BridgeRequest, BridgeResponse, Responder};
use stubrpc_core::status::NOT_FOUND_REASON;
use stubrpc_core::tonic::Code;
use stubrpc_fixtures::schema::GREETING_SERVICE;
use stubrpc_fixtures::{DeferredEngine, StubEngine, StubRule};
use tokio::sync::mpsc;

mod bridge_support;

use bridge_support::{client, greeter, greeting_method, no_metadata};

const METHOD: &str = "manyGreetingsOneReply";

fn rule_for(name: &str) -> StubRule {
    StubRule::for_method(GREETING_SERVICE, METHOD).with_body(json!({ "name": name }))
}

fn names(payloads: &[&str]) -> Vec<Value> {
    payloads.iter().map(|name| json!({ "name": name })).collect()
}

fn dispatched_names(engine: &StubEngine) -> Vec<String> {
    engine
        .requests_for(METHOD)
        .iter()
        .map(|request| request.body().to_string())
        .collect()
}

#[tokio::test]
async fn test_first_matching_message_settles_the_call() {
    let engine = StubEngine::new();
    engine.add(rule_for("B").respond_json(json!({ "greeting": "Hi B" })));
    engine.add(rule_for("C").respond_json(json!({ "greeting": "Hi C" })));

    let server = greeter(engine.clone());
    let reply = client(&server)
        .client_streaming(&greeting_method(METHOD), names(&["A", "B", "C"]), no_metadata())
        .await
        .unwrap();

    assert_eq!(reply.into_inner(), json!({ "greeting": "Hi B" }));
    assert_eq!(
        dispatched_names(&engine),
        vec![r#"{"name":"A"}"#, r#"{"name":"B"}"#]
    );
}

#[tokio::test]
async fn test_unmatched_stream_is_unimplemented() {
    let engine = StubEngine::new();
    let server = greeter(engine.clone());

    let status = client(&server)
        .client_streaming(&greeting_method(METHOD), names(&["A", "B", "C"]), no_metadata())
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unimplemented);
    assert_eq!(status.message(), NOT_FOUND_REASON);
    assert_eq!(
        dispatched_names(&engine),
        vec![r#"{"name":"A"}"#, r#"{"name":"B"}"#, r#"{"name":"C"}"#]
    );
}

#[tokio::test]
async fn test_empty_stream_is_unimplemented() {
    let engine = StubEngine::new();
    let server = greeter(engine.clone());

    let status = client(&server)
        .client_streaming(&greeting_method(METHOD), Vec::new(), no_metadata())
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unimplemented);
    assert!(engine.requests().is_empty());
}

#[tokio::test]
async fn test_error_answer_settles_the_call() {
    let engine = StubEngine::new();
    engine.add(
        rule_for("A").respond(BridgeResponse::grpc_status(Code::Aborted, "Too early")),
    );
    engine.add(rule_for("B").respond_json(json!({ "greeting": "Hi B" })));

    let server = greeter(engine.clone());
    let status = client(&server)
        .client_streaming(&greeting_method(METHOD), names(&["A", "B"]), no_metadata())
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Aborted);
    assert_eq!(status.message(), "Too early");
    assert_eq!(dispatched_names(&engine), vec![r#"{"name":"A"}"#]);
}

#[tokio::test]
async fn test_settling_answer_publishes_its_trailers() {
    let engine = StubEngine::new();
    engine.add(
        rule_for("B").respond(
            BridgeResponse::ok_json(r#"{"greeting":"Hi B"}"#).with_header("x-settled-by", "B"),
        ),
    );

    let server = greeter(engine);
    let reply = client(&server)
        .client_streaming(&greeting_method(METHOD), names(&["A", "B"]), no_metadata())
        .await
        .unwrap();

    let value = reply.metadata().get("x-settled-by").unwrap();
    assert_eq!(value.to_str().unwrap(), "B");
}

#[tokio::test]
async fn test_concurrent_streams_do_not_share_state() {
    let engine = StubEngine::new();
    engine.add(rule_for("left-2").respond_json(json!({ "greeting": "left" })));
    engine.add(rule_for("right-2").respond_json(json!({ "greeting": "right" })));

    let server = greeter(engine.clone());
    let method = greeting_method(METHOD);

    let mut left_client = client(&server);
    let mut right_client = client(&server);

    let (left, right) = tokio::join!(
        left_client.client_streaming(&method, names(&["left-1", "left-2"]), no_metadata()),
        right_client.client_streaming(&method, names(&["right-1", "right-2"]), no_metadata()),
    );

    assert_eq!(left.unwrap().into_inner(), json!({ "greeting": "left" }));
    assert_eq!(right.unwrap().into_inner(), json!({ "greeting": "right" }));
    assert_eq!(engine.requests().len(), 4);
    assert!(server.call_contexts().is_empty());
}

#[tokio::test]
async fn test_every_message_is_dispatched_under_one_call_id() {
    let engine = StubEngine::new();
    let server = greeter(engine.clone());

    let _ = client(&server)
        .client_streaming(&greeting_method(METHOD), names(&["A", "B", "C"]), no_metadata())
        .await;

    let requests = engine.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|r| r.call_id() == requests[0].call_id()));
}

/// Nothing reaches the engine within `window` of (paused) test time.
async fn assert_idle(
    requests: &mut mpsc::UnboundedReceiver<(BridgeRequest, Responder)>,
    window: Duration,
) {
    assert!(
        tokio::time::timeout(window, requests.recv()).await.is_err(),
        "a message was dispatched before the previous one was answered"
    );
}

#[tokio::test(start_paused = true)]
async fn test_next_message_waits_for_the_previous_answer() {
    let (engine, mut requests) = DeferredEngine::new();
    let server = greeter(engine);

    let mut caller = client(&server);
    let call = tokio::spawn(async move {
        caller
            .client_streaming(&greeting_method(METHOD), names(&["A", "B", "C"]), no_metadata())
            .await
    });

    let (first, first_responder) = requests.recv().await.unwrap();
    assert_eq!(first.body(), r#"{"name":"A"}"#);
    assert_idle(&mut requests, Duration::from_millis(500)).await;

    first_responder.respond(BridgeResponse::not_found());

    let (second, second_responder) = requests.recv().await.unwrap();
    assert_eq!(second.body(), r#"{"name":"B"}"#);
    assert_eq!(second.call_id(), first.call_id());
    assert_idle(&mut requests, Duration::from_millis(500)).await;

    second_responder.respond(BridgeResponse::not_found());

    let (third, third_responder) = requests.recv().await.unwrap();
    assert_eq!(third.body(), r#"{"name":"C"}"#);
    third_responder.respond(BridgeResponse::not_found());

    let status = call.await.unwrap().unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);
    assert!(server.call_contexts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_match_after_not_found_settles_the_call() {
    let (engine, mut requests) = DeferredEngine::new();
    let server = greeter(engine);

    let mut caller = client(&server);
    let call = tokio::spawn(async move {
        caller
            .client_streaming(&greeting_method(METHOD), names(&["A", "B", "C"]), no_metadata())
            .await
    });

    let (_, responder) = requests.recv().await.unwrap();
    responder.respond(BridgeResponse::not_found());

    let (second, responder) = requests.recv().await.unwrap();
    assert_eq!(second.body(), r#"{"name":"B"}"#);
    responder.respond(BridgeResponse::ok_json(r#"{"greeting":"Hi B"}"#));

    let reply = call.await.unwrap().unwrap();
    assert_eq!(reply.into_inner(), json!({ "greeting": "Hi B" }));

    // C was read after the latch but never dispatched.
    assert!(requests.try_recv().is_err());
}

#[tokio::test]
async fn test_latch_does_not_depend_on_delivery_order() {
    let engine = StubEngine::new();
    engine.add(rule_for("B").respond_json(json!({ "greeting": "Hi B" })));

    let server = greeter(engine.clone());
    let reply = client(&server)
        .client_streaming(&greeting_method(METHOD), names(&["B", "A", "C"]), no_metadata())
        .await
        .unwrap();

    assert_eq!(reply.into_inner(), json!({ "greeting": "Hi B" }));
    assert_eq!(dispatched_names(&engine), vec![r#"{"name":"B"}"#]);
}
