//! Matching engines for tests.
//!
//! [`StubEngine`] is a tiny rule based stub server: the most recently added rule matching a
//! request answers it, unmatched requests get `404`. Every request is journaled.
//! [`DeferredEngine`] hands requests to the test instead, so the test decides when (and
//! whether) they are answered.
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use stubrpc_core::{BridgeRequest, BridgeResponse, MatchingEngine, Responder};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct StubRule {
    service: String,
    method: String,
    body: Option<serde_json::Value>,
    headers: Vec<(String, String)>,
    response: BridgeResponse,
}

impl StubRule {
    /// A rule for one method, answering `200 {}` until told otherwise.
    pub fn for_method(service: &str, method: &str) -> Self {
        Self {
            service: service.to_string(),
            method: method.to_string(),
            body: None,
            headers: Vec::new(),
            response: BridgeResponse::ok_json("{}"),
        }
    }

    /// Only matches requests whose JSON body equals `body`.
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Only matches requests carrying `key: value`.
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn respond(mut self, response: BridgeResponse) -> Self {
        self.response = response;
        self
    }

    pub fn respond_json(self, body: serde_json::Value) -> Self {
        self.respond(BridgeResponse::ok_json(body.to_string()))
    }

    fn matches(&self, request: &BridgeRequest) -> bool {
        if request.service() != self.service || request.method() != self.method {
            return false;
        }

        let headers_match = self.headers.iter().all(|(key, value)| {
            request
                .headers()
                .get_all(key)
                .iter()
                .any(|candidate| candidate == value)
        });
        if !headers_match {
            return false;
        }

        match &self.body {
            None => true,
            Some(expected) => serde_json::from_str::<serde_json::Value>(request.body())
                .is_ok_and(|actual| actual == *expected),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StubEngine {
    rules: Arc<RwLock<Vec<StubRule>>>,
    journal: Arc<Mutex<Vec<BridgeRequest>>>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, rule: StubRule) {
        self.rules.write().push(rule);
    }

    pub fn clear(&self) {
        self.rules.write().clear();
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<BridgeRequest> {
        self.journal.lock().clone()
    }

    pub fn requests_for(&self, method: &str) -> Vec<BridgeRequest> {
        self.journal
            .lock()
            .iter()
            .filter(|request| request.method() == method)
            .cloned()
            .collect()
    }
}

impl MatchingEngine for StubEngine {
    fn handle(&self, request: BridgeRequest, responder: Responder) {
        let response = self
            .rules
            .read()
            .iter()
            .rev()
            .find(|rule| rule.matches(&request))
            .map(|rule| rule.response.clone())
            .unwrap_or_else(BridgeResponse::not_found);

        self.journal.lock().push(request);
        responder.respond(response);
    }
}

/// Forwards every request, with its responder, to the test.
#[derive(Debug, Clone)]
pub struct DeferredEngine {
    tx: mpsc::UnboundedSender<(BridgeRequest, Responder)>,
}

impl DeferredEngine {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(BridgeRequest, Responder)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MatchingEngine for DeferredEngine {
    fn handle(&self, request: BridgeRequest, responder: Responder) {
        // A closed receiver drops the responder, which cancels the call.
        let _ = self.tx.send((request, responder));
    }
}
