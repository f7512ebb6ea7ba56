//! Shared fixtures for the EditorLink benchmarks

use std::sync::Arc;

use editorlink_core::{CoalesceError, Outcome, ResponseSink, Waiter};
use serde_json::{json, Value};

/// Sink that accepts every outcome and keeps nothing
pub fn noop_sink() -> Arc<dyn ResponseSink> {
    Arc::new(|_: &str, _: Outcome| -> Result<(), CoalesceError> { Ok(()) })
}

/// `count` waiters sharing one sink, ids `req-0..`
pub fn waiters(count: usize, sink: &Arc<dyn ResponseSink>) -> Vec<Waiter> {
    (0..count)
        .map(|i| Waiter::new(format!("req-{}", i), sink.clone()))
        .collect()
}

/// A read-only query payload with nested fields and incidental ids
pub fn query_payload() -> Value {
    json!({
        "path": "/Game",
        "recursive": true,
        "filter": {"class": "Blueprint", "tags": ["enemy", "boss"]},
        "requestId": "bench",
        "timestamp": 1700000000
    })
}
