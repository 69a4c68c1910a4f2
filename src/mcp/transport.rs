//! Transport seam and request/response correlation.
//!
//! A transport only knows how to move JSON-RPC messages; matching
//! responses to requests is the same job for every binding, so it lives
//! here. [`PendingCalls`] maps each in-flight request id to a oneshot
//! responder. The binding's background reader completes entries as
//! responses arrive, which means any number of calls can be in flight at
//! once and resolve out of order.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{JsonRpcRequest, JsonRpcResponse};
use crate::error::AgentError;

/// One JSON-RPC connection to a tool server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait up to `timeout` for the matching response.
    /// A timeout fails only this call; the connection stays usable.
    async fn request(&self, req: JsonRpcRequest, timeout: Duration) -> Result<JsonRpcResponse>;

    /// Send a notification. Nothing comes back.
    async fn notify(&self, req: JsonRpcRequest) -> Result<()>;

    /// False once the connection has died or been closed.
    fn is_alive(&self) -> bool;

    /// Tear the connection down, failing anything still in flight.
    /// Idempotent: calling it again is a no-op.
    async fn close(&self);
}

/// In-flight calls awaiting their response, keyed by request id.
pub(crate) struct PendingCalls {
    label: String,
    map: std::sync::Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>,
}

impl PendingCalls {
    pub(crate) fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            map: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Reserve a slot for `id` and hand back the receiver its response
    /// will arrive on.
    pub(crate) fn register(&self, id: i64) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut map) = self.map.lock() {
            map.insert(id, tx);
        }
        rx
    }

    /// Route an incoming message to its waiting call. Server-initiated
    /// notifications are ignored; responses with unknown or missing ids
    /// are dropped with a warning.
    pub(crate) fn complete(&self, response: JsonRpcResponse) {
        if response.id.is_none() && response.method.is_some() {
            return;
        }

        let sender = match response.id {
            Some(id) => self.map.lock().ok().and_then(|mut map| map.remove(&id)),
            None => None,
        };

        match sender {
            // The receiver may already be gone if the call timed out
            // between send and completion; the late response is dropped.
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => {
                eprintln!(
                    "Warning: [{}] dropping response with unknown id {:?}",
                    self.label, response.id
                );
            }
        }
    }

    /// Remove one entry without completing it (timeout cleanup).
    pub(crate) fn forget(&self, id: i64) {
        if let Ok(mut map) = self.map.lock() {
            map.remove(&id);
        }
    }

    /// Drop every pending entry. Waiting callers observe the closed
    /// channel and fail with `TransportUnavailable`.
    pub(crate) fn fail_all(&self) {
        if let Ok(mut map) = self.map.lock() {
            map.clear();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map.lock().map(|map| map.len()).unwrap_or(0)
    }
}

/// Wait for a registered call to complete, enforcing the per-call
/// deadline. On timeout the pending entry is removed so a late response
/// is dropped as unknown.
pub(crate) async fn await_response(
    pending: &PendingCalls,
    id: i64,
    rx: oneshot::Receiver<JsonRpcResponse>,
    timeout: Duration,
    method: &str,
) -> Result<JsonRpcResponse> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(_)) => bail!(AgentError::TransportUnavailable(format!(
            "connection closed while waiting for {}",
            method
        ))),
        Err(_) => {
            pending.forget(id);
            bail!(AgentError::ToolTimeout {
                tool: method.to_string(),
                timeout_secs: timeout.as_secs(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(id: Option<i64>) -> JsonRpcResponse {
        JsonRpcResponse {
            id,
            result: Some(serde_json::json!({"ok": true})),
            error: None,
            method: None,
        }
    }

    #[tokio::test]
    async fn test_complete_routes_to_registered_call() {
        let pending = PendingCalls::new("test");
        let rx = pending.register(1);
        pending.complete(response(Some(1)));

        let got = rx.await.unwrap();
        assert_eq!(got.id, Some(1));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_calls_resolve_out_of_order() {
        let pending = PendingCalls::new("test");
        let rx1 = pending.register(1);
        let rx2 = pending.register(2);

        pending.complete(response(Some(2)));
        pending.complete(response(Some(1)));

        assert_eq!(rx2.await.unwrap().id, Some(2));
        assert_eq!(rx1.await.unwrap().id, Some(1));
    }

    #[tokio::test]
    async fn test_unknown_id_is_dropped() {
        let pending = PendingCalls::new("test");
        let rx = pending.register(1);
        pending.complete(response(Some(99)));

        // The registered call is still waiting.
        assert_eq!(pending.len(), 1);
        drop(rx);
    }

    #[tokio::test]
    async fn test_fail_all_wakes_waiters_with_error() {
        let pending = PendingCalls::new("test");
        let rx = pending.register(1);
        pending.fail_all();
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_entry() {
        let pending = PendingCalls::new("test");
        let rx = pending.register(1);

        let err = await_response(&pending, 1, rx, Duration::from_millis(10), "tools/call")
            .await
            .unwrap_err();
        let agent_err = err.downcast_ref::<AgentError>().unwrap();
        assert_eq!(agent_err.code(), "tool_timeout");
        assert_eq!(pending.len(), 0);

        // A late response for the forgotten id is dropped, not delivered.
        pending.complete(response(Some(1)));
    }

    #[tokio::test]
    async fn test_timeout_leaves_other_calls_in_flight() {
        let pending = PendingCalls::new("test");
        let rx1 = pending.register(1);
        let rx2 = pending.register(2);

        let _ = await_response(&pending, 1, rx1, Duration::from_millis(10), "tools/call").await;
        assert_eq!(pending.len(), 1);

        pending.complete(response(Some(2)));
        assert_eq!(rx2.await.unwrap().id, Some(2));
    }
}
