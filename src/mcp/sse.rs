//! SSE transport: responses arrive on a long-lived `GET {base}/sse` event
//! stream, requests go out as plain HTTP POSTs.
//!
//! The server's first `endpoint` event names the POST target (relative
//! paths are resolved against the base URL); `message` events carry
//! JSON-RPC responses; comment lines (`:`) are keepalives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::transport::{await_response, PendingCalls, Transport};
use super::{JsonRpcRequest, JsonRpcResponse};
use crate::error::AgentError;

const ENDPOINT_WAIT_SECS: u64 = 10;

pub struct SseTransport {
    label: String,
    client: reqwest::Client,
    headers: HashMap<String, String>,
    endpoint: Arc<std::sync::RwLock<Option<String>>>,
    pending: Arc<PendingCalls>,
    alive: Arc<AtomicBool>,
    closed: AtomicBool,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    /// Open the event stream and wait for the server's `endpoint` event.
    pub async fn connect(
        server_id: &str,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Self> {
        let base = url.trim_end_matches('/').to_string();
        let sse_url = format!("{}/sse", base);

        // No request timeout here: the stream stays open for the life of
        // the connection.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(ENDPOINT_WAIT_SECS))
            .build()?;

        let mut get = client
            .get(&sse_url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache");
        for (key, value) in headers {
            get = get.header(key.as_str(), value.as_str());
        }

        let response = get.send().await.map_err(|e| {
            AgentError::TransportUnavailable(format!("SSE connect to {} failed: {}", sse_url, e))
        })?;
        if !response.status().is_success() {
            bail!(AgentError::TransportUnavailable(format!(
                "SSE connect to {} failed: HTTP {}",
                sse_url,
                response.status()
            )));
        }

        let pending = Arc::new(PendingCalls::new(server_id));
        let alive = Arc::new(AtomicBool::new(true));
        let endpoint = Arc::new(std::sync::RwLock::new(None));
        let (endpoint_tx, endpoint_rx) = oneshot::channel();

        let reader = tokio::spawn(read_event_stream(
            response,
            base,
            server_id.to_string(),
            Arc::clone(&pending),
            Arc::clone(&alive),
            Arc::clone(&endpoint),
            endpoint_tx,
        ));

        let transport = Self {
            label: server_id.to_string(),
            client,
            headers: headers.clone(),
            endpoint,
            pending,
            alive,
            closed: AtomicBool::new(false),
            reader: std::sync::Mutex::new(Some(reader)),
        };

        match tokio::time::timeout(Duration::from_secs(ENDPOINT_WAIT_SECS), endpoint_rx).await {
            Ok(Ok(_)) => Ok(transport),
            _ => {
                transport.close().await;
                bail!(AgentError::TransportUnavailable(format!(
                    "server at {} did not send an endpoint event within {}s",
                    sse_url, ENDPOINT_WAIT_SECS
                )))
            }
        }
    }

    async fn post(&self, req: &JsonRpcRequest) -> Result<()> {
        let endpoint = self
            .endpoint
            .read()
            .ok()
            .and_then(|e| e.clone())
            .ok_or_else(|| {
                AgentError::TransportUnavailable(format!(
                    "no message endpoint for '{}'",
                    self.label
                ))
            })?;

        let mut post = self.client.post(&endpoint).json(req);
        for (key, value) in &self.headers {
            post = post.header(key.as_str(), value.as_str());
        }

        let response = post.send().await.map_err(|e| {
            AgentError::TransportUnavailable(format!("POST to '{}' failed: {}", self.label, e))
        })?;
        if !response.status().is_success() {
            bail!(AgentError::TransportUnavailable(format!(
                "POST to '{}' failed: HTTP {}",
                self.label,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn request(&self, req: JsonRpcRequest, timeout: Duration) -> Result<JsonRpcResponse> {
        if !self.is_alive() {
            bail!(AgentError::TransportUnavailable(format!(
                "SSE transport to '{}' is closed",
                self.label
            )));
        }
        let id = req
            .id
            .ok_or_else(|| anyhow::anyhow!("request requires an id"))?;
        let method = req.method.clone();

        let rx = self.pending.register(id);
        if let Err(e) = self.post(&req).await {
            self.pending.forget(id);
            return Err(e);
        }

        await_response(&self.pending, id, rx, timeout, &method).await
    }

    async fn notify(&self, req: JsonRpcRequest) -> Result<()> {
        if !self.is_alive() {
            bail!(AgentError::TransportUnavailable(format!(
                "SSE transport to '{}' is closed",
                self.label
            )));
        }
        self.post(&req).await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.alive.store(false, Ordering::SeqCst);
        self.pending.fail_all();
        if let Some(handle) = self.reader.lock().ok().and_then(|mut r| r.take()) {
            handle.abort();
        }
    }
}

/// Consume the event stream line by line, resolving the endpoint and
/// routing `message` events into the correlation map.
async fn read_event_stream(
    mut response: reqwest::Response,
    base: String,
    label: String,
    pending: Arc<PendingCalls>,
    alive: Arc<AtomicBool>,
    endpoint: Arc<std::sync::RwLock<Option<String>>>,
    endpoint_tx: oneshot::Sender<()>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut buf: Vec<u8> = Vec::new();
    let mut current_event: Option<String> = None;

    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                eprintln!("Warning: [{}] SSE stream error: {}", label, e);
                break;
            }
        };
        buf.extend_from_slice(&chunk);

        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                current_event = None;
            } else if let Some(event) = line.strip_prefix("event:") {
                current_event = Some(event.trim().to_string());
            } else if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if data.is_empty() {
                    continue;
                }
                match current_event.as_deref() {
                    Some("endpoint") => {
                        let resolved = if data.starts_with('/') {
                            format!("{}{}", base, data)
                        } else {
                            data.to_string()
                        };
                        if let Ok(mut slot) = endpoint.write() {
                            *slot = Some(resolved);
                        }
                        if let Some(tx) = endpoint_tx.take() {
                            let _ = tx.send(());
                        }
                    }
                    // `message` events and bare data both carry JSON-RPC.
                    _ => match serde_json::from_str::<JsonRpcResponse>(data) {
                        Ok(parsed) => pending.complete(parsed),
                        Err(e) => eprintln!(
                            "Warning: [{}] unparseable SSE message: {}",
                            label, e
                        ),
                    },
                }
            }
            // Comment/keepalive lines (":...") are ignored.
        }
    }

    alive.store(false, Ordering::SeqCst);
    pending.fail_all();
}
