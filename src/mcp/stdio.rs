//! Stdio transport: spawn the tool server and speak newline-delimited
//! JSON-RPC over its stdin/stdout. Stderr is inherited so the server's
//! own diagnostics land on our stderr.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

use super::transport::{await_response, PendingCalls, Transport};
use super::{JsonRpcRequest, JsonRpcResponse};
use crate::error::AgentError;

pub struct StdioTransport {
    label: String,
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: std::sync::Mutex<Option<Child>>,
    pending: Arc<PendingCalls>,
    alive: Arc<AtomicBool>,
    closed: AtomicBool,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawn `command` and wire its stdout into the correlation map.
    /// Process exit fails every pending call.
    pub async fn spawn(
        server_id: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            AgentError::TransportUnavailable(format!("failed to spawn '{}': {}", command, e))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            AgentError::TransportUnavailable("child process has no stdin".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            AgentError::TransportUnavailable("child process has no stdout".to_string())
        })?;

        let pending = Arc::new(PendingCalls::new(server_id));
        let alive = Arc::new(AtomicBool::new(true));

        let reader_pending = Arc::clone(&pending);
        let reader_alive = Arc::clone(&alive);
        let reader_label = server_id.to_string();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(line) {
                            Ok(response) => reader_pending.complete(response),
                            Err(e) => eprintln!(
                                "Warning: [{}] unparseable message from server: {}",
                                reader_label, e
                            ),
                        }
                    }
                    // EOF or read error: the process is gone.
                    Ok(None) | Err(_) => break,
                }
            }
            reader_alive.store(false, Ordering::SeqCst);
            reader_pending.fail_all();
        });

        Ok(Self {
            label: server_id.to_string(),
            stdin: tokio::sync::Mutex::new(stdin),
            child: std::sync::Mutex::new(Some(child)),
            pending,
            alive,
            closed: AtomicBool::new(false),
            reader: std::sync::Mutex::new(Some(reader)),
        })
    }

    async fn write_line(&self, req: &JsonRpcRequest) -> Result<()> {
        let line = serde_json::to_string(req)?;
        let mut stdin = self.stdin.lock().await;
        let write = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        if let Err(e) = write.await {
            self.alive.store(false, Ordering::SeqCst);
            bail!(AgentError::TransportUnavailable(format!(
                "write to '{}' failed: {}",
                self.label, e
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(&self, req: JsonRpcRequest, timeout: Duration) -> Result<JsonRpcResponse> {
        if !self.is_alive() {
            bail!(AgentError::TransportUnavailable(format!(
                "stdio transport to '{}' is closed",
                self.label
            )));
        }
        let id = req
            .id
            .ok_or_else(|| anyhow::anyhow!("request requires an id"))?;
        let method = req.method.clone();

        let rx = self.pending.register(id);
        if let Err(e) = self.write_line(&req).await {
            self.pending.forget(id);
            return Err(e);
        }

        await_response(&self.pending, id, rx, timeout, &method).await
    }

    async fn notify(&self, req: JsonRpcRequest) -> Result<()> {
        if !self.is_alive() {
            bail!(AgentError::TransportUnavailable(format!(
                "stdio transport to '{}' is closed",
                self.label
            )));
        }
        self.write_line(&req).await
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

        let child = self.child.lock().ok().and_then(|mut c| c.take());
        if let Some(mut child) = child {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}
