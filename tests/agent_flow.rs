//! End-to-end tests for the agent turn loop and the HTTP API.
//!
//! These drive the real orchestrator (SQLite store, sessions, retrieval,
//! citation filtering) against scripted embedding and chat backends, then
//! exercise the same orchestrator through the HTTP server.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use agent_harness::agent::AgentOrchestrator;
use agent_harness::config::{AgentConfig, RetrievalConfig};
use agent_harness::db;
use agent_harness::embedding::Embedder;
use agent_harness::llm::{ChatMessage, ChatModel, ChatResponse, ToolCall, ToolDefinition};
use agent_harness::mcp::ClientManager;
use agent_harness::migrate;
use agent_harness::models::{DocumentChunk, MessageKind, TokenUsage};
use agent_harness::server::run_server_with;
use agent_harness::session::Sessions;
use agent_harness::store::VectorStore;

// ─── Mock backends ──────────────────────────────────────────────────

/// Deterministic embedder: every text maps to the same unit vector, so
/// any embedded chunk matches any query with similarity 1.0.
struct MockEmbedder;

#[async_trait]
impl Embedder for MockEmbedder {
    fn is_enabled(&self) -> bool {
        true
    }

    fn dims(&self) -> usize {
        4
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect())
    }
}

enum ScriptedReply {
    Answer(&'static str),
    CallTool {
        name: &'static str,
        arguments: &'static str,
    },
    Fail(&'static str),
}

/// Chat model that plays back a scripted sequence of replies and counts
/// how many times it was called. An exhausted script keeps answering.
struct ScriptedModel {
    script: Mutex<VecDeque<ScriptedReply>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    fn new(script: Vec<ScriptedReply>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn usage() -> TokenUsage {
        TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> Result<ChatResponse> {
        let call_number = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let reply = self.script.lock().unwrap().pop_front();

        match reply.unwrap_or(ScriptedReply::Answer("Done.")) {
            ScriptedReply::Answer(text) => Ok(ChatResponse {
                content: text.to_string(),
                tool_calls: Vec::new(),
                usage: Self::usage(),
            }),
            ScriptedReply::CallTool { name, arguments } => Ok(ChatResponse {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: format!("call-{}", call_number),
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                }],
                usage: Self::usage(),
            }),
            ScriptedReply::Fail(message) => anyhow::bail!("{}", message),
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Open a fresh SQLite store in `tmp` with the schema applied.
async fn test_store(tmp: &TempDir) -> (VectorStore, Sessions) {
    let pool = db::connect(&tmp.path().join("agent.db")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    (VectorStore::new(pool.clone()), Sessions::new(pool))
}

fn orchestrator_with(
    store: VectorStore,
    sessions: Sessions,
    model: Arc<ScriptedModel>,
    agent: AgentConfig,
) -> AgentOrchestrator {
    AgentOrchestrator::new(
        store,
        sessions,
        Arc::new(MockEmbedder),
        model,
        Arc::new(ClientManager::new(Vec::new())),
        RetrievalConfig::default(),
        agent,
    )
}

/// Index one document and embed its single chunk with the mock vector.
async fn seed_document(store: &VectorStore, name: &str, origin: &str, text: &str) {
    let chunk = DocumentChunk {
        text: text.to_string(),
        chunk_index: 0,
        total_chunks: 1,
    };
    let (_, chunk_ids, _) = store.upsert_file(name, origin, text, &[chunk]).await.unwrap();
    store
        .set_embedding(&chunk_ids[0], &[1.0, 0.0, 0.0, 0.0])
        .await
        .unwrap();
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

// ─── Turn loop tests ────────────────────────────────────────────────

/// Prove the full retrieval path: an embedded chunk is retrieved for the
/// user question, handed to the model as context, and the `[Source 1]`
/// citation in the answer maps back to the indexed file.
#[tokio::test]
async fn test_turn_retrieves_and_cites_sources() {
    let tmp = TempDir::new().unwrap();
    let (store, sessions) = test_store(&tmp).await;
    seed_document(
        &store,
        "notes.md",
        "/srv/notes.md",
        "Ownership moves values; borrows let callers keep them.",
    )
    .await;

    let model = Arc::new(ScriptedModel::new(vec![ScriptedReply::Answer(
        "Ownership transfers the value to the callee [Source 1].",
    )]));
    let orchestrator =
        orchestrator_with(store, sessions, model.clone(), AgentConfig::default());

    let session = orchestrator.sessions().create(None).await.unwrap();
    let state = orchestrator
        .send_message(&session.id, "What does ownership mean?")
        .await
        .unwrap();

    let kinds: Vec<MessageKind> = state.messages.iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![MessageKind::User, MessageKind::RagContext, MessageKind::Ai],
        "Expected user, context, answer; got: {:?}",
        kinds
    );

    let answer = state.messages.last().unwrap();
    assert!(answer.content.contains("[Source 1]"));

    let sources = answer.sources.as_ref().expect("answer should carry sources");
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].number, 1);
    assert_eq!(sources[0].path, "/srv/notes.md");
    assert_eq!(sources[0].total_chunks, 1);
    assert!(sources[0].similarity > 0.99);

    let usage = answer.usage.expect("answer should carry usage");
    assert_eq!(usage.total_tokens, 15);
    assert_eq!(model.calls(), 1);
}

/// Prove the tool loop stops at `max_tool_iterations` and records the
/// limit as an error message instead of looping forever.
#[tokio::test]
async fn test_tool_loop_hits_iteration_limit() {
    let tmp = TempDir::new().unwrap();
    let (store, sessions) = test_store(&tmp).await;

    let model = Arc::new(ScriptedModel::new(vec![
        ScriptedReply::CallTool {
            name: "lookup",
            arguments: "{}",
        },
        ScriptedReply::CallTool {
            name: "lookup",
            arguments: "{}",
        },
    ]));
    let agent = AgentConfig {
        max_tool_iterations: 2,
        ..AgentConfig::default()
    };
    let orchestrator = orchestrator_with(store, sessions, model.clone(), agent);

    let session = orchestrator.sessions().create(None).await.unwrap();
    let state = orchestrator
        .send_message(&session.id, "keep calling tools")
        .await
        .unwrap();

    let last = state.messages.last().unwrap();
    assert_eq!(last.kind, MessageKind::Error);
    assert!(
        last.content
            .contains("Too many function calls in chain (max 2)"),
        "Got: {}",
        last.content
    );
    assert_eq!(model.calls(), 2, "Model should be called once per iteration");

    // Both iterations recorded their tool traffic before the error.
    let tool_results = state
        .messages
        .iter()
        .filter(|m| m.kind == MessageKind::ToolResult)
        .count();
    assert_eq!(tool_results, 2);
}

/// Prove a failing tool call is fed back to the model as an error result
/// rather than aborting the turn; the model still gets to answer.
#[tokio::test]
async fn test_tool_error_fed_back_to_model() {
    let tmp = TempDir::new().unwrap();
    let (store, sessions) = test_store(&tmp).await;

    let model = Arc::new(ScriptedModel::new(vec![
        ScriptedReply::CallTool {
            name: "missing_tool",
            arguments: "{}",
        },
        ScriptedReply::Answer("The tool is unavailable, answering from memory."),
    ]));
    let orchestrator =
        orchestrator_with(store, sessions, model.clone(), AgentConfig::default());

    let session = orchestrator.sessions().create(None).await.unwrap();
    let state = orchestrator
        .send_message(&session.id, "use the missing tool")
        .await
        .unwrap();

    let result = state
        .messages
        .iter()
        .find(|m| m.kind == MessageKind::ToolResult)
        .expect("tool result should be recorded");
    assert!(
        result.content.contains("Error executing tool"),
        "Got: {}",
        result.content
    );
    assert!(result.content.contains("missing_tool"));

    let last = state.messages.last().unwrap();
    assert_eq!(last.kind, MessageKind::Ai);
    assert_eq!(model.calls(), 2);
}

/// Prove malformed tool arguments are caught before dispatch and fed
/// back as an error result.
#[tokio::test]
async fn test_malformed_tool_arguments_fed_back() {
    let tmp = TempDir::new().unwrap();
    let (store, sessions) = test_store(&tmp).await;

    let model = Arc::new(ScriptedModel::new(vec![
        ScriptedReply::CallTool {
            name: "lookup",
            arguments: "not json",
        },
        ScriptedReply::Answer("Handled the bad call."),
    ]));
    let orchestrator = orchestrator_with(store, sessions, model, AgentConfig::default());

    let session = orchestrator.sessions().create(None).await.unwrap();
    let state = orchestrator
        .send_message(&session.id, "call with bad arguments")
        .await
        .unwrap();

    let result = state
        .messages
        .iter()
        .find(|m| m.kind == MessageKind::ToolResult)
        .expect("tool result should be recorded");
    assert!(
        result.content.contains("malformed tool arguments"),
        "Got: {}",
        result.content
    );
    assert_eq!(state.messages.last().unwrap().kind, MessageKind::Ai);
}

/// Prove a model failure ends the turn with an error message in the
/// session instead of an Err from send_message.
#[tokio::test]
async fn test_model_failure_recorded_as_error_message() {
    let tmp = TempDir::new().unwrap();
    let (store, sessions) = test_store(&tmp).await;

    let model = Arc::new(ScriptedModel::new(vec![ScriptedReply::Fail(
        "backend exploded",
    )]));
    let orchestrator = orchestrator_with(store, sessions, model, AgentConfig::default());

    let session = orchestrator.sessions().create(None).await.unwrap();
    let state = orchestrator
        .send_message(&session.id, "hello")
        .await
        .expect("turn should not surface the model failure as Err");

    let last = state.messages.last().unwrap();
    assert_eq!(last.kind, MessageKind::Error);
    assert_eq!(last.content, "Error: backend exploded");
}

/// Prove retry_last drops the failed attempt and replaces it with the
/// new answer instead of stacking a second one.
#[tokio::test]
async fn test_retry_replaces_failed_attempt() {
    let tmp = TempDir::new().unwrap();
    let (store, sessions) = test_store(&tmp).await;

    let model = Arc::new(ScriptedModel::new(vec![
        ScriptedReply::Fail("transient failure"),
        ScriptedReply::Answer("Recovered answer."),
    ]));
    let orchestrator =
        orchestrator_with(store, sessions, model.clone(), AgentConfig::default());

    let session = orchestrator.sessions().create(None).await.unwrap();
    let failed = orchestrator
        .send_message(&session.id, "flaky question")
        .await
        .unwrap();
    assert_eq!(failed.messages.last().unwrap().kind, MessageKind::Error);

    let retried = orchestrator.retry_last(&session.id).await.unwrap();
    let kinds: Vec<MessageKind> = retried.messages.iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![MessageKind::User, MessageKind::Ai],
        "Retry should replace the error, got: {:?}",
        kinds
    );
    assert_eq!(retried.messages.last().unwrap().content, "Recovered answer.");
    assert_eq!(model.calls(), 2);
}

// ─── HTTP API tests ─────────────────────────────────────────────────

/// Prove the session lifecycle over HTTP: create, list, send a message,
/// read the state back, and delete.
#[tokio::test]
async fn test_http_session_flow() {
    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let (store, sessions) = test_store(&tmp).await;

    let model = Arc::new(ScriptedModel::new(vec![ScriptedReply::Answer(
        "Hello from the scripted model.",
    )]));
    let orchestrator = Arc::new(orchestrator_with(
        store,
        sessions,
        model,
        AgentConfig::default(),
    ));

    let bind = format!("127.0.0.1:{}", port);
    let server_handle = tokio::spawn(async move {
        run_server_with(&bind, orchestrator).await.ok();
    });
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    // Health reports the crate version.
    let body: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());

    // No tool servers are configured.
    let body: Value = client
        .get(format!("{}/tools", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["tools"].as_array().unwrap().len(), 0);

    // Create a session without a title → default.
    let resp = client
        .post(format!("{}/sessions", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let session: Value = resp.json().await.unwrap();
    assert_eq!(session["title"], "New Chat");
    let session_id = session["id"].as_str().unwrap().to_string();

    // The session shows up in the listing.
    let body: Value = client
        .get(format!("{}/sessions", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<&str> = body["sessions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&session_id.as_str()));

    // Send a message and get the updated state back.
    let resp = client
        .post(format!("{}/sessions/{}/messages", base, session_id))
        .json(&json!({"content": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let state: Value = resp.json().await.unwrap();
    let messages = state["messages"].as_array().unwrap();
    assert_eq!(messages.first().unwrap()["kind"], "user");
    assert_eq!(messages.last().unwrap()["kind"], "ai");
    assert_eq!(
        messages.last().unwrap()["content"],
        "Hello from the scripted model."
    );

    // Empty content is a bad request.
    let resp = client
        .post(format!("{}/sessions/{}/messages", base, session_id))
        .json(&json!({"content": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    // Unknown session → 404.
    let resp = client
        .get(format!("{}/sessions/not-a-session", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    // Delete, then the session is gone.
    let resp = client
        .delete(format!("{}/sessions/{}", base, session_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    let resp = client
        .delete(format!("{}/sessions/{}", base, session_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    server_handle.abort();
}

/// Prove /search runs the retrieval pipeline and validates its input.
#[tokio::test]
async fn test_http_search() {
    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let (store, sessions) = test_store(&tmp).await;
    seed_document(
        &store,
        "deploy.md",
        "/srv/deploy.md",
        "Roll out to the cluster and verify the health endpoints.",
    )
    .await;

    let model = Arc::new(ScriptedModel::new(Vec::new()));
    let orchestrator = Arc::new(orchestrator_with(
        store,
        sessions,
        model,
        AgentConfig::default(),
    ));

    let bind = format!("127.0.0.1:{}", port);
    let server_handle = tokio::spawn(async move {
        run_server_with(&bind, orchestrator).await.ok();
    });
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    let resp = client
        .post(format!("{}/search", base))
        .json(&json!({"query": "how do we deploy?"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["file_name"], "deploy.md");
    assert!(results[0]["similarity"].as_f64().unwrap() > 0.99);

    // Blank query is a bad request, not an empty result.
    let resp = client
        .post(format!("{}/search", base))
        .json(&json!({"query": "  "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    server_handle.abort();
}
