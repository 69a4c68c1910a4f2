//! Core data models used throughout the agent pipeline.
//!
//! These types represent the files, chunks, search results, tool
//! descriptors, and conversation messages that flow between the indexing,
//! retrieval, and agent layers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A slice of source text produced by the chunker.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    pub text: String,
    pub chunk_index: i64,
    pub total_chunks: i64,
}

/// An indexed file (or URL) as stored in SQLite. `origin` is the absolute
/// path or the URL the content was loaded from.
#[derive(Debug, Clone, Serialize)]
pub struct IndexedFile {
    pub id: String,
    pub name: String,
    pub origin: String,
    pub checksum: String,
    pub size_bytes: i64,
    pub chunk_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One retrieval hit: a chunk plus its cosine similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub file_id: String,
    pub file_name: String,
    pub origin: String,
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub text: String,
    pub similarity: f32,
}

/// A numbered citation handed back alongside an agent answer. `path` is the
/// file path or URL the cited chunk came from; `text` is the chunk itself so
/// a caller can show the quoted passage without another lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReference {
    pub number: i64,
    pub path: String,
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub similarity: f32,
    #[serde(default)]
    pub is_url: bool,
    #[serde(default)]
    pub text: String,
}

impl SourceReference {
    pub fn from_result(number: i64, hit: &SearchResult) -> Self {
        Self {
            number,
            path: hit.origin.clone(),
            chunk_index: hit.chunk_index,
            total_chunks: hit.total_chunks,
            similarity: hit.similarity,
            is_url: hit.origin.starts_with("http://") || hit.origin.starts_with("https://"),
            text: hit.text.clone(),
        }
    }
}

/// What role a conversation entry plays. Stored as its snake_case name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Ai,
    ToolCall,
    ToolResult,
    System,
    Error,
    RagContext,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::Ai => "ai",
            MessageKind::ToolCall => "tool_call",
            MessageKind::ToolResult => "tool_result",
            MessageKind::System => "system",
            MessageKind::Error => "error",
            MessageKind::RagContext => "rag_context",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageKind::User),
            "ai" => Some(MessageKind::Ai),
            "tool_call" => Some(MessageKind::ToolCall),
            "tool_result" => Some(MessageKind::ToolResult),
            "system" => Some(MessageKind::System),
            "error" => Some(MessageKind::Error),
            "rag_context" => Some(MessageKind::RagContext),
            _ => None,
        }
    }
}

/// Token counts reported by a model backend for one call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

impl TokenUsage {
    /// Accumulate another call's counts (a turn may span several calls).
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0 && self.prompt_tokens == 0 && self.completion_tokens == 0
    }
}

/// One entry in an agent conversation. AI answers carry the accumulated
/// token usage for the turn and the citation map; other kinds leave both
/// `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub kind: MessageKind,
    pub content: String,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceReference>>,
}

impl AgentMessage {
    pub fn new(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            content: content.into(),
            created_at: chrono::Utc::now().timestamp(),
            usage: None,
            sources: None,
        }
    }
}

/// A stored conversation. `last_message` is a preview of the most recent
/// entry's content, for session listings.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSession {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_message: Option<String>,
    pub message_count: i64,
}

/// Serializable snapshot of one session's conversation, as returned by the
/// session layer and the HTTP API. Failures inside a turn surface here as
/// `Error` messages, not as transport errors.
#[derive(Debug, Clone, Serialize)]
pub struct AgentState {
    pub messages: Vec<AgentMessage>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub available_tools: Vec<McpTool>,
}

/// A tool advertised by a connected MCP server.
#[derive(Debug, Clone, Serialize)]
pub struct McpTool {
    pub server_id: String,
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// The outcome of one tool invocation. `is_error` mirrors the MCP
/// `isError` flag; the orchestrator feeds both shapes back to the model.
#[derive(Debug, Clone)]
pub struct McpToolResult {
    pub content: String,
    pub is_error: bool,
}
