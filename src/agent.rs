//! Agent orchestrator: one conversational turn from user text to a final
//! answer, through retrieval, the model, and the tool loop.
//!
//! A turn runs: retrieve context for the user text (when an embedding
//! provider is configured), assemble the prompt, call the model, execute
//! any tool calls it proposes (bounded by `agent.max_tool_iterations`),
//! and finalize with an AI message carrying accumulated token usage and
//! the citation list. Every failure mode still ends the turn with a
//! message in the session — a turn never leaves the conversation hung.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;

use crate::config::{AgentConfig, Config, RetrievalConfig};
use crate::db;
use crate::embedding::{Embedder, EmbeddingClient};
use crate::error::AgentError;
use crate::llm::{ChatClient, ChatMessage, ChatModel, ToolCall, ToolDefinition};
use crate::mcp::ClientManager;
use crate::models::{
    AgentMessage, AgentState, McpToolResult, MessageKind, SourceReference, TokenUsage,
};
use crate::rerank::rerank;
use crate::session::Sessions;
use crate::store::VectorStore;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a precise assistant. Use the available tools when a \
request needs live data or actions you cannot perform yourself. Keep reasoning brief; answer \
directly.";

const CITATION_RULES: &str = "Answer using the provided context. Every claim drawn from the \
context MUST carry a citation in the form [Source N]. Cite every source you use. If the context \
does not answer the question, say so explicitly before falling back to general knowledge.";

/// What retrieval produced for one turn.
struct RetrievedContext {
    /// Numbered context block for the system prompt.
    block: String,
    /// Citation list, numbered 1..=len in block order.
    sources: Vec<SourceReference>,
    /// Human-readable summary recorded as the RAG_CONTEXT message.
    summary: String,
}

pub struct AgentOrchestrator {
    store: VectorStore,
    sessions: Sessions,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn ChatModel>,
    tools: Arc<ClientManager>,
    retrieval: RetrievalConfig,
    agent: AgentConfig,
}

impl AgentOrchestrator {
    pub fn new(
        store: VectorStore,
        sessions: Sessions,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ChatModel>,
        tools: Arc<ClientManager>,
        retrieval: RetrievalConfig,
        agent: AgentConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            embedder,
            model,
            tools,
            retrieval,
            agent,
        }
    }

    /// Build the whole pipeline from configuration: open the store,
    /// construct the embedding and chat clients, and connect every
    /// enabled tool server. The schema must already exist (`init`).
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(&config.db.path).await?;
        let store = VectorStore::new(pool.clone());
        let sessions = Sessions::new(pool);
        let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingClient::new(&config.embedding)?);
        let model: Arc<dyn ChatModel> = Arc::new(ChatClient::new(&config.model)?);
        let tools = Arc::new(ClientManager::new(config.tools.clone()));
        tools.connect_all().await;

        Ok(Self::new(
            store,
            sessions,
            embedder,
            model,
            tools,
            config.retrieval.clone(),
            config.agent.clone(),
        ))
    }

    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    pub fn tools(&self) -> &ClientManager {
        &self.tools
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn retrieval(&self) -> &RetrievalConfig {
        &self.retrieval
    }

    /// Run one full turn: record the user message, then retrieval, model,
    /// tool loop, finalization. Returns the updated session snapshot.
    pub async fn send_message(&self, session_id: &str, text: &str) -> Result<AgentState> {
        let user = AgentMessage::new(MessageKind::User, text.trim());
        self.sessions.append_message(session_id, &user).await?;

        self.run_turn(session_id, text.trim()).await?;
        self.load_state(session_id).await
    }

    /// Re-run the last user message. The failed attempt's trailing
    /// ERROR/AI messages are dropped first so the retry replaces them
    /// instead of stacking a second answer.
    pub async fn retry_last(&self, session_id: &str) -> Result<AgentState> {
        self.sessions
            .remove_trailing(session_id, &[MessageKind::Error, MessageKind::Ai])
            .await?;

        let messages = self.sessions.messages(session_id).await?;
        let Some(last_user) = messages
            .iter()
            .rev()
            .find(|m| m.kind == MessageKind::User)
            .map(|m| m.content.clone())
        else {
            return self.load_state(session_id).await;
        };

        self.run_turn(session_id, &last_user).await?;
        self.load_state(session_id).await
    }

    /// Session snapshot: replayed messages plus the current tool
    /// catalogue.
    pub async fn load_state(&self, session_id: &str) -> Result<AgentState> {
        let messages = self.sessions.messages(session_id).await?;
        let available_tools = self.tools.catalogue().await;
        Ok(AgentState {
            messages,
            is_loading: false,
            error: None,
            available_tools,
        })
    }

    async fn run_turn(&self, session_id: &str, text: &str) -> Result<()> {
        // Retrieval. Failures never kill the turn; the model just answers
        // without document context.
        let context = if self.embedder.is_enabled() {
            match self.retrieve(text).await {
                Ok(context) => context,
                Err(e) => {
                    eprintln!("Warning: retrieval failed, answering without context: {}", e);
                    None
                }
            }
        } else {
            None
        };

        if let Some(ctx) = &context {
            let rag = AgentMessage::new(MessageKind::RagContext, &ctx.summary);
            self.sessions.append_message(session_id, &rag).await?;
        }

        let history = self.sessions.messages(session_id).await?;
        let mut conversation = self.assemble_prompt(&history, context.as_ref().map(|c| c.block.as_str()));

        let tool_defs: Vec<ToolDefinition> = self
            .tools
            .catalogue()
            .await
            .iter()
            .map(ToolDefinition::from_mcp_tool)
            .collect();

        let sources = context.map(|c| c.sources).unwrap_or_default();
        let mut usage = TokenUsage::default();
        let max_iterations = self.agent.max_tool_iterations;

        for _ in 0..max_iterations {
            let response = match self.model.chat(&conversation, &tool_defs).await {
                Ok(response) => response,
                Err(e) => {
                    let detail = match e.downcast_ref::<AgentError>() {
                        Some(err) => err.to_string(),
                        None => e.to_string(),
                    };
                    let mut error = AgentMessage::new(
                        MessageKind::Error,
                        format!("Error: {}", detail),
                    );
                    if !usage.is_empty() {
                        error.usage = Some(usage);
                    }
                    self.sessions.append_message(session_id, &error).await?;
                    return Ok(());
                }
            };
            usage.add(&response.usage);

            if response.tool_calls.is_empty() {
                // Final answer.
                let answer = response.content.trim().to_string();
                let mut ai = AgentMessage::new(MessageKind::Ai, &answer);
                if !usage.is_empty() {
                    ai.usage = Some(usage);
                }
                if !sources.is_empty() {
                    ai.sources = Some(filter_cited_sources(&answer, &sources));
                }
                self.sessions.append_message(session_id, &ai).await?;
                return Ok(());
            }

            conversation.push(ChatMessage::assistant_tool_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            // Tool calls run one at a time, each fed back before the next
            // model call.
            for call in &response.tool_calls {
                let shown = AgentMessage::new(
                    MessageKind::ToolCall,
                    format!("{}({})", call.name, call.arguments),
                );
                self.sessions.append_message(session_id, &shown).await?;

                let result = self.execute_tool(call).await;

                let feedback = serde_json::json!({
                    "result": result.content,
                    "is_error": result.is_error,
                })
                .to_string();
                conversation.push(ChatMessage::tool_result(&call.id, feedback));

                let recorded =
                    AgentMessage::new(MessageKind::ToolResult, &result.content);
                self.sessions.append_message(session_id, &recorded).await?;
            }
        }

        // Loop exhausted without a final answer.
        let mut error = AgentMessage::new(
            MessageKind::Error,
            format!(
                "Error: Too many function calls in chain (max {})",
                max_iterations
            ),
        );
        if !usage.is_empty() {
            error.usage = Some(usage);
        }
        self.sessions.append_message(session_id, &error).await?;
        Ok(())
    }

    /// Embed the user text and run two-stage retrieval. `Ok(None)` means
    /// nothing relevant was found.
    async fn retrieve(&self, text: &str) -> Result<Option<RetrievedContext>> {
        let query_vec = self.embedder.embed_query(text).await?;
        let candidates = self
            .store
            .search(&query_vec, self.retrieval.initial_top_k as i64)
            .await?;

        if candidates.is_empty() {
            return Ok(None);
        }

        let outcome = rerank(
            candidates,
            self.retrieval.final_top_k,
            self.retrieval.rerank_threshold,
            self.retrieval.score_gap_threshold,
        );
        if outcome.kept.is_empty() {
            return Ok(None);
        }

        let sources: Vec<SourceReference> = outcome
            .kept
            .iter()
            .enumerate()
            .map(|(i, hit)| SourceReference::from_result(i as i64 + 1, hit))
            .collect();

        let block = outcome
            .kept
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                format!(
                    "[Source {}] {} (chunk {}/{}, relevance: {:.0}%)\n{}",
                    i + 1,
                    hit.file_name,
                    hit.chunk_index,
                    hit.total_chunks,
                    hit.similarity * 100.0,
                    hit.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        let mut summary = format!("Found {} relevant chunk(s):\n", outcome.kept.len());
        summary.push_str(
            &outcome
                .kept
                .iter()
                .map(|hit| {
                    format!(
                        "  - {} [chunk {}] sim={:.2}",
                        hit.origin, hit.chunk_index, hit.similarity
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
        );
        let dropped =
            outcome.dropped_below_threshold + outcome.dropped_by_gap + outcome.dropped_by_limit;
        if dropped > 0 {
            summary.push_str(&format!("\n  ({} candidate(s) filtered out)", dropped));
        }

        Ok(Some(RetrievedContext {
            block,
            sources,
            summary,
        }))
    }

    /// System prompt + sanitized history. The context block and its
    /// citation rules go into the system message; history is user/AI
    /// turns only, oldest first, each truncated to `max_message_chars`
    /// and the whole tail capped at `max_history_chars`.
    fn assemble_prompt(
        &self,
        history: &[AgentMessage],
        context_block: Option<&str>,
    ) -> Vec<ChatMessage> {
        let base = self
            .agent
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);

        let system = match context_block {
            Some(block) => format!(
                "{}\n\n{}\n\n<context>\n{}\n</context>",
                base, CITATION_RULES, block
            ),
            None => base.to_string(),
        };

        let mut turns: Vec<ChatMessage> = Vec::new();
        for message in history {
            let content = truncate_chars(&message.content, self.agent.max_message_chars);
            match message.kind {
                MessageKind::User => turns.push(ChatMessage::user(content)),
                MessageKind::Ai => turns.push(ChatMessage::assistant(content)),
                // Tool traffic, context summaries and error banners are
                // conversation record, not model input.
                _ => {}
            }
        }

        // Keep the most recent turns that fit the history budget.
        let mut total = 0usize;
        let mut start = turns.len();
        for (i, turn) in turns.iter().enumerate().rev() {
            let len = turn.content.chars().count();
            if total + len > self.agent.max_history_chars {
                break;
            }
            total += len;
            start = i;
        }

        let mut prompt = Vec::with_capacity(turns.len() + 1);
        prompt.push(ChatMessage::system(system));
        prompt.extend(turns.drain(start..));
        prompt
    }

    /// Run one tool call via the registry. All failure modes collapse to
    /// an is_error result so the model can react instead of the turn
    /// aborting.
    async fn execute_tool(&self, call: &ToolCall) -> McpToolResult {
        let arguments: serde_json::Value = match serde_json::from_str(&call.arguments) {
            Ok(value) => value,
            Err(e) => {
                return McpToolResult {
                    content: format!("Error: malformed tool arguments: {}", e),
                    is_error: true,
                };
            }
        };

        match self.tools.invoke(&call.name, arguments).await {
            Ok(result) => result,
            Err(e) => {
                let detail = match e.downcast_ref::<AgentError>() {
                    Some(err) => err.to_string(),
                    None => e.to_string(),
                };
                McpToolResult {
                    content: format!("Error executing tool: {}", detail),
                    is_error: true,
                }
            }
        }
    }
}

/// Keep the sources the answer actually cites as `[Source N]`. When the
/// answer cites nothing, keep the whole list so callers can still show
/// provenance.
fn filter_cited_sources(answer: &str, sources: &[SourceReference]) -> Vec<SourceReference> {
    let cited = cited_numbers(answer);
    if cited.is_empty() {
        return sources.to_vec();
    }
    sources
        .iter()
        .filter(|s| cited.contains(&s.number))
        .cloned()
        .collect()
}

/// Scan for `[Source N]` markers and collect the Ns.
fn cited_numbers(text: &str) -> BTreeSet<i64> {
    let mut numbers = BTreeSet::new();
    let mut rest = text;
    while let Some(pos) = rest.find("[Source ") {
        rest = &rest[pos + "[Source ".len()..];
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        if !digits.is_empty() && rest[digits.len()..].starts_with(']') {
            if let Ok(n) = digits.parse::<i64>() {
                numbers.insert(n);
            }
        }
    }
    numbers
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
