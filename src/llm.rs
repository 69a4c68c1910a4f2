//! Chat model client.
//!
//! Provider-agnostic message types plus an HTTP client for the two
//! supported backends:
//! - **`openai`** — `POST /v1/chat/completions` (or any compatible
//!   server via `model.base_url`).
//! - **`ollama`** — `POST /api/chat` against a local Ollama instance.
//!
//! The [`ChatModel`] trait is the seam the orchestrator depends on, so
//! tests can substitute a scripted model. Transient failures (connect
//! errors, HTTP 429/5xx) get one retry with backoff; anything that still
//! fails surfaces as [`AgentError::ModelCallFailed`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ModelConfig;
use crate::error::AgentError;
use crate::models::{McpTool, TokenUsage};

/// Role of a chat message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation proposed by the model. `arguments` is the raw JSON
/// string as the model produced it; parsing is the caller's problem so
/// malformed arguments can be fed back as an error result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// A tool the model is allowed to call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn from_mcp_tool(tool: &McpTool) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.input_schema.clone(),
        }
    }
}

/// One message in the model conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Tool calls requested by the assistant (only for `Role::Assistant`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Tool call this message answers (only for `Role::Tool`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: &str, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.to_string()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// What came back from one completion.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

/// The seam between the orchestrator and whatever produces completions.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn is_enabled(&self) -> bool;

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse>;
}

/// HTTP-backed chat model dispatching on `model.provider`.
pub struct ChatClient {
    config: ModelConfig,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config: config.clone(),
            client,
        })
    }

    /// POST a completion request, retrying once on 429/5xx/network
    /// errors. `parse` turns the provider's response body into a
    /// [`ChatResponse`].
    async fn post_with_retry(
        &self,
        url: &str,
        api_key: Option<&str>,
        body: &serde_json::Value,
        parse: fn(&serde_json::Value) -> Result<ChatResponse>,
    ) -> Result<ChatResponse> {
        let mut last_err = None;

        for attempt in 0..=1 {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .json(body);
            if let Some(key) = api_key {
                req = req.header("Authorization", format!("Bearer {}", key));
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(format!("chat API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!(AgentError::ModelCallFailed(format!(
                        "chat API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }

        Err(AgentError::ModelCallFailed(
            last_err.unwrap_or_else(|| "chat completion failed after retry".to_string()),
        )
        .into())
    }

    async fn chat_openai(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse> {
        let api_key = std::env::var(&self.config.api_key_env).map_err(|_| {
            AgentError::ModelCallFailed(format!("{} not set", self.config.api_key_env))
        })?;

        let model = self
            .config
            .model
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("model.model required"))?;

        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com");
        let url = format!("{}/v1/chat/completions", base.trim_end_matches('/'));

        let mut body = serde_json::json!({
            "model": model,
            "messages": openai_wire_messages(messages),
        });
        if let Some(t) = self.config.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(n) = self.config.max_tokens {
            body["max_tokens"] = serde_json::json!(n);
        }
        if !tools.is_empty() {
            body["tools"] = serde_json::Value::Array(
                tools.iter().map(openai_wire_tool).collect(),
            );
        }

        self.post_with_retry(&url, Some(&api_key), &body, parse_openai_chat)
            .await
    }

    async fn chat_ollama(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse> {
        let model = self
            .config
            .model
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("model.model required"))?;

        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("http://localhost:11434");
        let url = format!("{}/api/chat", base.trim_end_matches('/'));

        let mut body = serde_json::json!({
            "model": model,
            "messages": ollama_wire_messages(messages),
            "stream": false,
        });
        let mut options = serde_json::Map::new();
        if let Some(t) = self.config.temperature {
            options.insert("temperature".to_string(), serde_json::json!(t));
        }
        if let Some(n) = self.config.max_tokens {
            options.insert("num_predict".to_string(), serde_json::json!(n));
        }
        if !options.is_empty() {
            body["options"] = serde_json::Value::Object(options);
        }
        if !tools.is_empty() {
            body["tools"] = serde_json::Value::Array(
                tools.iter().map(openai_wire_tool).collect(),
            );
        }

        self.post_with_retry(&url, None, &body, parse_ollama_chat)
            .await
    }
}

#[async_trait]
impl ChatModel for ChatClient {
    fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse> {
        match self.config.provider.as_str() {
            "openai" => self.chat_openai(messages, tools).await,
            "ollama" => self.chat_ollama(messages, tools).await,
            "disabled" => bail!(AgentError::ModelCallFailed(
                "no chat model configured (model.provider = \"disabled\")".to_string()
            )),
            other => bail!(AgentError::ModelCallFailed(format!(
                "unknown model provider: {}",
                other
            ))),
        }
    }
}

/// OpenAI wire form: assistant tool calls become
/// `{"id", "type": "function", "function": {"name", "arguments"}}`.
fn openai_wire_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|msg| {
            let mut value = serde_json::json!({
                "role": msg.role,
                "content": msg.content,
            });
            if !msg.tool_calls.is_empty() {
                value["tool_calls"] = serde_json::Value::Array(
                    msg.tool_calls
                        .iter()
                        .map(|tc| {
                            serde_json::json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {"name": tc.name, "arguments": tc.arguments},
                            })
                        })
                        .collect(),
                );
            }
            if let Some(id) = &msg.tool_call_id {
                value["tool_call_id"] = serde_json::json!(id);
            }
            value
        })
        .collect()
}

/// Ollama wire form: tool call arguments are a JSON object, not a string,
/// and calls carry no id.
fn ollama_wire_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|msg| {
            let mut value = serde_json::json!({
                "role": msg.role,
                "content": msg.content,
            });
            if !msg.tool_calls.is_empty() {
                value["tool_calls"] = serde_json::Value::Array(
                    msg.tool_calls
                        .iter()
                        .map(|tc| {
                            let args: serde_json::Value = serde_json::from_str(&tc.arguments)
                                .unwrap_or(serde_json::Value::Null);
                            serde_json::json!({
                                "function": {"name": tc.name, "arguments": args},
                            })
                        })
                        .collect(),
                );
            }
            value
        })
        .collect()
}

fn openai_wire_tool(tool: &ToolDefinition) -> serde_json::Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        },
    })
}

fn parse_openai_chat(json: &serde_json::Value) -> Result<ChatResponse> {
    let message = json["choices"]
        .get(0)
        .map(|c| &c["message"])
        .ok_or_else(|| {
            AgentError::ModelCallFailed("no choices in chat response".to_string())
        })?;

    let content = message["content"].as_str().unwrap_or_default().to_string();

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|tc| {
                    Some(ToolCall {
                        id: tc["id"].as_str().unwrap_or_default().to_string(),
                        name: tc["function"]["name"].as_str()?.to_string(),
                        arguments: tc["function"]["arguments"]
                            .as_str()
                            .unwrap_or("{}")
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        content,
        tool_calls,
        usage: parse_usage(&json["usage"]),
    })
}

fn parse_ollama_chat(json: &serde_json::Value) -> Result<ChatResponse> {
    let message = &json["message"];
    if message.is_null() {
        bail!(AgentError::ModelCallFailed(
            "no message in chat response".to_string()
        ));
    }

    let content = message["content"].as_str().unwrap_or_default().to_string();

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(i, tc)| {
                    Some(ToolCall {
                        // Ollama sends no call ids; synthesize stable ones.
                        id: format!("call_{}", i),
                        name: tc["function"]["name"].as_str()?.to_string(),
                        arguments: tc["function"]["arguments"].to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let prompt_tokens = json["prompt_eval_count"].as_i64().unwrap_or(0);
    let completion_tokens = json["eval_count"].as_i64().unwrap_or(0);

    Ok(ChatResponse {
        content,
        tool_calls,
        usage: TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
    })
}

fn parse_usage(usage: &serde_json::Value) -> TokenUsage {
    TokenUsage {
        prompt_tokens: usage["prompt_tokens"].as_i64().unwrap_or(0),
        completion_tokens: usage["completion_tokens"].as_i64().unwrap_or(0),
        total_tokens: usage["total_tokens"].as_i64().unwrap_or(0),
    }
}
