use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tools: Vec<ToolServerConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            min_chunk_size: default_min_chunk_size(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}
fn default_min_chunk_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_initial_top_k")]
    pub initial_top_k: usize,
    #[serde(default = "default_final_top_k")]
    pub final_top_k: usize,
    #[serde(default = "default_initial_threshold")]
    pub initial_threshold: f32,
    #[serde(default = "default_rerank_threshold")]
    pub rerank_threshold: f32,
    #[serde(default = "default_score_gap_threshold")]
    pub score_gap_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            initial_top_k: default_initial_top_k(),
            final_top_k: default_final_top_k(),
            initial_threshold: default_initial_threshold(),
            rerank_threshold: default_rerank_threshold(),
            score_gap_threshold: default_score_gap_threshold(),
        }
    }
}

fn default_initial_top_k() -> usize {
    10
}
fn default_final_top_k() -> usize {
    3
}
fn default_initial_threshold() -> f32 {
    0.3
}
fn default_rerank_threshold() -> f32 {
    0.5
}
fn default_score_gap_threshold() -> f32 {
    0.15
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            base_url: None,
            api_key_env: default_api_key_env(),
            batch_size: 64,
            max_retries: 2,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            base_url: None,
            api_key_env: default_api_key_env(),
            temperature: None,
            max_tokens: None,
            timeout_secs: default_model_timeout_secs(),
        }
    }
}

fn default_model_timeout_secs() -> u64 {
    120
}

impl ModelConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    #[serde(default = "default_max_history_chars")]
    pub max_history_chars: usize,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            max_message_chars: default_max_message_chars(),
            max_history_chars: default_max_history_chars(),
            system_prompt: None,
        }
    }
}

fn default_max_tool_iterations() -> usize {
    10
}
fn default_max_message_chars() -> usize {
    5000
}
fn default_max_history_chars() -> usize {
    50000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// One MCP server entry. `transport` selects the wire binding: `stdio`
/// spawns `command` with `args`/`env`, `sse` connects to `url` (with
/// optional extra request `headers`, e.g. an Authorization token).
#[derive(Debug, Deserialize, Clone)]
pub struct ToolServerConfig {
    pub id: String,
    pub transport: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_enabled() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }

    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be < chunking.chunk_size");
    }

    // Validate retrieval
    if config.retrieval.initial_top_k < 1 {
        anyhow::bail!("retrieval.initial_top_k must be >= 1");
    }

    if config.retrieval.final_top_k < 1 {
        anyhow::bail!("retrieval.final_top_k must be >= 1");
    }

    for (name, value) in [
        ("initial_threshold", config.retrieval.initial_threshold),
        ("rerank_threshold", config.retrieval.rerank_threshold),
        ("score_gap_threshold", config.retrieval.score_gap_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("retrieval.{} must be in [0.0, 1.0]", name);
        }
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    // Validate chat model
    if config.model.is_enabled() && config.model.model.is_none() {
        anyhow::bail!(
            "model.model must be specified when provider is '{}'",
            config.model.provider
        );
    }

    match config.model.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown model provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    // Validate agent limits
    if config.agent.max_tool_iterations < 1 {
        anyhow::bail!("agent.max_tool_iterations must be >= 1");
    }

    // Validate tool servers
    let mut seen_ids = std::collections::HashSet::new();
    for tool in &config.tools {
        if tool.id.is_empty() {
            anyhow::bail!("tools entries must have a non-empty id");
        }
        if !seen_ids.insert(tool.id.as_str()) {
            anyhow::bail!("Duplicate tool server id: '{}'", tool.id);
        }
        match tool.transport.as_str() {
            "stdio" => {
                if tool.command.is_none() {
                    anyhow::bail!("tools.{}: stdio transport requires a command", tool.id);
                }
            }
            "sse" => {
                if tool.url.is_none() {
                    anyhow::bail!("tools.{}: sse transport requires a url", tool.id);
                }
            }
            other => anyhow::bail!(
                "tools.{}: unknown transport '{}'. Must be stdio or sse.",
                tool.id,
                other
            ),
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[db]
path = "agent.db"
"#,
        );

        let config = load_config(&path).unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.retrieval.initial_top_k, 10);
        assert_eq!(config.retrieval.final_top_k, 3);
        assert!(!config.embedding.is_enabled());
        assert!(!config.model.is_enabled());
        assert_eq!(config.agent.max_tool_iterations, 10);
        assert!(config.tools.is_empty());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[db]
path = "agent.db"

[chunking]
chunk_size = 100
overlap = 100
"#,
        );

        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[db]
path = "agent.db"

[embedding]
provider = "openai"
"#,
        );

        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_stdio_tool_requires_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[db]
path = "agent.db"

[[tools]]
id = "files"
transport = "stdio"
"#,
        );

        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("requires a command"));
    }

    #[test]
    fn test_duplicate_tool_ids_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[db]
path = "agent.db"

[[tools]]
id = "files"
transport = "stdio"
command = "mcp-files"

[[tools]]
id = "files"
transport = "sse"
url = "http://localhost:9000/sse"
"#,
        );

        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Duplicate tool server id"));
    }

    #[test]
    fn test_full_config_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[db]
path = "agent.db"

[chunking]
chunk_size = 800
overlap = 100
min_chunk_size = 50

[retrieval]
initial_top_k = 20
final_top_k = 5

[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 768
base_url = "http://localhost:11434"

[model]
provider = "openai"
model = "gpt-4o-mini"
temperature = 0.2

[server]
bind = "127.0.0.1:9090"

[[tools]]
id = "web"
transport = "sse"
url = "http://localhost:8765/sse"
timeout_secs = 10
"#,
        );

        let config = load_config(&path).unwrap();
        assert_eq!(config.chunking.chunk_size, 800);
        assert_eq!(config.retrieval.final_top_k, 5);
        assert_eq!(config.embedding.dims, Some(768));
        assert_eq!(config.model.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(config.tools.len(), 1);
        assert_eq!(config.tools[0].timeout_secs, 10);
        assert!(config.tools[0].enabled);
    }
}
