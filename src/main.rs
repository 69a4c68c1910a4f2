//! # Agent Harness CLI (`agt`)
//!
//! The `agt` binary is the primary interface for Agent Harness. It provides
//! commands for database initialization, document indexing, retrieval,
//! embedding management, agent conversations, and starting the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! agt --config ./config/agent.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `agt init` | Create the SQLite database and run schema migrations |
//! | `agt index <paths…>` | Index files, directories, and URLs |
//! | `agt files` | List indexed files |
//! | `agt forget <key>` | Remove one indexed file |
//! | `agt stats` | Index summary (files, chunks, embedding coverage) |
//! | `agt embed pending` | Backfill missing embedding vectors |
//! | `agt embed rebuild` | Delete and regenerate all embeddings |
//! | `agt search "<query>"` | Retrieval only, with scores |
//! | `agt ask "<question>"` | One agent turn in a fresh session |
//! | `agt chat` | Interactive REPL over a persistent session |
//! | `agt sessions` | List or delete stored sessions |
//! | `agt tools` | Connect to MCP servers and print the tool catalogue |
//! | `agt serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! agt init --config ./config/agent.toml
//!
//! # Index a docs directory and one web page
//! agt index ./docs --url https://example.com/runbook
//!
//! # Retrieval with scores
//! agt search "deployment checklist" --k 5
//!
//! # One-shot question with citations
//! agt ask "how do we roll back a deploy?"
//!
//! # Resume a stored conversation
//! agt chat --session 6fa1c0de-…
//!
//! # Start the HTTP API for a front-end
//! agt serve --config ./config/agent.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use agent_harness::agent::AgentOrchestrator;
use agent_harness::embedding::EmbeddingClient;
use agent_harness::session::Sessions;
use agent_harness::store::VectorStore;
use agent_harness::{
    agent_cmd, config, db, embed_cmd, files_cmd, ingest, migrate, search, server, stats,
};

/// Agent Harness CLI — a local-first retrieval-augmented agent pipeline.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Database, chunking, retrieval, embedding, model, and tool server
/// settings are read from this file.
#[derive(Parser)]
#[command(
    name = "agt",
    about = "Agent Harness — a local-first retrieval-augmented agent pipeline",
    version,
    long_about = "Agent Harness indexes documents into a SQLite vector store, retrieves and \
    reranks chunks for a query, and drives a tool-calling chat loop over MCP servers. Answers \
    carry numbered [Source N] citations mapping to the chunks that backed them."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/agent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (files,
    /// chunks, sessions, messages). This command is idempotent — running
    /// it multiple times is safe.
    Init,

    /// Index files, directories, and web pages.
    ///
    /// Directories are walked recursively, honoring the `[indexing]`
    /// include/exclude globs. Re-indexing an unchanged file is a no-op
    /// (checksums decide). Chunks are embedded inline when an embedding
    /// provider is configured; anything that fails stays pending for
    /// `agt embed pending`.
    Index {
        /// Files and directories to index.
        #[arg(required_unless_present = "urls")]
        paths: Vec<PathBuf>,

        /// Web pages to fetch, convert to text, and index.
        #[arg(long = "url")]
        urls: Vec<String>,
    },

    /// List indexed files with chunk counts.
    Files,

    /// Remove one indexed file and its chunks.
    Forget {
        /// Origin path/URL, file name, or id of the file to remove.
        key: String,
    },

    /// Show index statistics (files, chunks, embedding coverage).
    Stats,

    /// Manage embedding vectors.
    ///
    /// Requires an embedding provider (`[embedding]` in config).
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Search indexed documents (retrieval only, no agent).
    ///
    /// Embeds the query, runs cosine search over the store, then the
    /// rerank filter. Prints hits with similarity scores and excerpts.
    Search {
        /// The search query string.
        query: String,

        /// Number of results to return (overrides `retrieval.final_top_k`).
        #[arg(long)]
        k: Option<usize>,

        /// Skip the rerank filter and return raw similarity order.
        #[arg(long)]
        no_rerank: bool,
    },

    /// Ask one question: a full agent turn in a fresh session.
    ///
    /// Retrieves context, runs the model (and any tool calls it makes),
    /// and prints the answer with its `[Source N]` citation list.
    Ask {
        /// The question to ask.
        question: String,
    },

    /// Interactive chat REPL over a persistent session.
    ///
    /// Without `--session` a new session is created; with it, the stored
    /// conversation is replayed and continued. Reads stdin line by line,
    /// so it also works piped. Type `exit` to quit.
    Chat {
        /// Resume an existing session by id.
        #[arg(long)]
        session: Option<String>,
    },

    /// List stored sessions, or delete one.
    Sessions {
        /// Delete the session with this id (and its messages).
        #[arg(long)]
        rm: Option<String>,
    },

    /// Connect to configured MCP servers and print the tool catalogue.
    Tools {
        /// Force a fresh tool discovery pass after connecting.
        #[arg(long)]
        reload: bool,
    },

    /// Start the HTTP API.
    ///
    /// Binds to `[server].bind` and serves sessions, turns, retrieval,
    /// and the tool catalogue as JSON. Run `agt init` first.
    Serve,
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed every chunk still missing a vector.
    Pending,

    /// Delete and regenerate all embeddings.
    ///
    /// Useful when switching embedding models or dimensions.
    Rebuild,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index { paths, urls } => {
            let store = open_store(&cfg).await?;
            let embedder = EmbeddingClient::new(&cfg.embedding)?;
            ingest::run_index(&cfg, &store, &embedder, &paths, &urls).await?;
        }
        Commands::Files => {
            let store = open_store(&cfg).await?;
            files_cmd::run_files(&store).await?;
        }
        Commands::Forget { key } => {
            let store = open_store(&cfg).await?;
            files_cmd::run_forget(&store, &key).await?;
        }
        Commands::Stats => {
            let store = open_store(&cfg).await?;
            stats::run_stats(&cfg, &store).await?;
        }
        Commands::Embed { action } => {
            let store = open_store(&cfg).await?;
            let embedder = EmbeddingClient::new(&cfg.embedding)?;
            match action {
                EmbedAction::Pending => {
                    embed_cmd::run_embed_pending(&cfg, &store, &embedder).await?;
                }
                EmbedAction::Rebuild => {
                    embed_cmd::run_embed_rebuild(&cfg, &store, &embedder).await?;
                }
            }
        }
        Commands::Search {
            query,
            k,
            no_rerank,
        } => {
            let store = open_store(&cfg).await?;
            let embedder = EmbeddingClient::new(&cfg.embedding)?;
            search::run_search(&cfg.retrieval, &store, &embedder, &query, k, no_rerank).await?;
        }
        Commands::Ask { question } => {
            if !cfg.model.is_enabled() {
                anyhow::bail!("Chat model is disabled. Set [model] provider in config.");
            }
            let orchestrator = AgentOrchestrator::from_config(&cfg).await?;
            agent_cmd::run_ask(&orchestrator, &question).await?;
        }
        Commands::Chat { session } => {
            if !cfg.model.is_enabled() {
                anyhow::bail!("Chat model is disabled. Set [model] provider in config.");
            }
            let orchestrator = AgentOrchestrator::from_config(&cfg).await?;
            agent_cmd::run_chat(&orchestrator, session).await?;
        }
        Commands::Sessions { rm } => {
            let pool = db::connect(&cfg.db.path).await?;
            let sessions = Sessions::new(pool);
            agent_cmd::run_sessions(&sessions, rm).await?;
        }
        Commands::Tools { reload } => {
            agent_cmd::run_tools(&cfg, reload).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn open_store(cfg: &config::Config) -> anyhow::Result<VectorStore> {
    let pool = db::connect(&cfg.db.path).await?;
    Ok(VectorStore::new(pool))
}
