//! # Agent Harness
//!
//! A local-first retrieval-augmented agent pipeline.
//!
//! Agent Harness indexes documents (files, directories, web pages) into a
//! SQLite vector store, retrieves and reranks chunks for a query, and drives
//! a tool-calling chat loop over MCP servers — answers come back with
//! numbered `[Source N]` citations mapping to the chunks that backed them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │  Documents  │──▶│  Pipeline    │──▶│  SQLite   │
//! │ files/URLs  │   │ Chunk+Embed │   │ vectors   │
//! └─────────────┘   └─────────────┘   └────┬─────┘
//!                                          │ retrieve + rerank
//!                                          ▼
//! ┌─────────────┐   ┌──────────────────────────────┐
//! │ MCP servers │◀─▶│     Agent orchestrator        │
//! │ stdio / SSE │   │ prompt · tool loop · citations│
//! └─────────────┘   └──────┬───────────────┬───────┘
//!                          ▼               ▼
//!                     ┌──────────┐   ┌──────────┐
//!                     │   CLI    │   │   HTTP   │
//!                     │  (agt)   │   │  (axum)  │
//!                     └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! agt init                      # create database
//! agt index ./docs              # chunk + embed local files
//! agt embed pending             # backfill missing vectors
//! agt search "deployment"       # retrieval only, with scores
//! agt ask "how do we deploy?"   # one agent turn with citations
//! agt serve                     # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`chunk`] | Text chunking with overlap |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | SQLite vector store |
//! | [`rerank`] | Second-stage retrieval filter |
//! | [`search`] | Query pipeline (embed, search, rerank) |
//! | [`ingest`] | File/directory/URL indexing |
//! | [`llm`] | Chat model abstraction (tool calling) |
//! | [`mcp`] | MCP client stack (stdio + SSE transports) |
//! | [`agent`] | Agent orchestrator (turns, tool loop, citations) |
//! | [`session`] | Conversation persistence |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod agent;
pub mod agent_cmd;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod files_cmd;
pub mod ingest;
pub mod llm;
pub mod mcp;
pub mod migrate;
pub mod models;
pub mod rerank;
pub mod search;
pub mod server;
pub mod session;
pub mod stats;
pub mod store;
