//! `ask`, `chat`, `sessions`, and `tools` subcommands: the agent surface
//! of the CLI.
//!
//! `ask` runs one turn in a fresh session and exits; `chat` is a REPL
//! over a persistent session. Both print the turn's tool activity and
//! the answer's citation list. Turn failures are recorded in the session
//! as error messages, so the conversation survives a bad turn.

use std::io::Write;

use anyhow::{bail, Result};

use crate::agent::AgentOrchestrator;
use crate::config::Config;
use crate::mcp::ClientManager;
use crate::models::{AgentState, MessageKind};
use crate::session::Sessions;

/// One-shot agent turn: new session titled after the question.
pub async fn run_ask(orchestrator: &AgentOrchestrator, question: &str) -> Result<()> {
    let session = orchestrator.sessions().create(Some(question)).await?;
    let state = orchestrator.send_message(&session.id, question).await;
    orchestrator.tools().close_all().await;

    let state = state?;
    print_turn(&state);

    if let Some(last) = state.messages.last() {
        if last.kind == MessageKind::Error {
            bail!("{}", last.content.trim_start_matches("Error: "));
        }
    }
    Ok(())
}

/// Interactive REPL over a session. Without `--session` a new one is
/// created; with it, the prior conversation is replayed first. Reads
/// stdin line by line, so it also works piped.
pub async fn run_chat(orchestrator: &AgentOrchestrator, session_id: Option<String>) -> Result<()> {
    let session = match session_id {
        Some(id) => match orchestrator.sessions().get(&id).await? {
            Some(session) => session,
            None => bail!("No session with id '{}'", id),
        },
        None => orchestrator.sessions().create(None).await?,
    };

    let interactive = atty::is(atty::Stream::Stdin);

    if interactive {
        println!("Agent chat — session {}", session.id);
        println!("Type a message, or 'exit' to quit.");
        println!();
    }

    if session.message_count > 0 {
        let state = orchestrator.load_state(&session.id).await?;
        replay(&state);
    }

    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        if interactive {
            print!("> ");
            std::io::stdout().flush()?;
        }
        line.clear();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "exit" || text == "quit" {
            break;
        }

        let state = orchestrator.send_message(&session.id, text).await?;
        print_turn(&state);
        if let Some(last) = state.messages.last() {
            if last.kind == MessageKind::Error {
                println!("{}", last.content);
            }
        }
        if interactive {
            println!();
        }
    }

    orchestrator.tools().close_all().await;
    Ok(())
}

/// List stored sessions, or delete one with `--rm`.
pub async fn run_sessions(sessions: &Sessions, rm: Option<String>) -> Result<()> {
    if let Some(id) = rm {
        if sessions.delete(&id).await? {
            println!("deleted session {}", id);
            return Ok(());
        }
        bail!("No session with id '{}'", id);
    }

    let all = sessions.list().await?;
    if all.is_empty() {
        println!("No sessions.");
        return Ok(());
    }

    println!(
        "{:<38} {:<30} {:>8}   {}",
        "ID", "TITLE", "MESSAGES", "UPDATED"
    );
    for session in &all {
        println!(
            "{:<38} {:<30} {:>8}   {}",
            session.id,
            truncate(&session.title, 30),
            session.message_count,
            format_ts(session.updated_at)
        );
    }

    Ok(())
}

/// Connect to every configured MCP server and print the aggregated tool
/// catalogue. `--reload` forces a fresh discovery pass after connecting.
pub async fn run_tools(config: &Config, reload: bool) -> Result<()> {
    if config.tools.is_empty() {
        println!("No tool servers configured. Add [[tools]] entries to the config.");
        return Ok(());
    }

    let manager = ClientManager::new(config.tools.clone());
    manager.connect_all().await;
    if reload {
        manager.reload().await;
    }

    let catalogue = manager.catalogue().await;
    let errors = manager.connect_errors().await;

    for server in &config.tools {
        if !server.enabled {
            println!("{} ({}) — disabled", server.id, server.transport);
            continue;
        }
        if let Some(err) = errors.get(&server.id) {
            println!("{} ({}) — unreachable: {}", server.id, server.transport, err);
            continue;
        }
        let tools: Vec<_> = catalogue
            .iter()
            .filter(|t| t.server_id == server.id)
            .collect();
        println!(
            "{} ({}) — {} tool(s)",
            server.id,
            server.transport,
            tools.len()
        );
        for tool in tools {
            println!("  {:<24} {}", tool.name, tool.description);
        }
    }

    manager.close_all().await;
    Ok(())
}

/// Print everything the last turn appended: retrieval summary, tool
/// calls, and the answer with its sources. Errors are left to the caller
/// so `ask` can turn them into a non-zero exit.
fn print_turn(state: &AgentState) {
    let start = state
        .messages
        .iter()
        .rposition(|m| m.kind == MessageKind::User)
        .map(|i| i + 1)
        .unwrap_or(0);

    for message in &state.messages[start..] {
        match message.kind {
            MessageKind::RagContext => {
                for line in message.content.lines() {
                    println!("  {}", line);
                }
            }
            MessageKind::ToolCall => println!("  [tool] {}", message.content),
            MessageKind::Ai => {
                println!("{}", message.content);
                if let Some(sources) = &message.sources {
                    if !sources.is_empty() {
                        println!();
                        println!("Sources:");
                        for source in sources {
                            println!(
                                "  [{}] {} (chunk {}/{}, {:.0}%)",
                                source.number,
                                source.path,
                                source.chunk_index + 1,
                                source.total_chunks,
                                source.similarity * 100.0
                            );
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

/// Replay a resumed session's user/AI exchange.
fn replay(state: &AgentState) {
    for message in &state.messages {
        match message.kind {
            MessageKind::User => println!("> {}", message.content),
            MessageKind::Ai | MessageKind::Error => println!("{}", message.content),
            _ => {}
        }
    }
    println!();
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
