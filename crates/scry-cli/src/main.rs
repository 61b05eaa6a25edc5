//! scry - terminal client for a deep-research agent backend

mod config;

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use scry_session::{
    AgentMode, ApiClient, ConversationState, Error as SessionError, HttpTransport, Role,
    StreamOutcome, StreamSession,
};
use scry_stream::StreamEvent;

/// scry - converse with a deep-research agent
#[derive(Parser, Debug)]
#[command(name = "scry")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend base URL (overrides config)
    #[arg(long)]
    base_url: Option<String>,

    /// Use the multi-agent research pipeline
    #[arg(long)]
    multi: bool,

    /// Use the single-agent pipeline
    #[arg(long, conflicts_with = "multi")]
    single: bool,

    /// Run one prompt non-interactively and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Resume an existing session by ID
    #[arg(long)]
    resume: Option<String>,

    /// List sessions stored on the backend
    #[arg(long)]
    sessions: bool,

    /// Delete a session by ID
    #[arg(long)]
    delete_session: Option<String>,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scry=debug")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    if args.init_config {
        let path = config::Config::init()?;
        println!("Config file created at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let cfg = config::Config::load();
    let base_url = args.base_url.clone().unwrap_or_else(|| cfg.base_url.clone());
    let api = ApiClient::new(&base_url);

    if args.sessions {
        return list_sessions(&api).await;
    }
    if let Some(id) = &args.delete_session {
        api.delete_session(id).await?;
        println!("Session {} deleted", id);
        return Ok(());
    }

    let mode = if args.single {
        AgentMode::Single
    } else if args.multi || cfg.multi_agent {
        AgentMode::Multi
    } else {
        AgentMode::Single
    };
    let transport = Arc::new(HttpTransport::new(&base_url, mode));

    let mut session = match &args.resume {
        Some(id) => {
            let record = api.get_session(id).await?;
            println!(
                "Resumed \"{}\" ({} messages)\n",
                record.title,
                record.messages.len()
            );
            for message in &record.messages {
                println!("{}: {}\n", role_label(message.role), message.content);
            }
            StreamSession::with_state(transport, ConversationState::from_session(&record))
        }
        None => StreamSession::new(transport),
    };

    if let Some(prompt) = &args.command {
        return Ok(run_turn(&mut session, prompt).await?);
    }

    // Interactive loop: one turn per line, Ctrl-C aborts the active stream.
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if prompt == "/quit" || prompt == "/exit" {
            break;
        }

        if let Err(e) = run_turn(&mut session, prompt).await {
            eprintln!("Error: {}", e);
        }
        println!();
    }

    Ok(())
}

/// Run one conversation turn, rendering snapshots as they are published.
async fn run_turn(session: &mut StreamSession, prompt: &str) -> Result<(), SessionError> {
    let handle = session.handle();
    let mut rx = session.subscribe();

    // Printer task: renders thinking status, tool activity, and text deltas
    // from successive read-only snapshots.
    let printer = tokio::spawn(async move {
        let mut printed = 0usize;
        let mut events_seen = 0usize;
        let mut last_thinking = None;

        loop {
            if rx.changed().await.is_err() {
                break;
            }
            let snapshot = rx.borrow_and_update().clone();

            if snapshot.thinking != last_thinking {
                if let Some(status) = &snapshot.thinking {
                    eprintln!("[{}] {}", status.step.as_str(), status.message);
                }
                last_thinking = snapshot.thinking.clone();
            }

            if let Some(open) = snapshot.transcript.last().filter(|m| m.role == Role::Assistant)
            {
                for event in &open.events[events_seen.min(open.events.len())..] {
                    match event {
                        StreamEvent::ToolCall { content, .. } => {
                            eprintln!("[calling {}]", content.tool);
                        }
                        StreamEvent::ToolResult { content, .. } => {
                            eprintln!("[{} done]", content.tool);
                        }
                        _ => {}
                    }
                }
                events_seen = open.events.len();

                if open.content.len() > printed {
                    print!("{}", &open.content[printed..]);
                    let _ = std::io::stdout().flush();
                    printed = open.content.len();
                }
            }

            if snapshot.terminal {
                break;
            }
        }
    });

    // Abort the stream on Ctrl-C instead of killing the process.
    let abort_handle = handle.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort_handle.abort();
        }
    });

    let result = session.stream(prompt, None).await;
    tracing::debug!(phase = ?handle.phase(), "turn finished");

    ctrl_c.abort();
    // Give the printer a moment to drain the final snapshot.
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    printer.abort();

    match result {
        Ok(StreamOutcome::Completed) => {
            println!();
            Ok(())
        }
        Ok(StreamOutcome::Cancelled) => {
            println!();
            eprintln!("[cancelled]");
            Ok(())
        }
        Err(e) => {
            println!();
            Err(e)
        }
    }
}

async fn list_sessions(api: &ApiClient) -> anyhow::Result<()> {
    let sessions = api.list_sessions().await?;
    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!("{:<38} {:<20} {:<6} Title", "ID", "Updated", "Msgs");
    println!("{}", "-".repeat(90));
    for session in &sessions {
        println!(
            "{:<38} {:<20} {:<6} {}",
            session.session_id,
            session.updated_at.format("%Y-%m-%d %H:%M:%S"),
            session.messages.len(),
            session.title
        );
    }
    println!("\nResume with: scry --resume <session-id>");
    Ok(())
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Assistant => "scry",
        Role::System => "system",
    }
}
