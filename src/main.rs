#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use lamgate::config::{Config, TransportKind};
use lamgate::dispatch::{ChatOptions, Dispatcher};
use lamgate::error::BridgeError;
use lamgate::maze::{Position, StuckDetector, GENERIC_HINT, MAZE_SYSTEM_PROMPT};
use lamgate::transport::{create_transport, Reply};

const CHAT_SYSTEM_PROMPT: &str = "You are a helpful, concise assistant.";

/// lamgate - session-aware bridge to an LLM inference server.
#[derive(Parser, Debug)]
#[command(name = "lamgate")]
#[command(version)]
#[command(about = "Bridge chat and game callers to an LLM inference server.", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chat with the model through the configured transport
    #[command(long_about = "\
Chat with the model through the configured transport.

Opens a session and either sends a single message (-m) or enters an \
interactive loop. Inside the loop, `/clear` resets the session history \
and `exit` quits.

Examples:
  lamgate chat -m \"hello there\"
  lamgate chat --session support-42")]
    Chat {
        /// Single message mode (don't enter interactive mode)
        #[arg(short, long)]
        message: Option<String>,

        /// Session id; a fresh one is generated when omitted
        #[arg(short, long)]
        session: Option<String>,

        /// System instruction for new sessions
        #[arg(long)]
        system: Option<String>,

        /// History pairs to keep; defaults to limits.chat_history_pairs
        #[arg(long)]
        pairs: Option<usize>,
    },

    /// Ask for a maze hint, with local stuck detection
    #[command(long_about = "\
Ask for a maze hint.

Feeds the reported positions through the stuck detector first. When the \
player is stuck or already at the exit, the hint is produced locally and \
no inference call is made. Otherwise the request goes to the model with \
the maze tool schema attached.

Positions are x,y pairs in report order:
  lamgate hint --session player-1 -p 3,1 -p 3,1 -p 3,1 --exit 8,8")]
    Hint {
        /// Session id for position history and dialog
        #[arg(short, long, default_value = "maze")]
        session: String,

        /// Reported player position, repeatable, oldest first
        #[arg(short = 'p', long = "position")]
        positions: Vec<String>,

        /// Exit coordinates
        #[arg(long)]
        exit: String,

        /// What the player asked
        #[arg(short, long, default_value = "I'm stuck, help me reach the exit.")]
        message: String,
    },

    /// Show effective configuration
    Status,
}

fn parse_point(raw: &str) -> Option<Position> {
    let (x, y) = raw.trim().split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

fn print_reply(reply: &Reply) {
    let content = reply.content_or_empty();
    if !content.is_empty() {
        println!("{content}");
    }
    for call in &reply.function_calls {
        println!("-> {}({})", call.name, call.arguments);
    }
}

/// Render transient failures as something a caller can act on.
fn describe_error(err: &BridgeError) -> String {
    if matches!(err, BridgeError::GateTimeout { .. }) {
        format!("{err}; try again shortly")
    } else {
        err.to_string()
    }
}

fn build_dispatcher(config: &Config) -> Result<Dispatcher> {
    let transport = create_transport(config)?;
    Ok(Dispatcher::new(
        transport,
        config.limits.max_inflight,
        Duration::from_secs(config.limits.gate_timeout_secs),
        lamgate::transport::GenerationParams {
            temperature: config.generation.temperature,
            top_p: config.generation.top_p,
            max_tokens: config.generation.max_tokens,
        },
    ))
}

async fn run_chat(
    config: Config,
    message: Option<String>,
    session: Option<String>,
    system: Option<String>,
    pairs: Option<usize>,
) -> Result<()> {
    let dispatcher = build_dispatcher(&config)?;
    let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let system = system.unwrap_or_else(|| CHAT_SYSTEM_PROMPT.to_string());

    let options = ChatOptions {
        use_tools: false,
        max_history_pairs: Some(pairs.unwrap_or(config.limits.chat_history_pairs)),
    };

    if let Some(message) = message {
        let reply = dispatcher
            .process(&session_id, &system, &message, &options)
            .await?;
        print_reply(&reply);
        return Ok(());
    }

    println!(
        "Session {session_id} - type `exit` to quit, `/clear` to reset, `/history` to review."
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line {
            "" => {}
            "exit" | "quit" => break,
            "/clear" => {
                dispatcher.clear_session(&session_id).await?;
                println!("History cleared.");
            }
            "/history" => {
                for turn in dispatcher.store().dialog(&session_id).await? {
                    println!("[{}] {}", turn.role, turn.content);
                }
                for summary in dispatcher.store().summaries().await {
                    println!(
                        "session {}: {} turns, {} messages since {}",
                        summary.session_id,
                        summary.turns,
                        summary.message_count,
                        summary.created_at.format("%H:%M:%S")
                    );
                }
            }
            _ => match dispatcher.process(&session_id, &system, line, &options).await {
                Ok(reply) => print_reply(&reply),
                Err(err) if err.is_transient() => eprintln!("{}", describe_error(&err)),
                Err(err) => return Err(err.into()),
            },
        }
    }

    Ok(())
}

async fn run_hint(
    config: Config,
    session: String,
    positions: Vec<String>,
    exit_raw: String,
    message: String,
) -> Result<()> {
    let Some(exit) = parse_point(&exit_raw) else {
        println!("{GENERIC_HINT}");
        return Ok(());
    };

    let detector = StuckDetector::new(
        config.maze.stuck_threshold,
        config.maze.position_history_len,
    );

    // Every report goes through the detector; only the latest verdict counts.
    let mut current = None;
    let mut verdict = None;
    for raw in &positions {
        let Some(position) = parse_point(raw) else {
            println!("{GENERIC_HINT}");
            return Ok(());
        };
        current = Some(position);
        verdict = detector.check(&session, position, exit);
    }

    if let Some(hint) = verdict {
        println!("{hint}");
        return Ok(());
    }

    let dispatcher = build_dispatcher(&config)?;

    let prompt = match current {
        Some((x, y)) => format!(
            "{message}\nCurrent position: ({x}, {y}). Exit: ({}, {}).",
            exit.0, exit.1
        ),
        None => format!("{message}\nExit: ({}, {}).", exit.0, exit.1),
    };

    let options = ChatOptions {
        use_tools: true,
        max_history_pairs: Some(config.limits.maze_history_pairs),
    };
    match dispatcher
        .process(&session, MAZE_SYSTEM_PROMPT, &prompt, &options)
        .await
    {
        Ok(reply) => {
            print_reply(&reply);
            Ok(())
        }
        Err(err) if err.is_transient() => {
            eprintln!("{}", describe_error(&err));
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn print_status(config: &Config) {
    println!("lamgate {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Config:       {}", config.config_path.display());
    match config.transport.kind {
        TransportKind::Direct => {
            println!("Transport:    direct");
            println!("Server:       {}", config.direct.server_url);
            println!("Model:        {}", config.direct.model);
            println!(
                "Timeout:      {}s per request",
                config.direct.request_timeout_secs
            );
        }
        TransportKind::Broker => {
            println!("Transport:    broker");
            println!(
                "Broker:       {}:{}",
                config.broker.host, config.broker.port
            );
            println!("Topics:       {}/request, {}/reply",
                config.broker.topic_prefix, config.broker.topic_prefix
            );
            println!(
                "Timeout:      {}s per reply",
                config.broker.reply_timeout_secs
            );
        }
    }
    println!();
    println!("Limits:");
    println!("  In-flight calls:   {}", config.limits.max_inflight);
    println!("  Gate timeout:      {}s", config.limits.gate_timeout_secs);
    println!(
        "  History pairs:     chat {}, maze {}",
        config.limits.chat_history_pairs, config.limits.maze_history_pairs
    );
    println!();
    println!("Maze:");
    println!("  Stuck threshold:   {}", config.maze.stuck_threshold);
    println!(
        "  Position history:  {}",
        config.maze.position_history_len
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(config_dir) = &cli.config_dir {
        if config_dir.trim().is_empty() {
            bail!("--config-dir cannot be empty");
        }
        std::env::set_var("LAMGATE_CONFIG_DIR", config_dir);
    }

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::load_or_init().await?;

    match cli.command {
        Commands::Chat {
            message,
            session,
            system,
            pairs,
        } => run_chat(config, message, session, system, pairs).await,

        Commands::Hint {
            session,
            positions,
            exit,
            message,
        } => run_hint(config, session, positions, exit, message).await,

        Commands::Status => {
            print_status(&config);
            Ok(())
        }
    }
}
