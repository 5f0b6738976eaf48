#![forbid(unsafe_code)]

//! `app-server-probe`: exercise an app-server peer over stdio.
//!
//! Starts the configured peer, performs the handshake, runs one turn per
//! prompt on a single thread, and prints the reassembled replies.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use app_server_probe::config::ProbeConfig;
use app_server_probe::session::{TurnSession, TurnStatus};
use app_server_probe::{AppError, Result};

const DEFAULT_PROMPT: &str = "Reply with a single sentence: hello";

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "app-server-probe",
    about = "Probe an app-server peer over JSON-RPC stdio",
    version,
    long_about = None
)]
struct Cli {
    /// Optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Peer launch command (overrides `CODEX_APP_SERVER_CMD`).
    #[arg(long)]
    command: Option<String>,

    /// Write every observed message to this JSONL file.
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Log protocol details at debug level.
    #[arg(long)]
    debug: bool,

    /// Turn timeout in seconds (overrides `CODEX_APP_SERVER_TIMEOUT`).
    #[arg(long)]
    timeout: Option<u64>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Prompts to send, one turn each, on the same thread.
    prompts: Vec<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let config = load_config(&args)?;
    init_tracing(args.log_format, config.debug)?;
    info!(command = %config.command, "app-server-probe bootstrap");

    let prompts = if args.prompts.is_empty() {
        vec![DEFAULT_PROMPT.to_owned()]
    } else {
        args.prompts
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(&config, &prompts))
}

fn load_config(args: &Cli) -> Result<ProbeConfig> {
    let mut config = match &args.config {
        Some(path) => ProbeConfig::load_from_path(path)?,
        None => ProbeConfig::default(),
    };
    config.apply_env()?;

    if let Some(command) = &args.command {
        config.command.clone_from(command);
    }
    if let Some(trace) = &args.trace {
        config.trace_path = Some(trace.clone());
    }
    if args.debug {
        config.debug = true;
    }
    if let Some(timeout) = args.timeout {
        config.turn_timeout_seconds = timeout;
    }

    config.validate()?;
    Ok(config)
}

async fn run(config: &ProbeConfig, prompts: &[String]) -> Result<()> {
    println!("Using command: {}", config.command);
    if let Some(path) = &config.trace_path {
        println!("Dumping messages to: {}", path.display());
    }

    let mut session = TurnSession::start(config)?;

    if let Err(err) = session.initialize().await {
        report_failure(&session, &err);
        session.shutdown().await;
        return Err(err);
    }
    let thread_id = match session.start_thread().await {
        Ok(thread_id) => thread_id,
        Err(err) => {
            report_failure(&session, &err);
            session.shutdown().await;
            return Err(err);
        }
    };
    println!("threadId: {thread_id}");

    for prompt in prompts {
        let outcome = match session.run_text_turn(prompt).await {
            Ok(outcome) => outcome,
            Err(err) => {
                report_failure(&session, &err);
                session.shutdown().await;
                return Err(err);
            }
        };

        let reply = if outcome.reply.is_empty() {
            "(empty)"
        } else {
            outcome.reply.as_str()
        };
        println!("reply (streamed): {reply}");

        if outcome.reply.is_empty() && !outcome.observed_methods.is_empty() {
            let methods: Vec<&str> = outcome.observed_methods.iter().map(String::as_str).collect();
            println!("received (turn-related) methods: {}", methods.join(", "));
        }
        if !outcome.is_completed() && outcome.reply.is_empty() {
            match outcome.status {
                TurnStatus::PeerClosed => println!("(peer closed its output before turn/completed)"),
                _ => println!(
                    "(no turn/completed in {}s; the model may be slow or the peer uses different notification names)",
                    config.turn_timeout_seconds
                ),
            }
            println!(
                "(set CODEX_APP_SERVER_DUMP=dump.jsonl and run again to capture raw messages, then inspect for 'turn' or 'item')"
            );
        }
    }

    session.shutdown().await;
    println!("ok");
    Ok(())
}

fn report_failure(session: &TurnSession, err: &AppError) {
    eprintln!("{err}");
    let pending = session.pending_messages();
    if !pending.is_empty() {
        eprintln!("unclaimed messages:");
        for message in pending {
            match serde_json::to_string(&message) {
                Ok(line) => eprintln!("  {line}"),
                Err(encode_err) => eprintln!("  <unencodable message: {encode_err}>"),
            }
        }
    }
}

fn init_tracing(log_format: LogFormat, debug: bool) -> Result<()> {
    let default_directives = if debug {
        "info,app_server_probe=debug"
    } else {
        "info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
