//! mcp-chat-client: command-line client for Model Context Protocol servers
//!
//! Lists what a server offers, or runs an interactive chat in which a language
//! model can call the server's tools.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgGroup, Parser};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use mcp_chat_client::bridge::ToolBridge;
use mcp_chat_client::chat::ChatLoop;
use mcp_chat_client::config::{self, ChatConfig, Config};
use mcp_chat_client::mcp::{ServerCommand, Session};
use mcp_chat_client::members::Members;
use mcp_chat_client::model::{ModelBackend, OpenAiBackend};

/// Command-line client for Model Context Protocol servers.
///
/// Launches the server at SERVER_PATH and either lists its members or starts
/// an AI-powered chat that can call its tools.
#[derive(Parser, Debug)]
#[command(name = "mcp-chat-client")]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("mode").required(true).args(["members", "chat"])))]
struct Args {
    /// Path to the MCP server script
    #[arg(value_name = "SERVER_PATH")]
    server_path: PathBuf,

    /// List the server's tools, prompts and resources
    #[arg(long)]
    members: bool,

    /// Start an AI-powered chat with MCP server integration
    #[arg(long)]
    chat: bool,

    /// Path to configuration file
    #[arg(short, long, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Command used to launch the server (default: inferred from extension)
    #[arg(long, value_name = "CMD")]
    launcher: Option<String>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN, // Default to warn for unknown levels
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
///
/// Logs go to stderr so they never interleave with the chat on stdout.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolves when the process is asked to stop (Ctrl+C, or SIGTERM on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Reads user input until the exit keyword, EOF or a shutdown signal.
async fn run_chat(
    session: Arc<Session>,
    model: Arc<dyn ModelBackend>,
    config: &ChatConfig,
) -> std::io::Result<()> {
    let mut chat = ChatLoop::new(model, Arc::new(ToolBridge::new(session)), config);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("\nMCP Chat Started!");
    println!("Type your questions or '{}' to exit.\n", config.exit_keyword);

    loop {
        print!("You: ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            () = shutdown_signal() => {
                println!();
                break;
            }
        };

        let Some(line) = line else {
            println!();
            break;
        };

        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case(&config.exit_keyword) {
            break;
        }

        let outcome = tokio::select! {
            outcome = chat.send(query) => outcome,
            () = shutdown_signal() => {
                println!();
                break;
            }
        };

        match outcome {
            Ok(outcome) => println!("\nAssistant: {}\n", outcome.transcript()),
            Err(e) => {
                warn!(error = %e, "Turn failed");
                println!("\nError: {e}\n");
            }
        }
    }

    println!("Goodbye!");
    Ok(())
}

/// Connects to the server, runs the selected mode and tears the session down.
async fn run(args: Args, cfg: Config) -> ExitCode {
    let model: Option<Arc<dyn ModelBackend>> = if args.chat {
        match OpenAiBackend::from_config(&cfg.model) {
            Ok(backend) => Some(Arc::new(backend) as Arc<dyn ModelBackend>),
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    let launcher = args.launcher.as_deref().or(cfg.server.launcher.as_deref());
    let command = ServerCommand::for_entry_point(&args.server_path, launcher);
    info!(command = %command, "Connecting to MCP server");

    let session = match Session::connect(&command, cfg.server.session_settings()).await {
        Ok(session) => Arc::new(session),
        Err(e) => {
            error!(error = %e, "Could not connect to MCP server");
            eprintln!("Failed to connect to MCP server: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match model {
        Some(model) => run_chat(Arc::clone(&session), model, &cfg.chat).await,
        None => {
            print!("{}", Members::discover(&session).await.render());
            Ok(())
        }
    };

    session.close().await;

    match result {
        Ok(()) => {
            info!("Client shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Terminal I/O failed");
            ExitCode::FAILURE
        }
    }
}

/// Entry point for the mcp-chat-client binary.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.config.as_deref();
    let cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if let Some(default_path) = config::default_config_path() {
                eprintln!("\nDefault config location: {}", default_path.display());
            }
            return ExitCode::FAILURE;
        }
    };

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        server = %args.server_path.display(),
        "Starting mcp-chat-client"
    );

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(run(args, cfg));

    // A pending stdin read would otherwise hold the runtime open.
    runtime.shutdown_timeout(Duration::from_millis(100));

    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn mode_is_required() {
        assert!(Args::try_parse_from(["mcp-chat-client", "server.py"]).is_err());
        assert!(
            Args::try_parse_from(["mcp-chat-client", "server.py", "--members", "--chat"]).is_err()
        );

        let args = Args::try_parse_from(["mcp-chat-client", "server.py", "--members"]).unwrap();
        assert!(args.members);
        assert!(!args.chat);
    }

    #[test]
    fn log_level_precedence() {
        assert_eq!(get_log_level(0, true, "trace"), Level::ERROR);
        assert_eq!(get_log_level(0, false, "debug"), Level::DEBUG);
        assert_eq!(get_log_level(0, false, "bogus"), Level::WARN);
        assert_eq!(get_log_level(2, false, "error"), Level::DEBUG);
        assert_eq!(get_log_level(5, false, "warn"), Level::TRACE);
    }
}
