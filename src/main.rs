//! mcp-sdk: reference Model Context Protocol server
//!
//! Serves a small catalogue of tools, resources and prompts over stdio or
//! HTTP with Server-Sent Events.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use mcp_sdk::config::{self, Config, TransportKind};
use mcp_sdk::demo;
use mcp_sdk::mcp::server::shutdown_signal;
use mcp_sdk::mcp::{SseServer, StdioTransport};

/// Reference Model Context Protocol server.
///
/// Exposes an `add` tool, a `countdown` tool, a `greeting://{name}`
/// resource and a `review` prompt.
#[derive(Parser, Debug)]
#[command(name = "mcp-sdk")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Transport to serve (overrides the configuration file)
    #[arg(short, long, value_enum)]
    transport: Option<TransportKind>,

    /// Socket address for the SSE server (overrides the configuration file)
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,

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

/// Initialises the tracing subscriber. Logs go to stderr; stdout is the wire.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the configuration and applies CLI overrides.
fn resolve_config(args: &Args) -> Result<Config, mcp_sdk::error::ConfigError> {
    let mut cfg = config::load_config(args.config.as_deref())?;
    if let Some(kind) = args.transport {
        cfg.transport.kind = kind;
    }
    if let Some(bind) = &args.bind {
        cfg.transport.bind.clone_from(bind);
    }
    cfg.validate()?;
    Ok(cfg)
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    let options = cfg.protocol.server_options();

    match cfg.transport.kind {
        TransportKind::Stdio => {
            let server = demo::build_server(&cfg.server.name, cfg.server.instructions, options)?;
            info!("MCP server ready, waiting for client connection...");
            server.run(Arc::new(StdioTransport::new())).await?;
        }
        TransportKind::Sse => {
            let addr: SocketAddr = cfg
                .transport
                .bind
                .parse()
                .with_context(|| format!("invalid bind address {}", cfg.transport.bind))?;
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("bind {addr}"))?;

            let name = cfg.server.name.clone();
            let instructions = cfg.server.instructions.clone();
            let server = SseServer::new(cfg.transport.sse(), move || {
                demo::build_server(&name, instructions.clone(), options.clone())
            });
            server.serve(listener, shutdown_signal()).await?;
        }
    }
    Ok(())
}

/// Entry point for the mcp-sdk server.
fn main() -> ExitCode {
    let args = Args::parse();

    let cfg = match resolve_config(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if args.config.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nConfiguration is read from: {}", default_path.display());
                }
            }
            return ExitCode::FAILURE;
        }
    };

    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?cfg.transport.kind,
        "Starting mcp-sdk server"
    );

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg)) {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
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
    fn log_level_precedence() {
        assert_eq!(get_log_level(0, true, "trace"), Level::ERROR);
        assert_eq!(get_log_level(0, false, "debug"), Level::DEBUG);
        assert_eq!(get_log_level(0, false, "nonsense"), Level::WARN);
        assert_eq!(get_log_level(2, false, "error"), Level::DEBUG);
    }

    #[test]
    fn cli_overrides_transport() {
        let args = Args::parse_from(["mcp-sdk", "--transport", "sse", "--bind", "127.0.0.1:9000"]);
        assert_eq!(args.transport, Some(TransportKind::Sse));
        assert_eq!(args.bind.as_deref(), Some("127.0.0.1:9000"));
    }
}
