//! Binary entrypoint for axrelay.
use std::{path::PathBuf, process, result::Result as StdResult, time::Duration};

use axrelay_protocol::QueryKind;
use axrelay_server::{Connection, Error, Result, ServerConfig};
use clap::{Parser, Subcommand};
use logging::{self as logshared, forward};
use ron::ser::{PrettyConfig, to_string_pretty};
use tokio::{runtime::Builder, time::timeout};
use tracing::{debug, error};
use tracing_subscriber::{fmt, prelude::*};

/// How long `query` waits for the server to answer.
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    name = "axrelay",
    about = "Relay application focus and accessibility events",
    version
)]
/// Command-line interface for the `axrelay` binary.
struct Cli {
    /// Subcommand; defaults to `serve`.
    #[command(subcommand)]
    command: Option<Command>,

    /// Socket path (overrides the config file and $AXRELAY_SOCKET)
    #[arg(long)]
    socket: Option<String>,

    /// Path to a RON config file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Focus sampling interval in milliseconds
    #[arg(long, value_name = "MS")]
    poll_ms: Option<u64>,

    /// Logging controls
    #[command(flatten)]
    log: logshared::LogArgs,
}

#[derive(Subcommand, Debug)]
/// Top-level CLI subcommands.
enum Command {
    /// Run the server until interrupted.
    Serve,
    /// Ask a running server for a snapshot and print it.
    Query {
        /// One of: app-focus, focus-status, editor-content
        #[arg(value_parser = parse_query_kind)]
        kind: QueryKind,
    },
}

/// Clap value parser for query kinds.
fn parse_query_kind(s: &str) -> StdResult<QueryKind, String> {
    QueryKind::from_cli(s).ok_or_else(|| {
        format!("unknown query {s:?}; expected app-focus, focus-status or editor-content")
    })
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(logshared::env_filter_from_spec(&cli.log.spec()))
        .with(fmt::layer().without_time())
        .with(forward::layer())
        .try_init()
        .ok();

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            process::exit(2);
        }
    };

    let res = match &cli.command {
        None | Some(Command::Serve) => serve(config),
        Some(Command::Query { kind }) => query(&config.socket_path(), kind.clone()),
    };
    if let Err(e) = res {
        error!("{}", e);
        process::exit(1);
    }
}

/// Config file (if any) with command-line overrides applied.
fn load_config(cli: &Cli) -> Result<ServerConfig> {
    let base = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    base.with_overrides(cli.socket.clone(), cli.poll_ms)
}

#[cfg(target_os = "macos")]
/// Serve using the live accessibility source.
fn serve(config: ServerConfig) -> Result<()> {
    use axrelay_server::Server;
    use mac_ax_source::{MacAxSource, accessibility_ok};
    use tracing::warn;

    if !accessibility_ok() {
        warn!(
            "accessibility permission not granted; enable axrelay under \
             System Settings > Privacy & Security > Accessibility"
        );
    }
    Server::new(config).run(MacAxSource::new)
}

#[cfg(not(target_os = "macos"))]
/// Serving needs the macOS accessibility API.
fn serve(config: ServerConfig) -> Result<()> {
    debug!(socket = %config.socket_path(), "serve requested on unsupported platform");
    Err(Error::Ipc(
        "axrelay serve is only supported on macOS".into(),
    ))
}

/// Connect, request `kind`, and print the reply as RON.
fn query(socket: &str, kind: QueryKind) -> Result<()> {
    let runtime = Builder::new_current_thread().enable_all().build()?;
    let resp = runtime.block_on(async {
        let mut conn = Connection::connect(socket).await?;
        conn.register(&format!("axrelay-query-{}", process::id()))
            .await?;
        debug!(kind = kind.as_str(), "sending request");
        timeout(QUERY_TIMEOUT, conn.request(kind))
            .await
            .map_err(|_| Error::Ipc("timed out waiting for a response".into()))?
    })?;
    let text = to_string_pretty(&resp, PrettyConfig::default())
        .map_err(|e| Error::Serialization(e.to_string()))?;
    println!("{text}");
    Ok(())
}
