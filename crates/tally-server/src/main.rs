//! tally-server: remote summing shell server.
//!
//! Accepts TCP connections speaking framed CBOR envelopes and runs one
//! line-summing session per opened channel.

mod config;
mod server;
mod session;
mod transport;

use clap::Parser;
use config::{CliOverrides, ServerConfig};
use server::TallyServer;
use std::path::PathBuf;
use tracing::{error, info};

/// tally-server — remote summing shell server
#[derive(Parser, Debug)]
#[command(name = "tally-server", version, about = "Remote summing shell server")]
struct Cli {
    /// Listen address
    #[arg(short, long)]
    bind: Option<String>,

    /// Listen port (default 8022)
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "~/.tally/config.toml")]
    config: String,

    /// Maximum concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Idle timeout in seconds (0 disables)
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Maximum line length in bytes (0 is unbounded)
    #[arg(long)]
    max_line_length: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting tally-server");

    let config_path = PathBuf::from(&cli.config);
    let overrides = CliOverrides {
        bind: cli.bind,
        port: cli.port,
        max_sessions: cli.max_sessions,
        idle_timeout: cli.idle_timeout,
        max_line_length: cli.max_line_length,
    };
    let server_config = match ServerConfig::load(Some(&config_path), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    info!(
        addr = %server_config.listen_addr(),
        max_sessions = server_config.max_sessions,
        idle_timeout = ?server_config.idle_timeout,
        max_line_length = ?server_config.limits.max_line_length,
        "configuration loaded"
    );

    let tally_server = TallyServer::new(server_config);
    let shutdown = tally_server.shutdown_handle();

    let run = tally_server.run();
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        _ = shutdown_signal() => {
            info!("received shutdown signal");
            let _ = shutdown.send(());
            run.await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("tally-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
