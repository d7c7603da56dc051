//! tally — client for the remote summing shell.
//!
//! Sends local input to a tally-server session one line at a time and
//! prints the server's output. Exits with the session's exit status.

mod config;
mod session;

use clap::Parser;
use session::{Ending, SessionIo};
use std::path::PathBuf;
use tracing::error;

/// tally — remote summing shell client
#[derive(Parser)]
#[command(name = "tally", version, about = "Sum numbers on a remote tally-server")]
struct Cli {
    /// Server host (default from config, else 127.0.0.1)
    #[arg(long)]
    host: Option<String>,

    /// Server port (default from config, else 8022)
    #[arg(short, long)]
    port: Option<u16>,

    /// Finish with a soft end-of-input marker instead of a clean EOF
    #[arg(long)]
    soft_eof: bool,

    /// Config file path
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so they never mix with the session's output.
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("tally=debug,tally_core=debug")
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("tally=warn")
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let config_path = cli.config.clone().unwrap_or_else(|| {
        let home = dirs::home_dir().unwrap_or_default();
        home.join(".tally").join("client.toml")
    });
    let cfg = match config::Config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("tally: {e:#}");
            std::process::exit(1);
        }
    };

    let host = cli.host.unwrap_or(cfg.default.host);
    let port = cli.port.unwrap_or(cfg.default.port);
    let addr = format!("{host}:{port}");
    let ending = if cli.soft_eof {
        Ending::SoftEof
    } else {
        Ending::Eof
    };

    let io = SessionIo {
        input: tokio::io::BufReader::new(tokio::io::stdin()),
        stdout: tokio::io::stdout(),
        stderr: tokio::io::stderr(),
    };
    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    match session::run(&addr, io, ending, interrupt).await {
        Ok(status) => std::process::exit(i32::try_from(status).unwrap_or(1)),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("tally: {e:#}");
            std::process::exit(1);
        }
    }
}
