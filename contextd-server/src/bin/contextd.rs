//! `contextd` CLI: local operation of the dispatcher (spec §10.1, §10.7).
//! Grounded in the teacher's `memory-cli` (`config` module's load-or-default
//! flow, `commands::health`'s status/components shape), without the
//! teacher's interactive wizard/progressive-setup surface — this spec has
//! no interactive onboarding flow — and without the `colored` crate, which
//! isn't part of this workspace's dependency stack; output is plain text.

use clap::{Parser, Subcommand};
use contextd_server::config;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "contextd")]
#[command(about = "ContextD context service: local operation and diagnostics")]
#[command(version)]
struct Cli {
    /// Configuration file path (spec §6.4). Falls back to
    /// `$CONTEXTD_CONFIG`, then `./contextd.toml`, then built-in defaults.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the configured backend and print its health report.
    Doctor,
    /// Print the resolved configuration and exit.
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    let config = match config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    match cli.command {
        Commands::Config => {
            match toml::to_string_pretty(&config) {
                Ok(rendered) => println!("{rendered}"),
                Err(e) => {
                    eprintln!("failed to render configuration: {e}");
                    return ExitCode::from(2);
                }
            }
            ExitCode::SUCCESS
        }
        Commands::Doctor => run_doctor(&config).await,
    }
}

async fn run_doctor(config: &config::Config) -> ExitCode {
    let dispatcher = match contextd_server::build_dispatcher(config).await {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            eprintln!("initialisation failed: {e}");
            return ExitCode::from(1);
        }
    };

    let summary = contextd_server::health(dispatcher.backend());
    println!("status: {}", summary.status);
    println!(
        "collections: {} healthy, {} corrupt, {} empty ({} total)",
        summary.healthy_count, summary.corrupt_count, summary.empty_count, summary.total
    );
    if !summary.corrupt_ids.is_empty() {
        println!("corrupt: {}", summary.corrupt_ids.join(", "));
    }

    let detail = contextd_server::health_metadata(dispatcher.backend());
    if let Some(circuit) = detail.circuit_state {
        println!("circuit breaker: {circuit:?}");
    }
    if let Some(remote_healthy) = detail.remote_healthy {
        println!("remote reachable: {remote_healthy}");
    }

    if summary.status == "ok" {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
