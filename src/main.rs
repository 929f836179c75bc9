use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use swerve_zenoh_runtime::config::DEFAULT_CONFIG_PATH;
use swerve_zenoh_runtime::runtime::{self, RunOptions};

/// Swerve drivetrain runtime over zenoh
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Drivetrain configuration file (TOML)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Command drive velocity closed-loop, whatever the file says
    #[arg(long)]
    closed_loop: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init(); // installs the subscriber globally

    let args = Args::parse();
    let options = RunOptions {
        config_path: args.config,
        closed_loop: args.closed_loop,
    };

    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
