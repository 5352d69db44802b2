//! Grow bed agent binary.
use anyhow::Context;
use clap::Parser;
use datafarm::components::prelude::*;
use tracing_subscriber::EnvFilter;

/// Arguments required for starting the program from the command line.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the config file for the grow bed agent.
    #[arg(short, long)]
    filepath: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = AgentConfig::from_file(&args.filepath)
        .with_context(|| format!("failed to load {}", args.filepath))?;
    GrowBedAgentController::start(config).await?;
    Ok(())
}
