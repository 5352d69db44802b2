//! Bench utility that switches one relay through the agent registry and
//! reports the state of the whole board.
use anyhow::Context;
use clap::Parser;
use datafarm::{components::prelude::*, devices::hardware::gpio::SysfsGpio};
use std::{sync::Arc, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Arguments required for starting the program from the command line.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the config file for the grow bed agent.
    #[arg(short, long)]
    filepath: String,
    /// Actuator to switch, i.e. `waterPump`.
    #[arg(short, long)]
    module: String,
    /// `on` or `off`.
    #[arg(short, long)]
    state: ActuatorState,
    /// Seconds to hold the state before releasing every relay.
    #[arg(long)]
    hold: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = AgentConfig::from_file(&args.filepath)
        .with_context(|| format!("failed to load {}", args.filepath))?;
    let registry = ActuatorRegistry::new(
        &config.relays,
        Arc::new(SysfsGpio::new(&config.relays.gpio_root)),
    )?;

    registry.set(&args.module, args.state)?;
    for (name, state) in registry.snapshot() {
        println!("{name:<12} {state}");
    }

    if let Some(hold) = args.hold {
        info!(module = %args.module, hold, "holding");
        tokio::time::sleep(Duration::from_secs(hold)).await;
        registry.all_off();
    }
    Ok(())
}
