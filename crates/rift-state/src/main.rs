//! rift-state CLI
//!
//! Validates a state configuration file and optionally replays recorded
//! exchanges through it, printing the resulting store as JSON.
//!
//! Usage:
//!   rift-state --config state.yaml [--replay exchanges.json]

use anyhow::Context as _;
use clap::Parser;
use rift_state::config::StateConfig;
use rift_state::hooks::HookRegistry;
use rift_state::replay::{parse_records, replay};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Stateful context engine for stub mappings
#[derive(Parser, Debug)]
#[command(name = "rift-state")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "RIFT_STATE_CONFIG")]
    config: PathBuf,

    /// JSON array of {mapping, request, response} records to replay
    #[arg(short, long)]
    replay: Option<PathBuf>,

    /// Include the replay summary alongside the store snapshot
    #[arg(long)]
    summary: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let args = Args::parse();

    let config = StateConfig::from_file(&args.config)?;
    let registry = HookRegistry::from_config(&config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    tracing::info!(
        "Loaded {} mapping(s) from {}",
        config.mappings.len(),
        args.config.display()
    );

    let summary = match &args.replay {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read replay file {}", path.display()))?;
            let records = parse_records(&contents)
                .with_context(|| format!("failed to parse replay file {}", path.display()))?;
            Some(replay(&registry, &config, records))
        }
        None => None,
    };

    let snapshot = registry.store().snapshot();
    let output = match summary {
        Some(summary) if args.summary => serde_json::json!({
            "contexts": snapshot,
            "summary": summary,
        }),
        _ => serde_json::to_value(&snapshot)?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
