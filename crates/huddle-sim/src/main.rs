//! Huddle simulation binary.
//!
//! # Usage
//!
//! ```bash
//! # Ten messages in #general
//! huddle-sim --messages 10
//!
//! # Reproduce a specific run
//! huddle-sim --room lobby --seed 42 --log-level debug
//! ```

use clap::Parser;
use huddle_sim::{ScenarioConfig, run_scenario};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Scripted two-user Huddle session
#[derive(Parser, Debug)]
#[command(name = "huddle-sim")]
#[command(about = "Run a scripted two-user conversation on the in-memory backend")]
#[command(version)]
struct Args {
    /// Public room to chat in
    #[arg(short, long, default_value = "general")]
    room: String,

    /// Number of messages to exchange
    #[arg(short, long, default_value = "5")]
    messages: usize,

    /// Script seed
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(room = %args.room, messages = args.messages, seed = args.seed, "Huddle simulation starting");

    let config = ScenarioConfig { room: args.room, messages: args.messages, seed: args.seed, ..Default::default() };
    let report = run_scenario(&config).await?;

    for line in &report.transcript {
        tracing::info!(room = %report.room_id, "{line}");
    }
    let report = report.ensure_converged()?;
    tracing::info!(messages = report.transcript.len(), "timelines converged");

    Ok(())
}
