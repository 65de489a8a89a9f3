//! Edge Monitor CLI
//!
//! A command-line tool for managing the measurements an edge monitor
//! daemon watches, triggering detection passes and checking its health.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{monitors, status};

/// Edge Monitor CLI
#[derive(Parser)]
#[command(name = "emctl")]
#[command(author, version, about = "CLI for the Edge Latency Monitor", long_about = None)]
pub struct Cli {
    /// Monitor API URL (can also be set via EDGE_MONITOR_API_URL env var)
    #[arg(long, global = true, env = "EDGE_MONITOR_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage monitored measurements
    #[command(subcommand)]
    Monitors(MonitorCommands),

    /// Restart a monitor with a fresh baseline
    Feedback {
        /// Measurement ID
        measurement_id: u64,
    },

    /// Run a detection pass now and show the alerts it raised
    Detect {
        /// Measurement ID
        measurement_id: u64,
    },

    /// Show daemon health, readiness and stream state
    Status,
}

#[derive(Subcommand)]
pub enum MonitorCommands {
    /// List monitored measurements and their worker state
    List,

    /// Start monitoring a measurement
    Create {
        /// Measurement ID
        measurement_id: u64,

        /// Measurement kind
        #[arg(long, default_value = "traceroute")]
        kind: String,

        /// Human-readable target, e.g. the destination hostname
        #[arg(long)]
        target: Option<String>,
    },

    /// Start monitoring several measurements of one kind
    CreateBulk {
        /// Measurement IDs
        #[arg(required = true)]
        measurement_ids: Vec<u64>,

        /// Measurement kind
        #[arg(long, default_value = "traceroute")]
        kind: String,
    },

    /// Stop monitoring a measurement
    Stop {
        /// Measurement ID
        measurement_id: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = client::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Monitors(cmd) => match cmd {
            MonitorCommands::List => {
                monitors::list_monitors(&client, cli.format).await?;
            }
            MonitorCommands::Create {
                measurement_id,
                kind,
                target,
            } => {
                monitors::create_monitor(&client, measurement_id, &kind, target, cli.format).await?;
            }
            MonitorCommands::CreateBulk {
                measurement_ids,
                kind,
            } => {
                monitors::create_monitors(&client, measurement_ids, &kind, cli.format).await?;
            }
            MonitorCommands::Stop { measurement_id } => {
                monitors::stop_monitor(&client, measurement_id).await?;
            }
        },
        Commands::Feedback { measurement_id } => {
            monitors::feedback(&client, measurement_id).await?;
        }
        Commands::Detect { measurement_id } => {
            monitors::detect(&client, measurement_id, cli.format).await?;
        }
        Commands::Status => {
            status::show_status(&client, cli.format).await?;
        }
    }

    Ok(())
}
