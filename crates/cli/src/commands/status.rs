//! Daemon status command

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use crate::client::{ApiClient, HealthStatus, MonitorList, ReadinessStatus};
use crate::output::{color_status, print_json, print_table, print_warning, OutputFormat};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

#[derive(Serialize)]
struct StatusReport {
    health: HealthStatus,
    readiness: ReadinessStatus,
    stream: String,
    monitors: usize,
}

/// Show health, readiness and stream state of the daemon
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (_, health): (_, HealthStatus) = client.get_status("healthz").await?;
    let (_, readiness): (_, ReadinessStatus) = client.get_status("readyz").await?;
    let monitors: MonitorList = client.get("api/v1/monitors").await?;

    let report = StatusReport {
        health,
        readiness,
        stream: monitors.stream,
        monitors: monitors.monitors.len(),
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            println!("{}", "Edge Monitor Status".bold());
            println!("{}", "=".repeat(50));
            println!("Health:    {}", color_status(&report.health.status));
            println!(
                "Ready:     {}",
                if report.readiness.ready {
                    "yes".green().to_string()
                } else {
                    "no".red().to_string()
                }
            );
            println!("Stream:    {}", color_status(&report.stream));
            println!("Monitors:  {}", report.monitors);
            println!();

            if let Some(reason) = &report.readiness.reason {
                print_warning(reason);
            }

            let rows: Vec<ComponentRow> = report
                .health
                .components
                .iter()
                .map(|(name, c)| ComponentRow {
                    name: name.clone(),
                    status: color_status(&c.status),
                    message: c.message.clone().unwrap_or_default(),
                })
                .collect();
            print_table(rows, "No components registered");
        }
    }

    Ok(())
}
