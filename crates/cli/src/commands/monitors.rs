//! Monitor management commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{
    ApiClient, BulkCreateRequest, BulkCreateResponse, CreateMonitorRequest, CreateMonitorResponse,
    DetectionResult, MonitorList,
};
use crate::output::{
    color_score, color_status, format_timestamp, print_info, print_json, print_success, print_table,
    OutputFormat,
};

/// Row for the monitors table
#[derive(Tabled)]
struct MonitorRow {
    #[tabled(rename = "Measurement")]
    id: u64,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "State")]
    state: String,
}

/// Row for the alerts table
#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "AS")]
    asn: String,
    #[tabled(rename = "Bucket")]
    bucket: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Probes")]
    probes: String,
    #[tabled(rename = "Description")]
    description: String,
}

pub async fn list_monitors(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let result: MonitorList = client.get("api/v1/monitors").await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            println!("Stream: {}", color_status(&result.stream));
            println!();

            let count = result.monitors.len();
            let rows: Vec<MonitorRow> = result
                .monitors
                .into_iter()
                .map(|m| MonitorRow {
                    id: m.measurement.id,
                    kind: m.measurement.kind,
                    target: m.measurement.target.unwrap_or_else(|| "-".to_string()),
                    state: color_status(&m.state),
                })
                .collect();

            print_table(rows, "No measurements are being monitored");
            if count > 0 {
                println!("\nTotal: {} monitors", count);
            }
        }
    }

    Ok(())
}

pub async fn create_monitor(
    client: &ApiClient,
    measurement_id: u64,
    kind: &str,
    target: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let request = CreateMonitorRequest {
        measurement_id,
        kind: kind.to_string(),
        target,
    };
    let result: CreateMonitorResponse = client.post("api/v1/monitors", &request).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => match result.outcome.as_str() {
            "created" => print_success(&format!("Monitoring measurement {}", measurement_id)),
            _ => print_info(&format!("Measurement {} is already monitored", measurement_id)),
        },
    }

    Ok(())
}

pub async fn create_monitors(
    client: &ApiClient,
    measurement_ids: Vec<u64>,
    kind: &str,
    format: OutputFormat,
) -> Result<()> {
    let requested = measurement_ids.len();
    let request = BulkCreateRequest {
        measurements: measurement_ids
            .into_iter()
            .map(|measurement_id| CreateMonitorRequest {
                measurement_id,
                kind: kind.to_string(),
                target: None,
            })
            .collect(),
    };
    let result: BulkCreateResponse = client.post("api/v1/monitors/bulk", &request).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            let ids: Vec<String> = result.created.iter().map(u64::to_string).collect();
            print_success(&format!(
                "Created {} of {} monitors{}",
                result.created.len(),
                requested,
                if ids.is_empty() {
                    String::new()
                } else {
                    format!(": {}", ids.join(", "))
                }
            ));
        }
    }

    Ok(())
}

pub async fn stop_monitor(client: &ApiClient, measurement_id: u64) -> Result<()> {
    client
        .delete(&format!("api/v1/monitors/{}", measurement_id))
        .await?;
    print_success(&format!("Stopped monitoring measurement {}", measurement_id));
    Ok(())
}

pub async fn feedback(client: &ApiClient, measurement_id: u64) -> Result<()> {
    client
        .post_empty(&format!("api/v1/monitors/{}/feedback", measurement_id))
        .await?;
    print_success(&format!(
        "Monitor for measurement {} is restarting with a fresh baseline",
        measurement_id
    ));
    Ok(())
}

pub async fn detect(client: &ApiClient, measurement_id: u64, format: OutputFormat) -> Result<()> {
    let result: DetectionResult = client
        .trigger(&format!("api/v1/monitors/{}/detect", measurement_id))
        .await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            println!("{}", format!("Detection pass for measurement {}", measurement_id).bold());
            println!("{}", "=".repeat(60));

            let rows: Vec<AlertRow> = result
                .alerts
                .iter()
                .map(|a| AlertRow {
                    asn: format!("AS{}", a.as_number),
                    bucket: format_timestamp(&a.bucket_start),
                    score: color_score(a.score, a.notify),
                    probes: format!("{}/{}", a.flagged_probes, a.distinct_probes),
                    description: a.description.clone(),
                })
                .collect();

            print_table(rows, "No new alerts");
        }
    }

    Ok(())
}
