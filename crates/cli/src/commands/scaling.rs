//! Scaling history CLI commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, ScalingEvent};
use crate::output::{format_percent, format_timestamp, print_warning, OutputFormat};

/// Row for the scaling history table
#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Policy")]
    policy: String,
    #[tabled(rename = "Direction")]
    direction: String,
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Workers After")]
    workers_after: u32,
}

/// Show recent scaling events, newest first
pub async fn show_history(
    client: &ApiClient,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let path = match limit {
        Some(n) => format!("api/v1/scaling/history?limit={}", n),
        None => "api/v1/scaling/history".to_string(),
    };
    let events: Vec<ScalingEvent> = client.get(&path).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        OutputFormat::Table => {
            if events.is_empty() {
                print_warning("No scaling events recorded");
                return Ok(());
            }

            let rows: Vec<EventRow> = events
                .iter()
                .map(|e| EventRow {
                    time: format_timestamp(e.timestamp),
                    policy: e.policy.clone(),
                    direction: e.direction.clone(),
                    node: e.node.clone().unwrap_or_else(|| "-".to_string()),
                    cpu: format_percent(e.metrics.cpu_percent),
                    workers_after: e.node_count_after,
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!("\nTotal: {} events", events.len());
        }
    }

    Ok(())
}
