//! Alert-related CLI commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{Alert, ApiClient};
use crate::output::{
    color_severity, format_timestamp, print_success, print_warning, OutputFormat,
};

/// Row for the alerts table
#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "First Seen")]
    first_seen: String,
    #[tabled(rename = "State")]
    state: String,
}

/// List alerts, optionally restricted to open ones
pub async fn list_alerts(client: &ApiClient, open_only: bool, format: OutputFormat) -> Result<()> {
    let path = if open_only {
        "api/v1/alerts?open=true"
    } else {
        "api/v1/alerts"
    };
    let alerts: Vec<Alert> = client.get(path).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&alerts)?);
        }
        OutputFormat::Table => {
            if alerts.is_empty() {
                print_warning("No alerts found");
                return Ok(());
            }

            let rows: Vec<AlertRow> = alerts
                .iter()
                .map(|a| AlertRow {
                    id: a.id,
                    node: a.node.clone(),
                    metric: a.metric.clone(),
                    severity: color_severity(&a.severity),
                    message: a.message.clone(),
                    first_seen: format_timestamp(a.first_seen),
                    state: alert_state(a),
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!("\nTotal: {} alerts", alerts.len());
        }
    }

    Ok(())
}

/// Acknowledge an open alert by id
pub async fn acknowledge_alert(client: &ApiClient, id: u64, format: OutputFormat) -> Result<()> {
    let path = format!("api/v1/alerts/{}/acknowledge", id);
    let alert: Alert = client.post(&path, &serde_json::json!({})).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&alert)?);
        }
        OutputFormat::Table => {
            print_success(&format!(
                "Alert {} on {} acknowledged",
                alert.id, alert.node
            ));
        }
    }

    Ok(())
}

fn alert_state(alert: &Alert) -> String {
    if alert.resolved_at.is_some() {
        "resolved".to_string()
    } else if alert.acknowledged {
        "acknowledged".to_string()
    } else {
        "open".to_string()
    }
}
