//! Node-related CLI commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{
    ActionResponse, ApiClient, ClusterMetrics, HealthMetric, NodeActionRequest, NodeSummary,
};
use crate::output::{
    color_status, format_percent, format_timestamp, print_success, print_warning, OutputFormat,
};

/// Row for the node list table
#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Ready")]
    ready: String,
    #[tabled(rename = "Schedulable")]
    schedulable: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Disk")]
    disk: String,
    #[tabled(rename = "Pods")]
    pods: String,
}

/// Row for the metric samples table
#[derive(Tabled)]
struct MetricRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Observed")]
    observed: String,
}

/// List all nodes with their latest health summary
pub async fn list_nodes(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let nodes: Vec<NodeSummary> = client.get("api/v1/nodes").await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&nodes)?);
        }
        OutputFormat::Table => {
            if nodes.is_empty() {
                print_warning("No nodes found");
                return Ok(());
            }

            let rows: Vec<NodeRow> = nodes
                .iter()
                .map(|n| NodeRow {
                    name: n.name.clone(),
                    role: n.role.clone(),
                    ready: if n.ready { "yes".into() } else { "no".into() },
                    schedulable: if n.schedulable {
                        "yes".into()
                    } else {
                        "cordoned".into()
                    },
                    status: color_status(&n.status),
                    cpu: format_percent(n.cpu_percent),
                    memory: format_percent(n.memory_percent),
                    disk: format_percent(n.disk_percent),
                    pods: format!("{}/{}", n.pod_count, n.pod_capacity),
                })
                .collect();

            print_rows(rows);
            println!("\nTotal: {} nodes", nodes.len());
        }
    }

    Ok(())
}

/// Show the latest metric samples for one node
pub async fn show_metrics(client: &ApiClient, node: &str, format: OutputFormat) -> Result<()> {
    let path = format!("api/v1/nodes?metrics=true&node={}", node);
    let samples: Vec<HealthMetric> = client.get(&path).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&samples)?);
        }
        OutputFormat::Table => {
            if samples.is_empty() {
                print_warning("No metric samples found");
                return Ok(());
            }

            let rows: Vec<MetricRow> = samples
                .iter()
                .map(|m| MetricRow {
                    metric: m.kind.clone(),
                    value: if m.kind == "heartbeat" {
                        format!("{:.0}s", m.value)
                    } else {
                        format_percent(m.value * 100.0)
                    },
                    status: color_status(&m.status),
                    observed: format_timestamp(m.timestamp),
                })
                .collect();

            print_rows(rows);
        }
    }

    Ok(())
}

/// Show cluster-wide aggregate metrics
pub async fn show_cluster(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let metrics: ClusterMetrics = client.get("api/v1/cluster/metrics").await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        OutputFormat::Table => {
            println!("Cluster metrics as of {}", format_timestamp(metrics.timestamp));
            println!(
                "  Workers:  {} ({} ready)",
                metrics.worker_count, metrics.ready_workers
            );
            println!("  CPU:      {}", format_percent(metrics.cpu_percent));
            println!("  Memory:   {}", format_percent(metrics.memory_percent));
            println!(
                "  Pods:     {} ({} of capacity)",
                metrics.total_pods,
                format_percent(metrics.pod_percent)
            );
        }
    }

    Ok(())
}

/// Submit a lifecycle action against a node
pub async fn node_action(
    client: &ApiClient,
    action: &str,
    node: &str,
    format: OutputFormat,
) -> Result<()> {
    let request = NodeActionRequest {
        action: action.to_string(),
        node_name: node.to_string(),
    };

    let response: ActionResponse = client.post("api/v1/nodes/action", &request).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Table => {
            print_success(&format!(
                "Action '{}' completed for node {}",
                response.action, response.node_name
            ));
        }
    }

    Ok(())
}

fn print_rows<T: Tabled>(rows: Vec<T>) {
    let table = tabled::Table::new(rows)
        .with(tabled::settings::Style::rounded())
        .to_string();
    println!("{}", table);
}
