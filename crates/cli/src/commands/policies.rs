//! Autoscaling policy CLI commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, AutoscalingPolicy, PolicyUpdate};
use crate::output::{print_success, print_warning, OutputFormat};

/// Row for the policies table
#[derive(Tabled)]
struct PolicyRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Enabled")]
    enabled: String,
    #[tabled(rename = "Nodes")]
    nodes: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Up / Down")]
    thresholds: String,
    #[tabled(rename = "Cooldowns")]
    cooldowns: String,
}

/// List configured autoscaling policies
pub async fn list_policies(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let policies: Vec<AutoscalingPolicy> = client.get("api/v1/policies").await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&policies)?);
        }
        OutputFormat::Table => {
            if policies.is_empty() {
                print_warning("No policies configured");
                return Ok(());
            }

            let rows: Vec<PolicyRow> = policies.iter().map(policy_row).collect();
            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
        }
    }

    Ok(())
}

/// Patch a policy with the provided fields
#[allow(clippy::too_many_arguments)]
pub async fn update_policy(
    client: &ApiClient,
    name: &str,
    enabled: Option<bool>,
    min_nodes: Option<u32>,
    max_nodes: Option<u32>,
    target_cpu: Option<f64>,
    target_memory: Option<f64>,
    target_pods: Option<f64>,
    scale_up_threshold: Option<f64>,
    scale_down_threshold: Option<f64>,
    scale_up_cooldown: Option<u64>,
    scale_down_cooldown: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    let update = PolicyUpdate {
        enabled,
        min_nodes,
        max_nodes,
        target_cpu_utilization: target_cpu,
        target_memory_utilization: target_memory,
        target_pod_utilization: target_pods,
        scale_up_threshold,
        scale_down_threshold,
        scale_up_cooldown_secs: scale_up_cooldown,
        scale_down_cooldown_secs: scale_down_cooldown,
    };

    let path = format!("api/v1/policies/{}", name);
    let policy: AutoscalingPolicy = client.patch(&path, &update).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&policy)?);
        }
        OutputFormat::Table => {
            print_success(&format!("Policy '{}' updated", policy.name));
            let table = tabled::Table::new(vec![policy_row(&policy)])
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
        }
    }

    Ok(())
}

fn policy_row(policy: &AutoscalingPolicy) -> PolicyRow {
    let target = if let Some(cpu) = policy.target_cpu_utilization {
        format!("cpu {:.0}%", cpu * 100.0)
    } else if let Some(mem) = policy.target_memory_utilization {
        format!("memory {:.0}%", mem * 100.0)
    } else if let Some(pods) = policy.target_pod_utilization {
        format!("pods {:.0}%", pods * 100.0)
    } else {
        "pods".to_string()
    };

    PolicyRow {
        name: policy.name.clone(),
        enabled: if policy.enabled { "yes".into() } else { "no".into() },
        nodes: format!("{}-{}", policy.min_nodes, policy.max_nodes),
        target,
        thresholds: format!(
            "{:.0}% / {:.0}%",
            policy.scale_up_threshold * 100.0,
            policy.scale_down_threshold * 100.0
        ),
        cooldowns: format!(
            "{}s / {}s",
            policy.scale_up_cooldown_secs, policy.scale_down_cooldown_secs
        ),
    }
}
