//! Fleet Orchestrator CLI
//!
//! A command-line tool for inspecting cluster health, driving node
//! lifecycle actions, and managing autoscaling policies through the
//! fleet daemon's REST API.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{alerts, nodes, policies, registry, scaling};

/// Fleet Orchestrator CLI
#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(author, version, about = "CLI for the Fleet Orchestrator", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via FLEETCTL_API_URL env var)
    #[arg(long, env = "FLEETCTL_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect and manage cluster nodes
    #[command(subcommand)]
    Nodes(NodesCommands),

    /// Show cluster-wide aggregate metrics
    Cluster,

    /// View and acknowledge alerts
    #[command(subcommand)]
    Alerts(AlertsCommands),

    /// Manage autoscaling policies
    #[command(subcommand)]
    Policies(PoliciesCommands),

    /// Inspect autoscaler activity
    #[command(subcommand)]
    Scaling(ScalingCommands),

    /// Manage the container registry
    #[command(subcommand)]
    Registry(RegistryCommands),
}

#[derive(Subcommand)]
pub enum NodesCommands {
    /// List nodes with their latest health summary
    List,

    /// Show metric samples for one node
    Metrics {
        /// Node name
        node: String,
    },

    /// Mark a node unschedulable
    Cordon {
        /// Node name
        node: String,
    },

    /// Mark a node schedulable again
    Uncordon {
        /// Node name
        node: String,
    },

    /// Evict all pods from a node
    Drain {
        /// Node name
        node: String,
    },

    /// Reboot the node's server
    Reboot {
        /// Node name
        node: String,
    },

    /// Power off the node's server
    Poweroff {
        /// Node name
        node: String,
    },

    /// Power on the node's server
    Poweron {
        /// Node name
        node: String,
    },

    /// Drain a node and delete it from the cluster and the provider
    Decommission {
        /// Node name
        node: String,
    },
}

#[derive(Subcommand)]
pub enum AlertsCommands {
    /// List alerts
    List {
        /// Show only open alerts
        #[arg(long)]
        open: bool,
    },

    /// Acknowledge an alert
    Ack {
        /// Alert id
        id: u64,
    },
}

#[derive(Subcommand)]
pub enum PoliciesCommands {
    /// List configured policies
    List,

    /// Update fields on a policy
    Update {
        /// Policy name
        name: String,

        /// Enable or disable the policy
        #[arg(long)]
        enabled: Option<bool>,

        /// Minimum worker count
        #[arg(long)]
        min_nodes: Option<u32>,

        /// Maximum worker count
        #[arg(long)]
        max_nodes: Option<u32>,

        /// Target cluster CPU utilization (0.0-1.0)
        #[arg(long)]
        target_cpu: Option<f64>,

        /// Target cluster memory utilization (0.0-1.0)
        #[arg(long)]
        target_memory: Option<f64>,

        /// Target pod-capacity utilization (0.0-1.0)
        #[arg(long)]
        target_pods: Option<f64>,

        /// Scale-up threshold (0.0-1.0)
        #[arg(long)]
        scale_up_threshold: Option<f64>,

        /// Scale-down threshold (0.0-1.0)
        #[arg(long)]
        scale_down_threshold: Option<f64>,

        /// Scale-up cooldown in seconds
        #[arg(long)]
        scale_up_cooldown: Option<u64>,

        /// Scale-down cooldown in seconds
        #[arg(long)]
        scale_down_cooldown: Option<u64>,
    },
}

#[derive(Subcommand)]
pub enum ScalingCommands {
    /// Show recent scaling events
    History {
        /// Maximum number of events to return
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
pub enum RegistryCommands {
    /// List repositories and their tags
    Repos,

    /// Delete an image tag
    DeleteImage {
        /// Repository name
        repository: String,

        /// Tag name
        tag: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = client::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Nodes(nodes_cmd) => match nodes_cmd {
            NodesCommands::List => {
                nodes::list_nodes(&client, cli.format).await?;
            }
            NodesCommands::Metrics { node } => {
                nodes::show_metrics(&client, &node, cli.format).await?;
            }
            NodesCommands::Cordon { node } => {
                nodes::node_action(&client, "cordon", &node, cli.format).await?;
            }
            NodesCommands::Uncordon { node } => {
                nodes::node_action(&client, "uncordon", &node, cli.format).await?;
            }
            NodesCommands::Drain { node } => {
                nodes::node_action(&client, "drain", &node, cli.format).await?;
            }
            NodesCommands::Reboot { node } => {
                nodes::node_action(&client, "reboot", &node, cli.format).await?;
            }
            NodesCommands::Poweroff { node } => {
                nodes::node_action(&client, "poweroff", &node, cli.format).await?;
            }
            NodesCommands::Poweron { node } => {
                nodes::node_action(&client, "poweron", &node, cli.format).await?;
            }
            NodesCommands::Decommission { node } => {
                nodes::node_action(&client, "decommission", &node, cli.format).await?;
            }
        },
        Commands::Cluster => {
            nodes::show_cluster(&client, cli.format).await?;
        }
        Commands::Alerts(alerts_cmd) => match alerts_cmd {
            AlertsCommands::List { open } => {
                alerts::list_alerts(&client, open, cli.format).await?;
            }
            AlertsCommands::Ack { id } => {
                alerts::acknowledge_alert(&client, id, cli.format).await?;
            }
        },
        Commands::Policies(policies_cmd) => match policies_cmd {
            PoliciesCommands::List => {
                policies::list_policies(&client, cli.format).await?;
            }
            PoliciesCommands::Update {
                name,
                enabled,
                min_nodes,
                max_nodes,
                target_cpu,
                target_memory,
                target_pods,
                scale_up_threshold,
                scale_down_threshold,
                scale_up_cooldown,
                scale_down_cooldown,
            } => {
                policies::update_policy(
                    &client,
                    &name,
                    enabled,
                    min_nodes,
                    max_nodes,
                    target_cpu,
                    target_memory,
                    target_pods,
                    scale_up_threshold,
                    scale_down_threshold,
                    scale_up_cooldown,
                    scale_down_cooldown,
                    cli.format,
                )
                .await?;
            }
        },
        Commands::Scaling(scaling_cmd) => match scaling_cmd {
            ScalingCommands::History { limit } => {
                scaling::show_history(&client, limit, cli.format).await?;
            }
        },
        Commands::Registry(registry_cmd) => match registry_cmd {
            RegistryCommands::Repos => {
                registry::list_repositories(&client, cli.format).await?;
            }
            RegistryCommands::DeleteImage { repository, tag } => {
                registry::delete_image(&client, &repository, &tag, cli.format).await?;
            }
        },
    }

    Ok(())
}
