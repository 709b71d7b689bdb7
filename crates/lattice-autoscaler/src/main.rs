//! lattice-autoscaler - inspect Cluster API node groups

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use kube::ResourceExt;
use tracing::info;

use lattice_autoscaler::constants::DEFAULT_SYNC_TIMEOUT_SECS;
use lattice_autoscaler::{
    AutoscalerConfig, ClusterCache, GroupLookup, NodeGroup, NodeGroupDirectory, NodeGroupId,
    NodeGroupSummary,
};
use lattice_common::kube_utils::create_client;
use lattice_common::telemetry::{init_logging, LogFormat};

/// Discover Cluster API node groups and the nodes that belong to them
#[derive(Parser, Debug)]
#[command(name = "lattice-autoscaler", version, about, long_about = None)]
struct Cli {
    /// Path to kubeconfig (defaults to in-cluster or ~/.kube/config)
    #[arg(long, env = "KUBECONFIG", global = true)]
    kubeconfig: Option<PathBuf>,

    /// Only discover resources in this namespace
    #[arg(long, env = "LATTICE_AUTOSCALER_NAMESPACE", global = true)]
    namespace: Option<String>,

    /// Seconds to wait for the initial cache sync
    #[arg(long, default_value_t = DEFAULT_SYNC_TIMEOUT_SECS, global = true)]
    sync_timeout_secs: u64,

    /// Log format (text or json)
    #[arg(long, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Output format
    #[arg(long, value_enum, default_value_t = Output::Text, global = true)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Output {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every scalable node group
    NodeGroups,

    /// Show the node group a node belongs to
    NodeGroupFor {
        /// Node name
        node: String,
    },

    /// Describe one MachineSet or MachineDeployment (Kind/namespace/name)
    Describe {
        /// Node group identifier, e.g. MachineDeployment/default/workers
        id: NodeGroupId,
    },
}

impl Cli {
    fn config(&self) -> AutoscalerConfig {
        let config = AutoscalerConfig {
            log_format: self.log_format,
            ..Default::default()
        }
        .with_sync_timeout(Duration::from_secs(self.sync_timeout_secs));

        match &self.namespace {
            Some(ns) => config.with_namespace(ns),
            None => config,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.config();

    init_logging(config.log_format).context("failed to initialize logging")?;
    config.validate()?;

    let client = create_client(cli.kubeconfig.as_deref()).await?;
    let (cache, handle) = ClusterCache::start(client, &config).await?;
    let directory = NodeGroupDirectory::with_config(cache.clone(), config);

    let result = run(&cli, &directory, &cache);
    handle.shutdown().await;
    result
}

fn run(cli: &Cli, directory: &NodeGroupDirectory, cache: &ClusterCache) -> anyhow::Result<()> {
    match &cli.command {
        Commands::NodeGroups => {
            let groups = directory.list_node_groups()?;
            info!(count = groups.len(), "Discovered node groups");
            print_groups(cli.output, &groups)
        }
        Commands::NodeGroupFor { node } => {
            let node = cache
                .nodes
                .get(None, node)
                .ok_or_else(|| anyhow::anyhow!("node {} not found", node))?;
            match directory.node_group_for_node(&node)? {
                Some(group) => print_groups(cli.output, &[group]),
                None => {
                    println!("node {} does not belong to a node group", node.name_any());
                    Ok(())
                }
            }
        }
        Commands::Describe { id } => match directory.lookup(id)? {
            GroupLookup::NotFound => anyhow::bail!("{} not found", id),
            GroupLookup::NotScalable => {
                println!("{} is not a scalable node group", id);
                Ok(())
            }
            GroupLookup::Scalable(group) => print_groups(cli.output, &[group]),
        },
    }
}

fn print_groups(output: Output, groups: &[NodeGroup]) -> anyhow::Result<()> {
    let summaries: Vec<NodeGroupSummary> = groups.iter().map(NodeGroup::summary).collect();

    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(&summaries)?),
        Output::Text => {
            for summary in &summaries {
                println!(
                    "{} (min: {}, max: {}, replicas: {}, members: {})",
                    summary.id,
                    summary.min_size,
                    summary.max_size,
                    summary.size,
                    summary.members.len()
                );
                for member in &summary.members {
                    match &member.node_name {
                        Some(node) => println!("  {} ({})", member.id, node),
                        None => println!("  {}", member.id),
                    }
                }
            }
        }
    }
    Ok(())
}
