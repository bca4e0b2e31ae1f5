//! kroll - rolling update CLI for Kubernetes cluster instance groups.
//!
//! Replaces out-of-date cloud instances one at a time with:
//! - Launch configuration / template drift detection per instance group
//! - Bastion, master, node ordering
//! - Node drain through the Eviction API
//! - Cluster validation after each replacement

mod cloud;
mod cluster;
mod config;
mod error;
mod k8s;
mod output;
mod rolling;
#[cfg(test)]
mod testing;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use colored::Colorize;
use tracing::{debug, error, warn};

use cloud::aws::AwsCloud;
use cluster::ClusterSpec;
use config::{Args, Config};
use error::KrollError;
use k8s::client::{KubeCluster, build_client};
use k8s::pdb::find_drain_blockers;
use output::{
    RunContext, RunReport, print_drain_blockers, print_group_table, print_outcome,
    save_report_or_warn,
};
use rolling::{ClusterAccess, PlanDecision, RollingUpdate, Selection, Snapshot};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = Config::from_args(args);

    // Initialize logging
    if let Err(e) = init_tracing(&config.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    debug!("Starting kroll");

    if let Err(e) = run(&config).await {
        error!("{:#}", e);
        if let Some(err) = e.downcast_ref::<KrollError>()
            && err.is_preflight()
        {
            warn!("No instance was touched");
        }
        std::process::exit(1);
    }
}

/// Main application logic.
async fn run(config: &Config) -> Result<()> {
    let spec = ClusterSpec::load(&config.cluster_file)?;
    let cluster_name = config.cluster_name.as_deref().unwrap_or(&spec.name);

    // Unknown instance group names fail before any API call.
    let selection = Selection::new(&spec.instance_groups, &config.instance_groups)?;

    let cloud = AwsCloud::new(
        cluster_name,
        config.profile.as_deref(),
        config.region.as_deref(),
    )
    .await?;

    let kube = if config.cloud_only {
        None
    } else {
        Some(KubeCluster::new(build_client(config.context.as_deref()).await?))
    };
    let access = match &kube {
        Some(k) => ClusterAccess::Connected(k),
        None => ClusterAccess::CloudOnly,
    };

    let mut snapshot = Snapshot::discover(&cloud, access, &selection).await?;

    println!(
        "{} (region: {})",
        format!("Cluster {}", cluster_name).bold(),
        cloud.region()
    );
    print_group_table(&snapshot);

    match PlanDecision::decide(&snapshot, config.policy.force, config.yes) {
        PlanDecision::NoUpdateRequired => {
            println!();
            println!("No rolling-update required.");
            return Ok(());
        }
        PlanDecision::ConfirmationRequired => {
            println!();
            println!("Must specify {} to rolling-update.", "--yes".bold());
            return Ok(());
        }
        PlanDecision::Proceed => {}
    }

    if let Some(k) = &kube
        && config.policy.drain_and_validate
    {
        match find_drain_blockers(k.inner()).await {
            Ok(blockers) => print_drain_blockers(&blockers),
            Err(e) => warn!("Could not check PodDisruptionBudgets: {}", e),
        }
    }

    let started_at = Utc::now();
    let planned = snapshot.clone();
    let updater = match &kube {
        Some(k) => RollingUpdate::with_cluster_api(&cloud, k, config.policy.clone()),
        None => RollingUpdate::cloud_only(&cloud, config.policy.clone()),
    };
    let outcome = updater.run(&mut snapshot).await;
    print_outcome(&outcome);

    if let Some(path) = &config.report {
        let ctx = RunContext {
            cluster: cluster_name,
            started_at,
            cloud_only: config.cloud_only,
            force: config.policy.force,
        };
        let report = RunReport::new(ctx, &planned, &outcome);
        if let Some(saved) = save_report_or_warn(&report, path) {
            println!("Report saved to {}", saved.display());
        }
    }

    outcome.into_result()?;
    Ok(())
}

/// Initialize tracing subscriber.
fn init_tracing(log_level: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {}", e))?;

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
