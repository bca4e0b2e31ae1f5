//! Cluster validation.
//!
//! A cluster validates when enough masters and nodes are registered and
//! ready, no registered node is unready, and every pod of the system
//! namespace is running and ready (or has completed).

use std::time::Duration;

use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, info};

use super::{ClusterApi, ClusterHealth, NodeRole, SYSTEM_NAMESPACE};
use crate::error::{KrollError, Result};

/// Default pause between two health checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Shortest pause allowed between two health checks.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum number of ready members the cluster must have.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpectedMembers {
    pub masters: usize,
    pub nodes: usize,
}

/// Evaluate one health observation.
///
/// Returns the list of problems found; empty means healthy.
pub fn evaluate(health: &ClusterHealth, expected: ExpectedMembers) -> Vec<String> {
    let mut failures = Vec::new();

    let ready_count = |role: NodeRole| {
        health
            .nodes
            .iter()
            .filter(|n| n.role == role && n.ready)
            .count()
    };

    let masters = ready_count(NodeRole::Master);
    if masters < expected.masters {
        failures.push(format!(
            "{} of {} expected masters ready",
            masters, expected.masters
        ));
    }

    let nodes = ready_count(NodeRole::Node);
    if nodes < expected.nodes {
        failures.push(format!(
            "{} of {} expected nodes ready",
            nodes, expected.nodes
        ));
    }

    for node in health.nodes.iter().filter(|n| !n.ready) {
        failures.push(format!("node {} is not ready", node.name));
    }

    for pod in &health.system_pods {
        match pod.phase.as_deref() {
            Some("Succeeded") => {}
            Some("Running") if pod.ready => {}
            Some("Running") => failures.push(format!(
                "{} pod {} is running but not ready",
                SYSTEM_NAMESPACE, pod.name
            )),
            phase => failures.push(format!(
                "{} pod {} is {}",
                SYSTEM_NAMESPACE,
                pod.name,
                phase.unwrap_or("in an unknown phase")
            )),
        }
    }

    failures
}

/// Polls cluster health until it validates or a deadline passes.
pub struct ValidationPoller<'a> {
    cluster: &'a dyn ClusterApi,
    expected: ExpectedMembers,
    poll_interval: Duration,
}

impl<'a> ValidationPoller<'a> {
    /// A `poll_interval` below [`MIN_POLL_INTERVAL`] is raised to it.
    pub fn new(
        cluster: &'a dyn ClusterApi,
        expected: ExpectedMembers,
        poll_interval: Duration,
    ) -> Self {
        Self {
            cluster,
            expected,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        }
    }

    /// Run one health check.
    pub async fn check(&self) -> std::result::Result<(), String> {
        let health = self
            .cluster
            .get_health()
            .await
            .map_err(|e| format!("health check failed: {}", e))?;

        let failures = evaluate(&health, self.expected);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        }
    }

    /// Check health repeatedly until healthy or `timeout` elapses.
    ///
    /// At least one check is always made. Checks are spaced by the poll
    /// interval, shortened so the last one lands on the deadline. A check
    /// still waiting for the API at the deadline counts as failed.
    pub async fn wait_until_healthy(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let last_failure = match timeout_at(deadline, self.check()).await {
                Ok(Ok(())) => {
                    info!("Cluster validated after {} check(s)", attempt);
                    return Ok(());
                }
                Ok(Err(failure)) => failure,
                Err(_) => "health check did not answer before the deadline".to_string(),
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(KrollError::ValidationTimeout {
                    timeout,
                    last_failure,
                });
            }

            debug!(
                "Cluster did not pass validation (attempt {}): {}",
                attempt, last_failure
            );
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
