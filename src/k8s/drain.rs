//! Node drain, similar to `kubectl drain`.
//!
//! A drain cordons the node, then evicts its pods through the Eviction API so
//! PodDisruptionBudgets are respected, and waits for the evicted pods to go
//! away. Everything shares one deadline, API calls included. A pod counts as
//! gone once its uid no longer answers to its name.
//!
//! Pods that are left alone:
//! - completed pods (`Succeeded` / `Failed`), nothing to evict
//! - DaemonSet pods, the DaemonSet controller ignores cordons
//! - static mirror pods, they cannot be controlled through the API

use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, warn};

use super::{ClusterApi, ClusterNode, EvictionOutcome, NodePod, PodRef, call_before};
use crate::error::{KrollError, Result};

/// Maximum number of pods evicted concurrently.
const CONCURRENT_EVICTIONS: usize = 5;

/// Pause between eviction attempts refused by a disruption budget.
/// `kubectl drain` also waits 5 seconds.
pub const EVICTION_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Pause between checks for an evicted pod's deletion.
pub const DELETION_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Drains nodes through a [`ClusterApi`].
pub struct DrainCoordinator<'a> {
    cluster: &'a dyn ClusterApi,
    timeout: Duration,
}

impl<'a> DrainCoordinator<'a> {
    pub fn new(cluster: &'a dyn ClusterApi, timeout: Duration) -> Self {
        Self { cluster, timeout }
    }

    /// Cordon `node` and evict its workloads within the drain timeout.
    ///
    /// Fails with [`KrollError::Drain`] listing every pod that was not gone
    /// when the deadline passed.
    pub async fn drain(&self, node: &ClusterNode) -> Result<()> {
        let deadline = Instant::now() + self.timeout;

        if node.unschedulable {
            debug!("Node {} is already cordoned", node.name);
        }
        info!("Cordoning node {}", node.name);
        if let Err(e) = call_before(deadline, self.cluster.cordon(&node.name)).await {
            warn!("Cordon of node {} failed: {}", node.name, e);
            return Err(KrollError::Drain {
                node: node.name.clone(),
                pods: vec![format!("(cordon failed: {})", e)],
            });
        }

        let pods = call_before(deadline, self.cluster.list_node_pods(&node.name))
            .await
            .map_err(|e| KrollError::Drain {
                node: node.name.clone(),
                pods: vec![format!("(pod listing failed: {})", e)],
            })?;

        let targets: Vec<PodRef> = select_evictable(pods).collect();
        info!(
            "Draining node {}: evicting {} pod(s) within {:?}",
            node.name,
            targets.len(),
            self.timeout
        );

        let mut stuck: Vec<String> = stream::iter(targets)
            .map(|pod| async move {
                match self.evict_and_wait(&pod, deadline).await {
                    Ok(()) => None,
                    Err(reason) => {
                        warn!("Pod {} was not evicted: {}", pod, reason);
                        Some(pod.to_string())
                    }
                }
            })
            .buffer_unordered(CONCURRENT_EVICTIONS)
            .filter_map(|r| async move { r })
            .collect()
            .await;

        if stuck.is_empty() {
            info!("Node {} drained", node.name);
            return Ok(());
        }

        stuck.sort();
        Err(KrollError::Drain {
            node: node.name.clone(),
            pods: stuck,
        })
    }

    /// Evict one pod, retrying refusals, then wait for it to disappear.
    async fn evict_and_wait(
        &self,
        pod: &PodRef,
        deadline: Instant,
    ) -> std::result::Result<(), String> {
        loop {
            let reason = match call_before(deadline, self.cluster.evict_pod(pod)).await {
                Ok(EvictionOutcome::Evicted) => {
                    debug!("Eviction created for pod {}", pod);
                    break;
                }
                Ok(EvictionOutcome::Gone) => return Ok(()),
                Ok(EvictionOutcome::Blocked(reason)) => reason,
                Err(e) => e.to_string(),
            };

            if Instant::now() + EVICTION_RETRY_INTERVAL >= deadline {
                return Err(reason);
            }
            debug!(
                "Eviction of pod {} refused ({}), retrying in {:?}",
                pod, reason, EVICTION_RETRY_INTERVAL
            );
            sleep(EVICTION_RETRY_INTERVAL).await;
        }

        loop {
            match call_before(deadline, self.cluster.pod_exists(pod)).await {
                Ok(false) => {
                    debug!("Pod {} deleted", pod);
                    return Ok(());
                }
                Ok(true) => {}
                Err(e) => debug!("Could not determine if pod {} was deleted: {}", pod, e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err("evicted but not deleted before the drain deadline".to_string());
            }
            sleep_until(deadline.min(now + DELETION_CHECK_INTERVAL)).await;
        }
    }
}

/// Pods of a node that a drain should evict.
fn select_evictable(pods: Vec<NodePod>) -> impl Iterator<Item = PodRef> {
    pods.into_iter().filter_map(|p| {
        if matches!(p.phase.as_deref(), Some("Succeeded" | "Failed")) {
            return None;
        }
        if p.daemonset_owned {
            debug!("Not draining pod {}: member of a DaemonSet", p.pod);
            return None;
        }
        if p.mirror {
            debug!("Not draining pod {}: static mirror pod", p.pod);
            return None;
        }
        Some(p.pod)
    })
}
