//! Rolling update executor.
//!
//! Walks the snapshot bastions first, then masters, then nodes, and replaces
//! one instance at a time:
//!
//! ```text
//! Pending -> Draining -> Terminating -> AwaitingReplacement -> Validating -> Done
//!               |            |                                    |
//!               +------------+-------------> Failed <-------------+
//! ```
//!
//! Draining and Validating are skipped in cloud-only mode, when drain and
//! validation are switched off, or (for draining) when the instance never
//! joined the cluster.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::InstanceState;
use super::policy::{ClusterAccess, UpdatePolicy};
use super::snapshot::{CloudInstance, CloudInstanceGroup, Snapshot};
use crate::cloud::CloudProvider;
use crate::cluster::InstanceGroupRole;
use crate::error::{KrollError, Result};
use crate::k8s::ClusterApi;
use crate::k8s::drain::DrainCoordinator;
use crate::k8s::validation::{ExpectedMembers, ValidationPoller};
use crate::output::progress::sleep_with_spinner;

/// Outcome of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    pub group: String,
    /// 1-based position of the instance within its group's run.
    pub position: usize,
    pub instance_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub state: InstanceState,
    /// Tolerated failures.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Where a run stopped.
#[derive(Debug)]
pub struct FailurePoint {
    pub group: String,
    pub position: usize,
    pub instance_id: String,
    /// State the instance was in when the fatal error happened.
    pub state: InstanceState,
    pub error: KrollError,
}

/// Everything a run did, in order.
#[derive(Debug, Default)]
pub struct RollingUpdateReport {
    pub instances: Vec<InstanceRecord>,
    pub failure: Option<FailurePoint>,
}

impl RollingUpdateReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// Number of instances fully replaced.
    pub fn completed(&self) -> usize {
        self.instances
            .iter()
            .filter(|r| r.state == InstanceState::Done)
            .count()
    }

    pub fn into_result(self) -> Result<()> {
        match self.failure {
            None => Ok(()),
            Some(f) => Err(KrollError::RollingUpdateAborted {
                group: f.group,
                position: f.position,
                instance: f.instance_id,
                state: f.state,
                source: Box::new(f.error),
            }),
        }
    }
}

/// Drives a rolling update over a snapshot.
pub struct RollingUpdate<'a> {
    cloud: &'a dyn CloudProvider,
    access: ClusterAccess<'a>,
    policy: UpdatePolicy,
}

impl<'a> RollingUpdate<'a> {
    /// Roll with drain and validation through the cluster API.
    pub fn with_cluster_api(
        cloud: &'a dyn CloudProvider,
        cluster: &'a dyn ClusterApi,
        policy: UpdatePolicy,
    ) -> Self {
        Self {
            cloud,
            access: ClusterAccess::Connected(cluster),
            policy,
        }
    }

    /// Roll touching the cloud only.
    pub fn cloud_only(cloud: &'a dyn CloudProvider, policy: UpdatePolicy) -> Self {
        Self {
            cloud,
            access: ClusterAccess::CloudOnly,
            policy,
        }
    }

    /// Replace every targeted instance, stopping at the first fatal failure.
    ///
    /// Terminated instances are removed from `snapshot` as the run goes.
    pub async fn run(&self, snapshot: &mut Snapshot) -> RollingUpdateReport {
        let mut report = RollingUpdateReport::default();
        let expected = snapshot.expected_members();

        match self.checks() {
            Some(_) => debug!(
                "Validation expects {} master(s) and {} node(s) ready",
                expected.masters, expected.nodes
            ),
            None if self.access.is_cloud_only() => {
                info!("Not draining or validating cluster nodes: cloud-only mode")
            }
            None => info!("Not draining or validating cluster nodes: disabled"),
        }

        for role in InstanceGroupRole::ROLLING_ORDER {
            // Targets are fixed up front; the snapshot only loses entries from here on.
            let batches: Vec<(String, Vec<CloudInstance>)> = snapshot
                .groups()
                .iter()
                .filter(|g| g.role() == role)
                .map(|g| (g.name().to_string(), self.targets(g)))
                .collect();

            for (group, instances) in batches {
                if instances.is_empty() {
                    debug!("Instance group {} is up to date", group);
                    continue;
                }
                info!(
                    "Rolling {} instance(s) of {} group {}",
                    instances.len(),
                    role,
                    group
                );

                for (idx, instance) in instances.into_iter().enumerate() {
                    let mut record = InstanceRecord {
                        group: group.clone(),
                        position: idx + 1,
                        instance_id: instance.id.clone(),
                        node: instance.node_name.clone(),
                        state: InstanceState::Pending,
                        warnings: Vec::new(),
                    };

                    debug!(
                        "Instance {} was launched from {}",
                        instance.id,
                        instance.fingerprint.as_deref().unwrap_or("an unknown configuration")
                    );
                    let outcome = self
                        .roll_instance(snapshot, role, &instance, expected, &mut record)
                        .await;

                    if let Err(error) = outcome {
                        warn!(
                            "Instance {} of group {} failed while {}: {}",
                            record.instance_id, record.group, record.state, error
                        );
                        report.failure = Some(FailurePoint {
                            group: record.group.clone(),
                            position: record.position,
                            instance_id: record.instance_id.clone(),
                            state: record.state,
                            error,
                        });
                        record.state = InstanceState::Failed;
                        report.instances.push(record);
                        return report;
                    }
                    report.instances.push(record);
                }
            }
        }

        info!("Rolling update completed: {} instance(s) replaced", report.completed());
        report
    }

    /// Instances of a group to roll, in order.
    fn targets(&self, group: &CloudInstanceGroup) -> Vec<CloudInstance> {
        let mut targets = group.need_update.clone();
        if self.policy.force {
            targets.extend(group.ready.iter().cloned());
        }
        targets
    }

    /// The cluster to drain and validate against, if any.
    fn checks(&self) -> Option<&'a dyn ClusterApi> {
        match self.access {
            ClusterAccess::Connected(cluster) if self.policy.drain_and_validate => Some(cluster),
            _ => None,
        }
    }

    async fn roll_instance(
        &self,
        snapshot: &mut Snapshot,
        role: InstanceGroupRole,
        instance: &CloudInstance,
        expected: ExpectedMembers,
        record: &mut InstanceRecord,
    ) -> Result<()> {
        let interval = self.policy.interval_for(role);

        if let Some(cluster) = self.checks() {
            match snapshot.node_of(instance) {
                Some(node) => {
                    advance(record, InstanceState::Draining);
                    let drained = DrainCoordinator::new(cluster, self.policy.drain_interval)
                        .drain(node)
                        .await;
                    if let Err(e) = drained {
                        if self.policy.fail_on_drain_error {
                            return Err(e);
                        }
                        warn!("Ignoring drain failure: {}", e);
                        record.warnings.push(e.to_string());
                    }
                }
                None => {
                    let msg = format!("instance {} has no cluster node, not draining", instance.id);
                    warn!("{}", msg);
                    record.warnings.push(msg);
                }
            }
        }

        advance(record, InstanceState::Terminating);
        self.cloud.terminate_instance(&instance.id).await?;
        snapshot.forget_instance(&record.group, &instance.id);

        advance(record, InstanceState::AwaitingReplacement);
        sleep_with_spinner(
            format!(
                "Waiting {:?} for the replacement of {} to join",
                interval, instance.id
            ),
            interval,
        )
        .await;

        if let Some(cluster) = self.checks() {
            advance(record, InstanceState::Validating);
            let validated =
                ValidationPoller::new(cluster, expected, self.policy.validation_poll_interval)
                    .wait_until_healthy(interval)
                    .await;
            if let Err(e) = validated {
                if self.policy.fail_on_validate {
                    return Err(e);
                }
                warn!("Ignoring validation failure: {}", e);
                record.warnings.push(e.to_string());
            }
        }

        advance(record, InstanceState::Done);
        Ok(())
    }
}

fn advance(record: &mut InstanceRecord, state: InstanceState) {
    info!(
        "[{} #{}] {}: {} -> {}",
        record.group, record.position, record.instance_id, record.state, state
    );
    record.state = state;
}
