//! Cloud topology snapshot.
//!
//! Pairs every targeted instance group with its cloud group, splits the
//! instances into up-to-date and stale ones, and links them to the cluster
//! nodes they run.

use std::fmt;

use tracing::{debug, warn};

use super::plan::Selection;
use super::policy::ClusterAccess;
use crate::cloud::{CloudGroup, CloudProvider};
use crate::cluster::{InstanceGroup, InstanceGroupRole};
use crate::error::{KrollError, Result};
use crate::k8s::ClusterNode;
use crate::k8s::validation::ExpectedMembers;

/// One cloud instance of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudInstance {
    pub id: String,
    pub fingerprint: Option<String>,
    /// Name of the cluster node running on this instance, if it joined.
    pub node_name: Option<String>,
}

/// Summary status of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    Ready,
    NeedsUpdate,
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("Ready"),
            Self::NeedsUpdate => f.write_str("NeedsUpdate"),
        }
    }
}

/// An instance group together with its discovered instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudInstanceGroup {
    pub instance_group: InstanceGroup,
    pub cloud_id: String,
    pub min_size: i32,
    pub max_size: i32,
    pub ready: Vec<CloudInstance>,
    pub need_update: Vec<CloudInstance>,
}

impl CloudInstanceGroup {
    fn classify(instance_group: InstanceGroup, cloud: CloudGroup, nodes: &[ClusterNode]) -> Self {
        let mut ready = Vec::new();
        let mut need_update = Vec::new();

        for member in cloud.members {
            let node_name = nodes
                .iter()
                .find(|n| n.runs_on(&member.id))
                .map(|n| n.name.clone());

            let stale = member.fingerprint.is_none()
                || member.fingerprint != cloud.desired_fingerprint;

            let instance = CloudInstance {
                id: member.id,
                fingerprint: member.fingerprint,
                node_name,
            };

            if stale {
                need_update.push(instance);
            } else {
                ready.push(instance);
            }
        }

        debug!(
            "Instance group {}: {} ready, {} need update",
            instance_group.name,
            ready.len(),
            need_update.len()
        );

        Self {
            instance_group,
            cloud_id: cloud.id,
            min_size: cloud.min_size,
            max_size: cloud.max_size,
            ready,
            need_update,
        }
    }

    pub fn name(&self) -> &str {
        &self.instance_group.name
    }

    pub fn role(&self) -> InstanceGroupRole {
        self.instance_group.role
    }

    pub fn status(&self) -> GroupStatus {
        if self.need_update.is_empty() {
            GroupStatus::Ready
        } else {
            GroupStatus::NeedsUpdate
        }
    }

    /// Instances linked to a cluster node.
    pub fn node_count(&self) -> usize {
        self.ready
            .iter()
            .chain(&self.need_update)
            .filter(|i| i.node_name.is_some())
            .count()
    }

    /// Drop one instance from the group. Returns false if it was not there.
    fn forget(&mut self, instance_id: &str) -> bool {
        let before = self.ready.len() + self.need_update.len();
        self.ready.retain(|i| i.id != instance_id);
        self.need_update.retain(|i| i.id != instance_id);
        before != self.ready.len() + self.need_update.len()
    }
}

/// Point-in-time view of the targeted groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    groups: Vec<CloudInstanceGroup>,
    nodes: Vec<ClusterNode>,
    cluster_reachable: bool,
}

impl Snapshot {
    /// Query the cloud, and the cluster unless cloud-only, and classify.
    pub async fn discover(
        cloud: &dyn CloudProvider,
        access: ClusterAccess<'_>,
        selection: &Selection,
    ) -> Result<Self> {
        let nodes = match access {
            ClusterAccess::Connected(cluster) => Some(
                cluster
                    .list_nodes()
                    .await
                    .map_err(|e| KrollError::ClusterUnreachable(e.to_string()))?,
            ),
            ClusterAccess::CloudOnly => None,
        };

        debug!("Listing instance groups from {}", cloud.name());
        let cloud_groups = cloud.list_instance_groups().await?;

        Ok(Self::build(selection, cloud_groups, nodes.as_deref()))
    }

    /// Classify cloud groups against the selection. `nodes` is `None` when
    /// the cluster is not consulted.
    pub fn build(
        selection: &Selection,
        cloud_groups: Vec<CloudGroup>,
        nodes: Option<&[ClusterNode]>,
    ) -> Self {
        let mut matched: Vec<Option<CloudGroup>> = vec![None; selection.groups.len()];

        for cg in cloud_groups {
            let slot = cg.instance_group.as_deref().and_then(|name| {
                selection.groups.iter().position(|ig| ig.name == name)
            });

            match slot {
                Some(idx) if matched[idx].is_none() => matched[idx] = Some(cg),
                Some(idx) => warn!(
                    "Ignoring cloud group {}: instance group {} is already backed by another cloud group",
                    cg.id, selection.groups[idx].name
                ),
                None if selection.warn_unmatched => warn!(
                    "Found cloud group {} with no corresponding instance group",
                    cg.id
                ),
                None => debug!("Skipping cloud group {} outside the selection", cg.id),
            }
        }

        let node_list = nodes.unwrap_or_default();
        let groups = selection
            .groups
            .iter()
            .zip(matched)
            .filter_map(|(ig, cg)| match cg {
                Some(cg) => Some(CloudInstanceGroup::classify(ig.clone(), cg, node_list)),
                None => {
                    warn!("No cloud group found for instance group {}", ig.name);
                    None
                }
            })
            .collect();

        Self {
            groups,
            nodes: node_list.to_vec(),
            cluster_reachable: nodes.is_some(),
        }
    }

    pub fn groups(&self) -> &[CloudInstanceGroup] {
        &self.groups
    }

    /// Whether the cluster node list was part of discovery.
    pub fn cluster_reachable(&self) -> bool {
        self.cluster_reachable
    }

    /// Whether any group has a stale instance.
    pub fn needs_update(&self) -> bool {
        self.groups.iter().any(|g| !g.need_update.is_empty())
    }

    /// Look up the node an instance is linked to.
    pub fn node_of(&self, instance: &CloudInstance) -> Option<&ClusterNode> {
        let name = instance.node_name.as_deref()?;
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Members the cluster needs ready to validate, from group minimum sizes.
    pub fn expected_members(&self) -> ExpectedMembers {
        let sum = |role: InstanceGroupRole| -> usize {
            self.groups
                .iter()
                .filter(|g| g.role() == role)
                .map(|g| usize::try_from(g.min_size).unwrap_or(0))
                .sum()
        };

        ExpectedMembers {
            masters: sum(InstanceGroupRole::Master),
            nodes: sum(InstanceGroupRole::Node),
        }
    }

    /// Remove a terminated instance from further consideration.
    pub fn forget_instance(&mut self, group: &str, instance_id: &str) -> bool {
        self.groups
            .iter_mut()
            .find(|g| g.name() == group)
            .is_some_and(|g| g.forget(instance_id))
    }
}
