//! Cloud provider abstraction.
//!
//! The rolling update only needs two capabilities from a cloud: list the
//! instance groups owned by the cluster and terminate one instance so the
//! group replaces it.

pub mod aws;

use async_trait::async_trait;

use crate::error::Result;

/// One instance as reported by the cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudGroupMember {
    pub id: String,
    /// Launch configuration / template the instance was started from.
    pub fingerprint: Option<String>,
}

/// One cloud-managed group of instances (e.g. an Auto Scaling group).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudGroup {
    /// Provider-side identifier.
    pub id: String,
    /// Instance group this cloud group implements, if tagged.
    pub instance_group: Option<String>,
    /// Launch configuration / template new instances are started from.
    pub desired_fingerprint: Option<String>,
    pub min_size: i32,
    pub max_size: i32,
    pub members: Vec<CloudGroupMember>,
}

/// Capabilities the rolling update needs from a cloud provider.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// List every cloud group belonging to the cluster, in discovery order.
    async fn list_instance_groups(&self) -> Result<Vec<CloudGroup>>;

    /// Terminate one instance, leaving its group to launch a replacement.
    async fn terminate_instance(&self, instance_id: &str) -> Result<()>;
}
