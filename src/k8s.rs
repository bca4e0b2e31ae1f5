//! Kubernetes cluster access.
//!
//! The rolling update talks to the cluster through [`ClusterApi`] so the
//! drain and validation logic can run against any implementation.

pub mod client;
pub mod drain;
pub mod pdb;
pub mod validation;

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use tokio::time::{Instant, timeout_at};

use crate::error::{KrollError, Result};

/// Namespace whose pods must be healthy for the cluster to validate.
pub const SYSTEM_NAMESPACE: &str = "kube-system";

/// Role of a registered node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Master,
    Node,
}

/// A node as reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub name: String,
    pub provider_id: Option<String>,
    pub role: NodeRole,
    pub ready: bool,
    pub unschedulable: bool,
}

impl ClusterNode {
    /// Whether this node runs on the given cloud instance.
    ///
    /// Provider ids look like `aws:///us-east-1a/i-0123456789abcdef0`.
    pub fn runs_on(&self, instance_id: &str) -> bool {
        self.provider_id
            .as_deref()
            .and_then(|id| id.rsplit('/').next())
            .is_some_and(|last| last == instance_id)
    }
}

/// Reference to one pod.
///
/// The uid tells a pod apart from a successor created under the same name,
/// as StatefulSet pods are.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
    pub uid: Option<String>,
}

impl PodRef {
    /// Whether a pod found under this name is still this pod.
    ///
    /// `found_uid` is the uid of the pod currently holding the name, if any.
    pub fn is_same_pod(&self, found_uid: Option<&str>) -> bool {
        match (self.uid.as_deref(), found_uid) {
            (Some(uid), Some(found)) => uid == found,
            _ => true,
        }
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A pod bound to a node, with what drain needs to decide on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePod {
    pub pod: PodRef,
    pub phase: Option<String>,
    pub daemonset_owned: bool,
    pub mirror: bool,
}

/// Answer of the Eviction API for one pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictionOutcome {
    Evicted,
    /// Refused for now, typically by a PodDisruptionBudget.
    Blocked(String),
    /// The pod no longer exists.
    Gone,
}

/// Health summary of one pod of the system namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPod {
    pub name: String,
    pub phase: Option<String>,
    pub ready: bool,
}

/// One synchronous observation of the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterHealth {
    pub nodes: Vec<ClusterNode>,
    pub system_pods: Vec<SystemPod>,
}

/// Await a cluster call, giving up at `deadline`.
pub async fn call_before<T>(
    deadline: Instant,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    timeout_at(deadline, call).await.unwrap_or_else(|_| {
        Err(KrollError::KubernetesApi(
            "request did not complete before the deadline".to_string(),
        ))
    })
}

/// Cluster operations used by drain and validation.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>>;

    /// Mark a node unschedulable.
    async fn cordon(&self, node: &str) -> Result<()>;

    async fn list_node_pods(&self, node: &str) -> Result<Vec<NodePod>>;

    async fn evict_pod(&self, pod: &PodRef) -> Result<EvictionOutcome>;

    /// Whether the pod still exists. A successor under the same name with
    /// another uid does not count.
    async fn pod_exists(&self, pod: &PodRef) -> Result<bool>;

    async fn get_health(&self) -> Result<ClusterHealth>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(provider_id: Option<&str>) -> ClusterNode {
        ClusterNode {
            name: "ip-10-0-1-12.ec2.internal".to_string(),
            provider_id: provider_id.map(String::from),
            role: NodeRole::Node,
            ready: true,
            unschedulable: false,
        }
    }

    #[test]
    fn test_runs_on_matches_instance_suffix() {
        let n = node(Some("aws:///us-east-1a/i-0123456789abcdef0"));
        assert!(n.runs_on("i-0123456789abcdef0"));
        assert!(!n.runs_on("i-0123456789abcdef"));
        assert!(!n.runs_on("us-east-1a"));
    }

    #[test]
    fn test_runs_on_without_provider_id() {
        assert!(!node(None).runs_on("i-0123456789abcdef0"));
    }

    #[test]
    fn test_pod_ref_display() {
        let pod = PodRef {
            namespace: "default".to_string(),
            name: "web-0".to_string(),
            uid: Some("1b4e28ba".to_string()),
        };
        assert_eq!(pod.to_string(), "default/web-0");
    }

    #[test]
    fn test_is_same_pod_compares_uids() {
        let pod = PodRef {
            namespace: "default".to_string(),
            name: "db-0".to_string(),
            uid: Some("uid-a".to_string()),
        };
        assert!(pod.is_same_pod(Some("uid-a")));
        assert!(!pod.is_same_pod(Some("uid-b")));
        assert!(pod.is_same_pod(None));

        let unknown = PodRef { uid: None, ..pod };
        assert!(unknown.is_same_pod(Some("uid-b")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_before_gives_up_at_deadline() {
        let started = Instant::now();
        let deadline = started + std::time::Duration::from_secs(30);
        let result: Result<()> = call_before(deadline, std::future::pending()).await;

        assert!(matches!(result, Err(KrollError::KubernetesApi(msg)) if msg.contains("deadline")));
        assert_eq!(started.elapsed(), std::time::Duration::from_secs(30));
    }
}
