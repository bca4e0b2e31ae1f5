//! Kubernetes client built from kubeconfig, and its [`ClusterApi`] implementation.

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::Api;
use kube::api::{EvictParams, ListParams};
use tracing::debug;

use super::{
    ClusterApi, ClusterHealth, ClusterNode, EvictionOutcome, NodePod, NodeRole, PodRef,
    SYSTEM_NAMESPACE, SystemPod,
};
use crate::error::{KrollError, Result};

/// Build a Kubernetes client from kubeconfig.
///
/// Uses the specified context if provided, otherwise uses the default context.
pub async fn build_client(context: Option<&str>) -> AnyResult<kube::Client> {
    let client = match context {
        Some(ctx) => {
            debug!("Using kubeconfig context: {}", ctx);
            let kubeconfig = kube::config::Kubeconfig::read()
                .map_err(|e| KrollError::Kubeconfig(e.to_string()))?;
            let config = kube::Config::from_custom_kubeconfig(
                kubeconfig,
                &kube::config::KubeConfigOptions {
                    context: Some(ctx.to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| KrollError::Kubeconfig(format!("context '{}': {}", ctx, e)))?;
            kube::Client::try_from(config)
                .map_err(|e| KrollError::Kubeconfig(format!("context '{}': {}", ctx, e)))?
        }
        None => {
            debug!("Using default kubeconfig context");
            kube::Client::try_default()
                .await
                .map_err(|e| KrollError::Kubeconfig(e.to_string()))?
        }
    };

    Ok(client)
}

/// [`ClusterApi`] backed by a live Kubernetes API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: kube::Client,
}

impl KubeCluster {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Get the underlying kube client.
    pub fn inner(&self) -> &kube::Client {
        &self.client
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default())
            .await
            .map_err(|e| KrollError::KubernetesApi(format!("Failed to list nodes: {}", e)))?;

        debug!("Found {} nodes in cluster", list.items.len());
        Ok(list.items.iter().map(to_cluster_node).collect())
    }

    async fn cordon(&self, node: &str) -> Result<()> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        nodes.cordon(node).await.map_err(|e| {
            KrollError::KubernetesApi(format!("Failed to cordon node {}: {}", node, e))
        })?;
        Ok(())
    }

    async fn list_node_pods(&self, node: &str) -> Result<Vec<NodePod>> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let list = pods
            .list(&ListParams::default().fields(&format!("spec.nodeName={}", node)))
            .await
            .map_err(|e| {
                KrollError::KubernetesApi(format!("Failed to list pods on node {}: {}", node, e))
            })?;

        Ok(list.items.iter().map(to_node_pod).collect())
    }

    async fn evict_pod(&self, pod: &PodRef) -> Result<EvictionOutcome> {
        match self
            .pods(&pod.namespace)
            .evict(&pod.name, &EvictParams::default())
            .await
        {
            Ok(_) => Ok(EvictionOutcome::Evicted),
            Err(kube::Error::Api(e)) => Ok(classify_eviction_status(e.code, &e.message)),
            Err(e) => Err(KrollError::KubernetesApi(format!(
                "Failed to evict pod {}: {}",
                pod, e
            ))),
        }
    }

    async fn pod_exists(&self, pod: &PodRef) -> Result<bool> {
        let found = self
            .pods(&pod.namespace)
            .get_opt(&pod.name)
            .await
            .map_err(|e| KrollError::KubernetesApi(format!("Failed to get pod {}: {}", pod, e)))?;
        Ok(found.is_some_and(|p| pod.is_same_pod(p.metadata.uid.as_deref())))
    }

    async fn get_health(&self) -> Result<ClusterHealth> {
        let nodes = self.list_nodes().await?;

        let list = self
            .pods(SYSTEM_NAMESPACE)
            .list(&ListParams::default())
            .await
            .map_err(|e| {
                KrollError::KubernetesApi(format!(
                    "Failed to list pods in {}: {}",
                    SYSTEM_NAMESPACE, e
                ))
            })?;

        Ok(ClusterHealth {
            nodes,
            system_pods: list.items.iter().map(to_system_pod).collect(),
        })
    }
}

/// Map an Eviction API status code to an outcome.
///
/// 429 means a PodDisruptionBudget does not allow the disruption yet; 500
/// usually points at several budgets selecting the same pod. Both are worth
/// retrying. Anything else except 404 is reported as blocked as well so the
/// drain keeps trying until its deadline.
fn classify_eviction_status(code: u16, message: &str) -> EvictionOutcome {
    match code {
        404 => EvictionOutcome::Gone,
        429 => EvictionOutcome::Blocked(format!("disruption budget: {}", message)),
        _ => EvictionOutcome::Blocked(format!("HTTP {}: {}", code, message)),
    }
}

fn to_cluster_node(node: &Node) -> ClusterNode {
    let labels = node.metadata.labels.as_ref();
    let is_master = labels.is_some_and(|l| {
        l.contains_key("node-role.kubernetes.io/master")
            || l.contains_key("node-role.kubernetes.io/control-plane")
            || l.get("kubernetes.io/role").is_some_and(|r| r == "master")
    });

    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        });

    let spec = node.spec.as_ref();

    ClusterNode {
        name: node.metadata.name.clone().unwrap_or_default(),
        provider_id: spec.and_then(|s| s.provider_id.clone()),
        role: if is_master {
            NodeRole::Master
        } else {
            NodeRole::Node
        },
        ready,
        unschedulable: spec.and_then(|s| s.unschedulable).unwrap_or(false),
    }
}

fn to_node_pod(pod: &Pod) -> NodePod {
    let daemonset_owned = pod
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|refs| {
            refs.iter()
                .any(|r| r.controller == Some(true) && r.kind == "DaemonSet")
        });

    let mirror = pod
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key("kubernetes.io/config.mirror"));

    NodePod {
        pod: PodRef {
            namespace: pod
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| "default".to_string()),
            name: pod.metadata.name.clone().unwrap_or_default(),
            uid: pod.metadata.uid.clone(),
        },
        phase: pod.status.as_ref().and_then(|s| s.phase.clone()),
        daemonset_owned,
        mirror,
    }
}

fn to_system_pod(pod: &Pod) -> SystemPod {
    let status = pod.status.as_ref();
    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        });

    SystemPod {
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase: status.and_then(|s| s.phase.clone()),
        ready,
    }
}
