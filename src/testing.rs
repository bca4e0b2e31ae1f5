//! In-memory cloud and cluster fakes for unit tests.
//!
//! Both fakes append to one shared [`EventLog`] so tests can assert on the
//! global order of cluster and cloud calls.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::cloud::{CloudGroup, CloudGroupMember, CloudProvider};
use crate::error::{KrollError, Result};
use crate::k8s::{
    ClusterApi, ClusterHealth, ClusterNode, EvictionOutcome, NodePod, NodeRole, PodRef,
};

/// One call observed by a fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ListGroups,
    Terminate(String),
    ListNodes,
    Cordon(String),
    Evict(String),
    PodExists(String),
    Health,
}

/// Shared, timestamped call log.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<(Instant, Event)>>>);

impl EventLog {
    fn push(&self, event: Event) {
        self.0.lock().unwrap().push((Instant::now(), event));
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn timeline(&self) -> Vec<(Instant, Event)> {
        self.0.lock().unwrap().clone()
    }

    pub fn terminations(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Terminate(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    fn last_termination(&self) -> Option<String> {
        self.terminations().pop()
    }
}

/// Build a cloud group whose members are `stale` outdated and `fresh` current instances.
pub fn cloud_group(ig: &str, stale: &[&str], fresh: &[&str]) -> CloudGroup {
    let members = stale
        .iter()
        .map(|id| CloudGroupMember {
            id: id.to_string(),
            fingerprint: Some(format!("{ig}:1")),
        })
        .chain(fresh.iter().map(|id| CloudGroupMember {
            id: id.to_string(),
            fingerprint: Some(format!("{ig}:2")),
        }))
        .collect();

    CloudGroup {
        id: format!("{ig}.k8s.example.com"),
        instance_group: Some(ig.to_string()),
        desired_fingerprint: Some(format!("{ig}:2")),
        min_size: 0,
        max_size: (stale.len() + fresh.len()) as i32,
        members,
    }
}

/// Node registered for the given instance.
pub fn node_for(instance_id: &str, role: NodeRole) -> ClusterNode {
    ClusterNode {
        name: format!("node-{instance_id}"),
        provider_id: Some(format!("aws:///us-east-1a/{instance_id}")),
        role,
        ready: true,
        unschedulable: false,
    }
}

pub struct FakeCloud {
    log: EventLog,
    groups: Vec<CloudGroup>,
    failing: Mutex<HashSet<String>>,
}

impl FakeCloud {
    pub fn new(log: EventLog, groups: Vec<CloudGroup>) -> Self {
        Self {
            log,
            groups,
            failing: Mutex::default(),
        }
    }

    pub fn fail_termination(&self, instance_id: &str) {
        self.failing.lock().unwrap().insert(instance_id.to_string());
    }
}

#[async_trait]
impl CloudProvider for FakeCloud {
    fn name(&self) -> &str {
        "fake"
    }

    async fn list_instance_groups(&self) -> Result<Vec<CloudGroup>> {
        self.log.push(Event::ListGroups);
        Ok(self.groups.clone())
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(instance_id) {
            return Err(KrollError::Termination {
                instance: instance_id.to_string(),
                reason: "rejected by fake cloud".to_string(),
            });
        }
        self.log.push(Event::Terminate(instance_id.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct ClusterState {
    nodes: Vec<ClusterNode>,
    node_pods: HashMap<String, Vec<NodePod>>,
    blocked: HashMap<String, usize>,
    lingering: HashMap<String, usize>,
    recreated: HashSet<String>,
    fail_cordon: bool,
    hang_evictions: bool,
    hang_health: bool,
    unreachable: bool,
    unhealthy_while_replacing: HashSet<String>,
}

pub struct FakeCluster {
    log: EventLog,
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::with_log(EventLog::default())
    }

    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            state: Mutex::default(),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.events()
    }

    pub fn set_nodes(&self, nodes: Vec<ClusterNode>) {
        self.state.lock().unwrap().nodes = nodes;
    }

    /// Current node list, without logging a call.
    pub fn nodes_snapshot(&self) -> Vec<ClusterNode> {
        self.state.lock().unwrap().nodes.clone()
    }

    pub fn set_node_pods(&self, node: &str, pods: Vec<NodePod>) {
        self.state
            .lock()
            .unwrap()
            .node_pods
            .insert(node.to_string(), pods);
    }

    /// Refuse the next `times` evictions of the pod.
    pub fn block_eviction(&self, pod: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .blocked
            .insert(pod.to_string(), times);
    }

    /// Keep reporting the pod as existing for `checks` checks after eviction.
    pub fn linger_after_eviction(&self, pod: &str, checks: usize) {
        self.state
            .lock()
            .unwrap()
            .lingering
            .insert(pod.to_string(), checks);
    }

    /// After eviction, report a successor pod with the same name and a new uid.
    pub fn recreate_after_eviction(&self, pod: &str) {
        self.state
            .lock()
            .unwrap()
            .recreated
            .insert(pod.to_string());
    }

    /// Eviction requests never answer.
    pub fn hang_evictions(&self) {
        self.state.lock().unwrap().hang_evictions = true;
    }

    /// Health requests never answer.
    pub fn hang_health(&self) {
        self.state.lock().unwrap().hang_health = true;
    }

    pub fn fail_cordon(&self) {
        self.state.lock().unwrap().fail_cordon = true;
    }

    pub fn set_unreachable(&self) {
        self.state.lock().unwrap().unreachable = true;
    }

    /// Report an unready replacement node while this instance is the last terminated one.
    pub fn unhealthy_while_replacing(&self, instance_id: &str) {
        self.state
            .lock()
            .unwrap()
            .unhealthy_while_replacing
            .insert(instance_id.to_string());
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        self.log.push(Event::ListNodes);
        let state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(KrollError::KubernetesApi("connection refused".to_string()));
        }
        Ok(state.nodes.clone())
    }

    async fn cordon(&self, node: &str) -> Result<()> {
        self.log.push(Event::Cordon(node.to_string()));
        if self.state.lock().unwrap().fail_cordon {
            return Err(KrollError::KubernetesApi("cordon forbidden".to_string()));
        }
        Ok(())
    }

    async fn list_node_pods(&self, node: &str) -> Result<Vec<NodePod>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .node_pods
            .get(node)
            .cloned()
            .unwrap_or_default())
    }

    async fn evict_pod(&self, pod: &PodRef) -> Result<EvictionOutcome> {
        self.log.push(Event::Evict(pod.to_string()));
        let hang = self.state.lock().unwrap().hang_evictions;
        if hang {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.blocked.get_mut(&pod.name)
            && *remaining > 0
        {
            *remaining -= 1;
            return Ok(EvictionOutcome::Blocked(
                "Cannot evict pod as it would violate the pod's disruption budget".to_string(),
            ));
        }
        Ok(EvictionOutcome::Evicted)
    }

    async fn pod_exists(&self, pod: &PodRef) -> Result<bool> {
        self.log.push(Event::PodExists(pod.to_string()));
        let mut state = self.state.lock().unwrap();
        if state.recreated.contains(&pod.name) {
            let successor = format!("{}-successor", pod.uid.as_deref().unwrap_or(&pod.name));
            return Ok(pod.is_same_pod(Some(&successor)));
        }
        match state.lingering.get_mut(&pod.name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_health(&self) -> Result<ClusterHealth> {
        self.log.push(Event::Health);
        let hang = self.state.lock().unwrap().hang_health;
        if hang {
            std::future::pending::<()>().await;
        }
        let replacing = self.log.last_termination();
        let state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(KrollError::KubernetesApi("connection refused".to_string()));
        }

        let mut nodes = state.nodes.clone();
        if let Some(id) = replacing
            && state.unhealthy_while_replacing.contains(&id)
        {
            let mut replacement = node_for(&format!("{id}-replacement"), NodeRole::Node);
            replacement.ready = false;
            nodes.push(replacement);
        }

        Ok(ClusterHealth {
            nodes,
            system_pods: Vec::new(),
        })
    }
}
