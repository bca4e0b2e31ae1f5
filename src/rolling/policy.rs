//! Run configuration of a rolling update.

use std::time::Duration;

use crate::cluster::InstanceGroupRole;
use crate::k8s::ClusterApi;
use crate::k8s::validation::DEFAULT_POLL_INTERVAL;

/// How the rolling update reaches the cluster.
#[derive(Clone, Copy)]
pub enum ClusterAccess<'a> {
    /// Drain and validate through the cluster API.
    Connected(&'a dyn ClusterApi),
    /// Only the cloud is touched; no drain, no validation.
    CloudOnly,
}

impl<'a> ClusterAccess<'a> {
    pub const fn is_cloud_only(&self) -> bool {
        matches!(self, Self::CloudOnly)
    }
}

/// Run-scoped rolling update settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePolicy {
    /// Roll every instance, including up-to-date ones.
    pub force: bool,
    /// Abort the run when a drain fails.
    pub fail_on_drain_error: bool,
    /// Abort the run when the cluster does not validate in time.
    pub fail_on_validate: bool,
    /// Drain before terminating and validate afterwards.
    pub drain_and_validate: bool,
    pub bastion_interval: Duration,
    pub master_interval: Duration,
    pub node_interval: Duration,
    pub drain_interval: Duration,
    pub validation_poll_interval: Duration,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            force: false,
            fail_on_drain_error: true,
            fail_on_validate: true,
            drain_and_validate: true,
            bastion_interval: Duration::from_secs(5 * 60),
            master_interval: Duration::from_secs(5 * 60),
            node_interval: Duration::from_secs(4 * 60),
            drain_interval: Duration::from_secs(90),
            validation_poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl UpdatePolicy {
    /// Wait after each termination, and validation deadline, for a role.
    pub const fn interval_for(&self, role: InstanceGroupRole) -> Duration {
        match role {
            InstanceGroupRole::Bastion => self.bastion_interval,
            InstanceGroupRole::Master => self.master_interval,
            InstanceGroupRole::Node => self.node_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_intervals() {
        let policy = UpdatePolicy::default();
        assert_eq!(
            policy.interval_for(InstanceGroupRole::Bastion),
            Duration::from_secs(300)
        );
        assert_eq!(
            policy.interval_for(InstanceGroupRole::Master),
            Duration::from_secs(300)
        );
        assert_eq!(
            policy.interval_for(InstanceGroupRole::Node),
            Duration::from_secs(240)
        );
        assert_eq!(policy.drain_interval, Duration::from_secs(90));
    }

    #[test]
    fn test_default_is_strict() {
        let policy = UpdatePolicy::default();
        assert!(!policy.force);
        assert!(policy.fail_on_drain_error);
        assert!(policy.fail_on_validate);
        assert!(policy.drain_and_validate);
    }

    #[test]
    fn test_cloud_only_access() {
        assert!(ClusterAccess::CloudOnly.is_cloud_only());
    }
}
