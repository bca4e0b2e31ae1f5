//! PodDisruptionBudgets that will stall a drain.
//!
//! A budget that currently allows zero disruptions makes every eviction of
//! its pods fail with 429 until something else changes, so a drain touching
//! those pods runs into its deadline. Listing them before the rolling update
//! starts tells the operator why a drain is likely to fail.

use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::Api;
use kube::api::ListParams;
use tracing::debug;

use crate::error::{KrollError, Result};

/// A budget that currently refuses every eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainBlocker {
    pub namespace: String,
    pub name: String,
    pub min_available: Option<String>,
    pub max_unavailable: Option<String>,
    pub current_healthy: i32,
    pub expected_pods: i32,
}

impl DrainBlocker {
    /// Human-readable explanation.
    pub fn reason(&self) -> String {
        let spec_info = if let Some(ref min) = self.min_available {
            format!("minAvailable={}", min)
        } else if let Some(ref max) = self.max_unavailable {
            format!("maxUnavailable={}", max)
        } else {
            "unknown spec".to_string()
        };

        format!(
            "{}, {}/{} healthy pods, no disruption allowed",
            spec_info, self.current_healthy, self.expected_pods
        )
    }
}

/// List every budget that would refuse evictions right now.
pub async fn find_drain_blockers(client: &kube::Client) -> Result<Vec<DrainBlocker>> {
    let pdbs: Api<PodDisruptionBudget> = Api::all(client.clone());
    let list = pdbs
        .list(&ListParams::default())
        .await
        .map_err(|e| KrollError::KubernetesApi(format!("Failed to list PDBs: {}", e)))?;

    debug!("Found {} PDBs in cluster", list.items.len());

    let blockers: Vec<DrainBlocker> = list.items.iter().filter_map(to_blocker).collect();
    debug!("{} PDB(s) allow no disruption", blockers.len());
    Ok(blockers)
}

fn to_blocker(pdb: &PodDisruptionBudget) -> Option<DrainBlocker> {
    let status = pdb.status.as_ref()?;

    // Budgets protecting no pod never refuse anything.
    if status.disruptions_allowed != 0 || status.expected_pods == 0 {
        return None;
    }

    let spec = pdb.spec.as_ref();
    Some(DrainBlocker {
        namespace: pdb
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string()),
        name: pdb
            .metadata
            .name
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        min_available: spec
            .and_then(|s| s.min_available.as_ref())
            .map(format_int_or_string),
        max_unavailable: spec
            .and_then(|s| s.max_unavailable.as_ref())
            .map(format_int_or_string),
        current_healthy: status.current_healthy,
        expected_pods: status.expected_pods,
    })
}

fn format_int_or_string(value: &IntOrString) -> String {
    match value {
        IntOrString::Int(i) => i.to_string(),
        IntOrString::String(s) => s.clone(),
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::policy::v1::{PodDisruptionBudgetSpec, PodDisruptionBudgetStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn pdb(allowed: i32, expected: i32, min_available: Option<IntOrString>) -> PodDisruptionBudget {
        PodDisruptionBudget {
            metadata: ObjectMeta {
                name: Some("coredns-pdb".to_string()),
                namespace: Some("kube-system".to_string()),
                ..Default::default()
            },
            spec: Some(PodDisruptionBudgetSpec {
                min_available,
                ..Default::default()
            }),
            status: Some(PodDisruptionBudgetStatus {
                disruptions_allowed: allowed,
                expected_pods: expected,
                current_healthy: expected,
                desired_healthy: expected,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_to_blocker_zero_disruptions() {
        let blocker = to_blocker(&pdb(0, 2, Some(IntOrString::Int(2)))).unwrap();
        assert_eq!(blocker.namespace, "kube-system");
        assert_eq!(
            blocker.reason(),
            "minAvailable=2, 2/2 healthy pods, no disruption allowed"
        );
    }

    #[test]
    fn test_to_blocker_allows_disruption() {
        assert!(to_blocker(&pdb(1, 3, Some(IntOrString::Int(2)))).is_none());
    }

    #[test]
    fn test_to_blocker_no_pods() {
        assert!(to_blocker(&pdb(0, 0, None)).is_none());
    }

    #[test]
    fn test_reason_max_unavailable_percentage() {
        let blocker = DrainBlocker {
            namespace: "app".to_string(),
            name: "api".to_string(),
            min_available: None,
            max_unavailable: Some("0%".to_string()),
            current_healthy: 3,
            expected_pods: 3,
        };
        assert_eq!(
            blocker.reason(),
            "maxUnavailable=0%, 3/3 healthy pods, no disruption allowed"
        );
    }

    #[test]
    fn test_format_int_or_string() {
        assert_eq!(format_int_or_string(&IntOrString::Int(1)), "1");
        assert_eq!(
            format_int_or_string(&IntOrString::String("50%".to_string())),
            "50%"
        );
    }
}
