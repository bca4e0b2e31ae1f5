//! Cluster definition: the declared instance groups of a cluster.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::error::{KrollError, Result};

/// Role an instance group serves in the cluster.
///
/// The declaration order is also the rolling order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstanceGroupRole {
    Bastion,
    Master,
    Node,
}

impl InstanceGroupRole {
    /// Roles in the order they are rolled.
    pub const ROLLING_ORDER: [Self; 3] = [Self::Bastion, Self::Master, Self::Node];

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "bastion" => Some(Self::Bastion),
            "master" | "controlplane" | "control-plane" => Some(Self::Master),
            "node" | "worker" => Some(Self::Node),
            _ => None,
        }
    }
}

impl fmt::Display for InstanceGroupRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bastion => "Bastion",
            Self::Master => "Master",
            Self::Node => "Node",
        };
        f.write_str(s)
    }
}

impl<'de> Deserialize<'de> for InstanceGroupRole {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "unknown instance group role {raw:?} (expected Bastion, Master or Node)"
            ))
        })
    }
}

/// A declared instance group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstanceGroup {
    pub name: String,
    pub role: InstanceGroupRole,
}

impl InstanceGroup {
    pub fn new(name: impl Into<String>, role: InstanceGroupRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }
}

/// Cluster definition file contents.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub name: String,
    #[serde(default)]
    pub instance_groups: Vec<InstanceGroup>,
}

impl ClusterSpec {
    /// Read and validate a cluster definition from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading cluster definition from {}", path.display());

        let raw = std::fs::read_to_string(path).map_err(|e| {
            KrollError::InvalidClusterSpec(format!("cannot read {}: {}", path.display(), e))
        })?;

        Self::parse(&raw)
    }

    /// Parse and validate a cluster definition from YAML text.
    pub fn parse(raw: &str) -> Result<Self> {
        let spec: Self = serde_yaml::from_str(raw)
            .map_err(|e| KrollError::InvalidClusterSpec(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(KrollError::InvalidClusterSpec(
                "cluster name must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for ig in &self.instance_groups {
            if !seen.insert(ig.name.as_str()) {
                return Err(KrollError::InvalidClusterSpec(format!(
                    "duplicate instance group {:?}",
                    ig.name
                )));
            }
        }

        Ok(())
    }
}
