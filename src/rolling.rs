//! Rolling update engine.
//!
//! - `snapshot`: cloud topology classified into up-to-date and stale instances
//! - `plan`: instance group selection and the go / no-go decision
//! - `policy`: run configuration and cluster access mode
//! - `executor`: the per-instance drain, terminate, wait, validate loop

pub mod executor;
pub mod plan;
pub mod policy;
pub mod snapshot;

use std::fmt;

use serde::Serialize;

pub use executor::{FailurePoint, InstanceRecord, RollingUpdate, RollingUpdateReport};
pub use plan::{PlanDecision, Selection};
pub use policy::{ClusterAccess, UpdatePolicy};
pub use snapshot::{GroupStatus, Snapshot};

/// Where an instance is in its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstanceState {
    Pending,
    Draining,
    Terminating,
    AwaitingReplacement,
    Validating,
    Done,
    Failed,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
