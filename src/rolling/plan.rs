//! Instance group selection and the decision to roll.

use tracing::debug;

use super::snapshot::Snapshot;
use crate::cluster::InstanceGroup;
use crate::error::{KrollError, Result};

/// Instance groups targeted by a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub groups: Vec<InstanceGroup>,
    /// Warn about cloud groups matching none of the targeted instance groups.
    /// Off when the caller narrowed the run on purpose.
    pub warn_unmatched: bool,
}

impl Selection {
    /// Select the instance groups named in `filter`, or all of them if empty.
    ///
    /// Names keep the caller's order. An unknown name fails the whole
    /// selection before anything is queried.
    pub fn new(all: &[InstanceGroup], filter: &[String]) -> Result<Self> {
        if filter.is_empty() {
            return Ok(Self {
                groups: all.to_vec(),
                warn_unmatched: true,
            });
        }

        let groups = filter
            .iter()
            .map(|name| {
                all.iter()
                    .find(|ig| &ig.name == name)
                    .cloned()
                    .ok_or_else(|| KrollError::InstanceGroupNotFound(name.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Selected {} of {} instance groups", groups.len(), all.len());
        Ok(Self {
            groups,
            warn_unmatched: false,
        })
    }
}

/// Whether a run goes ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanDecision {
    /// Nothing is stale and the run is not forced.
    NoUpdateRequired,
    /// Something would be rolled but the operator did not confirm.
    ConfirmationRequired,
    Proceed,
}

impl PlanDecision {
    pub fn decide(snapshot: &Snapshot, force: bool, yes: bool) -> Self {
        if !snapshot.needs_update() && !force {
            return Self::NoUpdateRequired;
        }
        if !yes {
            return Self::ConfirmationRequired;
        }
        Self::Proceed
    }
}
