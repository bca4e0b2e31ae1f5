//! JSON run report.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::rolling::{InstanceRecord, InstanceState, RollingUpdateReport, Snapshot};

/// One instance group as seen before the run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub name: String,
    pub cloud_group: String,
    pub role: String,
    pub status: String,
    pub need_update: usize,
    pub ready: usize,
    pub min_size: i32,
    pub max_size: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureSummary {
    pub group: String,
    pub position: usize,
    pub instance_id: String,
    pub state: InstanceState,
    pub error: String,
}

/// Machine-readable record of one run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub cluster: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cloud_only: bool,
    pub force: bool,
    pub succeeded: bool,
    pub groups: Vec<GroupSummary>,
    pub instances: Vec<InstanceRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureSummary>,
}

/// Settings of the run the report describes.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub cluster: &'a str,
    pub started_at: DateTime<Utc>,
    pub cloud_only: bool,
    pub force: bool,
}

impl RunReport {
    /// Build a report from the pre-run snapshot and the executor's outcome.
    pub fn new(ctx: RunContext<'_>, snapshot: &Snapshot, outcome: &RollingUpdateReport) -> Self {
        let groups = snapshot
            .groups()
            .iter()
            .map(|g| GroupSummary {
                name: g.name().to_string(),
                cloud_group: g.cloud_id.clone(),
                role: g.role().to_string(),
                status: g.status().to_string(),
                need_update: g.need_update.len(),
                ready: g.ready.len(),
                min_size: g.min_size,
                max_size: g.max_size,
            })
            .collect();

        let failure = outcome.failure.as_ref().map(|f| FailureSummary {
            group: f.group.clone(),
            position: f.position,
            instance_id: f.instance_id.clone(),
            state: f.state,
            error: f.error.to_string(),
        });

        Self {
            cluster: ctx.cluster.to_string(),
            started_at: ctx.started_at,
            finished_at: Utc::now(),
            cloud_only: ctx.cloud_only,
            force: ctx.force,
            succeeded: outcome.succeeded(),
            groups,
            instances: outcome.instances.clone(),
            failure,
        }
    }
}

/// Write the report as pretty-printed JSON. Returns the absolute path.
pub fn save_report(report: &RunReport, path: &Path) -> Result<PathBuf> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write run report to {}", path.display()))?;
    Ok(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()))
}

/// Write the report, logging a failure instead of returning it.
pub fn save_report_or_warn(report: &RunReport, path: &Path) -> Option<PathBuf> {
    match save_report(report, path) {
        Ok(saved) => Some(saved),
        Err(e) => {
            warn!("Run report not written: {:#}", e);
            None
        }
    }
}
