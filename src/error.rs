//! Custom error types for kroll.

use std::time::Duration;

use thiserror::Error;

use crate::rolling::InstanceState;

/// Result alias used by the rolling update core.
pub type Result<T> = std::result::Result<T, KrollError>;

/// Errors that can occur during a rolling update.
#[derive(Error, Debug)]
pub enum KrollError {
    #[error("[{0}] {1}")]
    AwsSdk(String, String),

    #[error("[{0}] AWS credentials error: {1}")]
    AwsCredentials(String, String),

    #[error("[{0}] AWS region not configured: {1}")]
    AwsRegion(String, String),

    #[error("InstanceGroup {0:?} not found")]
    InstanceGroupNotFound(String),

    #[error("Invalid cluster definition: {0}")]
    InvalidClusterSpec(String),

    #[error("Failed to drain node {node}: {} pod(s) not evicted in time: {}", .pods.len(), .pods.join(", "))]
    Drain { node: String, pods: Vec<String> },

    #[error("Cluster did not validate within {:?}: {last_failure}", .timeout)]
    ValidationTimeout {
        timeout: Duration,
        last_failure: String,
    },

    #[error("Failed to terminate instance {instance}: {reason}")]
    Termination { instance: String, reason: String },

    #[error(
        "Unable to reach the Kubernetes API: {0}. Use --cloudonly to do a rolling-update without confirming progress with the Kubernetes API"
    )]
    ClusterUnreachable(String),

    #[error("Kubernetes API error: {0}")]
    KubernetesApi(String),

    #[error("Kubeconfig error: {0}")]
    Kubeconfig(String),

    #[error(
        "Rolling update aborted at instance group {group}, instance #{position} ({instance}) while {state}: {source}"
    )]
    RollingUpdateAborted {
        group: String,
        position: usize,
        instance: String,
        state: InstanceState,
        #[source]
        source: Box<KrollError>,
    },
}

impl KrollError {
    /// Create an AWS SDK error from any error type.
    /// Analyzes the error message to provide more specific error types.
    pub fn aws<E: std::fmt::Debug + std::fmt::Display>(component: &str, err: E) -> Self {
        let err_debug = format!("{err:?}");
        let err_display = err.to_string();
        let component = component.to_string();

        let combined_lower = format!("{err_display} {err_debug}").to_lowercase();

        if combined_lower.contains("no credentials")
            || combined_lower.contains("credentials not found")
            || combined_lower.contains("invalid credentials")
            || combined_lower.contains("expired token")
            || combined_lower.contains("expiredtoken")
            || combined_lower.contains("the security token included in the request is invalid")
            || combined_lower.contains("the security token included in the request is expired")
            || combined_lower.contains("unrecognized client")
            || combined_lower.contains("invalidclienttokenid")
            || combined_lower.contains("signaturedoesnotmatch")
            || combined_lower.contains("access denied")
            || combined_lower.contains("not authorized")
            || combined_lower.contains("accessdenied")
        {
            return Self::AwsCredentials(
                component,
                Self::extract_error_details(&err_debug, &err_display),
            );
        }

        if combined_lower.contains("no region")
            || combined_lower.contains("region not found")
            || combined_lower.contains("missing region")
        {
            return Self::AwsRegion(
                component,
                Self::extract_error_details(&err_debug, &err_display),
            );
        }

        Self::AwsSdk(
            component,
            Self::extract_error_details(&err_debug, &err_display),
        )
    }

    /// Extract the service message from an AWS SDK error.
    /// Returns a single-line error message.
    fn extract_error_details(debug_str: &str, display_str: &str) -> String {
        // Pattern: message: Some("actual error message")
        const MARKER: &str = "message: Some(\"";
        if let Some(rest) = debug_str
            .find(MARKER)
            .and_then(|pos| debug_str.get(pos + MARKER.len()..))
            && let Some(end) = rest.find('"')
        {
            return rest[..end].to_string();
        }

        if !display_str.to_lowercase().contains("service error") {
            return display_str.to_string();
        }

        "AWS API request failed".to_string()
    }

    /// Returns true for errors raised before anything in the cluster was changed.
    pub const fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::InstanceGroupNotFound(_)
                | Self::InvalidClusterSpec(_)
                | Self::ClusterUnreachable(_)
                | Self::Kubeconfig(_)
        )
    }
}
