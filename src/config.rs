//! CLI configuration and argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::k8s::validation::MIN_POLL_INTERVAL;
use crate::rolling::UpdatePolicy;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Rolling update CLI for Kubernetes cluster instance groups.
///
/// Finds instances whose launch configuration or template is out of date,
/// then replaces them one at a time: bastions first, then masters, then nodes.
/// Each instance is drained, terminated, given time for its replacement to
/// join, and the cluster is validated before moving on.
#[derive(Parser, Debug, Clone)]
#[command(name = "kroll")]
#[command(about = "Rolling update CLI for Kubernetes cluster instance groups")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    /// Cluster definition file
    #[arg(short = 'f', long, default_value = "cluster.yaml", env = "KROLL_CLUSTER_FILE")]
    pub cluster_file: PathBuf,

    /// Cluster name, overriding the one in the cluster definition
    #[arg(long)]
    pub name: Option<String>,

    /// Perform the rolling update; without it only the plan is shown
    #[arg(short, long, default_value = "false")]
    pub yes: bool,

    /// Roll every instance, even if none is out of date
    #[arg(long, default_value = "false")]
    pub force: bool,

    /// Do not talk to the Kubernetes API: no drain, no validation
    #[arg(long = "cloudonly", default_value = "false")]
    pub cloud_only: bool,

    /// Abort the rolling update when a node fails to drain
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub fail_on_drain_error: bool,

    /// Abort the rolling update when the cluster does not validate in time
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub fail_on_validate_error: bool,

    /// Drain nodes before termination and validate the cluster afterwards
    #[arg(long, default_value_t = true, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub drain_and_validate: bool,

    /// Wait after a master is terminated, and validation deadline
    #[arg(long, default_value = "5m", value_parser = parse_duration)]
    pub master_interval: Duration,

    /// Wait after a node is terminated, and validation deadline
    #[arg(long, default_value = "4m", value_parser = parse_duration)]
    pub node_interval: Duration,

    /// Wait after a bastion is terminated, and validation deadline
    #[arg(long, default_value = "5m", value_parser = parse_duration)]
    pub bastion_interval: Duration,

    /// Time allowed to evict every pod of a node
    #[arg(long, default_value = "90s", value_parser = parse_duration)]
    pub drain_interval: Duration,

    /// Pause between two cluster health checks
    #[arg(long, default_value = "10s", value_parser = parse_poll_interval)]
    pub validation_poll_interval: Duration,

    /// Instance groups to update (repeatable or comma separated; default: all)
    #[arg(long = "instance-group", value_name = "NAME", value_delimiter = ',')]
    pub instance_groups: Vec<String>,

    /// AWS region
    #[arg(short, long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// AWS profile to use
    #[arg(short, long, env = "AWS_PROFILE")]
    pub profile: Option<String>,

    /// Kubeconfig context (default: current context)
    #[arg(long)]
    pub context: Option<String>,

    /// Write a JSON run report to this path
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "KROLL_LOG_LEVEL")]
    pub log_level: String,
}

/// Application configuration derived from CLI args.
#[derive(Debug, Clone)]
pub struct Config {
    pub cluster_file: PathBuf,
    pub cluster_name: Option<String>,
    pub yes: bool,
    pub cloud_only: bool,
    pub instance_groups: Vec<String>,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub context: Option<String>,
    pub report: Option<PathBuf>,
    pub log_level: String,
    pub policy: UpdatePolicy,
}

impl Config {
    /// Create config from CLI arguments.
    pub fn from_args(args: Args) -> Self {
        let policy = UpdatePolicy {
            force: args.force,
            fail_on_drain_error: args.fail_on_drain_error,
            fail_on_validate: args.fail_on_validate_error,
            drain_and_validate: args.drain_and_validate,
            bastion_interval: args.bastion_interval,
            master_interval: args.master_interval,
            node_interval: args.node_interval,
            drain_interval: args.drain_interval,
            validation_poll_interval: args.validation_poll_interval,
        };

        let instance_groups = args
            .instance_groups
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            cluster_file: args.cluster_file,
            cluster_name: args.name,
            yes: args.yes,
            cloud_only: args.cloud_only,
            instance_groups,
            region: args.region,
            profile: args.profile,
            context: args.context,
            report: args.report,
            log_level: args.log_level,
            policy,
        }
    }
}

/// Parse a Go-style duration such as `90s`, `4m`, `1h30m`, `1.5h` or `500ms`.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = 0f64;
    let mut rest = input;

    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return Err(format!("invalid duration {input:?}: expected a number"));
        }
        let value: f64 = rest[..num_len]
            .parse()
            .map_err(|_| format!("invalid duration {input:?}: bad number"))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds_per_unit = match &rest[..unit_len] {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 1e-3,
            "us" | "µs" => 1e-6,
            "ns" => 1e-9,
            "" => return Err(format!("invalid duration {input:?}: missing unit")),
            unit => return Err(format!("invalid duration {input:?}: unknown unit {unit:?}")),
        };
        rest = &rest[unit_len..];

        total += value * seconds_per_unit;
    }

    Duration::try_from_secs_f64(total).map_err(|e| format!("invalid duration {input:?}: {e}"))
}

/// Parse a poll interval: a duration of at least one second.
pub fn parse_poll_interval(input: &str) -> Result<Duration, String> {
    let interval = parse_duration(input)?;
    if interval < MIN_POLL_INTERVAL {
        return Err(format!(
            "poll interval {input:?} is shorter than {:?}",
            MIN_POLL_INTERVAL
        ));
    }
    Ok(interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let argv = std::iter::once("kroll").chain(args.iter().copied());
        Config::from_args(Args::parse_from(argv))
    }

    #[test]
    fn test_parse_duration_simple() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("4m").unwrap(), Duration::from_secs(240));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_duration_combined() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
    }

    #[test]
    fn test_parse_duration_zero() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("m5").is_err());
    }

    #[test]
    fn test_parse_duration_overflow_is_an_error() {
        let err = parse_duration("99999999999999999999h").unwrap_err();
        assert!(err.contains("invalid duration"));
        let argv = ["kroll", "--node-interval", "99999999999999999999h"];
        assert!(Args::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_poll_interval_must_be_at_least_one_second() {
        assert!(parse_poll_interval("0s").is_err());
        assert!(parse_poll_interval("500ms").is_err());
        assert_eq!(parse_poll_interval("1s").unwrap(), Duration::from_secs(1));

        let argv = ["kroll", "--validation-poll-interval", "0s"];
        assert!(Args::try_parse_from(argv).is_err());
        let config = parse(&["--validation-poll-interval", "30s"]);
        assert_eq!(config.policy.validation_poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_defaults_match_policy_defaults() {
        let config = parse(&[]);
        assert_eq!(config.cluster_file, PathBuf::from("cluster.yaml"));
        assert!(!config.yes);
        assert!(!config.cloud_only);
        assert!(config.instance_groups.is_empty());
        assert_eq!(config.policy, UpdatePolicy::default());
    }

    #[test]
    fn test_policy_flags() {
        let config = parse(&[
            "--yes",
            "--force",
            "--cloudonly",
            "--fail-on-drain-error=false",
            "--fail-on-validate-error",
            "false",
            "--node-interval",
            "2m",
            "--drain-interval=1m30s",
        ]);
        assert!(config.yes);
        assert!(config.cloud_only);
        assert!(config.policy.force);
        assert!(!config.policy.fail_on_drain_error);
        assert!(!config.policy.fail_on_validate);
        assert!(config.policy.drain_and_validate);
        assert_eq!(config.policy.node_interval, Duration::from_secs(120));
        assert_eq!(config.policy.drain_interval, Duration::from_secs(90));
    }

    #[test]
    fn test_instance_group_filter() {
        let config = parse(&[
            "--instance-group",
            "nodes,master-us-east-1a",
            "--instance-group",
            "bastions",
        ]);
        assert_eq!(
            config.instance_groups,
            vec!["nodes", "master-us-east-1a", "bastions"]
        );
    }

    #[test]
    fn test_invalid_interval_rejected() {
        let argv = ["kroll", "--master-interval", "soon"];
        assert!(Args::try_parse_from(argv).is_err());
    }
}
