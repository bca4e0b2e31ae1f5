//! AWS Auto Scaling group provider.

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use aws_sdk_autoscaling::Client as AsgClient;
use aws_sdk_autoscaling::types::{AutoScalingGroup, Filter, LaunchTemplateSpecification};
use tracing::{debug, info};

use super::{CloudGroup, CloudGroupMember, CloudProvider};
use crate::error::{KrollError, Result};

/// Tag identifying the cluster an Auto Scaling group belongs to.
pub const CLUSTER_TAG: &str = "KubernetesCluster";

/// Tag naming the instance group an Auto Scaling group implements.
pub const INSTANCE_GROUP_TAG: &str = "kops.k8s.io/instancegroup";

/// Auto Scaling backed cloud provider for one cluster.
#[derive(Clone)]
pub struct AwsCloud {
    client: AsgClient,
    cluster_name: String,
    region: String,
}

impl AwsCloud {
    /// Create a provider with the given AWS configuration.
    pub async fn new(
        cluster_name: &str,
        profile: Option<&str>,
        region: Option<&str>,
    ) -> AnyResult<Self> {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(profile) = profile {
            debug!("Using AWS profile: {}", profile);
            config_loader = config_loader.profile_name(profile);
        }

        if let Some(region) = region {
            debug!("Using AWS region: {}", region);
            config_loader = config_loader.region(aws_config::Region::new(region.to_string()));
        }

        let config = config_loader.load().await;
        let region = config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(Self {
            client: AsgClient::new(&config),
            cluster_name: cluster_name.to_string(),
            region,
        })
    }

    /// Get the AWS region string.
    pub fn region(&self) -> &str {
        &self.region
    }

    fn to_cloud_group(asg: &AutoScalingGroup) -> CloudGroup {
        let id = asg.auto_scaling_group_name().unwrap_or_default().to_string();

        let instance_group = asg
            .tags()
            .iter()
            .find(|t| t.key() == Some(INSTANCE_GROUP_TAG))
            .and_then(|t| t.value())
            .map(|v| v.to_string());

        let template = asg.launch_template().or_else(|| {
            asg.mixed_instances_policy()
                .and_then(|p| p.launch_template())
                .and_then(|lt| lt.launch_template_specification())
        });
        let desired_fingerprint = asg
            .launch_configuration_name()
            .map(|s| s.to_string())
            .or_else(|| template.and_then(template_fingerprint));

        let members = asg
            .instances()
            .iter()
            .filter(|i| {
                let state = i.lifecycle_state().map(|s| s.as_str()).unwrap_or_default();
                if is_departing(state) {
                    debug!(
                        "Ignoring instance {} of {} in state {}",
                        i.instance_id().unwrap_or("unknown"),
                        id,
                        state
                    );
                    return false;
                }
                true
            })
            .filter_map(|i| {
                let instance_id = i.instance_id()?;
                let fingerprint = i
                    .launch_configuration_name()
                    .map(|s| s.to_string())
                    .or_else(|| i.launch_template().and_then(template_fingerprint));
                Some(CloudGroupMember {
                    id: instance_id.to_string(),
                    fingerprint,
                })
            })
            .collect();

        CloudGroup {
            id,
            instance_group,
            desired_fingerprint,
            min_size: asg.min_size().unwrap_or(0),
            max_size: asg.max_size().unwrap_or(0),
            members,
        }
    }
}

#[async_trait]
impl CloudProvider for AwsCloud {
    fn name(&self) -> &str {
        "aws"
    }

    async fn list_instance_groups(&self) -> Result<Vec<CloudGroup>> {
        debug!(
            "Listing Auto Scaling groups for cluster {} in region {}",
            self.cluster_name, self.region
        );

        let filter = Filter::builder()
            .name(format!("tag:{CLUSTER_TAG}"))
            .values(&self.cluster_name)
            .build();

        let mut groups = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .describe_auto_scaling_groups()
                .filters(filter.clone());

            if let Some(token) = next_token.take() {
                request = request.next_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| KrollError::aws(module_path!(), e))?;

            groups.extend(response.auto_scaling_groups().iter().map(Self::to_cloud_group));

            next_token = response.next_token().map(|s| s.to_string());
            if next_token.is_none() {
                break;
            }
        }

        debug!("Found {} Auto Scaling groups", groups.len());
        Ok(groups)
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        info!("Terminating instance {}", instance_id);

        self.client
            .terminate_instance_in_auto_scaling_group()
            .instance_id(instance_id)
            .should_decrement_desired_capacity(false)
            .send()
            .await
            .map_err(|e| KrollError::Termination {
                instance: instance_id.to_string(),
                reason: KrollError::aws(module_path!(), e).to_string(),
            })?;

        Ok(())
    }
}

/// Fingerprint of a launch template reference: `<name or id>:<version>`.
fn template_fingerprint(spec: &LaunchTemplateSpecification) -> Option<String> {
    launch_template_fingerprint(
        spec.launch_template_name(),
        spec.launch_template_id(),
        spec.version(),
    )
}

fn launch_template_fingerprint(
    name: Option<&str>,
    id: Option<&str>,
    version: Option<&str>,
) -> Option<String> {
    let template = name.or(id)?;
    Some(format!("{}:{}", template, version.unwrap_or("$Default")))
}

/// Instances on their way out of the group are not part of the topology.
fn is_departing(lifecycle_state: &str) -> bool {
    lifecycle_state.starts_with("Terminat")
}
