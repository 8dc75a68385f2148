//! ECS control-plane adapter

use super::{
    classify_sdk_error, sdk_timeouts, ControlPlane, LoadBalancerBinding, ServiceDescription,
};
use crate::error::CallError;
use async_trait::async_trait;
use aws_sdk_ecs::types::{Failure, LoadBalancer};

pub struct EcsControlPlane {
    client: aws_sdk_ecs::Client,
}

impl EcsControlPlane {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        let ecs_config = aws_sdk_ecs::config::Builder::from(config)
            .timeout_config(sdk_timeouts())
            .build();
        Self {
            client: aws_sdk_ecs::Client::from_conf(ecs_config),
        }
    }
}

fn describe_failures(failures: &[Failure]) -> String {
    let reasons: Vec<String> = failures
        .iter()
        .map(|f| {
            format!(
                "{} ({})",
                f.arn().unwrap_or("unknown"),
                f.reason().unwrap_or("no reason given")
            )
        })
        .collect();
    if reasons.is_empty() {
        "empty response".to_string()
    } else {
        reasons.join(", ")
    }
}

fn binding_from(lb: &LoadBalancer) -> LoadBalancerBinding {
    LoadBalancerBinding {
        target_group_arn: lb.target_group_arn().map(str::to_string),
        container_name: lb.container_name().map(str::to_string),
        container_port: lb.container_port().and_then(|p| u16::try_from(p).ok()),
    }
}

#[async_trait]
impl ControlPlane for EcsControlPlane {
    async fn task_group(
        &self,
        cluster: &str,
        task_arn: &str,
    ) -> Result<Option<String>, CallError> {
        tracing::debug!(cluster, task_arn, "Describing task to find its service group");
        let output = self
            .client
            .describe_tasks()
            .cluster(cluster)
            .tasks(task_arn)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        let task = output.tasks().first().ok_or_else(|| {
            CallError::Permanent(format!(
                "task not found: {}",
                describe_failures(output.failures())
            ))
        })?;
        Ok(task.group().map(str::to_string))
    }

    async fn describe_service(
        &self,
        cluster: &str,
        service_name: &str,
    ) -> Result<ServiceDescription, CallError> {
        tracing::debug!(cluster, service = service_name, "Describing service");
        let output = self
            .client
            .describe_services()
            .cluster(cluster)
            .services(service_name)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        let service = output.services().first().ok_or_else(|| {
            CallError::Permanent(format!(
                "service not found: {}",
                describe_failures(output.failures())
            ))
        })?;

        Ok(ServiceDescription {
            service_arn: service.service_arn().unwrap_or(service_name).to_string(),
            load_balancers: service.load_balancers().iter().map(binding_from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_from_target_group_load_balancer() {
        let lb = LoadBalancer::builder()
            .target_group_arn("arn:aws:elasticloadbalancing:eu-west-1:111122223333:targetgroup/web/abc")
            .container_name("app")
            .container_port(8080)
            .build();

        let binding = binding_from(&lb);

        assert_eq!(
            binding.target_group_arn.as_deref(),
            Some("arn:aws:elasticloadbalancing:eu-west-1:111122223333:targetgroup/web/abc")
        );
        assert_eq!(binding.container_name.as_deref(), Some("app"));
        assert_eq!(binding.container_port, Some(8080));
    }

    #[test]
    fn test_binding_from_classic_load_balancer_has_no_target_group() {
        let lb = LoadBalancer::builder()
            .load_balancer_name("legacy-elb")
            .container_port(80)
            .build();

        let binding = binding_from(&lb);
        assert_eq!(binding.target_group_arn, None);
    }

    #[test]
    fn test_describe_failures_lists_reasons() {
        let failures = vec![Failure::builder()
            .arn("arn:aws:ecs:eu-west-1:111122223333:task/prod/abc")
            .reason("MISSING")
            .build()];

        let text = describe_failures(&failures);
        assert!(text.contains("MISSING"));
        assert_eq!(describe_failures(&[]), "empty response");
    }
}
