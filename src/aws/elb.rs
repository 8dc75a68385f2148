//! Elastic Load Balancing v2 target health adapter

use super::{classify_sdk_error, sdk_timeouts, TargetHealthEntry, TargetHealthSource};
use crate::error::CallError;
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_sdk_elasticloadbalancingv2::types::TargetHealthDescription;

pub struct ElbTargetHealth {
    client: aws_sdk_elasticloadbalancingv2::Client,
}

impl ElbTargetHealth {
    /// Build a client with SDK retries disabled; the poller owns the backoff
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        let elb_config = aws_sdk_elasticloadbalancingv2::config::Builder::from(config)
            .retry_config(RetryConfig::disabled())
            .timeout_config(sdk_timeouts())
            .build();
        Self {
            client: aws_sdk_elasticloadbalancingv2::Client::from_conf(elb_config),
        }
    }
}

/// Entries without a target id cannot be matched and are dropped
fn entry_from(description: &TargetHealthDescription) -> Option<TargetHealthEntry> {
    let target = description.target()?;
    let health = description.target_health();
    Some(TargetHealthEntry {
        target_id: target.id()?.to_string(),
        port: target.port().and_then(|p| u16::try_from(p).ok()),
        state: health.and_then(|h| h.state()).map(|s| s.as_str().to_string()),
        reason: health.and_then(|h| h.reason()).map(|r| r.as_str().to_string()),
        description: health
            .and_then(|h| h.description())
            .map(str::to_string),
    })
}

#[async_trait]
impl TargetHealthSource for ElbTargetHealth {
    async fn describe_target_health(
        &self,
        target_group_arn: &str,
    ) -> Result<Vec<TargetHealthEntry>, CallError> {
        let output = self
            .client
            .describe_target_health()
            .target_group_arn(target_group_arn)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        Ok(output
            .target_health_descriptions()
            .iter()
            .filter_map(entry_from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_elasticloadbalancingv2::types::{
        TargetDescription, TargetHealth, TargetHealthReasonEnum, TargetHealthStateEnum,
    };

    #[test]
    fn test_entry_from_draining_target() {
        let description = TargetHealthDescription::builder()
            .target(TargetDescription::builder().id("10.0.2.106").port(8080).build())
            .target_health(
                TargetHealth::builder()
                    .state(TargetHealthStateEnum::Draining)
                    .reason(TargetHealthReasonEnum::DeregistrationInProgress)
                    .description("Target deregistration is in progress")
                    .build(),
            )
            .build();

        let entry = entry_from(&description).expect("entry");

        assert_eq!(entry.target_id, "10.0.2.106");
        assert_eq!(entry.port, Some(8080));
        assert_eq!(entry.state.as_deref(), Some("draining"));
        assert_eq!(
            entry.reason.as_deref(),
            Some("Target.DeregistrationInProgress")
        );
        assert_eq!(
            entry.description.as_deref(),
            Some("Target deregistration is in progress")
        );
    }

    #[test]
    fn test_entry_without_target_id_is_dropped() {
        let description = TargetHealthDescription::builder()
            .target(TargetDescription::builder().port(8080).build())
            .build();
        assert!(entry_from(&description).is_none());

        let no_target = TargetHealthDescription::builder().build();
        assert!(entry_from(&no_target).is_none());
    }

    #[test]
    fn test_entry_without_health_has_no_state() {
        let description = TargetHealthDescription::builder()
            .target(TargetDescription::builder().id("10.0.2.106").port(8080).build())
            .build();

        let entry = entry_from(&description).expect("entry");
        assert_eq!(entry.state, None);
        assert_eq!(entry.reason, None);
    }
}
