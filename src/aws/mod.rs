//! Capability contracts for the external collaborators
//!
//! The sidecar only needs four read operations:
//! - task metadata (who am I)
//! - describe tasks / describe services (which target group do I belong to)
//! - describe target health (what does the load balancer think of me)
//!
//! Each is a trait so the resolvers and the poller can be exercised with
//! in-memory mocks. Production adapters live in the submodules.

use crate::error::CallError;
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_ecs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use std::time::Duration;

pub mod ecs;
pub mod elb;
pub mod metadata;

pub use ecs::EcsControlPlane;
pub use elb::ElbTargetHealth;
pub use metadata::MetadataClient;

/// Task-level view of the container metadata endpoint
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskMetadata {
    pub task_arn: String,
    pub cluster_arn: String,
    pub containers: Vec<ContainerMetadata>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerMetadata {
    pub name: String,
    pub networks: Vec<NetworkMetadata>,
    /// Container ports exposed through port mappings
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NetworkMetadata {
    pub network_mode: String,
    pub ipv4_addresses: Vec<String>,
}

/// A load balancer attachment of an ECS service
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadBalancerBinding {
    /// Absent for classic load balancers
    pub target_group_arn: Option<String>,
    pub container_name: Option<String>,
    pub container_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceDescription {
    pub service_arn: String,
    pub load_balancers: Vec<LoadBalancerBinding>,
}

/// One entry of a target group's health report, state left as the raw API string
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TargetHealthEntry {
    pub target_id: String,
    pub port: Option<u16>,
    pub state: Option<String>,
    pub reason: Option<String>,
    pub description: Option<String>,
}

#[async_trait]
pub trait TaskMetadataSource: Send + Sync {
    async fn task_metadata(&self) -> Result<TaskMetadata, CallError>;
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Returns the task's group (e.g. `service:my-service`), if any
    async fn task_group(&self, cluster: &str, task_arn: &str)
        -> Result<Option<String>, CallError>;

    async fn describe_service(
        &self,
        cluster: &str,
        service_name: &str,
    ) -> Result<ServiceDescription, CallError>;
}

#[async_trait]
pub trait TargetHealthSource: Send + Sync {
    async fn describe_target_health(
        &self,
        target_group_arn: &str,
    ) -> Result<Vec<TargetHealthEntry>, CallError>;
}

/// Upper bound for establishing a connection to an AWS endpoint
pub const SDK_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Upper bound for a single HTTP attempt, response body included
pub const SDK_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for a whole operation across SDK-level retries
pub const SDK_OPERATION_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeouts applied to every AWS client
///
/// The SDK defaults only bound the connect phase; a stalled response would
/// otherwise hang the poll loop.
pub(crate) fn sdk_timeouts() -> TimeoutConfig {
    TimeoutConfig::builder()
        .connect_timeout(SDK_CONNECT_TIMEOUT)
        .operation_attempt_timeout(SDK_ATTEMPT_TIMEOUT)
        .operation_timeout(SDK_OPERATION_TIMEOUT)
        .build()
}

/// Service error codes worth retrying
const TRANSIENT_ERROR_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "ServerException",
    "InternalFailure",
    "InternalError",
    "ServiceUnavailable",
    "RequestTimeout",
];

fn is_transient_code(code: Option<&str>) -> bool {
    code.is_some_and(|c| TRANSIENT_ERROR_CODES.contains(&c))
}

/// Classify an AWS SDK failure for the retry policy
///
/// Timeouts, dispatch failures and unparseable responses are transient, as are
/// service errors carrying a throttling or server-side error code.
pub(crate) fn classify_sdk_error<E, R>(err: SdkError<E, R>) -> CallError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(_) => is_transient_code(err.code()),
        _ => false,
    };
    let message = DisplayErrorContext(&err).to_string();
    if transient {
        CallError::Transient(message)
    } else {
        CallError::Permanent(message)
    }
}
