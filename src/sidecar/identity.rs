//! Task identity resolution
//!
//! Reads the task metadata endpoint once at startup. Any failure here is
//! fatal: without an identity no other lookup can be scoped.

use crate::aws::{TaskMetadata, TaskMetadataSource};
use crate::config::SidecarConfig;
use crate::error::SidecarError;
use tracing::info;

const AWSVPC: &str = "awsvpc";

/// A container port mapping listed in task metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposedPort {
    pub container_name: String,
    pub port: u16,
}

/// Who this task is and where the load balancer reaches it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskIdentity {
    pub task_arn: String,
    pub cluster_arn: String,
    pub local_address: String,
    pub local_port: u16,
    /// Whether `local_port` was configured rather than guessed from metadata
    pub port_pinned: bool,
    /// Every port mapping in the task, in metadata order
    pub exposed_ports: Vec<ExposedPort>,
}

/// How to pick the port this task is registered under
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortSelection {
    pub container_name: Option<String>,
    pub port_override: Option<u16>,
}

impl From<&SidecarConfig> for PortSelection {
    fn from(config: &SidecarConfig) -> Self {
        Self {
            container_name: config.target_container_name.clone(),
            port_override: config.target_container_port,
        }
    }
}

/// Resolve the task identity from the metadata endpoint
pub async fn resolve(
    source: &dyn TaskMetadataSource,
    selection: &PortSelection,
) -> Result<TaskIdentity, SidecarError> {
    let metadata = source
        .task_metadata()
        .await
        .map_err(|e| SidecarError::IdentityUnavailable(e.to_string()))?;

    let identity = identity_from(&metadata, selection)?;
    info!(
        task_arn = %identity.task_arn,
        cluster = %identity.cluster_arn,
        address = %identity.local_address,
        port = identity.local_port,
        "Resolved task identity"
    );
    Ok(identity)
}

fn identity_from(
    metadata: &TaskMetadata,
    selection: &PortSelection,
) -> Result<TaskIdentity, SidecarError> {
    if metadata.task_arn.is_empty() || metadata.cluster_arn.is_empty() {
        return Err(SidecarError::IdentityUnavailable(
            "metadata is missing the task ARN or cluster".into(),
        ));
    }

    Ok(TaskIdentity {
        task_arn: metadata.task_arn.clone(),
        cluster_arn: metadata.cluster_arn.clone(),
        local_address: local_address(metadata)?,
        local_port: local_port(metadata, selection)?,
        port_pinned: selection.port_override.is_some() || selection.container_name.is_some(),
        exposed_ports: exposed_ports(metadata),
    })
}

fn exposed_ports(metadata: &TaskMetadata) -> Vec<ExposedPort> {
    metadata
        .containers
        .iter()
        .flat_map(|c| {
            c.ports.iter().map(|&port| ExposedPort {
                container_name: c.name.clone(),
                port,
            })
        })
        .collect()
}

/// The task's single awsvpc IPv4 address
fn local_address(metadata: &TaskMetadata) -> Result<String, SidecarError> {
    let network = metadata
        .containers
        .iter()
        .flat_map(|c| c.networks.first())
        .next()
        .ok_or_else(|| SidecarError::IdentityUnavailable("no network attached to task".into()))?;

    if network.network_mode != AWSVPC {
        return Err(SidecarError::IdentityUnavailable(format!(
            "task is not running in '{}' mode (found '{}')",
            AWSVPC, network.network_mode
        )));
    }

    match network.ipv4_addresses.as_slice() {
        [address] => Ok(address.clone()),
        [] => Err(SidecarError::IdentityUnavailable(
            "task network has no IPv4 address".into(),
        )),
        many => Err(SidecarError::IdentityUnavailable(format!(
            "task network has {} IPv4 addresses, expected exactly one",
            many.len()
        ))),
    }
}

fn local_port(metadata: &TaskMetadata, selection: &PortSelection) -> Result<u16, SidecarError> {
    if let Some(port) = selection.port_override {
        return Ok(port);
    }

    match &selection.container_name {
        Some(name) => {
            let container = metadata
                .containers
                .iter()
                .find(|c| &c.name == name)
                .ok_or_else(|| {
                    SidecarError::IdentityUnavailable(format!(
                        "container '{}' not found in task",
                        name
                    ))
                })?;
            container.ports.first().copied().ok_or_else(|| {
                SidecarError::IdentityUnavailable(format!(
                    "container '{}' exposes no port mapping",
                    name
                ))
            })
        }
        // Provisional: target resolution matches the service's container binding
        None => metadata
            .containers
            .iter()
            .find_map(|c| c.ports.first().copied())
            .ok_or_else(|| {
                SidecarError::IdentityUnavailable(
                    "no container exposes a port mapping; set TARGET_CONTAINER_PORT".into(),
                )
            }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "identity_test.rs"]
mod tests;
