//! Target resolution: task -> service -> target group
//!
//! Runs once at startup, right after identity resolution. Failures are fatal.

use super::identity::{ExposedPort, TaskIdentity};
use crate::aws::{ControlPlane, LoadBalancerBinding};
use crate::error::SidecarError;
use tracing::{info, warn};

const SERVICE_GROUP_PREFIX: &str = "service:";

/// The load balancer target this task is registered as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReference {
    pub target_group_arn: String,
    /// IP address for awsvpc targets
    pub target_id: String,
    pub target_port: u16,
}

/// Service name from an ECS task group such as `service:web`
pub fn service_name_from_group(group: &str) -> Option<&str> {
    group
        .strip_prefix(SERVICE_GROUP_PREFIX)
        .filter(|name| !name.is_empty())
}

/// Resolve the target group this task is registered in
pub async fn resolve(
    control_plane: &dyn ControlPlane,
    identity: &TaskIdentity,
) -> Result<TargetReference, SidecarError> {
    let group = control_plane
        .task_group(&identity.cluster_arn, &identity.task_arn)
        .await
        .map_err(|e| SidecarError::TargetResolutionFailed(format!("describe tasks: {}", e)))?
        .unwrap_or_default();

    let service_name = service_name_from_group(&group).ok_or_else(|| {
        SidecarError::TargetResolutionFailed(format!(
            "task is not part of a service (task group: '{}')",
            group
        ))
    })?;

    let service = control_plane
        .describe_service(&identity.cluster_arn, service_name)
        .await
        .map_err(|e| SidecarError::TargetResolutionFailed(format!("describe services: {}", e)))?;
    info!(service = %service.service_arn, "Resolved owning service");

    let (target_group_arn, target_port) = if identity.port_pinned {
        let arn = select_target_group(&service.load_balancers, identity.local_port)?;
        (arn, identity.local_port)
    } else {
        select_by_container(&service.load_balancers, &identity.exposed_ports)?
    };
    info!(
        target_group = %target_group_arn,
        port = target_port,
        "Selected target group"
    );

    Ok(TargetReference {
        target_group_arn,
        target_id: identity.local_address.clone(),
        target_port,
    })
}

fn target_group_bindings(
    bindings: &[LoadBalancerBinding],
) -> Result<Vec<&LoadBalancerBinding>, SidecarError> {
    let target_groups: Vec<&LoadBalancerBinding> = bindings
        .iter()
        .filter(|b| b.target_group_arn.is_some())
        .collect();

    if target_groups.is_empty() {
        return Err(SidecarError::TargetResolutionFailed(
            "no target groups attached to service".into(),
        ));
    }
    Ok(target_groups)
}

fn warn_ignored(selected: &str, ignored: Vec<String>) {
    if !ignored.is_empty() {
        warn!(
            selected = %selected,
            ignored = ?ignored,
            "Several target groups match this task, watching only the first"
        );
    }
}

/// Pick the target group whose container port matches this task's port
///
/// Classic load balancer attachments (no target group ARN) are skipped.
pub fn select_target_group(
    bindings: &[LoadBalancerBinding],
    port: u16,
) -> Result<String, SidecarError> {
    let target_groups = target_group_bindings(bindings)?;

    let mut matching = target_groups
        .iter()
        .filter(|b| b.container_port == Some(port))
        .filter_map(|b| b.target_group_arn.clone());

    let selected = matching.next().ok_or_else(|| {
        SidecarError::TargetResolutionFailed(format!(
            "none of {} target group(s) maps container port {}",
            target_groups.len(),
            port
        ))
    })?;

    warn_ignored(&selected, matching.collect());
    Ok(selected)
}

/// Pick the first target group bound to a container port this task exposes
///
/// Used when no port is configured. A binding names its container, so a port
/// mapped by another container in the task (this sidecar's own, say) cannot
/// be mistaken for the registered one. Returns the target group and the port.
pub fn select_by_container(
    bindings: &[LoadBalancerBinding],
    exposed: &[ExposedPort],
) -> Result<(String, u16), SidecarError> {
    let target_groups = target_group_bindings(bindings)?;

    let mut matching = target_groups.iter().filter_map(|b| {
        let arn = b.target_group_arn.clone()?;
        let port = b.container_port?;
        let bound = exposed.iter().any(|e| {
            e.port == port
                && b
                    .container_name
                    .as_ref()
                    .map_or(true, |name| *name == e.container_name)
        });
        bound.then_some((arn, port))
    });

    let (selected, port) = matching.next().ok_or_else(|| {
        let exposed: Vec<String> = exposed
            .iter()
            .map(|e| format!("{}:{}", e.container_name, e.port))
            .collect();
        SidecarError::TargetResolutionFailed(format!(
            "none of {} target group(s) is bound to a port of this task [{}]; set TARGET_CONTAINER_NAME or TARGET_CONTAINER_PORT",
            target_groups.len(),
            exposed.join(", ")
        ))
    })?;
    warn_ignored(&selected, matching.map(|(arn, _)| arn).collect());
    Ok((selected, port))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "target_test.rs"]
mod tests;
