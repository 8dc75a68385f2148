//! ECS task metadata endpoint (v4) client

use super::{ContainerMetadata, NetworkMetadata, TaskMetadata, TaskMetadataSource};
use crate::error::CallError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TaskResponse {
    #[serde(rename = "TaskARN")]
    task_arn: String,
    cluster: String,
    #[serde(default)]
    containers: Vec<ContainerResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerResponse {
    #[serde(default)]
    name: String,
    #[serde(default)]
    networks: Vec<NetworkResponse>,
    #[serde(default)]
    ports: Vec<PortResponse>,
}

#[derive(Debug, Deserialize)]
struct NetworkResponse {
    #[serde(rename = "NetworkMode", default)]
    network_mode: String,
    #[serde(rename = "IPv4Addresses", default)]
    ipv4_addresses: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortResponse {
    container_port: u16,
}

impl From<TaskResponse> for TaskMetadata {
    fn from(task: TaskResponse) -> Self {
        TaskMetadata {
            task_arn: task.task_arn,
            cluster_arn: task.cluster,
            containers: task
                .containers
                .into_iter()
                .map(|c| ContainerMetadata {
                    name: c.name,
                    networks: c
                        .networks
                        .into_iter()
                        .map(|n| NetworkMetadata {
                            network_mode: n.network_mode,
                            ipv4_addresses: n.ipv4_addresses,
                        })
                        .collect(),
                    ports: c.ports.into_iter().map(|p| p.container_port).collect(),
                })
                .collect(),
        }
    }
}

/// Parse the JSON body of `GET ${ECS_CONTAINER_METADATA_URI_V4}/task`
pub fn parse_task_metadata(body: &str) -> Result<TaskMetadata, CallError> {
    serde_json::from_str::<TaskResponse>(body)
        .map(TaskMetadata::from)
        .map_err(|e| CallError::Permanent(format!("malformed task metadata: {}", e)))
}

/// Reads task metadata over HTTP
pub struct MetadataClient {
    client: reqwest::Client,
    base_uri: String,
}

impl MetadataClient {
    pub fn new(base_uri: impl Into<String>) -> Self {
        let client = match reqwest::Client::builder().timeout(METADATA_TIMEOUT).build() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build metadata HTTP client, using default");
                reqwest::Client::new()
            }
        };
        Self {
            client,
            base_uri: base_uri.into(),
        }
    }

    fn task_url(&self) -> String {
        format!("{}/task", self.base_uri.trim_end_matches('/'))
    }
}

#[async_trait]
impl TaskMetadataSource for MetadataClient {
    async fn task_metadata(&self) -> Result<TaskMetadata, CallError> {
        let url = self.task_url();
        tracing::debug!(url = %url, "Fetching task metadata");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                CallError::Transient(format!("metadata request timed out: {}", e))
            } else {
                CallError::Permanent(format!("metadata endpoint unreachable: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Permanent(format!(
                "metadata endpoint returned HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CallError::Permanent(format!("failed to read metadata body: {}", e)))?;
        parse_task_metadata(&body)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "metadata_test.rs"]
mod tests;
