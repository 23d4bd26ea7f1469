use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::error::{AppError, Result};
use crate::functions::{FunctionClient, FN_INSTANCE_STATUS};
use crate::models::Deployment;

/// Everything fetched remotely about one instance. Deployment age is not
/// part of it; that comes from the clock.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStatus {
    pub is_running: bool,
    pub system_ok: bool,
    pub instance_ok: bool,
    pub http_ok: bool,
    pub response_time_ms: Option<u64>,
    /// Public IP reported by the cloud, when the record does not have one yet
    pub public_ip: Option<String>,
}

#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self, deployment: &Deployment) -> Result<RemoteStatus>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceStatusPayload {
    instance: InstanceDescription,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceDescription {
    state: String,
    #[serde(default)]
    system_status: Option<String>,
    #[serde(default)]
    instance_status: Option<String>,
    #[serde(default)]
    public_ip: Option<String>,
}

/// Root URL of the instance's web server; IPv6 hosts need brackets
fn instance_root_url(ip: &str) -> String {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("http://[{}]/", v6),
        _ => format!("http://{}/", ip),
    }
}

fn check_passed(status: Option<&str>) -> bool {
    matches!(status, Some("ok") | Some("passed"))
}

/// Status from the `aws-instance-status` function plus a direct HTTP probe
/// of the instance's public address
pub struct FunctionStatusSource {
    functions: FunctionClient,
    http: reqwest::Client,
    probe_timeout: Duration,
}

impl FunctionStatusSource {
    pub fn new(functions: FunctionClient, http: reqwest::Client, probe_timeout: Duration) -> Self {
        Self {
            functions,
            http,
            probe_timeout,
        }
    }

    async fn probe(&self, ip: &str) -> (bool, Option<u64>) {
        let url = instance_root_url(ip);
        let started = Instant::now();
        match self.http.get(&url).timeout(self.probe_timeout).send().await {
            Ok(response) => {
                let elapsed = started.elapsed().as_millis() as u64;
                if response.status().is_success() {
                    (true, Some(elapsed))
                } else {
                    tracing::debug!(status = %response.status(), %url, "HTTP probe non-2xx");
                    (false, None)
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, %url, "HTTP probe failed");
                (false, None)
            }
        }
    }
}

#[async_trait]
impl StatusSource for FunctionStatusSource {
    async fn fetch(&self, deployment: &Deployment) -> Result<RemoteStatus> {
        let instance_id = deployment
            .instance_id
            .as_deref()
            .ok_or_else(|| AppError::InvalidInput("Deployment has no instance yet".to_string()))?;

        let payload = self
            .functions
            .invoke(
                FN_INSTANCE_STATUS,
                &json!({ "instanceId": instance_id, "region": deployment.region }),
            )
            .await?;
        let status: InstanceStatusPayload = serde_json::from_value(payload)?;
        let instance = status.instance;

        let is_running = instance.state == "running";
        let ip = deployment.public_ip.clone().or_else(|| instance.public_ip.clone());

        let (http_ok, response_time_ms) = match (&ip, is_running) {
            (Some(ip), true) => self.probe(ip).await,
            _ => (false, None),
        };

        Ok(RemoteStatus {
            is_running,
            system_ok: check_passed(instance.system_status.as_deref()),
            instance_ok: check_passed(instance.instance_status.as_deref()),
            http_ok,
            response_time_ms,
            public_ip: instance.public_ip,
        })
    }
}

/// Used when no functions endpoint is configured: every fetch fails, so
/// reports come back as unknown
pub struct UnconfiguredSource;

#[async_trait]
impl StatusSource for UnconfiguredSource {
    async fn fetch(&self, _deployment: &Deployment) -> Result<RemoteStatus> {
        Err(AppError::NotConfigured("Serverless functions"))
    }
}
