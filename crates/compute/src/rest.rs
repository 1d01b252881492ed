//! REST-backed [`ComputeApi`] implementation.
//!
//! A thin wrapper over `reqwest` against the compute v1 endpoint. It focuses
//! on:
//!
//! - constructing an HTTP client with sensible defaults
//! - validating `GANTRY_COMPUTE_BASE` overrides for safety
//! - mapping transport/status failures into [`ComputeError`] so the retry
//!   policy can classify them
//!
//! Credentials are taken from `GANTRY_AUTH_TOKEN` when present; requests go
//! out unauthenticated otherwise, which is what local emulators expect.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use gantry_types::{
    AttachedDisk, DeprecationStatus, Disk, ForwardingRule, Image, Instance, MachineImage, Metadata, Network, Operation, Region,
    SerialPortOutput, Snapshot, Subnetwork, TargetInstance,
};
use reqwest::{Client, Method, Url, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::retry::RetryPolicy;
use crate::{ComputeApi, ComputeError};

/// Default public endpoint.
const DEFAULT_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";
/// Environment variable overriding the endpoint (emulators, test rigs).
const BASE_URL_ENV: &str = "GANTRY_COMPUTE_BASE";
/// Environment variable carrying a bearer token.
const AUTH_TOKEN_ENV: &str = "GANTRY_AUTH_TOKEN";
/// Base domains allowed for non-local endpoint overrides.
const ALLOWED_DOMAINS: &[&str] = &["googleapis.com"];
/// Hostnames allowed regardless of scheme.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

/// Production compute client.
#[derive(Debug, Clone)]
pub struct RestComputeService {
    base_url: String,
    http: Client,
    retry: RetryPolicy,
    user_agent: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorPayload>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorPayload {
    message: Option<String>,
    errors: Option<Vec<ApiErrorDetail>>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    reason: Option<String>,
}

impl RestComputeService {
    /// Construct a client from the environment.
    pub fn new_from_env() -> Result<Self> {
        let mut default_headers = header::HeaderMap::new();
        if let Ok(token) = env::var(AUTH_TOKEN_ENV) {
            let value = format!("Bearer {token}");
            default_headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&value).context("authorization header")?,
            );
        }

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(60))
            .build()
            .context("build http client")?;

        let base_url = env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        validate_base_url(&base_url)?;

        Ok(Self {
            base_url,
            http,
            retry: RetryPolicy::default(),
            user_agent: format!("gantry/0.1; {}", env::consts::OS),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: Method, path: &str, body: Option<serde_json::Value>) -> Result<T, ComputeError> {
        let url = format!("{}/{}", self.base_url, path);
        self.retry
            .run(path, || {
                let url = url.clone();
                let method = method.clone();
                let body = body.clone();
                async move { self.call_once(method, &url, body).await }
            })
            .await
    }

    async fn call_once<T: DeserializeOwned>(&self, method: Method, url: &str, body: Option<serde_json::Value>) -> Result<T, ComputeError> {
        debug!(%url, "compute API request");
        let mut request = self.http.request(method, url).header(header::USER_AGENT, &self.user_agent);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| ComputeError::transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<ApiErrorBody>(&text)
                .ok()
                .and_then(|b| b.error)
                .and_then(|e| e.errors.into_iter().flatten().find_map(|d| d.reason));
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .ok()
                .and_then(|b| b.error)
                .and_then(|e| e.message)
                .unwrap_or(text);
            return Err(ComputeError::http(status.as_u16(), reason, message));
        }

        response.json::<T>().await.map_err(|e| ComputeError::response(e.to_string()))
    }

    async fn post_op(&self, path: &str, body: serde_json::Value) -> Result<Operation, ComputeError> {
        self.call(Method::POST, path, Some(body)).await
    }

    async fn delete_op(&self, path: &str) -> Result<Operation, ComputeError> {
        self.call(Method::DELETE, path, None).await
    }

    fn json_of<S: serde::Serialize>(value: &S) -> Result<serde_json::Value, ComputeError> {
        serde_json::to_value(value).map_err(|e| ComputeError::response(e.to_string()))
    }
}

/// Validate that a base URL override is acceptable.
///
/// `localhost`/`127.0.0.1` may use any scheme; anything else must be HTTPS
/// on an allowed API domain or a subdomain thereof.
fn validate_base_url(base: &str) -> Result<()> {
    let parsed = Url::parse(base).map_err(|e| anyhow!("invalid {BASE_URL_ENV} URL '{base}': {e}"))?;
    let host = parsed.host_str().ok_or_else(|| anyhow!("{BASE_URL_ENV} must include a host"))?;

    if LOCALHOST_DOMAINS.iter().any(|&allowed| host.eq_ignore_ascii_case(allowed)) {
        return Ok(());
    }

    if parsed.scheme() != "https" {
        return Err(anyhow!("{BASE_URL_ENV} must use https for non-localhost hosts; got '{}://'", parsed.scheme()));
    }

    let allowed = ALLOWED_DOMAINS
        .iter()
        .any(|&domain| host.eq_ignore_ascii_case(domain) || host.ends_with(&format!(".{domain}")));
    if !allowed {
        return Err(anyhow!(
            "{BASE_URL_ENV} host '{host}' is not allowed; must be one of {ALLOWED_DOMAINS:?} or a subdomain, or localhost"
        ));
    }

    Ok(())
}

#[async_trait]
impl ComputeApi for RestComputeService {
    async fn create_disk(&self, project: &str, zone: &str, disk: &Disk) -> Result<Operation, ComputeError> {
        self.post_op(&format!("projects/{project}/zones/{zone}/disks"), Self::json_of(disk)?).await
    }

    async fn delete_disk(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError> {
        self.delete_op(&format!("projects/{project}/zones/{zone}/disks/{name}")).await
    }

    async fn attach_disk(&self, project: &str, zone: &str, instance: &str, disk: &AttachedDisk) -> Result<Operation, ComputeError> {
        self.post_op(
            &format!("projects/{project}/zones/{zone}/instances/{instance}/attachDisk"),
            Self::json_of(disk)?,
        )
        .await
    }

    async fn detach_disk(&self, project: &str, zone: &str, instance: &str, device_name: &str) -> Result<Operation, ComputeError> {
        self.post_op(
            &format!("projects/{project}/zones/{zone}/instances/{instance}/detachDisk?deviceName={device_name}"),
            serde_json::json!({}),
        )
        .await
    }

    async fn create_image(&self, project: &str, image: &Image) -> Result<Operation, ComputeError> {
        self.post_op(&format!("projects/{project}/global/images"), Self::json_of(image)?).await
    }

    async fn delete_image(&self, project: &str, name: &str) -> Result<Operation, ComputeError> {
        self.delete_op(&format!("projects/{project}/global/images/{name}")).await
    }

    async fn deprecate_image(&self, project: &str, name: &str, status: &DeprecationStatus) -> Result<Operation, ComputeError> {
        self.post_op(&format!("projects/{project}/global/images/{name}/deprecate"), Self::json_of(status)?)
            .await
    }

    async fn create_machine_image(&self, project: &str, machine_image: &MachineImage) -> Result<Operation, ComputeError> {
        self.post_op(&format!("projects/{project}/global/machineImages"), Self::json_of(machine_image)?)
            .await
    }

    async fn delete_machine_image(&self, project: &str, name: &str) -> Result<Operation, ComputeError> {
        self.delete_op(&format!("projects/{project}/global/machineImages/{name}")).await
    }

    async fn create_snapshot(&self, project: &str, zone: &str, disk: &str, snapshot: &Snapshot) -> Result<Operation, ComputeError> {
        self.post_op(
            &format!("projects/{project}/zones/{zone}/disks/{disk}/createSnapshot"),
            Self::json_of(snapshot)?,
        )
        .await
    }

    async fn delete_snapshot(&self, project: &str, name: &str) -> Result<Operation, ComputeError> {
        self.delete_op(&format!("projects/{project}/global/snapshots/{name}")).await
    }

    async fn create_instance(&self, project: &str, zone: &str, instance: &Instance) -> Result<Operation, ComputeError> {
        self.post_op(&format!("projects/{project}/zones/{zone}/instances"), Self::json_of(instance)?)
            .await
    }

    async fn delete_instance(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError> {
        self.delete_op(&format!("projects/{project}/zones/{zone}/instances/{name}")).await
    }

    async fn start_instance(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError> {
        self.post_op(&format!("projects/{project}/zones/{zone}/instances/{name}/start"), serde_json::json!({}))
            .await
    }

    async fn stop_instance(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError> {
        self.post_op(&format!("projects/{project}/zones/{zone}/instances/{name}/stop"), serde_json::json!({}))
            .await
    }

    async fn suspend_instance(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError> {
        self.post_op(&format!("projects/{project}/zones/{zone}/instances/{name}/suspend"), serde_json::json!({}))
            .await
    }

    async fn resume_instance(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError> {
        self.post_op(&format!("projects/{project}/zones/{zone}/instances/{name}/resume"), serde_json::json!({}))
            .await
    }

    async fn set_machine_type(&self, project: &str, zone: &str, instance: &str, machine_type: &str) -> Result<Operation, ComputeError> {
        self.post_op(
            &format!("projects/{project}/zones/{zone}/instances/{instance}/setMachineType"),
            serde_json::json!({ "machineType": machine_type }),
        )
        .await
    }

    async fn set_instance_metadata(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        metadata: &Metadata,
    ) -> Result<Operation, ComputeError> {
        self.post_op(
            &format!("projects/{project}/zones/{zone}/instances/{instance}/setMetadata"),
            Self::json_of(metadata)?,
        )
        .await
    }

    async fn get_instance(&self, project: &str, zone: &str, name: &str) -> Result<Instance, ComputeError> {
        self.call(Method::GET, &format!("projects/{project}/zones/{zone}/instances/{name}"), None).await
    }

    async fn get_serial_port_output(
        &self,
        project: &str,
        zone: &str,
        instance: &str,
        port: i64,
        start: i64,
    ) -> Result<SerialPortOutput, ComputeError> {
        self.call(
            Method::GET,
            &format!("projects/{project}/zones/{zone}/instances/{instance}/serialPort?port={port}&start={start}"),
            None,
        )
        .await
    }

    async fn create_network(&self, project: &str, network: &Network) -> Result<Operation, ComputeError> {
        self.post_op(&format!("projects/{project}/global/networks"), Self::json_of(network)?).await
    }

    async fn delete_network(&self, project: &str, name: &str) -> Result<Operation, ComputeError> {
        self.delete_op(&format!("projects/{project}/global/networks/{name}")).await
    }

    async fn create_subnetwork(&self, project: &str, region: &str, subnetwork: &Subnetwork) -> Result<Operation, ComputeError> {
        self.post_op(&format!("projects/{project}/regions/{region}/subnetworks"), Self::json_of(subnetwork)?)
            .await
    }

    async fn delete_subnetwork(&self, project: &str, region: &str, name: &str) -> Result<Operation, ComputeError> {
        self.delete_op(&format!("projects/{project}/regions/{region}/subnetworks/{name}")).await
    }

    async fn create_target_instance(&self, project: &str, zone: &str, target: &TargetInstance) -> Result<Operation, ComputeError> {
        self.post_op(&format!("projects/{project}/zones/{zone}/targetInstances"), Self::json_of(target)?)
            .await
    }

    async fn delete_target_instance(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError> {
        self.delete_op(&format!("projects/{project}/zones/{zone}/targetInstances/{name}")).await
    }

    async fn create_forwarding_rule(&self, project: &str, region: &str, rule: &ForwardingRule) -> Result<Operation, ComputeError> {
        self.post_op(&format!("projects/{project}/regions/{region}/forwardingRules"), Self::json_of(rule)?)
            .await
    }

    async fn delete_forwarding_rule(&self, project: &str, region: &str, name: &str) -> Result<Operation, ComputeError> {
        self.delete_op(&format!("projects/{project}/regions/{region}/forwardingRules/{name}")).await
    }

    async fn get_region(&self, project: &str, region: &str) -> Result<Region, ComputeError> {
        self.call(Method::GET, &format!("projects/{project}/regions/{region}"), None).await
    }

    async fn get_zone_operation(&self, project: &str, zone: &str, name: &str) -> Result<Operation, ComputeError> {
        self.call(Method::GET, &format!("projects/{project}/zones/{zone}/operations/{name}"), None).await
    }

    async fn get_region_operation(&self, project: &str, region: &str, name: &str) -> Result<Operation, ComputeError> {
        self.call(Method::GET, &format!("projects/{project}/regions/{region}/operations/{name}"), None).await
    }

    async fn get_global_operation(&self, project: &str, name: &str) -> Result<Operation, ComputeError> {
        self.call(Method::GET, &format!("projects/{project}/global/operations/{name}"), None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_validation_rules() {
        assert!(validate_base_url("https://compute.googleapis.com/compute/v1").is_ok());
        assert!(validate_base_url("https://staging-compute.sandbox.googleapis.com/compute/v1").is_ok());
        assert!(validate_base_url("http://localhost:8787/compute/v1").is_ok());
        assert!(validate_base_url("http://compute.googleapis.com/compute/v1").is_err());
        assert!(validate_base_url("https://evil.example.com/compute/v1").is_err());
        assert!(validate_base_url("not a url").is_err());
    }
}
