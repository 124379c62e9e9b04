use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::driver::{ContainerEngine, ContainerSpec};
use crate::error::DriverError;

/// Path the config secret is mounted at inside every instance container.
pub const CONFIG_SECRET_TARGET: &str = "xcord-config";

/// Engine-side resource name for an instance domain. Dots are not valid in
/// container/network names.
fn resource_name(prefix: &str, domain: &str) -> String {
    format!("{}-{}", prefix, domain.replace('.', "-"))
}

/// Network hostname of the instance container, resolvable on the shared
/// infra network. Also used by the notifier and the proxy upstream.
pub fn container_hostname(domain: &str) -> String {
    resource_name("xcord", domain)
}

/// Container-engine driver speaking the engine's HTTP API through the
/// hub's engine proxy.
pub struct DockerEngine {
    base: String,
    client: reqwest::Client,
}

impl DockerEngine {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        Self { base: endpoint.into(), client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base.trim_end_matches('/'), path)
    }

    async fn engine_error(endpoint: String, resp: reqwest::Response) -> DriverError {
        let status = resp.status().as_u16();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        let message = body["message"].as_str().unwrap_or("unknown engine error").to_string();
        DriverError::Api { endpoint, status, message }
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn create_network(&self, instance_domain: &str) -> Result<String, DriverError> {
        let name = resource_name("xcord-net", instance_domain);
        let url = self.url("/networks/create");
        let body = json!({
            "Name": name,
            "CheckDuplicate": true,
            "Labels": { "xcord.instance": instance_domain },
        });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DriverError::request(&url, &e))?;

        if resp.status().as_u16() == 409 {
            // Already created on a previous attempt; look it up by name.
            debug!(network = %name, "network already exists, resolving id");
            let inspect = self.url(&format!("/networks/{name}"));
            let resp = self
                .client
                .get(&inspect)
                .send()
                .await
                .map_err(|e| DriverError::request(&inspect, &e))?;
            if !resp.status().is_success() {
                return Err(Self::engine_error(inspect, resp).await);
            }
            let body: Value = resp
                .json()
                .await
                .map_err(|e| DriverError::Internal(format!("network inspect body: {e}")))?;
            return body["Id"]
                .as_str()
                .map(String::from)
                .ok_or_else(|| DriverError::Internal("network inspect missing Id".into()));
        }
        if !resp.status().is_success() {
            return Err(Self::engine_error(url, resp).await);
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| DriverError::Internal(format!("network create body: {e}")))?;
        body["Id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| DriverError::Internal("network create missing Id".into()))
    }

    async fn network_exists(&self, network_id: &str) -> Result<bool, DriverError> {
        let url = self.url(&format!("/networks/{network_id}"));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DriverError::request(&url, &e))?;
        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            _ => Err(Self::engine_error(url, resp).await),
        }
    }

    async fn create_secret(
        &self,
        instance_domain: &str,
        payload: &[u8],
    ) -> Result<String, DriverError> {
        let name = resource_name("xcord-config", instance_domain);
        let url = self.url("/secrets/create");
        let body = json!({
            "Name": name,
            "Data": base64::engine::general_purpose::STANDARD.encode(payload),
            "Labels": { "xcord.instance": instance_domain },
        });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DriverError::request(&url, &e))?;

        if resp.status().as_u16() == 409 {
            // Secret survives from a previous attempt; resolve its ID.
            let inspect = self.url(&format!("/secrets/{name}"));
            let resp = self
                .client
                .get(&inspect)
                .send()
                .await
                .map_err(|e| DriverError::request(&inspect, &e))?;
            if !resp.status().is_success() {
                return Err(Self::engine_error(inspect, resp).await);
            }
            let body: Value = resp
                .json()
                .await
                .map_err(|e| DriverError::Internal(format!("secret inspect body: {e}")))?;
            return body["ID"]
                .as_str()
                .map(String::from)
                .ok_or_else(|| DriverError::Internal("secret inspect missing ID".into()));
        }
        if !resp.status().is_success() {
            return Err(Self::engine_error(url, resp).await);
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| DriverError::Internal(format!("secret create body: {e}")))?;
        body["ID"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| DriverError::Internal("secret create missing ID".into()))
    }

    async fn remove_secret(&self, secret_id: &str) -> Result<(), DriverError> {
        let url = self.url(&format!("/secrets/{secret_id}"));
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| DriverError::request(&url, &e))?;
        match resp.status().as_u16() {
            s if (200..300).contains(&s) => Ok(()),
            404 => Ok(()),
            _ => Err(Self::engine_error(url, resp).await),
        }
    }

    async fn start_container(&self, spec: &ContainerSpec) -> Result<String, DriverError> {
        let name = container_hostname(&spec.domain);
        let create_url = self.url(&format!("/containers/create?name={name}"));
        let mut endpoints = serde_json::Map::new();
        endpoints.insert(spec.network_id.clone(), json!({}));
        let body = json!({
            "Image": spec.image,
            "Hostname": name,
            "Labels": { "xcord.instance": spec.domain },
            "HostConfig": {
                "Memory": spec.memory_bytes,
                "CpuPeriod": spec.cpu_period,
                "CpuQuota": spec.cpu_quota,
                "RestartPolicy": { "Name": "unless-stopped" },
            },
            "NetworkingConfig": {
                "EndpointsConfig": endpoints,
            },
            // Config document mounted read-only at /run/secrets/<target>;
            // it never appears in container inspect output.
            "Secrets": [{ "ID": spec.secret_id, "Target": CONFIG_SECRET_TARGET }],
        });

        let resp = self
            .client
            .post(&create_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DriverError::request(&create_url, &e))?;

        let container_id = if resp.status().as_u16() == 409 {
            // Left over from a previous attempt; reuse it.
            debug!(container = %name, "container already exists, reusing");
            let inspect = self.url(&format!("/containers/{name}/json"));
            let resp = self
                .client
                .get(&inspect)
                .send()
                .await
                .map_err(|e| DriverError::request(&inspect, &e))?;
            if !resp.status().is_success() {
                return Err(Self::engine_error(inspect, resp).await);
            }
            let body: Value = resp
                .json()
                .await
                .map_err(|e| DriverError::Internal(format!("container inspect body: {e}")))?;
            body["Id"]
                .as_str()
                .map(String::from)
                .ok_or_else(|| DriverError::Internal("container inspect missing Id".into()))?
        } else {
            if !resp.status().is_success() {
                return Err(Self::engine_error(create_url, resp).await);
            }
            let body: Value = resp
                .json()
                .await
                .map_err(|e| DriverError::Internal(format!("container create body: {e}")))?;
            body["Id"]
                .as_str()
                .map(String::from)
                .ok_or_else(|| DriverError::Internal("container create missing Id".into()))?
        };

        // Second leg onto the shared infra network; "already attached" is fine.
        let connect_url = self.url(&format!("/networks/{}/connect", spec.infra_network));
        let resp = self
            .client
            .post(&connect_url)
            .json(&json!({ "Container": container_id }))
            .send()
            .await
            .map_err(|e| DriverError::request(&connect_url, &e))?;
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) && status != 403 && status != 409 {
            return Err(Self::engine_error(connect_url, resp).await);
        }

        let start_url = self.url(&format!("/containers/{container_id}/start"));
        let resp = self
            .client
            .post(&start_url)
            .send()
            .await
            .map_err(|e| DriverError::request(&start_url, &e))?;
        let status = resp.status().as_u16();
        // 304: already started.
        if !(200..300).contains(&status) && status != 304 {
            return Err(Self::engine_error(start_url, resp).await);
        }

        Ok(container_id)
    }

    async fn container_running(&self, container_id: &str) -> Result<bool, DriverError> {
        let url = self.url(&format!("/containers/{container_id}/json"));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DriverError::request(&url, &e))?;
        match resp.status().as_u16() {
            200 => {
                let body: Value = resp
                    .json()
                    .await
                    .map_err(|e| DriverError::Internal(format!("container inspect body: {e}")))?;
                Ok(body["State"]["Running"].as_bool().unwrap_or(false))
            }
            404 => Ok(false),
            _ => Err(Self::engine_error(url, resp).await),
        }
    }

    async fn stop_container(&self, container_id: &str) -> Result<(), DriverError> {
        let url = self.url(&format!("/containers/{container_id}/stop?t=10"));
        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| DriverError::request(&url, &e))?;
        match resp.status().as_u16() {
            s if (200..300).contains(&s) => Ok(()),
            304 | 404 => Ok(()), // already stopped / already gone
            _ => Err(Self::engine_error(url, resp).await),
        }
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), DriverError> {
        let url = self.url(&format!("/containers/{container_id}?force=true"));
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| DriverError::request(&url, &e))?;
        match resp.status().as_u16() {
            s if (200..300).contains(&s) => Ok(()),
            404 => Ok(()),
            _ => Err(Self::engine_error(url, resp).await),
        }
    }

    async fn remove_network(&self, network_id: &str) -> Result<(), DriverError> {
        let url = self.url(&format!("/networks/{network_id}"));
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| DriverError::request(&url, &e))?;
        match resp.status().as_u16() {
            s if (200..300).contains(&s) => Ok(()),
            404 => Ok(()),
            s => {
                warn!(network_id, status = s, "network remove failed");
                Err(Self::engine_error(url, resp).await)
            }
        }
    }
}
