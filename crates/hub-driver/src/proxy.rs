use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::driver::ReverseProxyManager;
use crate::error::DriverError;

/// Reverse-proxy route management over the proxy's admin API. Routes carry
/// a stable `@id` derived from the instance domain, so create/verify/delete
/// all address the same object across restarts.
pub struct CaddyProxyManager {
    base: String,
    /// HTTP server block routes are installed into.
    server: String,
    client: reqwest::Client,
}

impl CaddyProxyManager {
    pub fn new(endpoint: impl Into<String>, server: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client");
        Self { base: endpoint.into(), server: server.into(), client }
    }

    fn route_id(instance_domain: &str) -> String {
        format!("xcord-route-{}", instance_domain.replace('.', "-"))
    }

    fn id_url(&self, route_id: &str) -> String {
        format!("{}/id/{}", self.base.trim_end_matches('/'), route_id)
    }
}

#[async_trait]
impl ReverseProxyManager for CaddyProxyManager {
    async fn create_route(
        &self,
        instance_domain: &str,
        upstream_hostname: &str,
    ) -> Result<String, DriverError> {
        let route_id = Self::route_id(instance_domain);

        // Idempotence: the @id either resolves or the route is absent.
        if self.verify_route(&route_id).await? {
            debug!(route_id, "proxy route already present");
            return Ok(route_id);
        }

        let url = format!(
            "{}/config/apps/http/servers/{}/routes",
            self.base.trim_end_matches('/'),
            self.server
        );
        let body = json!({
            "@id": route_id,
            "match": [{ "host": [instance_domain] }],
            "handle": [{
                "handler": "reverse_proxy",
                "upstreams": [{ "dial": format!("{upstream_hostname}:80") }],
            }],
        });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DriverError::request(&url, &e))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(DriverError::api(url, status, text));
        }
        Ok(route_id)
    }

    async fn verify_route(&self, route_id: &str) -> Result<bool, DriverError> {
        let url = self.id_url(route_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DriverError::request(&url, &e))?;
        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => {
                let text = resp.text().await.unwrap_or_default();
                Err(DriverError::api(url, status, text))
            }
        }
    }

    async fn delete_route(&self, route_id: &str) -> Result<(), DriverError> {
        let url = self.id_url(route_id);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| DriverError::request(&url, &e))?;
        match resp.status().as_u16() {
            s if (200..300).contains(&s) => Ok(()),
            404 => Ok(()),
            status => {
                let text = resp.text().await.unwrap_or_default();
                Err(DriverError::api(url, status, text))
            }
        }
    }
}
