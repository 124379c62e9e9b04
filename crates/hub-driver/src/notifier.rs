use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::docker::container_hostname;
use crate::driver::InstanceNotifier;

/// Courtesy shutdown notice to an instance's internal admin endpoint.
/// Strictly best-effort: the instance may already be gone, hung, or never
/// started, so every failure is swallowed after a short timeout.
pub struct HttpInstanceNotifier {
    client: reqwest::Client,
}

impl Default for HttpInstanceNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpInstanceNotifier {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(4))
            .build()
            .expect("reqwest client");
        Self { client }
    }
}

#[async_trait]
impl InstanceNotifier for HttpInstanceNotifier {
    async fn notify_shutting_down(&self, instance_domain: &str, reason: &str) {
        let url = format!(
            "http://{}/api/internal/shutdown",
            container_hostname(instance_domain)
        );
        match self
            .client
            .post(&url)
            .json(&json!({ "reason": reason }))
            .send()
            .await
        {
            Ok(resp) => debug!(url, status = resp.status().as_u16(), "shutdown notice delivered"),
            Err(e) => debug!(url, error = %e, "shutdown notice failed (ignored)"),
        }
    }
}
