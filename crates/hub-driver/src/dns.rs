use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::driver::DnsProvider;
use crate::error::DriverError;

/// Zone-scoped DNS record CRUD over the provider's JSON API with bearer
/// auth. Record names are passed relative to the zone.
pub struct HttpDnsProvider {
    base: String,
    zone_id: String,
    api_token: String,
    record_ttl: u32,
    client: reqwest::Client,
}

impl HttpDnsProvider {
    pub fn new(
        endpoint: impl Into<String>,
        zone_id: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client");
        Self {
            base: endpoint.into(),
            zone_id: zone_id.into(),
            api_token: api_token.into(),
            record_ttl: 300,
            client,
        }
    }

    fn records_url(&self) -> String {
        format!("{}/zones/{}/dns_records", self.base.trim_end_matches('/'), self.zone_id)
    }

    /// IDs of existing A records for `subdomain`, oldest first.
    async fn lookup(&self, subdomain: &str) -> Result<Vec<String>, DriverError> {
        let url = format!("{}?type=A&name={}", self.records_url(), subdomain);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| DriverError::request(&url, &e))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(DriverError::api(url, status, text));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| DriverError::Internal(format!("dns lookup body: {e}")))?;
        Ok(body["result"]
            .as_array()
            .map(|records| {
                records
                    .iter()
                    .filter_map(|r| r["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl DnsProvider for HttpDnsProvider {
    async fn create_a_record(&self, subdomain: &str, ip: &str) -> Result<(), DriverError> {
        if !self.lookup(subdomain).await?.is_empty() {
            debug!(subdomain, "A record already present");
            return Ok(());
        }
        let url = self.records_url();
        let body = json!({
            "type": "A",
            "name": subdomain,
            "content": ip,
            "ttl": self.record_ttl,
            "proxied": false,
        });
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| DriverError::request(&url, &e))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(DriverError::api(url, status, text));
        }
        Ok(())
    }

    async fn verify_a_record(&self, subdomain: &str) -> Result<bool, DriverError> {
        Ok(!self.lookup(subdomain).await?.is_empty())
    }

    async fn delete_a_record(&self, subdomain: &str) -> Result<(), DriverError> {
        for id in self.lookup(subdomain).await? {
            let url = format!("{}/{}", self.records_url(), id);
            let resp = self
                .client
                .delete(&url)
                .bearer_auth(&self.api_token)
                .send()
                .await
                .map_err(|e| DriverError::request(&url, &e))?;
            let status = resp.status().as_u16();
            if !(200..300).contains(&status) && status != 404 {
                let text = resp.text().await.unwrap_or_default();
                return Err(DriverError::api(url, status, text));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn create_skips_existing_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/z1/dns_records"))
            .and(query_param("name", "acme"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": [{ "id": "rec-1", "type": "A", "name": "acme" }]
            })))
            .mount(&server)
            .await;

        let dns = HttpDnsProvider::new(server.uri(), "z1", "tok");
        // No POST mock mounted: an attempted create would fail the test.
        dns.create_a_record("acme", "203.0.113.10").await.unwrap();
    }

    #[tokio::test]
    async fn create_posts_when_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/z1/dns_records"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "result": [] })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/zones/z1/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": { "id": "rec-2" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dns = HttpDnsProvider::new(server.uri(), "z1", "tok");
        dns.create_a_record("acme", "203.0.113.10").await.unwrap();
    }

    #[tokio::test]
    async fn delete_of_missing_record_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/z1/dns_records"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "result": [] })),
            )
            .mount(&server)
            .await;

        let dns = HttpDnsProvider::new(server.uri(), "z1", "tok");
        dns.delete_a_record("gone").await.unwrap();
    }

    #[tokio::test]
    async fn verify_reflects_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/z1/dns_records"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "result": [] })),
            )
            .mount(&server)
            .await;

        let dns = HttpDnsProvider::new(server.uri(), "z1", "tok");
        assert!(!dns.verify_a_record("acme").await.unwrap());
    }
}
