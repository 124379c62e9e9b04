use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::driver::{BucketProvision, ObjectStoreManager};
use crate::error::DriverError;

type HmacSha256 = Hmac<Sha256>;

/// Wall-clock budget for draining a bucket's objects before removal.
const DRAIN_BUDGET: Duration = Duration::from_secs(30);

// ── SigV4 signing ─────────────────────────────────────────────────────────────

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date    = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region  = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Extract the hostname from a URL (scheme://host/path → host).
fn url_host(url: &str) -> &str {
    let without_scheme = url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    match without_scheme.find('/') {
        Some(pos) => &without_scheme[..pos],
        None      => without_scheme,
    }
}

/// Build SigV4 request headers for an S3 call.
fn sigv4_headers(
    method:       &str,
    uri_path:     &str,
    query_string: &str,
    body:         &[u8],
    access_key:   &str,
    secret_key:   &str,
    region:       &str,
    host:         &str,
) -> BTreeMap<String, String> {
    let now       = chrono::Utc::now();
    let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date      = now.format("%Y%m%d").to_string();

    let payload_hash = sha256_hex(body);

    // Canonical headers (sorted, lowercased)
    let mut canon_hdrs: BTreeMap<String, String> = BTreeMap::new();
    canon_hdrs.insert("host".into(), host.into());
    canon_hdrs.insert("x-amz-content-sha256".into(), payload_hash.clone());
    canon_hdrs.insert("x-amz-date".into(), timestamp.clone());

    let signed_headers: String = canon_hdrs.keys().cloned().collect::<Vec<_>>().join(";");
    let canonical_headers: String = canon_hdrs
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method, uri_path, query_string,
        canonical_headers, signed_headers, payload_hash
    );

    let scope = format!("{}/{}/s3/aws4_request", date, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        timestamp, scope, sha256_hex(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(secret_key, &date, region, "s3");
    let signature   = hmac_sha256(&signing_key, string_to_sign.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>();

    let auth = format!(
        "AWS4-HMAC-SHA256 Credential={}/{},SignedHeaders={},Signature={}",
        access_key, scope, signed_headers, signature
    );

    let mut out = BTreeMap::new();
    out.insert("Authorization".into(), auth);
    out.insert("x-amz-date".into(), timestamp);
    out.insert("x-amz-content-sha256".into(), payload_hash);
    out
}

// ── S3 XML responses ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListEntry {
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct S3Error {
    #[serde(default)]
    code: String,
}

fn s3_error_code(body: &str) -> String {
    quick_xml::de::from_str::<S3Error>(body)
        .map(|e| e.code)
        .unwrap_or_default()
}

// ── MinioObjectStore ──────────────────────────────────────────────────────────

/// Object-store driver for a MinIO-style deployment: bucket and object
/// operations through the S3 API (SigV4) and principal/policy management
/// through the admin console API (session cookie).
pub struct MinioObjectStore {
    s3_base: String,
    admin_base: String,
    admin_access_key: String,
    admin_secret_key: String,
    region: String,
    client: reqwest::Client,
}

impl MinioObjectStore {
    pub fn new(
        s3_endpoint: impl Into<String>,
        admin_endpoint: impl Into<String>,
        admin_access_key: impl Into<String>,
        admin_secret_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            s3_base: s3_endpoint.into(),
            admin_base: admin_endpoint.into(),
            admin_access_key: admin_access_key.into(),
            admin_secret_key: admin_secret_key.into(),
            region: region.into(),
            client,
        }
    }

    /// One signed S3 request; returns (status, body).
    async fn s3_request(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<(u16, String), DriverError> {
        let base = self.s3_base.trim_end_matches('/');
        let host = url_host(base).to_string();
        let url = if query.is_empty() {
            format!("{base}{path}")
        } else {
            format!("{base}{path}?{query}")
        };
        let headers = sigv4_headers(
            method.as_str(),
            path,
            query,
            b"",
            access_key,
            secret_key,
            &self.region,
            &host,
        );

        let mut req = self.client.request(method, &url);
        for (k, v) in &headers {
            req = req.header(k, v);
        }
        let resp = req.send().await.map_err(|e| DriverError::request(&url, &e))?;
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Ok((status, body))
    }

    /// Admin console login; returns the session cookie to replay.
    async fn admin_login(&self) -> Result<String, DriverError> {
        let url = format!("{}/api/v1/login", self.admin_base.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .json(&json!({
                "accessKey": self.admin_access_key,
                "secretKey": self.admin_secret_key,
            }))
            .send()
            .await
            .map_err(|e| DriverError::request(&url, &e))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(DriverError::api(url, status, text));
        }
        resp.headers()
            .get(reqwest::header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(|c| c.split(';').next().unwrap_or(c).to_string())
            .ok_or_else(|| DriverError::Internal("admin login returned no session cookie".into()))
    }

    fn policy_name(bucket: &str) -> String {
        format!("{bucket}-rw")
    }

    /// Read/write policy scoped to exactly one bucket.
    fn policy_document(bucket: &str) -> serde_json::Value {
        json!({
            "Version": "2012-10-17",
            "Statement": [
                {
                    "Effect": "Allow",
                    "Action": ["s3:ListBucket", "s3:GetBucketLocation"],
                    "Resource": [format!("arn:aws:s3:::{bucket}")],
                },
                {
                    "Effect": "Allow",
                    "Action": ["s3:GetObject", "s3:PutObject", "s3:DeleteObject"],
                    "Resource": [format!("arn:aws:s3:::{bucket}/*")],
                },
            ],
        })
    }

    /// Create the per-bucket policy and user. Errors bubble up; the caller
    /// decides whether they are fatal.
    async fn provision_principal(
        &self,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<(), DriverError> {
        let cookie = self.admin_login().await?;
        let base = self.admin_base.trim_end_matches('/');

        let policy_url = format!("{base}/api/v1/policies");
        let resp = self
            .client
            .post(&policy_url)
            .header(reqwest::header::COOKIE, &cookie)
            .json(&json!({
                "name": Self::policy_name(bucket),
                "policy": Self::policy_document(bucket).to_string(),
            }))
            .send()
            .await
            .map_err(|e| DriverError::request(&policy_url, &e))?;
        let status = resp.status().as_u16();
        // 409: policy survives from a previous attempt.
        if !(200..300).contains(&status) && status != 409 {
            let text = resp.text().await.unwrap_or_default();
            return Err(DriverError::api(policy_url, status, text));
        }

        let user_url = format!("{base}/api/v1/users");
        let resp = self
            .client
            .post(&user_url)
            .header(reqwest::header::COOKIE, &cookie)
            .json(&json!({
                "accessKey": access_key,
                "secretKey": secret_key,
                "groups": [],
                "policies": [Self::policy_name(bucket)],
            }))
            .send()
            .await
            .map_err(|e| DriverError::request(&user_url, &e))?;
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) && status != 409 {
            let text = resp.text().await.unwrap_or_default();
            return Err(DriverError::api(user_url, status, text));
        }
        Ok(())
    }

    async fn list_keys(
        &self,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Vec<String>, DriverError> {
        let (status, body) = self
            .s3_request(
                reqwest::Method::GET,
                &format!("/{bucket}"),
                "list-type=2",
                access_key,
                secret_key,
            )
            .await?;
        match status {
            200 => {
                let parsed: ListBucketResult = quick_xml::de::from_str(&body)
                    .map_err(|e| DriverError::Internal(format!("list parse: {e}")))?;
                Ok(parsed.contents.into_iter().map(|c| c.key).collect())
            }
            404 => Ok(vec![]),
            _ => Err(DriverError::api(format!("{}/{bucket}", self.s3_base), status, body)),
        }
    }
}

#[async_trait]
impl ObjectStoreManager for MinioObjectStore {
    async fn provision_bucket(
        &self,
        name: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<BucketProvision, DriverError> {
        let (status, body) = self
            .s3_request(
                reqwest::Method::PUT,
                &format!("/{name}"),
                "",
                &self.admin_access_key,
                &self.admin_secret_key,
            )
            .await?;
        if !(200..300).contains(&status) {
            let code = s3_error_code(&body);
            if code != "BucketAlreadyOwnedByYou" && code != "BucketAlreadyExists" {
                return Err(DriverError::api(
                    format!("{}/{name}", self.s3_base),
                    status,
                    body,
                ));
            }
            debug!(bucket = name, "bucket already present");
        }

        // Principal/policy setup is the isolation half; its failure is
        // reported, not fatal. The caller owns the fallback decision.
        match self.provision_principal(name, access_key, secret_key).await {
            Ok(()) => Ok(BucketProvision { principal_ready: true }),
            Err(e) => {
                warn!(bucket = name, error = %e, "per-instance principal setup failed");
                Ok(BucketProvision { principal_ready: false })
            }
        }
    }

    async fn verify_bucket(
        &self,
        name: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<bool, DriverError> {
        // A real list call with the stored credentials: exercises read
        // permission, unlike a HEAD which can succeed on 403.
        let (status, body) = self
            .s3_request(
                reqwest::Method::GET,
                &format!("/{name}"),
                "list-type=2&max-keys=1",
                access_key,
                secret_key,
            )
            .await?;
        match status {
            200 => Ok(true),
            403 | 404 => Ok(false),
            _ => Err(DriverError::api(format!("{}/{name}", self.s3_base), status, body)),
        }
    }

    async fn deprovision_bucket(&self, name: &str, access_key: &str) -> Result<(), DriverError> {
        // 1. Drain objects within the budget.
        let started = Instant::now();
        loop {
            if started.elapsed() > DRAIN_BUDGET {
                warn!(bucket = name, "drain budget exhausted, attempting bucket removal anyway");
                break;
            }
            let keys = self
                .list_keys(name, &self.admin_access_key, &self.admin_secret_key)
                .await
                .unwrap_or_default();
            if keys.is_empty() {
                break;
            }
            for key in keys {
                let (status, body) = self
                    .s3_request(
                        reqwest::Method::DELETE,
                        &format!("/{name}/{key}"),
                        "",
                        &self.admin_access_key,
                        &self.admin_secret_key,
                    )
                    .await?;
                if !(200..300).contains(&status) && status != 404 {
                    warn!(bucket = name, key, status, error = %body, "object delete failed");
                }
            }
        }

        // 2. Remove the bucket itself.
        let (status, body) = self
            .s3_request(
                reqwest::Method::DELETE,
                &format!("/{name}"),
                "",
                &self.admin_access_key,
                &self.admin_secret_key,
            )
            .await?;
        if !(200..300).contains(&status) && status != 404 && s3_error_code(&body) != "NoSuchBucket" {
            return Err(DriverError::api(format!("{}/{name}", self.s3_base), status, body));
        }

        // 3. Remove the per-instance principal and policy; both may never
        //    have existed (root-credential fallback).
        match self.admin_login().await {
            Ok(cookie) => {
                let base = self.admin_base.trim_end_matches('/');
                for url in [
                    format!("{base}/api/v1/users/{access_key}"),
                    format!("{base}/api/v1/policies/{}", Self::policy_name(name)),
                ] {
                    match self
                        .client
                        .delete(&url)
                        .header(reqwest::header::COOKIE, &cookie)
                        .send()
                        .await
                    {
                        Ok(resp) => {
                            let status = resp.status().as_u16();
                            if !(200..300).contains(&status) && status != 404 {
                                warn!(url, status, "principal cleanup failed");
                            }
                        }
                        Err(e) => warn!(url, error = %e, "principal cleanup request failed"),
                    }
                }
            }
            Err(e) => warn!(bucket = name, error = %e, "admin login failed during deprovision"),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> MinioObjectStore {
        MinioObjectStore::new(server.uri(), server.uri(), "root", "rootpw", "us-east-1")
    }

    #[tokio::test]
    async fn verify_bucket_distinguishes_403_from_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok-bucket"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0"?><ListBucketResult><Name>ok-bucket</Name></ListBucketResult>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/denied-bucket"))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                r#"<?xml version="1.0"?><Error><Code>AccessDenied</Code></Error>"#,
            ))
            .mount(&server)
            .await;

        let s = store(&server);
        assert!(s.verify_bucket("ok-bucket", "ak", "sk").await.unwrap());
        assert!(!s.verify_bucket("denied-bucket", "ak", "sk").await.unwrap());
    }

    #[tokio::test]
    async fn provision_reports_principal_fallback_when_admin_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/xcord-acme"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/login"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let s = store(&server);
        let provision = s.provision_bucket("xcord-acme", "ak", "sk").await.unwrap();
        assert!(!provision.principal_ready);
    }

    #[tokio::test]
    async fn provision_tolerates_existing_bucket() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/xcord-acme"))
            .respond_with(ResponseTemplate::new(409).set_body_string(
                r#"<?xml version="1.0"?><Error><Code>BucketAlreadyOwnedByYou</Code></Error>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/login"))
            .respond_with(
                ResponseTemplate::new(204).insert_header("set-cookie", "token=abc; Path=/"),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/policies"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/users"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let s = store(&server);
        let provision = s.provision_bucket("xcord-acme", "ak", "sk").await.unwrap();
        assert!(provision.principal_ready);
    }

    #[tokio::test]
    async fn deprovision_drains_then_removes() {
        let server = MockServer::start().await;
        // First list returns one object, subsequent lists are empty.
        Mock::given(method("GET"))
            .and(path("/xcord-acme"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0"?><ListBucketResult><Contents><Key>a.png</Key></Contents></ListBucketResult>"#,
            ))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/xcord-acme"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0"?><ListBucketResult></ListBucketResult>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/xcord-acme/a.png"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/xcord-acme"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/login"))
            .respond_with(
                ResponseTemplate::new(204).insert_header("set-cookie", "token=abc; Path=/"),
            )
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/users/ak"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/policies/xcord-acme-rw"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let s = store(&server);
        s.deprovision_bucket("xcord-acme", "ak").await.unwrap();
    }

    #[test]
    fn s3_error_code_parses() {
        let body = r#"<?xml version="1.0"?><Error><Code>NoSuchBucket</Code><Message>gone</Message></Error>"#;
        assert_eq!(s3_error_code(body), "NoSuchBucket");
    }

    #[test]
    fn sigv4_headers_carry_authorization() {
        let headers = sigv4_headers(
            "GET",
            "/bucket",
            "list-type=2",
            b"",
            "AKIDEXAMPLE",
            "secret",
            "us-east-1",
            "minio:9000",
        );
        let auth = headers.get("Authorization").unwrap();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
        assert!(auth.contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date"));
        assert!(headers.contains_key("x-amz-date"));
    }

    #[test]
    fn url_host_strips_scheme_and_path() {
        assert_eq!(url_host("http://minio:9000/bucket"), "minio:9000");
        assert_eq!(url_host("https://s3.example.com"), "s3.example.com");
    }
}
