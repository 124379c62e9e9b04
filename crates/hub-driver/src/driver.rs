use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DriverError;

/// Everything the engine needs to create and start one instance workload.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Instance domain; container and hostname names derive from it.
    pub domain: String,
    pub image: String,
    /// Engine secret holding the rendered config document, mounted
    /// read-only at a fixed path inside the container.
    pub secret_id: String,
    /// The instance's private network.
    pub network_id: String,
    /// Shared network the hub's own services sit on.
    pub infra_network: String,
    pub memory_bytes: i64,
    pub cpu_quota: i64,
    pub cpu_period: i64,
}

/// Result of a bucket provision call. `principal_ready` is false when the
/// bucket exists but the per-instance principal/policy could not be set up;
/// the caller decides whether to fall back to root credentials.
#[derive(Debug, Clone, Copy)]
pub struct BucketProvision {
    pub principal_ready: bool,
}

// ── Capability traits ─────────────────────────────────────────────────────────
//
// One trait per external system. Real HTTP-backed implementations and
// in-process stubs are interchangeable at this boundary; they share no
// ancestor beyond the trait. All remove_* calls treat a missing target as
// success.

#[async_trait]
pub trait ContainerEngine: Send + Sync + 'static {
    /// Create (or find, when it already exists) the instance-private
    /// network labeled with the instance domain.
    async fn create_network(&self, instance_domain: &str) -> Result<String, DriverError>;

    async fn network_exists(&self, network_id: &str) -> Result<bool, DriverError>;

    /// Create (or find) an engine secret holding `payload`.
    async fn create_secret(
        &self,
        instance_domain: &str,
        payload: &[u8],
    ) -> Result<String, DriverError>;

    async fn remove_secret(&self, secret_id: &str) -> Result<(), DriverError>;

    /// Create the container per `spec`, attach it to both networks, start
    /// it, and return its ID. Idempotent: an existing container with the
    /// instance's name is started and returned.
    async fn start_container(&self, spec: &ContainerSpec) -> Result<String, DriverError>;

    async fn container_running(&self, container_id: &str) -> Result<bool, DriverError>;

    /// Stop with a 10 s engine-side grace period.
    async fn stop_container(&self, container_id: &str) -> Result<(), DriverError>;

    /// Force-remove.
    async fn remove_container(&self, container_id: &str) -> Result<(), DriverError>;

    async fn remove_network(&self, network_id: &str) -> Result<(), DriverError>;
}

#[async_trait]
pub trait DnsProvider: Send + Sync + 'static {
    /// Create an A record `subdomain → ip` in the provider zone.
    /// Idempotent: an identical existing record is success.
    async fn create_a_record(&self, subdomain: &str, ip: &str) -> Result<(), DriverError>;

    async fn verify_a_record(&self, subdomain: &str) -> Result<bool, DriverError>;

    /// Look up by subdomain and delete; absence is success.
    async fn delete_a_record(&self, subdomain: &str) -> Result<(), DriverError>;
}

#[async_trait]
pub trait ReverseProxyManager: Send + Sync + 'static {
    /// Install a route matching the instance's host header, forwarding to
    /// `upstream_hostname:80`. Returns the stable route ID. Idempotent.
    async fn create_route(
        &self,
        instance_domain: &str,
        upstream_hostname: &str,
    ) -> Result<String, DriverError>;

    async fn verify_route(&self, route_id: &str) -> Result<bool, DriverError>;

    async fn delete_route(&self, route_id: &str) -> Result<(), DriverError>;
}

#[async_trait]
pub trait ObjectStoreManager: Send + Sync + 'static {
    /// Create the bucket plus a per-instance principal and access policy.
    /// Idempotent. When the bucket succeeds but the principal setup fails,
    /// returns `principal_ready: false` instead of an error.
    async fn provision_bucket(
        &self,
        name: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<BucketProvision, DriverError>;

    /// Must actually exercise read permission with the given credentials:
    /// a list call, not an existence probe that can succeed on 403.
    async fn verify_bucket(
        &self,
        name: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<bool, DriverError>;

    /// Drain objects, remove the bucket, remove the per-instance principal
    /// and policy. Every sub-step tolerates missing resources.
    async fn deprovision_bucket(&self, name: &str, access_key: &str) -> Result<(), DriverError>;
}

#[async_trait]
pub trait InstanceNotifier: Send + Sync + 'static {
    /// Best-effort shutdown notice to the instance's internal hostname
    /// (≤4 s timeout). Failures are swallowed by the implementation.
    async fn notify_shutting_down(&self, instance_domain: &str, reason: &str);
}

#[async_trait]
pub trait DatabaseProvisioner: Send + Sync + 'static {
    /// Create the instance role and database if absent. CREATE DATABASE
    /// runs outside any transaction. The role is named after the database
    /// and owns it; `owner_password` is its login password.
    async fn ensure_database(
        &self,
        db_name: &str,
        owner_password: &str,
    ) -> Result<(), DriverError>;

    async fn database_exists(&self, db_name: &str) -> Result<bool, DriverError>;
}

// ── Driver set ────────────────────────────────────────────────────────────────

/// The full set of resource drivers handed to the pipelines. Production
/// wires the HTTP implementations; tests substitute stubs by construction.
#[derive(Clone)]
pub struct Drivers {
    pub engine: Arc<dyn ContainerEngine>,
    pub dns: Arc<dyn DnsProvider>,
    pub proxy: Arc<dyn ReverseProxyManager>,
    pub object_store: Arc<dyn ObjectStoreManager>,
    pub notifier: Arc<dyn InstanceNotifier>,
    pub database: Arc<dyn DatabaseProvisioner>,
}
