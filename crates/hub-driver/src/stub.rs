use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::driver::{
    BucketProvision, ContainerEngine, ContainerSpec, DatabaseProvisioner, DnsProvider, Drivers,
    InstanceNotifier, ObjectStoreManager, ReverseProxyManager,
};
use crate::error::DriverError;

/// Access key the stub object store treats as the root principal. Matches
/// what pipeline tests configure as the admin access key.
pub const STUB_ROOT_KEY: &str = "root";

/// One recorded driver call: operation name plus the resource it targeted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub op: &'static str,
    pub target: String,
}

#[derive(Debug, Default)]
struct StubBucket {
    objects: Vec<String>,
    /// Access keys the bucket grants read permission to.
    allowed_keys: HashSet<String>,
}

#[derive(Debug, Default)]
struct StubState {
    calls: Vec<CallRecord>,
    /// Scripted failures: op name → remaining injected failures.
    failures: HashMap<&'static str, VecDeque<(u16, String)>>,
    /// Remaining principal-setup failures for provision_bucket.
    principal_failures: u32,

    networks: HashMap<String, String>,
    secrets: HashMap<String, Vec<u8>>,
    containers: HashMap<String, bool>,
    records: HashMap<String, String>,
    routes: HashMap<String, String>,
    buckets: HashMap<String, StubBucket>,
    databases: HashSet<String>,
    notifications: Vec<(String, String)>,
}

impl StubState {
    fn record(&mut self, op: &'static str, target: impl Into<String>) {
        self.calls.push(CallRecord { op, target: target.into() });
    }

    fn take_failure(&mut self, op: &'static str) -> Option<DriverError> {
        let queue = self.failures.get_mut(op)?;
        let (status, message) = queue.pop_front()?;
        Some(DriverError::api(format!("stub:{op}"), status, message))
    }
}

/// In-process driver set with a shared recorded call log and scriptable
/// failures. Substituted for the HTTP drivers in pipeline tests.
#[derive(Clone, Default)]
pub struct StubSet {
    state: Arc<Mutex<StubState>>,
}

impl StubSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full [`Drivers`] bundle backed by this stub state.
    pub fn drivers(&self) -> Drivers {
        Drivers {
            engine: Arc::new(StubEngine { state: self.state.clone() }),
            dns: Arc::new(StubDns { state: self.state.clone() }),
            proxy: Arc::new(StubProxy { state: self.state.clone() }),
            object_store: Arc::new(StubObjectStore { state: self.state.clone() }),
            notifier: Arc::new(StubNotifier { state: self.state.clone() }),
            database: Arc::new(StubDatabase { state: self.state.clone() }),
        }
    }

    /// Script the next `times` calls of `op` to fail with HTTP 500.
    pub fn fail_next(&self, op: &'static str, times: u32) {
        self.fail_next_with(op, times, 500, "injected failure");
    }

    pub fn fail_next_with(&self, op: &'static str, times: u32, status: u16, message: &str) {
        let mut state = self.state.lock().unwrap();
        let queue = state.failures.entry(op).or_default();
        for _ in 0..times {
            queue.push_back((status, message.to_string()));
        }
    }

    /// Script the next `times` provision_bucket calls to succeed on the
    /// bucket but fail principal setup (root-credential fallback path).
    pub fn fail_principal_setup(&self, times: u32) {
        self.state.lock().unwrap().principal_failures += times;
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, op: &'static str) -> Vec<CallRecord> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    pub fn network_count(&self) -> usize {
        self.state.lock().unwrap().networks.len()
    }

    pub fn container_running(&self, container_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(container_id)
            .copied()
            .unwrap_or(false)
    }

    /// Flip a container's engine-side running flag (reconciler tests).
    pub fn set_container_running(&self, container_id: &str, running: bool) {
        if let Some(v) = self.state.lock().unwrap().containers.get_mut(container_id) {
            *v = running;
        }
    }

    pub fn remove_route(&self, route_id: &str) {
        self.state.lock().unwrap().routes.remove(route_id);
    }

    pub fn bucket_exists(&self, name: &str) -> bool {
        self.state.lock().unwrap().buckets.contains_key(name)
    }

    pub fn put_object(&self, bucket: &str, key: &str) {
        if let Some(b) = self.state.lock().unwrap().buckets.get_mut(bucket) {
            b.objects.push(key.to_string());
        }
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().notifications.clone()
    }
}

// ── Container engine ──────────────────────────────────────────────────────────

pub struct StubEngine {
    state: Arc<Mutex<StubState>>,
}

#[async_trait]
impl ContainerEngine for StubEngine {
    async fn create_network(&self, instance_domain: &str) -> Result<String, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("create_network", instance_domain);
        if let Some(err) = state.take_failure("create_network") {
            return Err(err);
        }
        // Lookup-by-label keeps the call idempotent.
        if let Some((id, _)) = state
            .networks
            .iter()
            .find(|(_, domain)| domain.as_str() == instance_domain)
        {
            return Ok(id.clone());
        }
        let id = format!("net-{}", instance_domain.replace('.', "-"));
        state.networks.insert(id.clone(), instance_domain.to_string());
        Ok(id)
    }

    async fn network_exists(&self, network_id: &str) -> Result<bool, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("network_exists", network_id);
        if let Some(err) = state.take_failure("network_exists") {
            return Err(err);
        }
        Ok(state.networks.contains_key(network_id))
    }

    async fn create_secret(
        &self,
        instance_domain: &str,
        payload: &[u8],
    ) -> Result<String, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("create_secret", instance_domain);
        if let Some(err) = state.take_failure("create_secret") {
            return Err(err);
        }
        let id = format!("sec-{}", instance_domain.replace('.', "-"));
        state.secrets.insert(id.clone(), payload.to_vec());
        Ok(id)
    }

    async fn remove_secret(&self, secret_id: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("remove_secret", secret_id);
        if let Some(err) = state.take_failure("remove_secret") {
            return Err(err);
        }
        state.secrets.remove(secret_id);
        Ok(())
    }

    async fn start_container(&self, spec: &ContainerSpec) -> Result<String, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("start_container", &spec.domain);
        if let Some(err) = state.take_failure("start_container") {
            return Err(err);
        }
        let id = format!("ctr-{}", spec.domain.replace('.', "-"));
        state.containers.insert(id.clone(), true);
        Ok(id)
    }

    async fn container_running(&self, container_id: &str) -> Result<bool, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("container_running", container_id);
        if let Some(err) = state.take_failure("container_running") {
            return Err(err);
        }
        Ok(state.containers.get(container_id).copied().unwrap_or(false))
    }

    async fn stop_container(&self, container_id: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("stop_container", container_id);
        if let Some(err) = state.take_failure("stop_container") {
            return Err(err);
        }
        if let Some(running) = state.containers.get_mut(container_id) {
            *running = false;
        } else {
            debug!(container_id, "stub: stop of missing container skipped");
        }
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("remove_container", container_id);
        if let Some(err) = state.take_failure("remove_container") {
            return Err(err);
        }
        state.containers.remove(container_id);
        Ok(())
    }

    async fn remove_network(&self, network_id: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("remove_network", network_id);
        if let Some(err) = state.take_failure("remove_network") {
            return Err(err);
        }
        state.networks.remove(network_id);
        Ok(())
    }
}

// ── DNS ───────────────────────────────────────────────────────────────────────

pub struct StubDns {
    state: Arc<Mutex<StubState>>,
}

#[async_trait]
impl DnsProvider for StubDns {
    async fn create_a_record(&self, subdomain: &str, ip: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("create_a_record", subdomain);
        if let Some(err) = state.take_failure("create_a_record") {
            return Err(err);
        }
        state.records.insert(subdomain.to_string(), ip.to_string());
        Ok(())
    }

    async fn verify_a_record(&self, subdomain: &str) -> Result<bool, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("verify_a_record", subdomain);
        if let Some(err) = state.take_failure("verify_a_record") {
            return Err(err);
        }
        Ok(state.records.contains_key(subdomain))
    }

    async fn delete_a_record(&self, subdomain: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("delete_a_record", subdomain);
        if let Some(err) = state.take_failure("delete_a_record") {
            return Err(err);
        }
        state.records.remove(subdomain);
        Ok(())
    }
}

// ── Reverse proxy ─────────────────────────────────────────────────────────────

pub struct StubProxy {
    state: Arc<Mutex<StubState>>,
}

#[async_trait]
impl ReverseProxyManager for StubProxy {
    async fn create_route(
        &self,
        instance_domain: &str,
        _upstream_hostname: &str,
    ) -> Result<String, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("create_route", instance_domain);
        if let Some(err) = state.take_failure("create_route") {
            return Err(err);
        }
        let route_id = format!("route-{}", instance_domain.replace('.', "-"));
        state.routes.insert(route_id.clone(), instance_domain.to_string());
        Ok(route_id)
    }

    async fn verify_route(&self, route_id: &str) -> Result<bool, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("verify_route", route_id);
        if let Some(err) = state.take_failure("verify_route") {
            return Err(err);
        }
        Ok(state.routes.contains_key(route_id))
    }

    async fn delete_route(&self, route_id: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("delete_route", route_id);
        if let Some(err) = state.take_failure("delete_route") {
            return Err(err);
        }
        state.routes.remove(route_id);
        Ok(())
    }
}

// ── Object store ──────────────────────────────────────────────────────────────

pub struct StubObjectStore {
    state: Arc<Mutex<StubState>>,
}

#[async_trait]
impl ObjectStoreManager for StubObjectStore {
    async fn provision_bucket(
        &self,
        name: &str,
        access_key: &str,
        _secret_key: &str,
    ) -> Result<BucketProvision, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("provision_bucket", name);
        if let Some(err) = state.take_failure("provision_bucket") {
            return Err(err);
        }
        let principal_ready = if state.principal_failures > 0 {
            state.principal_failures -= 1;
            false
        } else {
            true
        };
        let bucket = state.buckets.entry(name.to_string()).or_default();
        if principal_ready {
            bucket.allowed_keys.insert(access_key.to_string());
        } else {
            bucket.allowed_keys.insert(STUB_ROOT_KEY.to_string());
        }
        Ok(BucketProvision { principal_ready })
    }

    async fn verify_bucket(
        &self,
        name: &str,
        access_key: &str,
        _secret_key: &str,
    ) -> Result<bool, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("verify_bucket", name);
        if let Some(err) = state.take_failure("verify_bucket") {
            return Err(err);
        }
        Ok(state
            .buckets
            .get(name)
            .map(|b| b.allowed_keys.contains(access_key))
            .unwrap_or(false))
    }

    async fn deprovision_bucket(&self, name: &str, _access_key: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("deprovision_bucket", name);
        if let Some(err) = state.take_failure("deprovision_bucket") {
            return Err(err);
        }
        state.buckets.remove(name);
        Ok(())
    }
}

// ── Notifier ──────────────────────────────────────────────────────────────────

pub struct StubNotifier {
    state: Arc<Mutex<StubState>>,
}

#[async_trait]
impl InstanceNotifier for StubNotifier {
    async fn notify_shutting_down(&self, instance_domain: &str, reason: &str) {
        let mut state = self.state.lock().unwrap();
        state.record("notify_shutting_down", instance_domain);
        state
            .notifications
            .push((instance_domain.to_string(), reason.to_string()));
    }
}

// ── Database ──────────────────────────────────────────────────────────────────

pub struct StubDatabase {
    state: Arc<Mutex<StubState>>,
}

#[async_trait]
impl DatabaseProvisioner for StubDatabase {
    async fn ensure_database(
        &self,
        db_name: &str,
        _owner_password: &str,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("ensure_database", db_name);
        if let Some(err) = state.take_failure("ensure_database") {
            return Err(err);
        }
        state.databases.insert(db_name.to_string());
        Ok(())
    }

    async fn database_exists(&self, db_name: &str) -> Result<bool, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.record("database_exists", db_name);
        if let Some(err) = state.take_failure("database_exists") {
            return Err(err);
        }
        Ok(state.databases.contains(db_name))
    }
}
