use serde::{Deserialize, Serialize};

/// Raw YAML representation of the operator config file (`HUB_CONFIG_FILE`).
///
/// Every field is optional: the file supplies defaults, `HUB_*` environment
/// variables override it, and [`crate::loader::HubConfig`] validates the
/// merged result.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawConfig {
    pub database_url: Option<String>,
    /// Connection string for the maintenance database the hub uses to issue
    /// CREATE DATABASE for new instances. Defaults to `database_url`.
    pub maintenance_database_url: Option<String>,

    pub engine_endpoint: Option<String>,
    /// Name of the shared network the hub's own services sit on; every
    /// instance container is attached to it alongside its private network.
    pub infra_network: Option<String>,

    pub dns: Option<RawDns>,
    pub proxy: Option<RawProxy>,
    pub object_store: Option<RawObjectStore>,

    pub base_domain: Option<String>,
    pub gateway_ip: Option<String>,
    pub public_url: Option<String>,

    pub kek_path: Option<String>,
    pub bucket_prefix: Option<String>,
    /// Image reference for the application container workload.
    pub instance_image: Option<String>,

    pub redis_url: Option<String>,
    pub livekit_host: Option<String>,

    pub email: Option<RawEmail>,
    pub rate_limiting: Option<RawRateLimit>,

    /// Instances one owner may run concurrently; -1 = unlimited.
    pub owner_instance_limit: Option<i32>,
    pub bcrypt_work_factor: Option<u32>,

    pub bind: Option<String>,
    pub port: Option<u16>,
    pub worker_poll_secs: Option<u64>,
    pub reconcile_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawDns {
    pub endpoint: Option<String>,
    pub zone_id: Option<String>,
    pub api_token: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawProxy {
    pub endpoint: Option<String>,
    /// Name of the HTTP server block routes are installed into.
    pub server: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawObjectStore {
    pub endpoint: Option<String>,
    pub admin_endpoint: Option<String>,
    pub admin_access_key: Option<String>,
    pub admin_secret_key: Option<String>,
    pub region: Option<String>,
    pub use_ssl: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawEmail {
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub from_address: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawRateLimit {
    pub window_secs: Option<u64>,
    pub max_requests: Option<u32>,
    pub auth_window_secs: Option<u64>,
    pub auth_max_requests: Option<u32>,
}
