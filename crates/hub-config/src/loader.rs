use std::path::Path;

use tracing::debug;

use crate::error::ConfigError;
use crate::raw::RawConfig;

/// Validated operator configuration for one orchestrator process.
///
/// Merged from an optional YAML file (`HUB_CONFIG_FILE`) and `HUB_*`
/// environment variables, environment winning. The KEK itself is loaded
/// separately via [`crate::kek::Kek::from_file`] so key material never
/// passes through this struct.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub database_url: String,
    pub maintenance_database_url: String,

    pub engine_endpoint: String,
    pub infra_network: String,

    pub dns_endpoint: String,
    pub dns_zone_id: String,
    pub dns_api_token: String,

    pub proxy_endpoint: String,
    pub proxy_server: String,

    pub object_store: ObjectStoreConfig,

    /// Suffix appended to every instance subdomain, e.g. `example.com`.
    pub base_domain: String,
    /// Address the DNS A records point at (the reverse proxy's public IP).
    pub gateway_ip: String,
    /// URL instances use to call home (federation bootstrap).
    pub public_url: String,

    pub kek_path: String,
    pub bucket_prefix: String,
    /// Image reference the engine launches for every instance workload.
    pub instance_image: String,

    pub redis_url: String,
    pub livekit_host: String,

    pub email: EmailConfig,
    pub rate_limiting: RateLimitConfig,

    pub owner_instance_limit: i32,
    pub bcrypt_work_factor: u32,

    pub bind: String,
    pub port: u16,
    pub worker_poll_secs: u64,
    pub reconcile_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub admin_endpoint: String,
    pub admin_access_key: String,
    pub admin_secret_key: String,
    pub region: String,
    pub use_ssl: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_address: String,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
    pub auth_window_secs: u64,
    pub auth_max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { window_secs: 60, max_requests: 300, auth_window_secs: 900, auth_max_requests: 10 }
    }
}

impl HubConfig {
    /// Load configuration from the process environment, with
    /// `HUB_CONFIG_FILE` (if set) supplying file-level defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let raw = match std::env::var("HUB_CONFIG_FILE") {
            Ok(path) => Self::read_file(Path::new(&path))?,
            Err(_) => RawConfig::default(),
        };
        Self::from_raw(raw, &env_lookup)
    }

    /// Load from an explicit YAML file plus the environment. Used by tests
    /// and the CLI's `--config` flag.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = Self::read_file(path)?;
        Self::from_raw(raw, &env_lookup)
    }

    fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
        debug!("loading hub config from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Merge raw file values with an environment lookup and validate.
    /// Exposed at this granularity so tests can inject the environment.
    pub fn from_raw(
        raw: RawConfig,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |key: &'static str, file_val: Option<String>| -> Option<String> {
            env(key).or(file_val)
        };
        let require = |key: &'static str, file_val: Option<String>| -> Result<String, ConfigError> {
            get(key, file_val).ok_or(ConfigError::MissingSetting(key))
        };

        let dns = raw.dns.unwrap_or_default();
        let proxy = raw.proxy.unwrap_or_default();
        let store = raw.object_store.unwrap_or_default();
        let email = raw.email.unwrap_or_default();
        let rate = raw.rate_limiting.unwrap_or_default();

        let database_url = require("HUB_DATABASE_URL", raw.database_url)?;
        let maintenance_database_url = get(
            "HUB_MAINTENANCE_DATABASE_URL",
            raw.maintenance_database_url,
        )
        .unwrap_or_else(|| database_url.clone());

        let base_domain = require("HUB_BASE_DOMAIN", raw.base_domain)?;
        if base_domain.starts_with('.') || base_domain.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "HUB_BASE_DOMAIN",
                message: format!("expected a bare domain suffix, got {base_domain:?}"),
            });
        }

        let owner_instance_limit = match get(
            "HUB_OWNER_INSTANCE_LIMIT",
            raw.owner_instance_limit.map(|v| v.to_string()),
        ) {
            Some(v) => v.parse::<i32>().map_err(|_| ConfigError::InvalidValue {
                key: "HUB_OWNER_INSTANCE_LIMIT",
                message: format!("not an integer: {v:?}"),
            })?,
            None => 5,
        };
        if owner_instance_limit < -1 || owner_instance_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HUB_OWNER_INSTANCE_LIMIT",
                message: "must be positive or -1 (unlimited)".into(),
            });
        }

        let parse_u64 = |key: &'static str, v: Option<String>, default: u64| -> Result<u64, ConfigError> {
            match v {
                Some(s) => s.parse().map_err(|_| ConfigError::InvalidValue {
                    key,
                    message: format!("not an integer: {s:?}"),
                }),
                None => Ok(default),
            }
        };
        let parse_u32 = |key: &'static str, v: Option<String>, default: u32| -> Result<u32, ConfigError> {
            match v {
                Some(s) => s.parse().map_err(|_| ConfigError::InvalidValue {
                    key,
                    message: format!("not an integer: {s:?}"),
                }),
                None => Ok(default),
            }
        };
        let parse_u16 = |key: &'static str, v: Option<String>, default: u16| -> Result<u16, ConfigError> {
            match v {
                Some(s) => s.parse().map_err(|_| ConfigError::InvalidValue {
                    key,
                    message: format!("not a port: {s:?}"),
                }),
                None => Ok(default),
            }
        };

        Ok(Self {
            maintenance_database_url,
            engine_endpoint: get("HUB_ENGINE_ENDPOINT", raw.engine_endpoint)
                .unwrap_or_else(|| "http://localhost:2375".into()),
            infra_network: get("HUB_INFRA_NETWORK", raw.infra_network)
                .unwrap_or_else(|| "hub-infra".into()),
            dns_endpoint: require("HUB_DNS_ENDPOINT", dns.endpoint)?,
            dns_zone_id: require("HUB_DNS_ZONE_ID", dns.zone_id)?,
            dns_api_token: require("HUB_DNS_API_TOKEN", dns.api_token)?,
            proxy_endpoint: get("HUB_PROXY_ENDPOINT", proxy.endpoint)
                .unwrap_or_else(|| "http://localhost:2019".into()),
            proxy_server: get("HUB_PROXY_SERVER", proxy.server).unwrap_or_else(|| "srv0".into()),
            object_store: ObjectStoreConfig {
                endpoint: require("HUB_OBJECT_STORE_ENDPOINT", store.endpoint)?,
                admin_endpoint: require("HUB_OBJECT_STORE_ADMIN_ENDPOINT", store.admin_endpoint)?,
                admin_access_key: require(
                    "HUB_OBJECT_STORE_ADMIN_ACCESS_KEY",
                    store.admin_access_key,
                )?,
                admin_secret_key: require(
                    "HUB_OBJECT_STORE_ADMIN_SECRET_KEY",
                    store.admin_secret_key,
                )?,
                region: get("HUB_OBJECT_STORE_REGION", store.region)
                    .unwrap_or_else(|| "us-east-1".into()),
                use_ssl: get("HUB_OBJECT_STORE_USE_SSL", store.use_ssl.map(|v| v.to_string()))
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(false),
            },
            base_domain,
            gateway_ip: require("HUB_GATEWAY_IP", raw.gateway_ip)?,
            public_url: require("HUB_PUBLIC_URL", raw.public_url)?,
            kek_path: require("HUB_KEK_PATH", raw.kek_path)?,
            bucket_prefix: get("HUB_BUCKET_PREFIX", raw.bucket_prefix)
                .unwrap_or_else(|| "xcord".into()),
            instance_image: get("HUB_INSTANCE_IMAGE", raw.instance_image)
                .unwrap_or_else(|| "xcord/server:latest".into()),
            redis_url: require("HUB_REDIS_URL", raw.redis_url)?,
            livekit_host: require("HUB_LIVEKIT_HOST", raw.livekit_host)?,
            email: EmailConfig {
                smtp_host: get("HUB_SMTP_HOST", email.smtp_host).unwrap_or_default(),
                smtp_port: parse_u16(
                    "HUB_SMTP_PORT",
                    get("HUB_SMTP_PORT", email.smtp_port.map(|v| v.to_string())),
                    587,
                )?,
                smtp_username: get("HUB_SMTP_USERNAME", email.smtp_username).unwrap_or_default(),
                smtp_password: get("HUB_SMTP_PASSWORD", email.smtp_password).unwrap_or_default(),
                from_address: get("HUB_SMTP_FROM", email.from_address).unwrap_or_default(),
            },
            rate_limiting: RateLimitConfig {
                window_secs: parse_u64(
                    "HUB_RATE_WINDOW_SECS",
                    get("HUB_RATE_WINDOW_SECS", rate.window_secs.map(|v| v.to_string())),
                    60,
                )?,
                max_requests: parse_u32(
                    "HUB_RATE_MAX_REQUESTS",
                    get("HUB_RATE_MAX_REQUESTS", rate.max_requests.map(|v| v.to_string())),
                    300,
                )?,
                auth_window_secs: parse_u64(
                    "HUB_RATE_AUTH_WINDOW_SECS",
                    get("HUB_RATE_AUTH_WINDOW_SECS", rate.auth_window_secs.map(|v| v.to_string())),
                    900,
                )?,
                auth_max_requests: parse_u32(
                    "HUB_RATE_AUTH_MAX_REQUESTS",
                    get("HUB_RATE_AUTH_MAX_REQUESTS", rate.auth_max_requests.map(|v| v.to_string())),
                    10,
                )?,
            },
            owner_instance_limit,
            bcrypt_work_factor: parse_u32(
                "HUB_BCRYPT_WORK_FACTOR",
                get("HUB_BCRYPT_WORK_FACTOR", raw.bcrypt_work_factor.map(|v| v.to_string())),
                12,
            )?,
            bind: get("HUB_BIND", raw.bind).unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_u16("HUB_PORT", get("HUB_PORT", raw.port.map(|v| v.to_string())), 8090)?,
            worker_poll_secs: parse_u64(
                "HUB_WORKER_POLL_SECS",
                get("HUB_WORKER_POLL_SECS", raw.worker_poll_secs.map(|v| v.to_string())),
                5,
            )?,
            reconcile_interval_secs: parse_u64(
                "HUB_RECONCILE_INTERVAL_SECS",
                get(
                    "HUB_RECONCILE_INTERVAL_SECS",
                    raw.reconcile_interval_secs.map(|v| v.to_string()),
                ),
                300,
            )?,
            database_url,
        })
    }

    /// Fully-qualified domain for an instance subdomain.
    pub fn instance_domain(&self, subdomain: &str) -> String {
        format!("{}.{}", subdomain, self.base_domain)
    }

    /// Bucket name for an instance subdomain.
    pub fn bucket_name(&self, subdomain: &str) -> String {
        format!("{}-{}", self.bucket_prefix, subdomain)
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("HUB_DATABASE_URL", "postgres://hub:pw@localhost/hub"),
            ("HUB_BASE_DOMAIN", "example.com"),
            ("HUB_DNS_ENDPOINT", "https://dns.example"),
            ("HUB_DNS_ZONE_ID", "zone-1"),
            ("HUB_DNS_API_TOKEN", "tok"),
            ("HUB_OBJECT_STORE_ENDPOINT", "http://minio:9000"),
            ("HUB_OBJECT_STORE_ADMIN_ENDPOINT", "http://minio:9001"),
            ("HUB_OBJECT_STORE_ADMIN_ACCESS_KEY", "root"),
            ("HUB_OBJECT_STORE_ADMIN_SECRET_KEY", "rootpw"),
            ("HUB_GATEWAY_IP", "203.0.113.10"),
            ("HUB_PUBLIC_URL", "https://hub.example.com"),
            ("HUB_KEK_PATH", "/run/secrets/hub-kek"),
            ("HUB_REDIS_URL", "redis://redis:6379"),
            ("HUB_LIVEKIT_HOST", "wss://media.example.com"),
        ])
    }

    fn lookup<'a>(env: &'a HashMap<&'static str, &'static str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| env.get(key).map(|v| v.to_string())
    }

    #[test]
    fn loads_from_env_with_defaults() {
        let env = full_env();
        let cfg = HubConfig::from_raw(RawConfig::default(), &lookup(&env)).unwrap();
        assert_eq!(cfg.engine_endpoint, "http://localhost:2375");
        assert_eq!(cfg.maintenance_database_url, cfg.database_url);
        assert_eq!(cfg.owner_instance_limit, 5);
        assert_eq!(cfg.bucket_prefix, "xcord");
        assert_eq!(cfg.worker_poll_secs, 5);
    }

    #[test]
    fn missing_required_setting_fails() {
        let mut env = full_env();
        env.remove("HUB_DATABASE_URL");
        let err = HubConfig::from_raw(RawConfig::default(), &lookup(&env)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSetting("HUB_DATABASE_URL")));
    }

    #[test]
    fn env_overrides_file() {
        let mut env = full_env();
        env.insert("HUB_BUCKET_PREFIX", "tenants");
        let raw = RawConfig { bucket_prefix: Some("files".into()), ..Default::default() };
        let cfg = HubConfig::from_raw(raw, &lookup(&env)).unwrap();
        assert_eq!(cfg.bucket_prefix, "tenants");
    }

    #[test]
    fn zero_owner_limit_rejected() {
        let mut env = full_env();
        env.insert("HUB_OWNER_INSTANCE_LIMIT", "0");
        assert!(HubConfig::from_raw(RawConfig::default(), &lookup(&env)).is_err());
    }

    #[test]
    fn unlimited_owner_limit_accepted() {
        let mut env = full_env();
        env.insert("HUB_OWNER_INSTANCE_LIMIT", "-1");
        let cfg = HubConfig::from_raw(RawConfig::default(), &lookup(&env)).unwrap();
        assert_eq!(cfg.owner_instance_limit, -1);
    }

    #[test]
    fn domain_helpers() {
        let env = full_env();
        let cfg = HubConfig::from_raw(RawConfig::default(), &lookup(&env)).unwrap();
        assert_eq!(cfg.instance_domain("acme"), "acme.example.com");
        assert_eq!(cfg.bucket_name("acme"), "xcord-acme");
    }
}
