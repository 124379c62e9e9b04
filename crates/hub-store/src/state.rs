use chrono::{DateTime, Utc};
use hub_domain::{
    BillingStatus, EventPhase, EventStatus, FeatureTier, InstanceId, InstanceStatus, OwnerId,
    UserCountTier,
};
use serde::{Deserialize, Serialize};

// ── ManagedInstance ───────────────────────────────────────────────────────────

/// One tenant instance as the control plane sees it. Infrastructure,
/// billing and config live in their own 1:1 rows keyed by `id`; this struct
/// is a small projection, not a deep object graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedInstance {
    pub id: InstanceId,
    pub owner_id: OwnerId,
    /// Fully-qualified domain, unique among non-deleted instances.
    pub domain: String,
    pub display_name: String,
    pub status: InstanceStatus,
    /// Snowflake worker ID allocated by the provisioning pipeline.
    pub worker_id: Option<u16>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ManagedInstance {
    /// The tenant-chosen label, i.e. the first DNS label of `domain`.
    pub fn subdomain(&self) -> &str {
        self.domain.split('.').next().unwrap_or(&self.domain)
    }
}

// ── InstanceInfrastructure ────────────────────────────────────────────────────

/// External-resource identity and secret material for one instance.
/// Created by the GenerateSecrets step; the nullable IDs are filled in by
/// later steps as resources come into existence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfrastructure {
    pub id: i64,
    pub instance_id: InstanceId,
    pub container_id: Option<String>,
    pub network_id: Option<String>,
    pub secret_id: Option<String>,
    pub proxy_route_id: Option<String>,
    pub db_name: String,
    pub db_password: String,
    pub redis_db: i32,
    pub storage_access_key: String,
    pub storage_secret_key: String,
    pub media_api_key: String,
    pub media_secret_key: String,
    /// SHA-256 hex of the one-time bootstrap token. Cleared on redemption.
    pub bootstrap_token_hash: Option<String>,
    /// Per-instance DEK wrapped with the process KEK (base64 nonce||ciphertext).
    pub instance_kek: String,
}

// ── InstanceBilling ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceBilling {
    pub id: i64,
    pub instance_id: InstanceId,
    pub feature_tier: FeatureTier,
    pub user_count_tier: UserCountTier,
    pub hd_upgrade: bool,
    pub status: BillingStatus,
    pub period_end: Option<DateTime<Utc>>,
    pub subscription_ref: Option<String>,
    pub price_ref: Option<String>,
}

// ── InstanceConfig ────────────────────────────────────────────────────────────

/// Rendered configuration snapshot for one instance. Regenerated on tier
/// change; `version` increments on every regeneration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub id: i64,
    pub instance_id: InstanceId,
    pub config_json: serde_json::Value,
    pub resource_limits_json: serde_json::Value,
    pub feature_flags_json: serde_json::Value,
    pub version: i32,
    pub updated_at: DateTime<Utc>,
}

// ── WorkerIdEntry ─────────────────────────────────────────────────────────────

/// One row of the worker-ID registry. Tombstoned rows persist forever so an
/// ID is never handed to two instances across destroy/re-create races.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerIdEntry {
    pub worker_id: u16,
    pub instance_id: InstanceId,
    pub is_tombstoned: bool,
    pub allocated_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

// ── ProvisioningEvent ─────────────────────────────────────────────────────────

/// Append-only step audit log. The pipeline executor's resume oracle: a
/// step is done iff both its phases have a Completed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningEvent {
    pub id: i64,
    pub instance_id: InstanceId,
    pub step_name: String,
    pub phase: EventPhase,
    pub status: EventStatus,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ── FederationToken ───────────────────────────────────────────────────────────

/// Long-lived token minted when an instance first calls home with its
/// one-time bootstrap token. Only the hash is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationToken {
    pub id: i64,
    pub instance_id: InstanceId,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}
