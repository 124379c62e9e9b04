//! Shared fixtures for pipeline tests: an in-memory store, stub drivers,
//! a canned config, and a recording sleeper.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hub_config::{EmailConfig, HubConfig, Kek, ObjectStoreConfig, RateLimitConfig};
use hub_domain::{
    BillingStatus, FeatureTier, InstanceId, InstanceStatus, OwnerId, Snowflake, UserCountTier,
};
use hub_driver::StubSet;
use hub_store::{InMemoryStore, InstanceBilling, ManagedInstance, StateStore};

use crate::executor::Sleeper;
use crate::step::{StepCtx, StepTimings};

pub struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub stubs: StubSet,
}

pub fn test_config() -> HubConfig {
    HubConfig {
        database_url: "postgres://hub:pw@localhost/hub".into(),
        maintenance_database_url: "postgres://hub:pw@localhost/postgres".into(),
        engine_endpoint: "http://localhost:2375".into(),
        infra_network: "hub-infra".into(),
        dns_endpoint: "https://dns.example".into(),
        dns_zone_id: "zone-1".into(),
        dns_api_token: "tok".into(),
        proxy_endpoint: "http://localhost:2019".into(),
        proxy_server: "srv0".into(),
        object_store: ObjectStoreConfig {
            endpoint: "http://minio:9000".into(),
            admin_endpoint: "http://minio:9001".into(),
            admin_access_key: "root".into(),
            admin_secret_key: "rootpw".into(),
            region: "us-east-1".into(),
            use_ssl: false,
        },
        base_domain: "example.com".into(),
        gateway_ip: "203.0.113.10".into(),
        public_url: "https://hub.example.com".into(),
        kek_path: "/run/secrets/hub-kek".into(),
        bucket_prefix: "xcord".into(),
        instance_image: "xcord/server:latest".into(),
        redis_url: "redis://redis:6379".into(),
        livekit_host: "wss://media.example.com".into(),
        email: EmailConfig::default(),
        rate_limiting: RateLimitConfig::default(),
        owner_instance_limit: 5,
        bcrypt_work_factor: 12,
        bind: "127.0.0.1".into(),
        port: 8090,
        worker_poll_secs: 1,
        reconcile_interval_secs: 300,
    }
}

pub fn test_instance(id: InstanceId, domain: &str, owner: OwnerId) -> ManagedInstance {
    ManagedInstance {
        id,
        owner_id: owner,
        domain: domain.to_string(),
        display_name: domain.to_string(),
        status: InstanceStatus::Provisioning,
        worker_id: None,
        created_at: Utc::now(),
        deleted_at: None,
    }
}

pub fn test_billing(instance_id: InstanceId) -> InstanceBilling {
    InstanceBilling {
        id: instance_id.as_i64() + 1,
        instance_id,
        feature_tier: FeatureTier::Chat,
        user_count_tier: UserCountTier::Ten,
        hd_upgrade: false,
        status: BillingStatus::Active,
        period_end: None,
        subscription_ref: None,
        price_ref: None,
    }
}

/// A StepCtx over fresh in-memory state, with one Provisioning instance and
/// its billing row already inserted.
pub async fn test_ctx(id: InstanceId) -> (StepCtx, Fixture) {
    let domain = format!("i{}.example.com", id.as_i64());
    test_ctx_with(id, &domain, OwnerId::new(7)).await
}

pub async fn test_ctx_with(id: InstanceId, domain: &str, owner: OwnerId) -> (StepCtx, Fixture) {
    let store = Arc::new(InMemoryStore::new());
    store.insert_instance(&test_instance(id, domain, owner)).await.unwrap();
    store.upsert_billing(&test_billing(id)).await.unwrap();

    let stubs = StubSet::new();
    let ctx = StepCtx {
        instance_id: id,
        store: store.clone(),
        drivers: stubs.drivers(),
        config: Arc::new(test_config()),
        kek: Arc::new(Kek::from_bytes(&[7u8; 32]).unwrap()),
        ids: Arc::new(Snowflake::new(1).unwrap()),
        timings: StepTimings::immediate(),
    };
    (ctx, Fixture { store, stubs })
}

/// Sleeper that records requested delays instead of serving them.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}
