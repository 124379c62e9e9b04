use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hub_domain::{
    EventStatus, InstanceId, InstanceStatus, OwnerId, WORKER_ID_MAX, WORKER_ID_MIN,
};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::state::{
    FederationToken, InstanceBilling, InstanceConfig, InstanceInfrastructure, ManagedInstance,
    ProvisioningEvent, WorkerIdEntry,
};
use crate::store::StateStore;

#[derive(Debug, Default)]
struct Inner {
    instances: HashMap<InstanceId, ManagedInstance>,
    infrastructure: HashMap<InstanceId, InstanceInfrastructure>,
    billing: HashMap<InstanceId, InstanceBilling>,
    configs: HashMap<InstanceId, InstanceConfig>,
    registry: BTreeMap<u16, WorkerIdEntry>,
    events: Vec<ProvisioningEvent>,
    federation_tokens: Vec<FederationToken>,
}

/// In-memory implementation of [`StateStore`].
///
/// All data is lost on process exit. Suitable for tests and dev mode.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    // ── Instances ─────────────────────────────────────────────────────────────

    async fn get_instance(&self, id: InstanceId) -> Result<Option<ManagedInstance>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.instances.get(&id).cloned())
    }

    async fn get_instance_by_domain(
        &self,
        domain: &str,
    ) -> Result<Option<ManagedInstance>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .instances
            .values()
            .find(|i| i.domain == domain && i.deleted_at.is_none())
            .cloned())
    }

    async fn insert_instance(&self, instance: &ManagedInstance) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let taken = guard
            .instances
            .values()
            .any(|i| i.domain == instance.domain && i.deleted_at.is_none());
        if taken {
            return Err(StoreError::DomainTaken(instance.domain.clone()));
        }
        guard.instances.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn update_instance_status(
        &self,
        id: InstanceId,
        status: InstanceStatus,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let instance = guard
            .instances
            .get_mut(&id)
            .ok_or(StoreError::InstanceNotFound(id.as_i64()))?;
        instance.status = status;
        Ok(())
    }

    async fn mark_instance_destroyed(&self, id: InstanceId) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let instance = guard
            .instances
            .get_mut(&id)
            .ok_or(StoreError::InstanceNotFound(id.as_i64()))?;
        instance.status = InstanceStatus::Destroyed;
        instance.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn set_instance_worker_id(
        &self,
        id: InstanceId,
        worker_id: u16,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let instance = guard
            .instances
            .get_mut(&id)
            .ok_or(StoreError::InstanceNotFound(id.as_i64()))?;
        instance.worker_id = Some(worker_id);
        Ok(())
    }

    async fn count_owner_live_instances(&self, owner: OwnerId) -> Result<i64, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .instances
            .values()
            .filter(|i| i.owner_id == owner && i.deleted_at.is_none() && i.status.is_live())
            .count() as i64)
    }

    async fn list_instances(&self) -> Result<Vec<ManagedInstance>, StoreError> {
        let guard = self.inner.read().await;
        let mut all: Vec<ManagedInstance> = guard.instances.values().cloned().collect();
        all.sort_by_key(|i| (i.created_at, i.id));
        Ok(all)
    }

    async fn list_instances_by_status(
        &self,
        status: InstanceStatus,
    ) -> Result<Vec<ManagedInstance>, StoreError> {
        let guard = self.inner.read().await;
        let mut matched: Vec<ManagedInstance> = guard
            .instances
            .values()
            .filter(|i| i.status == status && i.deleted_at.is_none())
            .cloned()
            .collect();
        matched.sort_by_key(|i| (i.created_at, i.id));
        Ok(matched)
    }

    async fn dequeue_next(
        &self,
        status: InstanceStatus,
    ) -> Result<Option<ManagedInstance>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .instances
            .values()
            .filter(|i| i.status == status && i.deleted_at.is_none())
            .min_by_key(|i| (i.created_at, i.id))
            .cloned())
    }

    // ── Infrastructure ────────────────────────────────────────────────────────

    async fn get_infrastructure(
        &self,
        instance_id: InstanceId,
    ) -> Result<Option<InstanceInfrastructure>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.infrastructure.get(&instance_id).cloned())
    }

    async fn insert_infrastructure(
        &self,
        infra: &InstanceInfrastructure,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.infrastructure.insert(infra.instance_id, infra.clone());
        Ok(())
    }

    async fn update_infrastructure(
        &self,
        infra: &InstanceInfrastructure,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if !guard.infrastructure.contains_key(&infra.instance_id) {
            return Err(StoreError::InfrastructureNotFound(infra.instance_id.as_i64()));
        }
        guard.infrastructure.insert(infra.instance_id, infra.clone());
        Ok(())
    }

    async fn delete_infrastructure(&self, instance_id: InstanceId) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.infrastructure.remove(&instance_id);
        Ok(())
    }

    // ── Billing / config ──────────────────────────────────────────────────────

    async fn get_billing(
        &self,
        instance_id: InstanceId,
    ) -> Result<Option<InstanceBilling>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.billing.get(&instance_id).cloned())
    }

    async fn upsert_billing(&self, billing: &InstanceBilling) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.billing.insert(billing.instance_id, billing.clone());
        Ok(())
    }

    async fn get_config(
        &self,
        instance_id: InstanceId,
    ) -> Result<Option<InstanceConfig>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.configs.get(&instance_id).cloned())
    }

    async fn upsert_config(&self, config: &InstanceConfig) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.configs.insert(config.instance_id, config.clone());
        Ok(())
    }

    // ── Worker-ID registry ────────────────────────────────────────────────────

    async fn allocate_worker_id(&self, instance_id: InstanceId) -> Result<u16, StoreError> {
        let mut guard = self.inner.write().await;
        // Idempotent: an existing active row wins.
        if let Some(entry) = guard
            .registry
            .values()
            .find(|e| e.instance_id == instance_id && !e.is_tombstoned)
        {
            return Ok(entry.worker_id);
        }
        let mut candidate = WORKER_ID_MIN;
        while guard.registry.contains_key(&candidate) {
            if candidate == WORKER_ID_MAX {
                return Err(StoreError::WorkerIdsExhausted);
            }
            candidate += 1;
        }
        guard.registry.insert(
            candidate,
            WorkerIdEntry {
                worker_id: candidate,
                instance_id,
                is_tombstoned: false,
                allocated_at: Utc::now(),
                released_at: None,
            },
        );
        Ok(candidate)
    }

    async fn get_worker_id_entry(
        &self,
        instance_id: InstanceId,
    ) -> Result<Option<WorkerIdEntry>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .registry
            .values()
            .find(|e| e.instance_id == instance_id && !e.is_tombstoned)
            .cloned())
    }

    async fn tombstone_worker_id(&self, instance_id: InstanceId) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        for entry in guard.registry.values_mut() {
            if entry.instance_id == instance_id && !entry.is_tombstoned {
                entry.is_tombstoned = true;
                entry.released_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    // ── Provisioning events ───────────────────────────────────────────────────

    async fn append_event(&self, event: &ProvisioningEvent) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.events.push(event.clone());
        Ok(())
    }

    async fn complete_event(
        &self,
        event_id: i64,
        status: EventStatus,
        error_message: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let event = guard
            .events
            .iter_mut()
            .find(|e| e.id == event_id)
            .ok_or(StoreError::EventNotFound(event_id))?;
        event.status = status;
        event.error_message = error_message;
        event.completed_at = Some(completed_at);
        Ok(())
    }

    async fn list_events(
        &self,
        instance_id: InstanceId,
    ) -> Result<Vec<ProvisioningEvent>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .events
            .iter()
            .filter(|e| e.instance_id == instance_id)
            .cloned()
            .collect())
    }

    // ── Federation tokens ─────────────────────────────────────────────────────

    async fn insert_federation_token(&self, token: &FederationToken) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.federation_tokens.push(token.clone());
        Ok(())
    }

    async fn find_federation_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<FederationToken>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .federation_tokens
            .iter()
            .find(|t| t.token_hash == token_hash && t.revoked_at.is_none())
            .cloned())
    }

    async fn consume_bootstrap_token_hash(
        &self,
        instance_id: InstanceId,
        token_hash: &str,
    ) -> Result<bool, StoreError> {
        let mut guard = self.inner.write().await;
        let Some(infra) = guard.infrastructure.get_mut(&instance_id) else {
            return Ok(false);
        };
        if infra.bootstrap_token_hash.as_deref() == Some(token_hash) {
            infra.bootstrap_token_hash = None;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_domain::EventPhase;

    fn dummy_instance(id: i64, domain: &str) -> ManagedInstance {
        ManagedInstance {
            id: InstanceId::new(id),
            owner_id: OwnerId::new(7),
            domain: domain.to_string(),
            display_name: domain.to_string(),
            status: InstanceStatus::Pending,
            worker_id: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = InMemoryStore::new();
        store.insert_instance(&dummy_instance(1, "a.example.com")).await.unwrap();

        let got = store.get_instance(InstanceId::new(1)).await.unwrap();
        assert_eq!(got.unwrap().domain, "a.example.com");
    }

    #[tokio::test]
    async fn duplicate_live_domain_rejected() {
        let store = InMemoryStore::new();
        store.insert_instance(&dummy_instance(1, "a.example.com")).await.unwrap();
        let err = store.insert_instance(&dummy_instance(2, "a.example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DomainTaken(_)));
    }

    #[tokio::test]
    async fn soft_deleted_domain_can_be_reused() {
        let store = InMemoryStore::new();
        store.insert_instance(&dummy_instance(1, "a.example.com")).await.unwrap();
        store.mark_instance_destroyed(InstanceId::new(1)).await.unwrap();
        store.insert_instance(&dummy_instance(2, "a.example.com")).await.unwrap();
    }

    #[tokio::test]
    async fn dequeue_is_fifo_within_status() {
        let store = InMemoryStore::new();
        let mut older = dummy_instance(1, "a.example.com");
        older.status = InstanceStatus::Provisioning;
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        let mut newer = dummy_instance(2, "b.example.com");
        newer.status = InstanceStatus::Provisioning;

        store.insert_instance(&newer).await.unwrap();
        store.insert_instance(&older).await.unwrap();

        let next = store.dequeue_next(InstanceStatus::Provisioning).await.unwrap().unwrap();
        assert_eq!(next.id, InstanceId::new(1));
    }

    #[tokio::test]
    async fn worker_ids_allocate_lowest_and_never_reuse_tombstones() {
        let store = InMemoryStore::new();
        let a = store.allocate_worker_id(InstanceId::new(1)).await.unwrap();
        let b = store.allocate_worker_id(InstanceId::new(2)).await.unwrap();
        assert_eq!(a, WORKER_ID_MIN);
        assert_eq!(b, WORKER_ID_MIN + 1);

        store.tombstone_worker_id(InstanceId::new(1)).await.unwrap();
        let c = store.allocate_worker_id(InstanceId::new(3)).await.unwrap();
        assert_eq!(c, WORKER_ID_MIN + 2, "tombstoned id must not be reused");
    }

    #[tokio::test]
    async fn worker_id_allocation_is_idempotent_per_instance() {
        let store = InMemoryStore::new();
        let a = store.allocate_worker_id(InstanceId::new(1)).await.unwrap();
        let again = store.allocate_worker_id(InstanceId::new(1)).await.unwrap();
        assert_eq!(a, again);
    }

    #[tokio::test]
    async fn events_complete_only_their_own_row() {
        let store = InMemoryStore::new();
        let ev = ProvisioningEvent {
            id: 100,
            instance_id: InstanceId::new(1),
            step_name: "create_network".into(),
            phase: EventPhase::Execute,
            status: EventStatus::InProgress,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        store.append_event(&ev).await.unwrap();
        store
            .complete_event(100, EventStatus::Completed, None, Utc::now())
            .await
            .unwrap();

        let events = store.list_events(InstanceId::new(1)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::Completed);
        assert!(events[0].completed_at.unwrap() >= events[0].started_at);
    }

    #[tokio::test]
    async fn bootstrap_token_is_single_use() {
        let store = InMemoryStore::new();
        let infra = InstanceInfrastructure {
            id: 10,
            instance_id: InstanceId::new(1),
            container_id: None,
            network_id: None,
            secret_id: None,
            proxy_route_id: None,
            db_name: "xcord_acme".into(),
            db_password: "pw".into(),
            redis_db: 0,
            storage_access_key: "ak".into(),
            storage_secret_key: "sk".into(),
            media_api_key: "mk".into(),
            media_secret_key: "ms".into(),
            bootstrap_token_hash: Some("abc123".into()),
            instance_kek: "wrapped".into(),
        };
        store.insert_infrastructure(&infra).await.unwrap();

        assert!(store
            .consume_bootstrap_token_hash(InstanceId::new(1), "abc123")
            .await
            .unwrap());
        // Second redemption fails: the hash is gone.
        assert!(!store
            .consume_bootstrap_token_hash(InstanceId::new(1), "abc123")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn owner_live_count_excludes_destroying() {
        let store = InMemoryStore::new();
        let mut a = dummy_instance(1, "a.example.com");
        a.status = InstanceStatus::Running;
        let mut b = dummy_instance(2, "b.example.com");
        b.status = InstanceStatus::Destroying;
        store.insert_instance(&a).await.unwrap();
        store.insert_instance(&b).await.unwrap();

        let count = store.count_owner_live_instances(OwnerId::new(7)).await.unwrap();
        assert_eq!(count, 1);
    }
}
