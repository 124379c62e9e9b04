use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hub_domain::{EventStatus, InstanceId, InstanceStatus, OwnerId};

use crate::error::StoreError;
use crate::state::{
    FederationToken, InstanceBilling, InstanceConfig, InstanceInfrastructure, ManagedInstance,
    ProvisioningEvent, WorkerIdEntry,
};

/// Unit-of-work boundary for the orchestrator. Every method commits
/// atomically; steps never hold a transaction across a driver call.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    // ── Instances ─────────────────────────────────────────────────────────────

    async fn get_instance(&self, id: InstanceId) -> Result<Option<ManagedInstance>, StoreError>;

    /// Lookup by domain among non-deleted instances.
    async fn get_instance_by_domain(
        &self,
        domain: &str,
    ) -> Result<Option<ManagedInstance>, StoreError>;

    /// Insert a new instance row. Fails `DomainTaken` if a non-deleted row
    /// already holds the domain.
    async fn insert_instance(&self, instance: &ManagedInstance) -> Result<(), StoreError>;

    async fn update_instance_status(
        &self,
        id: InstanceId,
        status: InstanceStatus,
    ) -> Result<(), StoreError>;

    /// Terminal destruction write: `status = Destroyed`, `deleted_at = now`.
    async fn mark_instance_destroyed(&self, id: InstanceId) -> Result<(), StoreError>;

    async fn set_instance_worker_id(
        &self,
        id: InstanceId,
        worker_id: u16,
    ) -> Result<(), StoreError>;

    /// Instances counting toward the owner's tier limit (not destroying or
    /// destroyed, not soft-deleted).
    async fn count_owner_live_instances(&self, owner: OwnerId) -> Result<i64, StoreError>;

    async fn list_instances(&self) -> Result<Vec<ManagedInstance>, StoreError>;

    async fn list_instances_by_status(
        &self,
        status: InstanceStatus,
    ) -> Result<Vec<ManagedInstance>, StoreError>;

    /// Work-queue pop: the oldest non-deleted instance in `status`, FIFO by
    /// `created_at`. The status field itself is the lock: the caller flips
    /// it before touching external resources.
    async fn dequeue_next(
        &self,
        status: InstanceStatus,
    ) -> Result<Option<ManagedInstance>, StoreError>;

    // ── Infrastructure ────────────────────────────────────────────────────────

    async fn get_infrastructure(
        &self,
        instance_id: InstanceId,
    ) -> Result<Option<InstanceInfrastructure>, StoreError>;

    async fn insert_infrastructure(
        &self,
        infra: &InstanceInfrastructure,
    ) -> Result<(), StoreError>;

    async fn update_infrastructure(
        &self,
        infra: &InstanceInfrastructure,
    ) -> Result<(), StoreError>;

    async fn delete_infrastructure(&self, instance_id: InstanceId) -> Result<(), StoreError>;

    // ── Billing / config ──────────────────────────────────────────────────────

    async fn get_billing(
        &self,
        instance_id: InstanceId,
    ) -> Result<Option<InstanceBilling>, StoreError>;

    async fn upsert_billing(&self, billing: &InstanceBilling) -> Result<(), StoreError>;

    async fn get_config(
        &self,
        instance_id: InstanceId,
    ) -> Result<Option<InstanceConfig>, StoreError>;

    async fn upsert_config(&self, config: &InstanceConfig) -> Result<(), StoreError>;

    // ── Worker-ID registry ────────────────────────────────────────────────────

    /// Allocate the lowest unused worker ID in [11, 1023] for `instance_id`
    /// and insert the registry row. Tombstoned rows still occupy their ID,
    /// so IDs are monotonically consumed. `WorkerIdsExhausted` when full.
    async fn allocate_worker_id(&self, instance_id: InstanceId) -> Result<u16, StoreError>;

    async fn get_worker_id_entry(
        &self,
        instance_id: InstanceId,
    ) -> Result<Option<WorkerIdEntry>, StoreError>;

    /// Mark the instance's registry row tombstoned (`released_at = now`).
    /// No-op when the instance never got an ID.
    async fn tombstone_worker_id(&self, instance_id: InstanceId) -> Result<(), StoreError>;

    // ── Provisioning events ───────────────────────────────────────────────────

    /// Append a new event row (normally `InProgress`). The caller supplies
    /// the snowflake `id`.
    async fn append_event(&self, event: &ProvisioningEvent) -> Result<(), StoreError>;

    /// Complete exactly the row started by this attempt.
    async fn complete_event(
        &self,
        event_id: i64,
        status: EventStatus,
        error_message: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// All events for an instance in append order.
    async fn list_events(
        &self,
        instance_id: InstanceId,
    ) -> Result<Vec<ProvisioningEvent>, StoreError>;

    // ── Federation tokens ─────────────────────────────────────────────────────

    async fn insert_federation_token(&self, token: &FederationToken) -> Result<(), StoreError>;

    async fn find_federation_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<FederationToken>, StoreError>;

    /// Single-use consumption of the bootstrap token hash: clears it and
    /// returns true iff it was present and matched.
    async fn consume_bootstrap_token_hash(
        &self,
        instance_id: InstanceId,
        token_hash: &str,
    ) -> Result<bool, StoreError>;
}
