use std::sync::Arc;

use async_trait::async_trait;
use hub_store::StateStore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ErrorCode, StepError};
use crate::step::{Step, StepCtx};

/// The fixed teardown order: reverse dependency order, every step
/// best-effort. Destruction must finish even when upstream resources are
/// partially missing or were never created.
pub fn destruction_steps() -> Vec<Arc<dyn Step>> {
    vec![
        Arc::new(NotifyShuttingDown),
        Arc::new(StopContainer),
        Arc::new(RemoveProxyRoute),
        Arc::new(RemoveDnsRecord),
        Arc::new(RemoveContainer),
        Arc::new(RemoveNetwork),
        Arc::new(RemoveObjectStoreBucket),
    ]
}

// ── 1. NotifyShuttingDown ─────────────────────────────────────────────────────

pub struct NotifyShuttingDown;

#[async_trait]
impl Step for NotifyShuttingDown {
    fn name(&self) -> &'static str {
        "notify_shutting_down"
    }

    async fn execute(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let instance = ctx.instance().await?;
        // The notifier swallows failures internally; all that remains is a
        // short grace period for the instance to flush.
        ctx.drivers
            .notifier
            .notify_shutting_down(&instance.domain, "instance destruction")
            .await;
        tokio::time::sleep(ctx.timings.shutdown_grace).await;
        Ok(())
    }
}

// ── 2. StopContainer ──────────────────────────────────────────────────────────

pub struct StopContainer;

#[async_trait]
impl Step for StopContainer {
    fn name(&self) -> &'static str {
        "stop_container"
    }

    async fn execute(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let Some(infra) = ctx.store.get_infrastructure(ctx.instance_id).await? else {
            debug!(instance_id = %ctx.instance_id, "no infrastructure row, stop skipped");
            return Ok(());
        };
        let Some(container_id) = infra.container_id.as_deref() else {
            debug!(instance_id = %ctx.instance_id, "no container recorded, stop skipped");
            return Ok(());
        };
        ctx.drivers
            .engine
            .stop_container(container_id)
            .await
            .map_err(|e| StepError::driver(ErrorCode::ContainerStartFailed, e))
    }
}

// ── 3. RemoveProxyRoute ───────────────────────────────────────────────────────

pub struct RemoveProxyRoute;

#[async_trait]
impl Step for RemoveProxyRoute {
    fn name(&self) -> &'static str {
        "remove_proxy_route"
    }

    async fn execute(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let Some(infra) = ctx.store.get_infrastructure(ctx.instance_id).await? else {
            return Ok(());
        };
        let Some(route_id) = infra.proxy_route_id.as_deref() else {
            debug!(instance_id = %ctx.instance_id, "no proxy route recorded, removal skipped");
            return Ok(());
        };
        ctx.drivers
            .proxy
            .delete_route(route_id)
            .await
            .map_err(|e| StepError::driver(ErrorCode::DnsProxyFailed, e))
    }
}

// ── 4. RemoveDnsRecord ────────────────────────────────────────────────────────

pub struct RemoveDnsRecord;

#[async_trait]
impl Step for RemoveDnsRecord {
    fn name(&self) -> &'static str {
        "remove_dns_record"
    }

    async fn execute(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let instance = ctx.instance().await?;
        ctx.drivers
            .dns
            .delete_a_record(instance.subdomain())
            .await
            .map_err(|e| StepError::driver(ErrorCode::DnsProxyFailed, e))
    }
}

// ── 5. RemoveContainer ────────────────────────────────────────────────────────

pub struct RemoveContainer;

#[async_trait]
impl Step for RemoveContainer {
    fn name(&self) -> &'static str {
        "remove_container"
    }

    async fn execute(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let Some(infra) = ctx.store.get_infrastructure(ctx.instance_id).await? else {
            return Ok(());
        };
        if let Some(container_id) = infra.container_id.as_deref() {
            ctx.drivers
                .engine
                .remove_container(container_id)
                .await
                .map_err(|e| StepError::driver(ErrorCode::ContainerStartFailed, e))?;
        } else {
            debug!(instance_id = %ctx.instance_id, "no container recorded, removal skipped");
        }
        // The config secret dies with the container.
        if let Some(secret_id) = infra.secret_id.as_deref() {
            ctx.drivers
                .engine
                .remove_secret(secret_id)
                .await
                .map_err(|e| StepError::driver(ErrorCode::ContainerStartFailed, e))?;
        }
        Ok(())
    }
}

// ── 6. RemoveNetwork ──────────────────────────────────────────────────────────

pub struct RemoveNetwork;

#[async_trait]
impl Step for RemoveNetwork {
    fn name(&self) -> &'static str {
        "remove_network"
    }

    async fn execute(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let Some(infra) = ctx.store.get_infrastructure(ctx.instance_id).await? else {
            return Ok(());
        };
        let Some(network_id) = infra.network_id.as_deref() else {
            debug!(instance_id = %ctx.instance_id, "no network recorded, removal skipped");
            return Ok(());
        };
        ctx.drivers
            .engine
            .remove_network(network_id)
            .await
            .map_err(|e| StepError::driver(ErrorCode::NetworkCreationFailed, e))
    }
}

// ── 7. RemoveObjectStoreBucket ────────────────────────────────────────────────

pub struct RemoveObjectStoreBucket;

#[async_trait]
impl Step for RemoveObjectStoreBucket {
    fn name(&self) -> &'static str {
        "remove_object_store_bucket"
    }

    async fn execute(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let instance = ctx.instance().await?;
        let Some(infra) = ctx.store.get_infrastructure(ctx.instance_id).await? else {
            return Ok(());
        };
        let bucket = ctx.config.bucket_name(instance.subdomain());
        ctx.drivers
            .object_store
            .deprovision_bucket(&bucket, &infra.storage_access_key)
            .await
            .map_err(|e| StepError::driver(ErrorCode::MinioProvisionFailed, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{PipelineExecutor, PipelineKind};
    use crate::provision::provisioning_steps;
    use crate::testutil::{test_ctx, test_ctx_with, RecordingSleeper};
    use hub_domain::{InstanceId, InstanceStatus, OwnerId};
    use hub_store::StateStore;

    async fn run(kind: PipelineKind, steps: &[Arc<dyn Step>], ctx: &StepCtx) {
        let executor = PipelineExecutor::with_sleeper(Arc::new(RecordingSleeper::default()));
        executor
            .run(kind, steps, ctx, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn full_lifecycle_tears_down_everything() {
        let (ctx, fixture) = test_ctx_with(
            InstanceId::new(200),
            "acme.example.com",
            OwnerId::new(7),
        )
        .await;
        run(PipelineKind::Provision, &provisioning_steps(), &ctx).await;
        fixture.stubs.put_object("xcord-acme", "avatar.png");

        fixture
            .store
            .update_instance_status(ctx.instance_id, InstanceStatus::Destroying)
            .await
            .unwrap();
        run(PipelineKind::Destroy, &destruction_steps(), &ctx).await;

        let instance = fixture.store.get_instance(ctx.instance_id).await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Destroyed);
        assert!(instance.deleted_at.is_some());

        // Worker ID tombstoned, infrastructure row gone, bucket drained.
        assert!(fixture.store.get_worker_id_entry(ctx.instance_id).await.unwrap().is_none());
        assert!(fixture.store.get_infrastructure(ctx.instance_id).await.unwrap().is_none());
        assert!(!fixture.stubs.bucket_exists("xcord-acme"));
        assert_eq!(fixture.stubs.network_count(), 0);
        assert_eq!(fixture.stubs.notifications().len(), 1);
    }

    #[tokio::test]
    async fn partially_provisioned_instance_destroys_cleanly() {
        // network exists, container was never created
        let (ctx, fixture) = test_ctx(InstanceId::new(201)).await;
        let steps = provisioning_steps();
        run(PipelineKind::Provision, &steps[..7], &ctx).await;

        let infra = fixture.store.get_infrastructure(ctx.instance_id).await.unwrap().unwrap();
        assert!(infra.container_id.is_none());
        assert!(infra.network_id.is_some());

        fixture
            .store
            .update_instance_status(ctx.instance_id, InstanceStatus::Destroying)
            .await
            .unwrap();
        run(PipelineKind::Destroy, &destruction_steps(), &ctx).await;

        let instance = fixture.store.get_instance(ctx.instance_id).await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Destroyed);
        assert!(fixture.store.get_worker_id_entry(ctx.instance_id).await.unwrap().is_none());
        assert_eq!(fixture.stubs.network_count(), 0);
        // Container ops were skipped, not attempted.
        assert!(fixture.stubs.calls_for("stop_container").is_empty());
        assert!(fixture.stubs.calls_for("remove_container").is_empty());
    }

    #[tokio::test]
    async fn destruction_survives_failing_drivers() {
        let (ctx, fixture) = test_ctx(InstanceId::new(202)).await;
        run(PipelineKind::Provision, &provisioning_steps(), &ctx).await;

        // Every removal fails hard on every attempt.
        for op in [
            "stop_container",
            "delete_route",
            "delete_a_record",
            "remove_container",
            "remove_secret",
            "remove_network",
            "deprovision_bucket",
        ] {
            fixture.stubs.fail_next(op, 99);
        }

        fixture
            .store
            .update_instance_status(ctx.instance_id, InstanceStatus::Destroying)
            .await
            .unwrap();
        run(PipelineKind::Destroy, &destruction_steps(), &ctx).await;

        // Best-effort: final status is Destroyed regardless.
        let instance = fixture.store.get_instance(ctx.instance_id).await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Destroyed);
        assert!(fixture.store.get_worker_id_entry(ctx.instance_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn each_teardown_execute_is_idempotent() {
        let (ctx, fixture) = test_ctx(InstanceId::new(204)).await;
        run(PipelineKind::Provision, &provisioning_steps(), &ctx).await;

        let cancel = CancellationToken::new();
        for step in destruction_steps() {
            step.execute(&ctx, &cancel).await.unwrap();
            step.execute(&ctx, &cancel).await.unwrap();
        }

        // Everything external is gone exactly once over.
        assert_eq!(fixture.stubs.network_count(), 0);
        assert!(!fixture.stubs.bucket_exists("xcord-i204"));
    }

    #[tokio::test]
    async fn destruction_of_bare_instance_succeeds() {
        // No provisioning ever ran: no infra row, nothing external.
        let (ctx, fixture) = test_ctx(InstanceId::new(203)).await;
        fixture
            .store
            .update_instance_status(ctx.instance_id, InstanceStatus::Destroying)
            .await
            .unwrap();
        run(PipelineKind::Destroy, &destruction_steps(), &ctx).await;

        let instance = fixture.store.get_instance(ctx.instance_id).await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Destroyed);
        // 7 steps × 2 phases of events, all attempts recorded.
        let events = fixture.store.list_events(ctx.instance_id).await.unwrap();
        assert_eq!(events.len(), 14);
    }
}
