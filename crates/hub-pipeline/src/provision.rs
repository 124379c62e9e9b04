use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use hub_domain::{validate_subdomain, InstanceStatus, TierProfile};
use hub_driver::{container_hostname, ContainerSpec};
use hub_store::{InstanceConfig, InstanceInfrastructure, ProvisioningEvent, StateStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ErrorCode, StepError};
use crate::instance_config;
use crate::metrics;
use crate::secrets;
use crate::step::{Step, StepCtx};

/// The fixed provisioning order. Step names are event-log keys; never
/// rename a deployed step.
pub fn provisioning_steps() -> Vec<Arc<dyn Step>> {
    vec![
        Arc::new(ValidateSubdomain),
        Arc::new(EnforceTierLimits),
        Arc::new(AllocateWorkerId),
        Arc::new(GenerateSecrets),
        Arc::new(ProvisionDatabase),
        Arc::new(ProvisionObjectStore),
        Arc::new(CreateNetwork),
        Arc::new(RunMigrations),
        Arc::new(StartApiContainer),
        Arc::new(ConfigureDnsAndProxy),
        Arc::new(ActivateInstance),
    ]
}

async fn tier_profile(ctx: &StepCtx) -> Result<TierProfile, StepError> {
    Ok(ctx
        .store
        .get_billing(ctx.instance_id)
        .await?
        .map(|b| TierProfile::new(b.feature_tier, b.user_count_tier, b.hd_upgrade))
        .unwrap_or_default())
}

// ── 1. ValidateSubdomain ──────────────────────────────────────────────────────

/// Defensive re-check of the domain the API handler already validated: the
/// handler and the pipeline can race another registration.
pub struct ValidateSubdomain;

#[async_trait]
impl Step for ValidateSubdomain {
    fn name(&self) -> &'static str {
        "validate_subdomain"
    }

    async fn execute(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let instance = ctx.instance().await?;
        validate_subdomain(instance.subdomain())
            .map_err(|e| StepError::new(ErrorCode::ValidationFailed, e.to_string()))?;

        if let Some(holder) = ctx.store.get_instance_by_domain(&instance.domain).await? {
            if holder.id != instance.id {
                return Err(StepError::new(
                    ErrorCode::DomainTaken,
                    format!("domain {} is held by instance {}", instance.domain, holder.id),
                ));
            }
        }
        Ok(())
    }
}

// ── 2. EnforceTierLimits ──────────────────────────────────────────────────────

pub struct EnforceTierLimits;

#[async_trait]
impl Step for EnforceTierLimits {
    fn name(&self) -> &'static str {
        "enforce_tier_limits"
    }

    async fn execute(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let limit = ctx.config.owner_instance_limit;
        if limit < 0 {
            return Ok(()); // -1 sentinel: unlimited
        }
        let instance = ctx.instance().await?;
        let count = ctx.store.count_owner_live_instances(instance.owner_id).await?;
        if count > limit as i64 {
            return Err(StepError::new(
                ErrorCode::TierLimitExceeded,
                format!("owner {} has {count} live instances, limit {limit}", instance.owner_id),
            ));
        }
        Ok(())
    }
}

// ── 3. AllocateWorkerId ───────────────────────────────────────────────────────

pub struct AllocateWorkerId;

#[async_trait]
impl Step for AllocateWorkerId {
    fn name(&self) -> &'static str {
        "allocate_worker_id"
    }

    async fn execute(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let instance = ctx.instance().await?;
        if instance.worker_id.is_some() {
            return Ok(());
        }
        let worker_id = ctx.store.allocate_worker_id(ctx.instance_id).await?;
        ctx.store.set_instance_worker_id(ctx.instance_id, worker_id).await?;
        info!(instance_id = %ctx.instance_id, worker_id, "worker id allocated");
        Ok(())
    }

    async fn verify(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let instance = ctx.instance().await?;
        let entry = ctx.store.get_worker_id_entry(ctx.instance_id).await?;
        match (instance.worker_id, entry) {
            (Some(on_instance), Some(entry)) if entry.worker_id == on_instance => Ok(()),
            (on_instance, entry) => Err(StepError::new(
                ErrorCode::WorkerIdVerifyFailed,
                format!(
                    "instance carries {:?}, registry has {:?}",
                    on_instance,
                    entry.map(|e| e.worker_id)
                ),
            )),
        }
    }
}

// ── 4. GenerateSecrets ────────────────────────────────────────────────────────

pub struct GenerateSecrets;

#[async_trait]
impl Step for GenerateSecrets {
    fn name(&self) -> &'static str {
        "generate_secrets"
    }

    async fn execute(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        if ctx.store.get_infrastructure(ctx.instance_id).await?.is_some() {
            return Ok(()); // material survives from a previous attempt
        }
        let instance = ctx.instance().await?;
        let material = secrets::generate(&ctx.kek)
            .map_err(|e| StepError::new(ErrorCode::StepException, e.to_string()))?;

        let infra = InstanceInfrastructure {
            id: ctx.ids.next_id(),
            instance_id: ctx.instance_id,
            container_id: None,
            network_id: None,
            secret_id: None,
            proxy_route_id: None,
            db_name: format!("xcord_{}", instance.subdomain().replace('-', "_")),
            db_password: material.db_password,
            redis_db: (instance.worker_id.unwrap_or(0) % 16) as i32,
            storage_access_key: material.storage_access_key,
            storage_secret_key: material.storage_secret_key,
            media_api_key: material.media_api_key,
            media_secret_key: material.media_secret_key,
            bootstrap_token_hash: Some(material.bootstrap_token_hash),
            instance_kek: material.wrapped_dek,
        };
        ctx.store.insert_infrastructure(&infra).await?;
        Ok(())
    }

    async fn verify(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let infra = ctx
            .store
            .get_infrastructure(ctx.instance_id)
            .await?
            .ok_or_else(|| StepError::new(ErrorCode::SecretsMissing, "no infrastructure row"))?;
        if infra.db_password.is_empty()
            || infra.storage_access_key.is_empty()
            || infra.storage_secret_key.is_empty()
        {
            return Err(StepError::new(
                ErrorCode::SecretsIncomplete,
                "db password or storage keys empty",
            ));
        }
        Ok(())
    }
}

// ── 5. ProvisionDatabase ──────────────────────────────────────────────────────

pub struct ProvisionDatabase;

#[async_trait]
impl Step for ProvisionDatabase {
    fn name(&self) -> &'static str {
        "provision_database"
    }

    async fn execute(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let infra = ctx.infrastructure().await?;
        ctx.drivers
            .database
            .ensure_database(&infra.db_name, &infra.db_password)
            .await
            .map_err(|e| StepError::driver(ErrorCode::DbProvisionFailed, e))
    }

    async fn verify(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let infra = ctx.infrastructure().await?;
        let exists = ctx
            .drivers
            .database
            .database_exists(&infra.db_name)
            .await
            .map_err(|e| StepError::driver(ErrorCode::DbNotFound, e))?;
        if exists {
            Ok(())
        } else {
            Err(StepError::new(
                ErrorCode::DbNotFound,
                format!("database {} absent after provisioning", infra.db_name),
            ))
        }
    }
}

// ── 6. ProvisionObjectStore ───────────────────────────────────────────────────

pub struct ProvisionObjectStore;

#[async_trait]
impl Step for ProvisionObjectStore {
    fn name(&self) -> &'static str {
        "provision_object_store"
    }

    async fn execute(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let instance = ctx.instance().await?;
        let mut infra = ctx.infrastructure().await?;
        let bucket = ctx.config.bucket_name(instance.subdomain());

        let provision = ctx
            .drivers
            .object_store
            .provision_bucket(&bucket, &infra.storage_access_key, &infra.storage_secret_key)
            .await
            .map_err(|e| StepError::driver(ErrorCode::MinioProvisionFailed, e))?;

        if !provision.principal_ready {
            // Root-credential fallback: keep the instance usable but make
            // the degraded isolation impossible to miss.
            warn!(
                instance_id = %ctx.instance_id,
                bucket,
                "object store principal setup failed; falling back to root credentials"
            );
            metrics::ROOT_FALLBACK_COUNTER.inc();
            infra.storage_access_key = ctx.config.object_store.admin_access_key.clone();
            infra.storage_secret_key = ctx.config.object_store.admin_secret_key.clone();
            ctx.store.update_infrastructure(&infra).await?;

            let now = Utc::now();
            ctx.store
                .append_event(&ProvisioningEvent {
                    id: ctx.ids.next_id(),
                    instance_id: ctx.instance_id,
                    step_name: "object_store_credential_fallback".to_string(),
                    phase: hub_domain::EventPhase::Execute,
                    status: hub_domain::EventStatus::Failed,
                    error_message: Some(
                        "per-instance principal unavailable; root credentials in use".to_string(),
                    ),
                    started_at: now,
                    completed_at: Some(now),
                })
                .await?;
        }
        Ok(())
    }

    async fn verify(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let instance = ctx.instance().await?;
        let infra = ctx.infrastructure().await?;
        let bucket = ctx.config.bucket_name(instance.subdomain());
        let readable = ctx
            .drivers
            .object_store
            .verify_bucket(&bucket, &infra.storage_access_key, &infra.storage_secret_key)
            .await
            .map_err(|e| StepError::driver(ErrorCode::BucketVerifyFailed, e))?;
        if readable {
            Ok(())
        } else {
            Err(StepError::new(
                ErrorCode::BucketVerifyFailed,
                format!("stored credentials cannot list bucket {bucket}"),
            ))
        }
    }
}

// ── 7. CreateNetwork ──────────────────────────────────────────────────────────

pub struct CreateNetwork;

#[async_trait]
impl Step for CreateNetwork {
    fn name(&self) -> &'static str {
        "create_network"
    }

    async fn execute(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let instance = ctx.instance().await?;
        let mut infra = ctx.infrastructure().await?;
        // The engine call is idempotent (lookup on duplicate), so a stored
        // ID is refreshed rather than trusted blindly.
        let network_id = ctx
            .drivers
            .engine
            .create_network(&instance.domain)
            .await
            .map_err(|e| StepError::driver(ErrorCode::NetworkCreationFailed, e))?;
        if infra.network_id.as_deref() != Some(network_id.as_str()) {
            infra.network_id = Some(network_id);
            ctx.store.update_infrastructure(&infra).await?;
        }
        Ok(())
    }

    async fn verify(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let infra = ctx.infrastructure().await?;
        let network_id = infra.network_id.as_deref().ok_or_else(|| {
            StepError::new(ErrorCode::NetworkVerifyFailed, "no network id recorded")
        })?;
        let exists = ctx
            .drivers
            .engine
            .network_exists(network_id)
            .await
            .map_err(|e| StepError::driver(ErrorCode::NetworkVerifyFailed, e))?;
        if exists {
            Ok(())
        } else {
            Err(StepError::new(
                ErrorCode::NetworkVerifyFailed,
                format!("network {network_id} does not resolve"),
            ))
        }
    }
}

// ── 8. RunMigrations ──────────────────────────────────────────────────────────

/// Deliberately a no-op: the application container applies its own schema
/// on first start, so the hub has nothing to run here. The step exists so
/// the event log shows the decision was reached.
pub struct RunMigrations;

#[async_trait]
impl Step for RunMigrations {
    fn name(&self) -> &'static str {
        "run_migrations"
    }

    async fn execute(&self, _ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        Ok(())
    }
}

// ── 9. StartApiContainer ──────────────────────────────────────────────────────

pub struct StartApiContainer;

#[async_trait]
impl Step for StartApiContainer {
    fn name(&self) -> &'static str {
        "start_api_container"
    }

    async fn execute(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let instance = ctx.instance().await?;
        let mut infra = ctx.infrastructure().await?;

        // Idempotence short-circuit: a running container from a previous
        // attempt is kept as-is.
        if let Some(container_id) = &infra.container_id {
            if ctx
                .drivers
                .engine
                .container_running(container_id)
                .await
                .unwrap_or(false)
            {
                return Ok(());
            }
        }

        let tier = tier_profile(ctx).await?;
        let limits = tier.resource_limits();

        // Rotate the bootstrap token at every launch so the delivered
        // config always matches the stored hash.
        let token = secrets::random_token();
        infra.bootstrap_token_hash = Some(secrets::sha256_hex(token.as_bytes()));

        let delivered =
            instance_config::render(&instance, &infra, tier, &ctx.config, Some(&token));
        let payload = serde_json::to_vec_pretty(&delivered)
            .map_err(|e| StepError::new(ErrorCode::StepException, e.to_string()))?;

        let secret_id = ctx
            .drivers
            .engine
            .create_secret(&instance.domain, &payload)
            .await
            .map_err(|e| StepError::driver(ErrorCode::ContainerStartFailed, e))?;
        infra.secret_id = Some(secret_id.clone());

        let network_id = infra.network_id.clone().ok_or_else(|| {
            StepError::new(ErrorCode::ContainerStartFailed, "no network id recorded")
        })?;
        let spec = ContainerSpec {
            domain: instance.domain.clone(),
            image: ctx.config.instance_image.clone(),
            secret_id,
            network_id,
            infra_network: ctx.config.infra_network.clone(),
            memory_bytes: limits.memory_bytes(),
            cpu_quota: limits.cpu_quota(),
            cpu_period: limits.cpu_period(),
        };
        let container_id = ctx
            .drivers
            .engine
            .start_container(&spec)
            .await
            .map_err(|e| StepError::driver(ErrorCode::ContainerStartFailed, e))?;
        infra.container_id = Some(container_id);
        ctx.store.update_infrastructure(&infra).await?;

        // Persist the config snapshot (sans one-time token) for audits and
        // tier-change regeneration.
        let snapshot = instance_config::render(&instance, &infra, tier, &ctx.config, None);
        let version = ctx
            .store
            .get_config(ctx.instance_id)
            .await?
            .map(|c| c.version + 1)
            .unwrap_or(1);
        ctx.store
            .upsert_config(&InstanceConfig {
                id: ctx.ids.next_id(),
                instance_id: ctx.instance_id,
                config_json: snapshot,
                resource_limits_json: serde_json::to_value(limits)
                    .map_err(|e| StepError::new(ErrorCode::StepException, e.to_string()))?,
                feature_flags_json: tier.feature_flags(),
                version,
                updated_at: Utc::now(),
            })
            .await?;
        Ok(())
    }

    async fn verify(&self, ctx: &StepCtx, cancel: &CancellationToken) -> Result<(), StepError> {
        let infra = ctx.infrastructure().await?;
        let container_id = infra.container_id.as_deref().ok_or_else(|| {
            StepError::new(ErrorCode::ContainerNotRunning, "no container id recorded")
        })?;

        // Poll the inspect endpoint until Running or the budget runs out.
        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Err(StepError::new(ErrorCode::ContainerNotRunning, "cancelled"));
            }
            let running = ctx
                .drivers
                .engine
                .container_running(container_id)
                .await
                .map_err(|e| StepError::driver(ErrorCode::ContainerNotRunning, e))?;
            if running {
                return Ok(());
            }
            if started.elapsed() >= ctx.timings.container_poll_budget {
                return Err(StepError::new(
                    ErrorCode::ContainerNotRunning,
                    format!("container {container_id} not running within budget"),
                ));
            }
            tokio::time::sleep(ctx.timings.container_poll_interval).await;
        }
    }
}

// ── 10. ConfigureDnsAndProxy ──────────────────────────────────────────────────

pub struct ConfigureDnsAndProxy;

#[async_trait]
impl Step for ConfigureDnsAndProxy {
    fn name(&self) -> &'static str {
        "configure_dns_and_proxy"
    }

    async fn execute(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let instance = ctx.instance().await?;
        let mut infra = ctx.infrastructure().await?;

        ctx.drivers
            .dns
            .create_a_record(instance.subdomain(), &ctx.config.gateway_ip)
            .await
            .map_err(|e| StepError::driver(ErrorCode::DnsProxyFailed, e))?;

        let route_id = ctx
            .drivers
            .proxy
            .create_route(&instance.domain, &container_hostname(&instance.domain))
            .await
            .map_err(|e| StepError::driver(ErrorCode::DnsProxyFailed, e))?;
        if infra.proxy_route_id.as_deref() != Some(route_id.as_str()) {
            infra.proxy_route_id = Some(route_id);
            ctx.store.update_infrastructure(&infra).await?;
        }
        Ok(())
    }

    async fn verify(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let instance = ctx.instance().await?;
        let infra = ctx.infrastructure().await?;

        let record_ok = ctx
            .drivers
            .dns
            .verify_a_record(instance.subdomain())
            .await
            .map_err(|e| StepError::driver(ErrorCode::DnsVerifyFailed, e))?;
        if !record_ok {
            return Err(StepError::new(
                ErrorCode::DnsVerifyFailed,
                format!("A record for {} does not resolve", instance.subdomain()),
            ));
        }

        let route_id = infra.proxy_route_id.as_deref().ok_or_else(|| {
            StepError::new(ErrorCode::RouteVerifyFailed, "no proxy route recorded")
        })?;
        let route_ok = ctx
            .drivers
            .proxy
            .verify_route(route_id)
            .await
            .map_err(|e| StepError::driver(ErrorCode::RouteVerifyFailed, e))?;
        if route_ok {
            Ok(())
        } else {
            Err(StepError::new(
                ErrorCode::RouteVerifyFailed,
                format!("proxy route {route_id} absent"),
            ))
        }
    }
}

// ── 11. ActivateInstance ──────────────────────────────────────────────────────

pub struct ActivateInstance;

#[async_trait]
impl Step for ActivateInstance {
    fn name(&self) -> &'static str {
        "activate_instance"
    }

    async fn execute(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        ctx.store
            .update_instance_status(ctx.instance_id, InstanceStatus::Running)
            .await?;
        info!(instance_id = %ctx.instance_id, "instance running");
        Ok(())
    }

    async fn verify(&self, ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        let instance = ctx.instance().await?;
        if instance.status == InstanceStatus::Running {
            Ok(())
        } else {
            Err(StepError::new(
                ErrorCode::StepException,
                format!("expected running, found {}", instance.status),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{PipelineExecutor, PipelineKind};
    use crate::testutil::{test_ctx, test_ctx_with, test_instance, RecordingSleeper};
    use hub_domain::{EventStatus, InstanceId, OwnerId, WORKER_ID_MIN};
    use hub_store::StateStore;

    async fn run_provisioning(ctx: &StepCtx) -> Result<(), crate::error::PipelineError> {
        let executor = PipelineExecutor::with_sleeper(Arc::new(RecordingSleeper::default()));
        let steps = provisioning_steps();
        executor
            .run(PipelineKind::Provision, &steps, ctx, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn happy_path_provisions_everything() {
        let (ctx, fixture) = test_ctx_with(
            InstanceId::new(100),
            "acme.example.com",
            OwnerId::new(7),
        )
        .await;

        run_provisioning(&ctx).await.unwrap();

        let instance = fixture.store.get_instance(ctx.instance_id).await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Running);
        let worker_id = instance.worker_id.unwrap();
        assert!((WORKER_ID_MIN..=1023).contains(&worker_id));

        let infra = fixture.store.get_infrastructure(ctx.instance_id).await.unwrap().unwrap();
        assert!(infra.container_id.is_some());
        assert!(infra.network_id.is_some());
        assert!(infra.proxy_route_id.is_some());
        assert!(infra.secret_id.is_some());
        assert_eq!(infra.db_name, "xcord_acme");

        // 11 steps × 2 phases, all Completed, in pipeline order.
        let events = fixture.store.list_events(ctx.instance_id).await.unwrap();
        let completed: Vec<_> =
            events.iter().filter(|e| e.status == EventStatus::Completed).collect();
        assert_eq!(completed.len(), 22);
        let order: Vec<&str> = completed
            .iter()
            .step_by(2)
            .map(|e| e.step_name.as_str())
            .collect();
        assert_eq!(
            order,
            vec![
                "validate_subdomain",
                "enforce_tier_limits",
                "allocate_worker_id",
                "generate_secrets",
                "provision_database",
                "provision_object_store",
                "create_network",
                "run_migrations",
                "start_api_container",
                "configure_dns_and_proxy",
                "activate_instance",
            ]
        );

        // DNS record and bucket landed under the subdomain.
        assert!(fixture.stubs.bucket_exists("xcord-acme"));
        assert!(!fixture
            .stubs
            .calls_for("create_a_record")
            .is_empty());
    }

    #[tokio::test]
    async fn resume_skips_already_applied_steps() {
        let (ctx, fixture) = test_ctx_with(
            InstanceId::new(101),
            "acme.example.com",
            OwnerId::new(7),
        )
        .await;

        run_provisioning(&ctx).await.unwrap();
        let network_calls_before = fixture.stubs.calls_for("create_network").len();

        // Simulate a re-enqueue after a crash-and-restart: the event log
        // already shows everything applied, so nothing re-runs.
        fixture
            .store
            .update_instance_status(ctx.instance_id, hub_domain::InstanceStatus::Provisioning)
            .await
            .unwrap();
        run_provisioning(&ctx).await.unwrap();

        assert_eq!(
            fixture.stubs.calls_for("create_network").len(),
            network_calls_before,
            "completed steps must not re-run on resume"
        );
        let instance = fixture.store.get_instance(ctx.instance_id).await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Running);
        assert_eq!(instance.worker_id, Some(WORKER_ID_MIN));
    }

    #[tokio::test]
    async fn crash_after_create_network_resumes_at_run_migrations() {
        let (ctx, fixture) = test_ctx_with(
            InstanceId::new(111),
            "acme.example.com",
            OwnerId::new(7),
        )
        .await;
        let executor = PipelineExecutor::with_sleeper(Arc::new(RecordingSleeper::default()));
        let steps = provisioning_steps();

        // First run dies right after create_network's verify completes:
        // model it by running only the first seven steps.
        executor
            .run(
                PipelineKind::Provision,
                &steps[..7],
                &ctx,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let network_id_before = fixture
            .store
            .get_infrastructure(ctx.instance_id)
            .await
            .unwrap()
            .unwrap()
            .network_id
            .clone();

        // Restart: the full list resumes after create_network.
        executor
            .run(PipelineKind::Provision, &steps, &ctx, &CancellationToken::new())
            .await
            .unwrap();

        let instance = fixture.store.get_instance(ctx.instance_id).await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Running);
        let infra = fixture.store.get_infrastructure(ctx.instance_id).await.unwrap().unwrap();
        assert_eq!(infra.network_id, network_id_before, "no duplicate network");
        assert_eq!(fixture.stubs.calls_for("create_network").len(), 1);

        // 11 steps × 2 phases across both runs.
        let completed = fixture
            .store
            .list_events(ctx.instance_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.status == EventStatus::Completed)
            .count();
        assert_eq!(completed, 22);
    }

    #[tokio::test]
    async fn each_execute_is_idempotent() {
        let (ctx, fixture) = test_ctx_with(
            InstanceId::new(102),
            "acme.example.com",
            OwnerId::new(7),
        )
        .await;
        let cancel = CancellationToken::new();

        for step in provisioning_steps() {
            step.execute(&ctx, &cancel).await.unwrap();
            step.execute(&ctx, &cancel).await.unwrap();
            step.verify(&ctx, &cancel).await.unwrap();
        }

        // Double execution left single resources behind.
        assert_eq!(fixture.stubs.network_count(), 1);
        let entry = fixture.store.get_worker_id_entry(ctx.instance_id).await.unwrap().unwrap();
        assert_eq!(entry.worker_id, WORKER_ID_MIN);
        let infra = fixture.store.get_infrastructure(ctx.instance_id).await.unwrap().unwrap();
        assert_eq!(infra.redis_db, (WORKER_ID_MIN % 16) as i32);
    }

    #[tokio::test]
    async fn tier_cap_fails_at_step_two() {
        let (ctx, fixture) = test_ctx_with(
            InstanceId::new(103),
            "second.example.com",
            OwnerId::new(9),
        )
        .await;
        // The owner already runs one instance; drop the limit to 1.
        let mut existing = test_instance(
            InstanceId::new(104),
            "first.example.com",
            OwnerId::new(9),
        );
        existing.status = InstanceStatus::Running;
        fixture.store.insert_instance(&existing).await.unwrap();

        let mut config = crate::testutil::test_config();
        config.owner_instance_limit = 1;
        let ctx = StepCtx { config: Arc::new(config), ..ctx };

        let err = run_provisioning(&ctx).await.unwrap_err();
        match err {
            crate::error::PipelineError::Step { step, source } => {
                assert_eq!(step, "enforce_tier_limits");
                assert_eq!(source.code, ErrorCode::TierLimitExceeded);
            }
            other => panic!("unexpected: {other:?}"),
        }
        let instance = fixture.store.get_instance(ctx.instance_id).await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Failed);
    }

    #[tokio::test]
    async fn object_store_outage_leaves_failed_with_worker_id_allocated() {
        let (ctx, fixture) = test_ctx(InstanceId::new(105)).await;
        fixture.stubs.fail_next("provision_bucket", 99);

        let err = run_provisioning(&ctx).await.unwrap_err();
        match err {
            crate::error::PipelineError::Step { step, source } => {
                assert_eq!(step, "provision_object_store");
                assert_eq!(source.code, ErrorCode::MaxRetriesExceeded);
            }
            other => panic!("unexpected: {other:?}"),
        }

        let instance = fixture.store.get_instance(ctx.instance_id).await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Failed);
        // The worker ID stays allocated until explicit cleanup.
        assert!(fixture.store.get_worker_id_entry(ctx.instance_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn principal_fallback_records_root_credentials_and_marker_event() {
        let (ctx, fixture) = test_ctx(InstanceId::new(106)).await;
        fixture.stubs.fail_principal_setup(1);

        run_provisioning(&ctx).await.unwrap();

        let infra = fixture.store.get_infrastructure(ctx.instance_id).await.unwrap().unwrap();
        assert_eq!(infra.storage_access_key, "root");

        let events = fixture.store.list_events(ctx.instance_id).await.unwrap();
        assert!(events
            .iter()
            .any(|e| e.step_name == "object_store_credential_fallback"
                && e.status == EventStatus::Failed));
    }

    #[tokio::test]
    async fn validation_accepts_the_instances_own_domain_row() {
        // The instance's own row holds the domain by construction; the
        // defensive uniqueness check must not trip over it.
        let (ctx, _fixture) = test_ctx_with(
            InstanceId::new(107),
            "taken.example.com",
            OwnerId::new(7),
        )
        .await;
        let step = ValidateSubdomain;
        step.execute(&ctx, &CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_subdomain_is_fatal() {
        let (ctx, _fixture) = test_ctx_with(
            InstanceId::new(109),
            "Bad_Label.example.com",
            OwnerId::new(7),
        )
        .await;
        let err = run_provisioning(&ctx).await.unwrap_err();
        match err {
            crate::error::PipelineError::Step { step, source } => {
                assert_eq!(step, "validate_subdomain");
                assert_eq!(source.code, ErrorCode::ValidationFailed);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn container_start_retry_then_success() {
        let (ctx, fixture) = test_ctx(InstanceId::new(110)).await;
        fixture.stubs.fail_next("start_container", 2);

        run_provisioning(&ctx).await.unwrap();

        let events = fixture.store.list_events(ctx.instance_id).await.unwrap();
        let attempts: Vec<_> = events
            .iter()
            .filter(|e| {
                e.step_name == "start_api_container"
                    && e.phase == hub_domain::EventPhase::Execute
            })
            .collect();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[2].status, EventStatus::Completed);

        let verify_attempts = events
            .iter()
            .filter(|e| {
                e.step_name == "start_api_container"
                    && e.phase == hub_domain::EventPhase::Verify
            })
            .count();
        assert_eq!(verify_attempts, 1);

        let instance = fixture.store.get_instance(ctx.instance_id).await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Running);
    }
}
