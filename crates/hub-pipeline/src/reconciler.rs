use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hub_config::HubConfig;
use hub_domain::{EventPhase, EventStatus, InstanceStatus, Snowflake};
use hub_driver::Drivers;
use hub_store::{ProvisioningEvent, StateStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::metrics;
use crate::provision::provisioning_steps;

/// Periodic drift check over Running instances: re-runs the cheap verify
/// probes (container running, proxy route present, DNS record present) and
/// re-enqueues diverged instances.
///
/// Re-enqueue mechanics: "already applied" is judged per phase by the
/// latest terminal event, so appending a Failed verify event for the
/// diverged step and every later step makes the resume scan land exactly
/// on the diverged step. The steps are idempotent, so re-running the tail
/// is safe. Not on the critical path.
pub struct Reconciler {
    store: Arc<dyn StateStore>,
    drivers: Drivers,
    config: Arc<HubConfig>,
    ids: Arc<Snowflake>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn StateStore>,
        drivers: Drivers,
        config: Arc<HubConfig>,
        ids: Arc<Snowflake>,
    ) -> Self {
        Self { store, drivers, config, ids }
    }

    /// Run until cancelled, scanning every `reconcile_interval_secs`.
    pub async fn run(&self, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.config.reconcile_interval_secs);
        info!(interval_secs = interval.as_secs(), "reconciler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("reconciler stopping");
                    return;
                }
                _ = tokio::time::sleep(interval) => {
                    match self.run_once().await {
                        Ok(0) => {}
                        Ok(n) => info!(diverged = n, "reconciler re-enqueued instances"),
                        Err(e) => warn!(error = %e, "reconcile pass failed"),
                    }
                }
            }
        }
    }

    /// One scan. Returns the number of re-enqueued instances.
    pub async fn run_once(&self) -> Result<u32, PipelineError> {
        let running = self.store.list_instances_by_status(InstanceStatus::Running).await?;
        let mut diverged_count = 0;

        for instance in running {
            let Some(infra) = self.store.get_infrastructure(instance.id).await? else {
                warn!(instance_id = %instance.id, "running instance has no infrastructure row");
                continue;
            };

            let diverged_step = self.find_divergence(&instance, &infra).await;
            if let Some(step_name) = diverged_step {
                warn!(
                    instance_id = %instance.id,
                    domain = %instance.domain,
                    step = step_name,
                    "drift detected, re-enqueueing"
                );
                metrics::RECONCILE_DIVERGENCE_COUNTER
                    .with_label_values(&[step_name])
                    .inc();
                self.invalidate_from(instance.id, step_name).await?;
                self.store
                    .update_instance_status(instance.id, InstanceStatus::Provisioning)
                    .await?;
                diverged_count += 1;
            }
        }
        Ok(diverged_count)
    }

    /// Earliest diverged step in pipeline order, if any.
    async fn find_divergence(
        &self,
        instance: &hub_store::ManagedInstance,
        infra: &hub_store::InstanceInfrastructure,
    ) -> Option<&'static str> {
        let container_ok = match infra.container_id.as_deref() {
            Some(id) => self.drivers.engine.container_running(id).await.unwrap_or(false),
            None => false,
        };
        if !container_ok {
            return Some("start_api_container");
        }

        let route_ok = match infra.proxy_route_id.as_deref() {
            Some(id) => self.drivers.proxy.verify_route(id).await.unwrap_or(false),
            None => false,
        };
        let record_ok = self
            .drivers
            .dns
            .verify_a_record(instance.subdomain())
            .await
            .unwrap_or(false);
        if !route_ok || !record_ok {
            return Some("configure_dns_and_proxy");
        }
        None
    }

    /// Append Failed verify markers for `from_step` and everything after it
    /// so the executor's resume scan re-runs that tail.
    async fn invalidate_from(
        &self,
        instance_id: hub_domain::InstanceId,
        from_step: &str,
    ) -> Result<(), PipelineError> {
        let names: Vec<&'static str> = provisioning_steps()
            .iter()
            .map(|s| s.name())
            .skip_while(|name| *name != from_step)
            .collect();
        let now = Utc::now();
        for name in names {
            self.store
                .append_event(&ProvisioningEvent {
                    id: self.ids.next_id(),
                    instance_id,
                    step_name: name.to_string(),
                    phase: EventPhase::Verify,
                    status: EventStatus::Failed,
                    error_message: Some("reconciler: post-condition no longer holds".to_string()),
                    started_at: now,
                    completed_at: Some(now),
                })
                .await?;
        }
        Ok(())
    }
}
