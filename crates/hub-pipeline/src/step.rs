use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hub_config::{HubConfig, Kek};
use hub_domain::{InstanceId, Snowflake};
use hub_driver::Drivers;
use hub_store::{InstanceInfrastructure, ManagedInstance, StateStore};

use tokio_util::sync::CancellationToken;

use crate::error::{ErrorCode, StepError};

/// Timeouts the concrete steps poll and wait with. Tests shrink these to
/// near zero.
#[derive(Debug, Clone, Copy)]
pub struct StepTimings {
    /// Interval between container-readiness inspect polls.
    pub container_poll_interval: Duration,
    /// Total budget for the container-readiness poll.
    pub container_poll_budget: Duration,
    /// Grace period after the shutdown notice before stopping the container.
    pub shutdown_grace: Duration,
}

impl Default for StepTimings {
    fn default() -> Self {
        Self {
            container_poll_interval: Duration::from_secs(2),
            container_poll_budget: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl StepTimings {
    /// Zeroed timings for tests.
    pub fn immediate() -> Self {
        Self {
            container_poll_interval: Duration::from_millis(1),
            container_poll_budget: Duration::from_millis(5),
            shutdown_grace: Duration::ZERO,
        }
    }
}

/// Everything a step needs: the target instance plus the shared store,
/// drivers, configuration, KEK, and ID generator.
#[derive(Clone)]
pub struct StepCtx {
    pub instance_id: InstanceId,
    pub store: Arc<dyn StateStore>,
    pub drivers: Drivers,
    pub config: Arc<HubConfig>,
    pub kek: Arc<Kek>,
    pub ids: Arc<Snowflake>,
    pub timings: StepTimings,
}

impl StepCtx {
    /// The instance row, or `INSTANCE_NOT_FOUND`.
    pub async fn instance(&self) -> Result<ManagedInstance, StepError> {
        self.store
            .get_instance(self.instance_id)
            .await?
            .ok_or_else(|| {
                StepError::new(
                    ErrorCode::InstanceNotFound,
                    format!("instance {} not found", self.instance_id),
                )
            })
    }

    /// The infrastructure row, or `INFRASTRUCTURE_NOT_FOUND`.
    pub async fn infrastructure(&self) -> Result<InstanceInfrastructure, StepError> {
        self.store
            .get_infrastructure(self.instance_id)
            .await?
            .ok_or_else(|| {
                StepError::new(
                    ErrorCode::InfrastructureNotFound,
                    format!("no infrastructure row for instance {}", self.instance_id),
                )
            })
    }
}

/// One unit of pipeline work: a named `(execute, verify)` pair.
///
/// `name` is the event-log key and must never change for a deployed step.
/// `execute` must be idempotent, either by checking the database for prior
/// completion or by calling a driver operation that is itself idempotent.
/// `verify` is a cheap read-only post-condition probe; success authorizes
/// the executor to advance.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &StepCtx, cancel: &CancellationToken) -> Result<(), StepError>;

    /// Steps with purely in-database effects keep this default.
    async fn verify(&self, _ctx: &StepCtx, _cancel: &CancellationToken) -> Result<(), StepError> {
        Ok(())
    }
}
