use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use hub_domain::{EventPhase, EventStatus, InstanceStatus};
use hub_store::{ProvisioningEvent, StateStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ErrorCode, PipelineError, StepError};
use crate::metrics;
use crate::step::{Step, StepCtx};

/// Attempts per step phase before the failure becomes terminal.
pub const MAX_RETRIES: u32 = 3;

/// Backoff between attempts. Not jittered: each instance is processed by
/// one worker, so there is no thundering herd to spread.
pub const BACKOFF: [Duration; 3] = [
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(20),
];

/// Which pipeline the executor is driving; decides failure policy and the
/// terminal status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Provision,
    Destroy,
}

impl PipelineKind {
    fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Provision => "provision",
            PipelineKind::Destroy => "destroy",
        }
    }
}

/// Injectable sleep so tests record backoff delays instead of serving them.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Drives a fixed ordered step list for a single instance: resume from the
/// event log, retry with backoff, write per-attempt events, and apply the
/// terminal status transition.
pub struct PipelineExecutor {
    sleeper: Arc<dyn Sleeper>,
}

impl Default for PipelineExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineExecutor {
    pub fn new() -> Self {
        Self { sleeper: Arc::new(TokioSleeper) }
    }

    pub fn with_sleeper(sleeper: Arc<dyn Sleeper>) -> Self {
        Self { sleeper }
    }

    /// Run `steps` for the instance in `ctx`.
    ///
    /// Provisioning: the first terminal step failure marks the instance
    /// `Failed` and is returned. Destruction: every failure is logged and
    /// the pipeline continues; finalization always runs.
    pub async fn run(
        &self,
        kind: PipelineKind,
        steps: &[Arc<dyn Step>],
        ctx: &StepCtx,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        // A missing row means the enqueue was bogus; touch nothing.
        if ctx.store.get_instance(ctx.instance_id).await?.is_none() {
            return Err(PipelineError::Step {
                step: "load_instance",
                source: StepError::new(
                    ErrorCode::InstanceNotFound,
                    format!("instance {} not found", ctx.instance_id),
                ),
            });
        }

        let events = ctx.store.list_events(ctx.instance_id).await?;
        let start_index = resume_index(steps, &events);
        if start_index > 0 {
            info!(
                instance_id = %ctx.instance_id,
                pipeline = kind.as_str(),
                resume_at = steps.get(start_index).map(|s| s.name()).unwrap_or("end"),
                "resuming from event log"
            );
        }

        let started = Instant::now();

        for step in &steps[start_index..] {
            for phase in [EventPhase::Execute, EventPhase::Verify] {
                match self.run_phase(step.as_ref(), phase, ctx, cancel).await {
                    Ok(()) => {}
                    Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                    Err(err) => match kind {
                        PipelineKind::Provision => {
                            ctx.store
                                .update_instance_status(ctx.instance_id, InstanceStatus::Failed)
                                .await?;
                            warn!(
                                instance_id = %ctx.instance_id,
                                step = step.name(),
                                phase = phase.as_str(),
                                error = %err,
                                "provisioning failed"
                            );
                            return Err(err);
                        }
                        PipelineKind::Destroy => {
                            // Best-effort: the failure is in the event log;
                            // keep tearing down whatever remains.
                            warn!(
                                instance_id = %ctx.instance_id,
                                step = step.name(),
                                phase = phase.as_str(),
                                error = %err,
                                "destruction step failed, continuing"
                            );
                            break; // skip the verify phase of a failed execute
                        }
                    },
                }
            }
        }

        self.finalize(kind, ctx).await?;
        metrics::PIPELINE_DURATION
            .with_label_values(&[kind.as_str()])
            .observe(started.elapsed().as_secs_f64());
        Ok(())
    }

    /// One phase of one step: up to MAX_RETRIES attempts, one event row per
    /// attempt, backoff between attempts, fatal codes short-circuiting.
    async fn run_phase(
        &self,
        step: &dyn Step,
        phase: EventPhase,
        ctx: &StepCtx,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let mut attempt: u32 = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let event_id = ctx.ids.next_id();
            ctx.store
                .append_event(&ProvisioningEvent {
                    id: event_id,
                    instance_id: ctx.instance_id,
                    step_name: step.name().to_string(),
                    phase,
                    status: EventStatus::InProgress,
                    error_message: None,
                    started_at: Utc::now(),
                    completed_at: None,
                })
                .await?;

            let outcome = self.invoke(step, phase, ctx, cancel).await;

            match outcome {
                Ok(()) => {
                    ctx.store
                        .complete_event(event_id, EventStatus::Completed, None, Utc::now())
                        .await?;
                    metrics::observe_step(step.name(), phase.as_str(), true);
                    debug!(step = step.name(), phase = phase.as_str(), attempt, "phase completed");
                    return Ok(());
                }
                Err(err) => {
                    ctx.store
                        .complete_event(
                            event_id,
                            EventStatus::Failed,
                            Some(err.to_string()),
                            Utc::now(),
                        )
                        .await?;
                    metrics::observe_step(step.name(), phase.as_str(), false);

                    if err.code.is_fatal() {
                        return Err(PipelineError::Step { step: step.name(), source: err });
                    }
                    if attempt >= MAX_RETRIES {
                        return Err(PipelineError::Step {
                            step: step.name(),
                            source: StepError::new(
                                ErrorCode::MaxRetriesExceeded,
                                format!(
                                    "{}/{} failed after {} attempts: {}",
                                    step.name(),
                                    phase.as_str(),
                                    MAX_RETRIES,
                                    err
                                ),
                            ),
                        });
                    }
                    warn!(
                        step = step.name(),
                        phase = phase.as_str(),
                        attempt,
                        error = %err,
                        "phase attempt failed, backing off"
                    );
                    self.sleeper.sleep(BACKOFF[(attempt - 1) as usize]).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Invoke one phase, converting panics into STEP_EXCEPTION values.
    async fn invoke(
        &self,
        step: &dyn Step,
        phase: EventPhase,
        ctx: &StepCtx,
        cancel: &CancellationToken,
    ) -> Result<(), StepError> {
        let fut = async {
            match phase {
                EventPhase::Execute => step.execute(ctx, cancel).await,
                EventPhase::Verify => step.verify(ctx, cancel).await,
            }
        };
        match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic in step".to_string());
                Err(StepError::new(ErrorCode::StepException, message))
            }
        }
    }

    async fn finalize(&self, kind: PipelineKind, ctx: &StepCtx) -> Result<(), PipelineError> {
        match kind {
            // ActivateInstance normally flips the status; repeating the
            // write here keeps a resumed run whose activate step was
            // already applied from stalling in Provisioning.
            PipelineKind::Provision => {
                ctx.store
                    .update_instance_status(ctx.instance_id, InstanceStatus::Running)
                    .await?;
                Ok(())
            }
            PipelineKind::Destroy => {
                ctx.store.tombstone_worker_id(ctx.instance_id).await?;
                ctx.store.delete_infrastructure(ctx.instance_id).await?;
                ctx.store.mark_instance_destroyed(ctx.instance_id).await?;
                info!(instance_id = %ctx.instance_id, "instance destroyed");
                Ok(())
            }
        }
    }
}

// ── Resume oracle ─────────────────────────────────────────────────────────────

/// Index of the first step to run, per the event log.
///
/// A step is "already applied" iff the latest non-InProgress event of each
/// phase is Completed, last-write-wins by completed_at then id: an early
/// Failed followed by a Completed pair means the step is past. Execution
/// starts immediately after the latest applied step in pipeline order.
pub fn resume_index(steps: &[Arc<dyn Step>], events: &[ProvisioningEvent]) -> usize {
    // Latest terminal event per (step, phase).
    let mut latest: HashMap<(&str, EventPhase), &ProvisioningEvent> = HashMap::new();
    for event in events {
        if event.status == EventStatus::InProgress {
            continue; // crash leftover; the attempt never finished
        }
        let key = (event.step_name.as_str(), event.phase);
        let newer = match latest.get(&key) {
            Some(existing) => {
                (event.completed_at, event.id) > (existing.completed_at, existing.id)
            }
            None => true,
        };
        if newer {
            latest.insert(key, event);
        }
    }

    let applied = |name: &str| -> bool {
        [EventPhase::Execute, EventPhase::Verify].iter().all(|phase| {
            latest
                .get(&(name, *phase))
                .map(|e| e.status == EventStatus::Completed)
                .unwrap_or(false)
        })
    };

    let mut index = 0;
    for (i, step) in steps.iter().enumerate() {
        if applied(step.name()) {
            index = i + 1;
        }
    }
    index
}
