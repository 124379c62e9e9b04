use std::sync::Arc;
use std::time::Duration;

use hub_config::{HubConfig, Kek};
use hub_domain::{InstanceStatus, Snowflake};
use hub_driver::Drivers;
use hub_store::StateStore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::destroy::destruction_steps;
use crate::error::PipelineError;
use crate::executor::{PipelineExecutor, PipelineKind};
use crate::provision::provisioning_steps;
use crate::step::{StepCtx, StepTimings};

/// The long-lived dequeue-and-dispatch loop. One worker per host; the
/// status field is the lock, so a dequeued instance is never picked up by
/// a second pipeline.
pub struct WorkerLoop {
    store: Arc<dyn StateStore>,
    drivers: Drivers,
    config: Arc<HubConfig>,
    kek: Arc<Kek>,
    ids: Arc<Snowflake>,
    executor: PipelineExecutor,
    timings: StepTimings,
}

impl WorkerLoop {
    pub fn new(
        store: Arc<dyn StateStore>,
        drivers: Drivers,
        config: Arc<HubConfig>,
        kek: Arc<Kek>,
        ids: Arc<Snowflake>,
    ) -> Self {
        Self {
            store,
            drivers,
            config,
            kek,
            ids,
            executor: PipelineExecutor::new(),
            timings: StepTimings::default(),
        }
    }

    #[cfg(test)]
    fn with_timings(mut self, timings: StepTimings) -> Self {
        self.timings = timings;
        self
    }

    #[cfg(test)]
    fn with_executor(mut self, executor: PipelineExecutor) -> Self {
        self.executor = executor;
        self
    }

    fn ctx_for(&self, instance_id: hub_domain::InstanceId) -> StepCtx {
        StepCtx {
            instance_id,
            store: self.store.clone(),
            drivers: self.drivers.clone(),
            config: self.config.clone(),
            kek: self.kek.clone(),
            ids: self.ids.clone(),
            timings: self.timings,
        }
    }

    /// Run until cancelled. Steady-state errors are logged, never fatal.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("worker loop started");
        let poll = Duration::from_secs(self.config.worker_poll_secs);
        loop {
            if cancel.is_cancelled() {
                info!("worker loop stopping");
                return;
            }
            match self.process_next(&cancel).await {
                Ok(true) => {} // there may be more queued work; no sleep
                Ok(false) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(poll) => {}
                    }
                }
                Err(PipelineError::Cancelled) => return,
                Err(e) => {
                    error!(error = %e, "worker iteration failed");
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(poll) => {}
                    }
                }
            }
        }
    }

    /// Dequeue and run at most one pipeline. Returns whether work was done.
    pub async fn process_next(&self, cancel: &CancellationToken) -> Result<bool, PipelineError> {
        // Teardowns first: they free worker IDs and host resources.
        if let Some(instance) = self.store.dequeue_next(InstanceStatus::Destroying).await? {
            info!(instance_id = %instance.id, domain = %instance.domain, "destroying instance");
            let ctx = self.ctx_for(instance.id);
            self.executor
                .run(PipelineKind::Destroy, &destruction_steps(), &ctx, cancel)
                .await?;
            return Ok(true);
        }

        if let Some(instance) = self.store.dequeue_next(InstanceStatus::Provisioning).await? {
            info!(instance_id = %instance.id, domain = %instance.domain, "provisioning instance");
            let ctx = self.ctx_for(instance.id);
            match self
                .executor
                .run(PipelineKind::Provision, &provisioning_steps(), &ctx, cancel)
                .await
            {
                Ok(()) => {}
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                // The executor already marked the instance Failed; the
                // event log has the details. The worker moves on.
                Err(e) => warn!(instance_id = %instance.id, error = %e, "provisioning failed"),
            }
            return Ok(true);
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_config, test_instance};
    use hub_domain::{InstanceId, OwnerId};
    use hub_driver::StubSet;
    use hub_store::InMemoryStore;

    fn worker(store: Arc<InMemoryStore>, stubs: &StubSet) -> WorkerLoop {
        WorkerLoop::new(
            store,
            stubs.drivers(),
            Arc::new(test_config()),
            Arc::new(Kek::from_bytes(&[7u8; 32]).unwrap()),
            Arc::new(Snowflake::new(1).unwrap()),
        )
        .with_timings(StepTimings::immediate())
        .with_executor(PipelineExecutor::with_sleeper(Arc::new(
            crate::testutil::RecordingSleeper::default(),
        )))
    }

    #[tokio::test]
    async fn processes_queued_provisioning_instance() {
        let store = Arc::new(InMemoryStore::new());
        let stubs = StubSet::new();
        let instance = test_instance(InstanceId::new(1), "acme.example.com", OwnerId::new(7));
        store.insert_instance(&instance).await.unwrap();
        store
            .upsert_billing(&crate::testutil::test_billing(instance.id))
            .await
            .unwrap();

        let worker = worker(store.clone(), &stubs);
        let cancel = CancellationToken::new();
        assert!(worker.process_next(&cancel).await.unwrap());

        let done = store.get_instance(instance.id).await.unwrap().unwrap();
        assert_eq!(done.status, InstanceStatus::Running);

        // Queue is now empty.
        assert!(!worker.process_next(&cancel).await.unwrap());
    }

    #[tokio::test]
    async fn destruction_takes_priority_over_provisioning() {
        let store = Arc::new(InMemoryStore::new());
        let stubs = StubSet::new();

        let provisioning =
            test_instance(InstanceId::new(1), "new.example.com", OwnerId::new(7));
        store.insert_instance(&provisioning).await.unwrap();

        let mut doomed = test_instance(InstanceId::new(2), "old.example.com", OwnerId::new(7));
        doomed.status = InstanceStatus::Destroying;
        store.insert_instance(&doomed).await.unwrap();

        let worker = worker(store.clone(), &stubs);
        worker.process_next(&CancellationToken::new()).await.unwrap();

        let gone = store.get_instance(doomed.id).await.unwrap().unwrap();
        assert_eq!(gone.status, InstanceStatus::Destroyed);
        let waiting = store.get_instance(provisioning.id).await.unwrap().unwrap();
        assert_eq!(waiting.status, InstanceStatus::Provisioning);
    }

    #[tokio::test]
    async fn failed_provisioning_does_not_stop_the_worker() {
        let store = Arc::new(InMemoryStore::new());
        let stubs = StubSet::new();
        stubs.fail_next("create_network", 99);

        let instance = test_instance(InstanceId::new(1), "acme.example.com", OwnerId::new(7));
        store.insert_instance(&instance).await.unwrap();

        let worker = worker(store.clone(), &stubs);
        // Returns Ok(true): the failure landed in the event log, not here.
        assert!(worker.process_next(&CancellationToken::new()).await.unwrap());

        let failed = store.get_instance(instance.id).await.unwrap().unwrap();
        assert_eq!(failed.status, InstanceStatus::Failed);
    }
}
