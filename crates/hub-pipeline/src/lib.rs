pub mod destroy;
pub mod error;
pub mod executor;
pub mod federation;
pub mod instance_config;
pub mod metrics;
pub mod provision;
pub mod reconciler;
pub mod secrets;
pub mod step;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

pub use destroy::destruction_steps;
pub use error::{ErrorCode, PipelineError, StepError};
pub use executor::{PipelineExecutor, PipelineKind, Sleeper, TokioSleeper, MAX_RETRIES};
pub use federation::redeem_bootstrap_token;
pub use provision::provisioning_steps;
pub use reconciler::Reconciler;
pub use step::{Step, StepCtx, StepTimings};
pub use worker::WorkerLoop;
