use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec,
};

lazy_static! {
    /// One increment per step phase attempt, labelled by outcome.
    pub static ref STEP_COUNTER: CounterVec = register_counter_vec!(
        "hub_pipeline_step_total",
        "Step phase attempts by (step, phase, outcome).",
        &["step", "phase", "outcome"]
    )
    .unwrap();

    /// Wall time of a successful pipeline run.
    pub static ref PIPELINE_DURATION: HistogramVec = register_histogram_vec!(
        "hub_pipeline_duration_seconds",
        "Duration of completed pipeline runs.",
        &["pipeline"]
    )
    .unwrap();

    /// Incremented every time an instance falls back to root object-store
    /// credentials. A non-zero value means tenant isolation is degraded.
    pub static ref ROOT_FALLBACK_COUNTER: Counter = register_counter!(
        "hub_object_store_root_fallback_total",
        "Instances provisioned with root object-store credentials."
    )
    .unwrap();

    /// Reconciler divergence detections by step.
    pub static ref RECONCILE_DIVERGENCE_COUNTER: CounterVec = register_counter_vec!(
        "hub_reconcile_divergence_total",
        "Verify-phase divergences found by the reconciler.",
        &["step"]
    )
    .unwrap();
}

/// Record one step phase attempt.
pub fn observe_step(step: &str, phase: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    STEP_COUNTER.with_label_values(&[step, phase, outcome]).inc();
}
