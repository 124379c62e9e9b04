use hub_store::StoreError;
use thiserror::Error;

/// Stable step-failure codes. `as_str` values are the event-log vocabulary
/// and must never change for a deployed code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // User-caused or pre-condition violations: fatal for this run.
    ValidationFailed,
    DomainTaken,
    TierLimitExceeded,
    NoWorkerIdsAvailable,

    // Internal state violations: fatal.
    InstanceNotFound,
    InfrastructureNotFound,
    SecretsMissing,
    SecretsIncomplete,

    // Transient or remote failures: retried.
    NetworkCreationFailed,
    ContainerStartFailed,
    DbProvisionFailed,
    DnsProxyFailed,
    MinioProvisionFailed,

    // Post-condition violations: retried.
    NetworkVerifyFailed,
    ContainerNotRunning,
    DbNotFound,
    BucketVerifyFailed,
    DnsVerifyFailed,
    RouteVerifyFailed,
    WorkerIdVerifyFailed,

    // Envelope codes.
    StepException,
    MaxRetriesExceeded,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::DomainTaken => "DOMAIN_TAKEN",
            ErrorCode::TierLimitExceeded => "TIER_LIMIT_EXCEEDED",
            ErrorCode::NoWorkerIdsAvailable => "NO_WORKER_IDS_AVAILABLE",
            ErrorCode::InstanceNotFound => "INSTANCE_NOT_FOUND",
            ErrorCode::InfrastructureNotFound => "INFRASTRUCTURE_NOT_FOUND",
            ErrorCode::SecretsMissing => "SECRETS_MISSING",
            ErrorCode::SecretsIncomplete => "SECRETS_INCOMPLETE",
            ErrorCode::NetworkCreationFailed => "NETWORK_CREATION_FAILED",
            ErrorCode::ContainerStartFailed => "CONTAINER_START_FAILED",
            ErrorCode::DbProvisionFailed => "DB_PROVISION_FAILED",
            ErrorCode::DnsProxyFailed => "DNS_PROXY_FAILED",
            ErrorCode::MinioProvisionFailed => "MINIO_PROVISION_FAILED",
            ErrorCode::NetworkVerifyFailed => "NETWORK_VERIFY_FAILED",
            ErrorCode::ContainerNotRunning => "CONTAINER_NOT_RUNNING",
            ErrorCode::DbNotFound => "DB_NOT_FOUND",
            ErrorCode::BucketVerifyFailed => "BUCKET_VERIFY_FAILED",
            ErrorCode::DnsVerifyFailed => "DNS_VERIFY_FAILED",
            ErrorCode::RouteVerifyFailed => "ROUTE_VERIFY_FAILED",
            ErrorCode::WorkerIdVerifyFailed => "WORKER_ID_VERIFY_FAILED",
            ErrorCode::StepException => "STEP_EXCEPTION",
            ErrorCode::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
        }
    }

    /// Fatal codes abort the run without retrying: retries cannot fix a
    /// taken domain or an exhausted ID space.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorCode::ValidationFailed
                | ErrorCode::DomainTaken
                | ErrorCode::TierLimitExceeded
                | ErrorCode::NoWorkerIdsAvailable
                | ErrorCode::InstanceNotFound
                | ErrorCode::InfrastructureNotFound
                | ErrorCode::SecretsMissing
                | ErrorCode::SecretsIncomplete
        )
    }

    /// HTTP status the enqueuing API surfaces this failure as.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::ValidationFailed | ErrorCode::DomainTaken => 409,
            ErrorCode::TierLimitExceeded => 402,
            ErrorCode::InstanceNotFound => 404,
            ErrorCode::NoWorkerIdsAvailable => 503,
            _ => 500,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A step failure as a value. Steps never panic across the executor
/// boundary; driver and store errors are converted to this before return.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct StepError {
    pub code: ErrorCode,
    pub message: String,
}

impl StepError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// Wrap a driver failure under the step's own code.
    pub fn driver(code: ErrorCode, err: hub_driver::DriverError) -> Self {
        Self { code, message: err.to_string() }
    }
}

impl From<StoreError> for StepError {
    fn from(e: StoreError) -> Self {
        let code = match &e {
            StoreError::InstanceNotFound(_) => ErrorCode::InstanceNotFound,
            StoreError::InfrastructureNotFound(_) => ErrorCode::InfrastructureNotFound,
            StoreError::DomainTaken(_) => ErrorCode::DomainTaken,
            StoreError::WorkerIdsExhausted => ErrorCode::NoWorkerIdsAvailable,
            _ => ErrorCode::StepException,
        };
        Self { code, message: e.to_string() }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("step {step} failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: StepError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("pipeline cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_codes_are_the_precondition_family() {
        assert!(ErrorCode::DomainTaken.is_fatal());
        assert!(ErrorCode::TierLimitExceeded.is_fatal());
        assert!(ErrorCode::SecretsMissing.is_fatal());
        assert!(!ErrorCode::ContainerStartFailed.is_fatal());
        assert!(!ErrorCode::NetworkVerifyFailed.is_fatal());
        assert!(!ErrorCode::StepException.is_fatal());
    }

    #[test]
    fn store_errors_map_to_stable_codes() {
        let e: StepError = StoreError::WorkerIdsExhausted.into();
        assert_eq!(e.code, ErrorCode::NoWorkerIdsAvailable);
        let e: StepError = StoreError::InstanceNotFound(7).into();
        assert_eq!(e.code, ErrorCode::InstanceNotFound);
    }

    #[test]
    fn codes_render_screaming_snake() {
        assert_eq!(ErrorCode::NoWorkerIdsAvailable.as_str(), "NO_WORKER_IDS_AVAILABLE");
        assert_eq!(ErrorCode::MaxRetriesExceeded.as_str(), "MAX_RETRIES_EXCEEDED");
    }
}
