use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("instance not found: {0}")]
    InstanceNotFound(i64),

    #[error("infrastructure not found for instance: {0}")]
    InfrastructureNotFound(i64),

    #[error("event not found: {0}")]
    EventNotFound(i64),

    #[error("domain already taken: {0}")]
    DomainTaken(String),

    #[error("worker id space exhausted")]
    WorkerIdsExhausted,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}
