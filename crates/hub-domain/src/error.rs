use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid subdomain: {0}")]
    InvalidSubdomain(String),

    #[error("invalid worker id: {0} (must be 0..=1023)")]
    InvalidWorkerId(u16),

    #[error("invalid instance status: {0}")]
    InvalidStatus(String),

    #[error("invalid tier value: {0}")]
    InvalidTier(String),
}
