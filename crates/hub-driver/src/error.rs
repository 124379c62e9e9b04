use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    /// Transport-level failure: connect refused, timeout, TLS.
    #[error("request to {endpoint} failed: {message}")]
    RequestFailed { endpoint: String, message: String },

    /// The remote API answered with an error status.
    #[error("{endpoint} returned {status}: {message}")]
    Api {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("internal driver error: {0}")]
    Internal(String),
}

impl DriverError {
    pub fn api(endpoint: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        DriverError::Api { endpoint: endpoint.into(), status, message: message.into() }
    }

    pub fn request(endpoint: &str, err: &reqwest::Error) -> Self {
        DriverError::RequestFailed { endpoint: endpoint.to_string(), message: err.to_string() }
    }

    /// The remote target was absent. All `remove_*` operations treat this
    /// as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::Api { status: 404, .. })
    }
}
