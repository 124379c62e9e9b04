pub mod error;
pub mod kek;
pub mod loader;
pub mod raw;

pub use error::ConfigError;
pub use kek::Kek;
pub use loader::{EmailConfig, HubConfig, ObjectStoreConfig, RateLimitConfig};
