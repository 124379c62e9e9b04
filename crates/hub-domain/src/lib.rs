pub mod error;
pub mod snowflake;
pub mod tier;
pub mod types;

mod tests;

pub use error::DomainError;
pub use snowflake::{Snowflake, INFRA_WORKER_ID_MAX, WORKER_ID_MAX, WORKER_ID_MIN};
pub use tier::{BillingStatus, FeatureTier, ResourceLimits, TierProfile, UserCountTier};
pub use types::{
    validate_subdomain, EventPhase, EventStatus, InstanceId, InstanceStatus, OwnerId,
};
