pub mod error;
pub mod memory;
pub mod postgres_store;
pub mod state;
pub mod store;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use postgres_store::PostgresStore;
pub use state::{
    FederationToken, InstanceBilling, InstanceConfig, InstanceInfrastructure, ManagedInstance,
    ProvisioningEvent, WorkerIdEntry,
};
pub use store::StateStore;
