pub mod dns;
pub mod docker;
pub mod driver;
pub mod error;
pub mod maintenance;
pub mod notifier;
pub mod objectstore;
pub mod proxy;
pub mod stub;

pub use dns::HttpDnsProvider;
pub use docker::{container_hostname, DockerEngine};
pub use driver::{
    BucketProvision, ContainerEngine, ContainerSpec, DatabaseProvisioner, DnsProvider, Drivers,
    InstanceNotifier, ObjectStoreManager, ReverseProxyManager,
};
pub use error::DriverError;
pub use maintenance::PgDatabaseProvisioner;
pub use notifier::HttpInstanceNotifier;
pub use objectstore::MinioObjectStore;
pub use proxy::CaddyProxyManager;
pub use stub::{
    StubDatabase, StubDns, StubEngine, StubNotifier, StubObjectStore, StubProxy, StubSet,
};
