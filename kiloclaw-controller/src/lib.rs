pub mod actor;
pub mod alarm;
pub mod app_controller;
pub mod capacity;
pub mod env_materialize;
pub mod ids;
pub mod instance_controller;
pub mod pairing;
pub mod provider_error;
pub mod recovery;
pub mod registry;
pub mod store;

pub use app_controller::{AppController, AppControllerConfig};
pub use instance_controller::{InstanceController, InstanceControllerConfig, ProvisionOutcome};
pub use registry::{ControllerRegistry, InstanceRegistry, NullInstanceRegistry, RegistryHit};
pub use store::{AppStore, InstanceStore};
