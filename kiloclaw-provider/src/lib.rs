pub mod apps;
pub mod client;
pub mod config;
pub mod error;
pub mod exec;
pub mod ips;
pub mod machines;
pub mod models;
pub mod secrets;
pub mod volumes;

pub use client::ProviderClient;
pub use config::ProviderConfig;
pub use error::{insufficient_resources, not_found, ClientError, ProviderError};
