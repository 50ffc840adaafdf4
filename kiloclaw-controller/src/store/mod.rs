pub mod memory;
pub mod sqlite;

use kiloclaw_core::models::{AppRecord, InstanceRecord};
use kiloclaw_core::Result;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Persistence for per-user `AppRecord`s. A missing row returns
/// `AppRecord::default()` (an empty record with `user_id: None`) rather than
/// an error — callers check `user_id.is_none()` the same way whether the row
/// never existed or was wiped (spec §6: schema uses defaults, a fresh record
/// is the fail-safe outcome).
pub trait AppStore: Send + Sync {
    fn load_app(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<AppRecord>> + Send;

    fn save_app(
        &self,
        user_id: &str,
        record: &AppRecord,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn delete_app(&self, user_id: &str) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Persistence for per-user `InstanceRecord`s. Same empty-record-on-miss
/// contract as `AppStore`.
pub trait InstanceStore: Send + Sync {
    fn load_instance(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<InstanceRecord>> + Send;

    fn save_instance(
        &self,
        user_id: &str,
        record: &InstanceRecord,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn delete_instance(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}
