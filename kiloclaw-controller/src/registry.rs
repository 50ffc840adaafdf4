//! External relational registry used only as a restore-from-catastrophic-loss
//! fallback (spec §4.3.9). The registry itself is an out-of-scope external
//! collaborator; this crate depends only on the narrow trait boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

/// What the registry knows about a user's instance — deliberately thin, since
/// Fly identifiers "are not in the registry" per spec §4.3.9.
#[derive(Debug, Clone)]
pub struct RegistryHit {
    pub app_name: Option<String>,
}

pub trait InstanceRegistry: Send + Sync {
    fn lookup_active_instance(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = kiloclaw_core::Result<Option<RegistryHit>>> + Send;
}

/// Fails open with "nothing to restore from" — used when no external
/// registry is wired up. The registry is a fallback, never the authority, so
/// its absence must never block normal operation (spec §4.3.9: "the reader,
/// never the authority").
#[derive(Debug, Clone, Default)]
pub struct NullInstanceRegistry;

impl InstanceRegistry for NullInstanceRegistry {
    async fn lookup_active_instance(
        &self,
        _user_id: &str,
    ) -> kiloclaw_core::Result<Option<RegistryHit>> {
        Ok(None)
    }
}

/// Per-user controller lookup, shared by `AppController` and
/// `InstanceController` callers: lazily builds and caches one controller
/// instance per `user_id`, keyed the same way the teacher keys its in-memory
/// resource maps.
pub struct ControllerRegistry<T> {
    controllers: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Default for ControllerRegistry<T> {
    fn default() -> Self {
        Self {
            controllers: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> ControllerRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert_with(&self, user_id: &str, make: impl FnOnce() -> T) -> Arc<T> {
        if let Some(existing) = self.controllers.read().unwrap().get(user_id) {
            return Arc::clone(existing);
        }
        let mut write = self.controllers.write().unwrap();
        if let Some(existing) = write.get(user_id) {
            return Arc::clone(existing);
        }
        let controller = Arc::new(make());
        write.insert(user_id.to_string(), Arc::clone(&controller));
        controller
    }
}
