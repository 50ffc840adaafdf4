use std::collections::HashMap;
use std::sync::RwLock;

use kiloclaw_core::models::{AppRecord, InstanceRecord};
use kiloclaw_core::Result;

use super::{AppStore, InstanceStore};

/// In-process store for unit tests, grounded on the same `Arc<RwLock<HashMap>>`
/// registry idiom the teacher uses for its own in-memory resource maps.
#[derive(Default)]
pub struct InMemoryStore {
    apps: RwLock<HashMap<String, AppRecord>>,
    instances: RwLock<HashMap<String, InstanceRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AppStore for InMemoryStore {
    async fn load_app(&self, user_id: &str) -> Result<AppRecord> {
        Ok(self.apps.read().unwrap().get(user_id).cloned().unwrap_or_default())
    }

    async fn save_app(&self, user_id: &str, record: &AppRecord) -> Result<()> {
        self.apps
            .write()
            .unwrap()
            .insert(user_id.to_string(), record.clone());
        Ok(())
    }

    async fn delete_app(&self, user_id: &str) -> Result<()> {
        self.apps.write().unwrap().remove(user_id);
        Ok(())
    }
}

impl InstanceStore for InMemoryStore {
    async fn load_instance(&self, user_id: &str) -> Result<InstanceRecord> {
        Ok(self
            .instances
            .read()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_instance(&self, user_id: &str, record: &InstanceRecord) -> Result<()> {
        self.instances
            .write()
            .unwrap()
            .insert(user_id.to_string(), record.clone());
        Ok(())
    }

    async fn delete_instance(&self, user_id: &str) -> Result<()> {
        self.instances.write().unwrap().remove(user_id);
        Ok(())
    }
}
