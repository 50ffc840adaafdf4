use serde::{Deserialize, Serialize};

use super::instance::{InstanceRecord, InstanceStatus};

/// Low-latency read model returned by `getStatus` / `GET /api/platform/status`.
/// Spec §6 `StatusView`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusView {
    pub user_id: String,
    pub sandbox_id: String,
    pub status: InstanceStatus,
    pub provisioned_at: Option<i64>,
    pub last_started_at: Option<i64>,
    pub last_stopped_at: Option<i64>,
    pub env_var_count: usize,
    pub secret_count: usize,
    pub channel_count: usize,
    pub fly_app_name: Option<String>,
    pub fly_machine_id: Option<String>,
    pub fly_volume_id: Option<String>,
    pub fly_region: Option<String>,
}

impl StatusView {
    pub fn from_record(record: &InstanceRecord) -> Option<Self> {
        let user_id = record.user_id.clone()?;
        let sandbox_id = record.sandbox_id.clone()?;
        Some(Self {
            user_id,
            sandbox_id,
            status: record.status,
            provisioned_at: record.provisioned_at,
            last_started_at: record.last_started_at,
            last_stopped_at: record.last_stopped_at,
            env_var_count: record.env_vars.as_ref().map(|m| m.len()).unwrap_or(0),
            secret_count: record.encrypted_secrets.as_ref().map(|m| m.len()).unwrap_or(0),
            channel_count: record.channels.as_ref().map(|m| m.len()).unwrap_or(0),
            fly_app_name: record.fly_app_name.clone(),
            fly_machine_id: record.fly_machine_id.clone(),
            fly_volume_id: record.fly_volume_id.clone(),
            fly_region: record.fly_region.clone(),
        })
    }
}
