//! Platform HTTP API request/response shapes (spec §6 "External interfaces").
//! Deliberately distinct from `InstanceRecord`/`InstanceConfig`: the wire
//! format is camelCase JSON and may evolve independently of the
//! controller-local persisted schema.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::instance::{ChannelKind, InstanceConfig, MachineSize, SecretEnvelope};
use super::status::StatusView;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    pub user_id: String,
    #[serde(default)]
    pub env_vars: Option<HashMap<String, String>>,
    #[serde(default)]
    pub encrypted_secrets: Option<HashMap<String, SecretEnvelope>>,
    #[serde(default)]
    pub channels: Option<HashMap<ChannelKind, SecretEnvelope>>,
    #[serde(default)]
    pub kilocode_api_key: Option<String>,
    #[serde(default)]
    pub kilocode_default_model: Option<String>,
    #[serde(default)]
    pub kilocode_models: Option<Vec<String>>,
    #[serde(default)]
    pub machine_size: Option<MachineSize>,
    #[serde(default)]
    pub region: Option<String>,
}

impl ProvisionRequest {
    pub fn into_config(self) -> InstanceConfig {
        InstanceConfig {
            env_vars: self.env_vars,
            encrypted_secrets: self.encrypted_secrets,
            channels: self.channels,
            kilocode_api_key: self.kilocode_api_key,
            kilocode_default_model: self.kilocode_default_model,
            kilocode_models: self.kilocode_models,
            machine_size: self.machine_size,
            region: self.region,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionResponse {
    pub sandbox_id: String,
}

/// Body shape shared by `start`, `stop`, `destroy`, and the pairing `list` op.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserScopedRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub user_id: String,
    pub sandbox_id: String,
    pub status: super::instance::InstanceStatus,
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

impl From<StatusView> for StatusResponse {
    fn from(view: StatusView) -> Self {
        Self {
            user_id: view.user_id,
            sandbox_id: view.sandbox_id,
            status: view.status,
            provisioned_at: view.provisioned_at,
            last_started_at: view.last_started_at,
            last_stopped_at: view.last_stopped_at,
            env_var_count: view.env_var_count,
            secret_count: view.secret_count,
            channel_count: view.channel_count,
            fly_app_name: view.fly_app_name,
            fly_machine_id: view.fly_machine_id,
            fly_volume_id: view.fly_volume_id,
            fly_region: view.fly_region,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingApproveRequest {
    pub user_id: String,
    pub channel: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingListResponse {
    pub result: String,
}
