use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// State machine position (spec §3 Lifecycle table). No transition leaves
/// `Destroying` other than deletion of the whole record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Provisioned,
    Running,
    Stopped,
    Destroying,
}

/// Requested guest spec for a machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineSize {
    pub cpus: u32,
    pub memory_mb: u32,
    pub cpu_kind: String,
}

impl Default for MachineSize {
    fn default() -> Self {
        Self {
            cpus: crate::constants::DEFAULT_MACHINE_CPUS,
            memory_mb: crate::constants::DEFAULT_MACHINE_MEMORY_MB,
            cpu_kind: crate::constants::DEFAULT_MACHINE_CPU_KIND.to_string(),
        }
    }
}

/// Opaque envelope carrying an RSA-OAEP-wrapped AES data key plus an
/// AES-256-GCM ciphertext. The cryptographic primitives that unwrap this are
/// an external collaborator (spec §1); the controller only ever touches this
/// struct and the `kiloclaw_crypto::SecretEnvelopeDecryptor` trait.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecretEnvelope {
    /// Base64 RSA-OAEP ciphertext of the random AES-256 data key.
    pub encrypted_key: String,
    /// Base64 12-byte IV used for the AES-256-GCM payload encryption.
    pub iv: String,
    /// Base64 AES-256-GCM ciphertext (tag appended, 16 bytes).
    pub ciphertext: String,
}

/// The four chat-bot channels whose tokens get fixed env-var names.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Telegram,
    Discord,
    SlackBot,
    SlackApp,
}

impl ChannelKind {
    pub fn env_var_name(self) -> &'static str {
        match self {
            ChannelKind::Telegram => crate::constants::CHANNEL_ENV_TELEGRAM,
            ChannelKind::Discord => crate::constants::CHANNEL_ENV_DISCORD,
            ChannelKind::SlackBot => crate::constants::CHANNEL_ENV_SLACK_BOT,
            ChannelKind::SlackApp => crate::constants::CHANNEL_ENV_SLACK_APP,
        }
    }
}

/// Per-user instance record, owned exclusively by the Instance Controller.
/// Field-for-field mapping of spec §3 "Instance record".
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct InstanceRecord {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub sandbox_id: Option<String>,
    #[serde(default)]
    pub status: InstanceStatus,

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
    pub provisioned_at: Option<i64>,
    #[serde(default)]
    pub last_started_at: Option<i64>,
    #[serde(default)]
    pub last_stopped_at: Option<i64>,

    #[serde(default)]
    pub fly_app_name: Option<String>,
    #[serde(default)]
    pub fly_machine_id: Option<String>,
    #[serde(default)]
    pub fly_volume_id: Option<String>,
    #[serde(default)]
    pub fly_region: Option<String>,

    #[serde(default)]
    pub health_check_fail_count: u32,

    #[serde(default)]
    pub pending_destroy_machine_id: Option<String>,
    #[serde(default)]
    pub pending_destroy_volume_id: Option<String>,

    #[serde(default)]
    pub last_metadata_recovery_at: Option<i64>,
}

impl InstanceRecord {
    pub fn is_empty_record(&self) -> bool {
        self.user_id.is_none()
    }

    pub fn pending_destroy_clear(&self) -> bool {
        self.pending_destroy_machine_id.is_none() && self.pending_destroy_volume_id.is_none()
    }
}

/// User-supplied configuration for `provision`/config-update calls. Kept
/// distinct from `InstanceRecord` so the platform API's input schema and the
/// persisted record can evolve independently.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InstanceConfig {
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
