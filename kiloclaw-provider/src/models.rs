//! Wire types for the compute provider's REST surface. Field shapes follow
//! the Fly Machines API; see spec §6 "Compute-provider envelope (inputs)".

use kiloclaw_core::models::MachineSize;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---- Apps -----------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CreateAppRequest {
    pub app_name: String,
    pub org_slug: String,
    pub network: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct App {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub organization: Option<String>,
}

// ---- IPs --------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpAddressType {
    V6,
    SharedV4,
}

impl IpAddressType {
    pub fn wire_value(self) -> &'static str {
        match self {
            IpAddressType::V6 => "v6",
            IpAddressType::SharedV4 => "shared_v4",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocateIpRequest {
    #[serde(rename = "type")]
    pub ip_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllocatedIp {
    pub id: String,
    pub address: String,
    #[serde(rename = "type")]
    pub ip_type: String,
}

// ---- Secrets ----------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SetSecretRequest {
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetSecretResponse {
    pub version: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecretInfo {
    pub name: String,
    #[serde(default)]
    pub digest: Option<String>,
}

// ---- Machines ----------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    Created,
    Starting,
    Started,
    Stopping,
    Stopped,
    Suspending,
    Suspended,
    Destroying,
    Destroyed,
}

impl MachineState {
    pub fn is_running_class(self) -> bool {
        matches!(self, MachineState::Started)
    }

    pub fn is_stopped_class(self) -> bool {
        matches!(self, MachineState::Stopped | MachineState::Created)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MachineState::Destroyed | MachineState::Destroying)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortHandler {
    pub port: u16,
    pub handlers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutostopConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutostartConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub internal_port: u16,
    pub protocol: String,
    #[serde(default)]
    pub ports: Vec<PortHandler>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autostart: Option<AutostartConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autostop: Option<AutostopConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    pub volume: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MachineConfig {
    pub image: String,
    pub guest: MachineSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<MountConfig>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl MachineConfig {
    pub fn has_mount(&self, volume_id: &str, path: &str) -> bool {
        self.mounts
            .iter()
            .any(|m| m.volume == volume_id && m.path == path)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateMachineRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub config: MachineConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_launch: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_secrets_version: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateMachineRequest {
    pub config: MachineConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_secrets_version: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Machine {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub state: MachineState,
    #[serde(default)]
    pub region: String,
    pub config: MachineConfig,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartMachineResponse {
    pub previous_state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StopMachineResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Started,
    Stopped,
    Suspended,
    Destroyed,
}

impl WaitState {
    pub fn wire_value(self) -> &'static str {
        match self {
            WaitState::Started => "started",
            WaitState::Stopped => "stopped",
            WaitState::Suspended => "suspended",
            WaitState::Destroyed => "destroyed",
        }
    }
}

// ---- Volumes ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Default)]
pub struct ComputeHint {
    pub cpu_kind: String,
    pub cpus: u32,
    pub memory_mb: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateVolumeRequest {
    pub name: String,
    pub region: String,
    pub size_gb: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_volume_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute: Option<ComputeHint>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VolumeState {
    Creating,
    Created,
    Updating,
    Destroying,
    Destroyed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Volume {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub state: VolumeState,
    pub size_gb: u32,
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeSnapshot {
    pub id: String,
    pub created_at: String,
    pub size_gb: u32,
}

// ---- Exec ------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ExecRequest {
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}
