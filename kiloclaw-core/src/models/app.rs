use serde::{Deserialize, Serialize};

/// Per-user application record owned exclusively by the App Controller.
///
/// See spec §3 "Application record". `user_id` is immutable once bound;
/// `app_name` is derived once and never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppRecord {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub ipv4_allocated: bool,
    #[serde(default)]
    pub ipv6_allocated: bool,
    #[serde(default)]
    pub env_key_set: bool,
    /// 32-byte symmetric key, base64-encoded. Generated once per app and
    /// persisted before it is ever published as a provider secret (spec §3
    /// invariant: no two concurrent callers may generate different keys).
    #[serde(default)]
    pub env_key: Option<String>,
}

impl AppRecord {
    pub fn is_setup_complete(&self) -> bool {
        self.app_name.is_some() && self.ipv4_allocated && self.ipv6_allocated && self.env_key_set
    }
}
