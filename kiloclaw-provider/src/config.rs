/// Config handed to every [`crate::ProviderClient`] call. `app_name` is
/// optional because the apps-level operations (create/get/delete) predate
/// knowing the app name for a user, while every other operation requires it.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_token: String,
    pub app_name: Option<String>,
    pub base_url: String,
}

impl ProviderConfig {
    pub fn new(api_token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            app_name: None,
            base_url: base_url.into(),
        }
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn from_env() -> Result<Self, std::env::VarError> {
        let api_token = std::env::var("KILOCLAW_PROVIDER_TOKEN")?;
        let base_url = std::env::var("KILOCLAW_PROVIDER_BASE_URL")
            .unwrap_or_else(|_| "https://api.machines.dev/v1".to_string());
        Ok(Self::new(api_token, base_url))
    }
}
