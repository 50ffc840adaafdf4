use std::collections::HashMap;

use anyhow::{Context, Result};

/// Process configuration, loaded once at startup. Everything provider- or
/// crypto-specific is deferred to `kiloclaw_provider::ProviderConfig` and the
/// RSA key file read in `state.rs` — this struct only covers what the API
/// process itself needs.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Shared secret the platform's internal callers present as
    /// `Authorization: Bearer <key>` (spec §6: "authenticated by a shared
    /// internal key").
    pub internal_api_key: String,
    pub app_name_prefix: String,
    pub org_slug: String,
    /// Base64-encoded HMAC secret behind `OPENCLAW_GATEWAY_TOKEN`.
    pub gateway_hmac_secret_b64: String,
    pub machine_image: String,
    pub default_regions: Vec<String>,
    /// Path to a PEM-encoded RSA private key (PKCS#1) used to unwrap secret
    /// envelopes. The key material itself belongs to the platform's shared
    /// encryption service (spec §1); this process only reads it.
    pub rsa_private_key_path: String,
    /// JSON object of non-sensitive env vars every instance receives.
    pub platform_default_env: HashMap<String, String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let platform_default_env = match std::env::var("KILOCLAW_PLATFORM_DEFAULT_ENV") {
            Ok(raw) => serde_json::from_str(&raw)
                .context("KILOCLAW_PLATFORM_DEFAULT_ENV must be a JSON object of strings")?,
            Err(_) => HashMap::new(),
        };

        let default_regions = std::env::var("KILOCLAW_DEFAULT_REGIONS")
            .unwrap_or_else(|_| "iad,ord".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            port: std::env::var("KILOCLAW_API_PORT")
                .unwrap_or_else(|_| "4280".to_string())
                .parse()
                .context("KILOCLAW_API_PORT must be a valid port number")?,
            database_url: std::env::var("KILOCLAW_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:kiloclaw.db".to_string()),
            internal_api_key: std::env::var("KILOCLAW_INTERNAL_API_KEY")
                .context("KILOCLAW_INTERNAL_API_KEY must be set")?,
            app_name_prefix: std::env::var("KILOCLAW_APP_NAME_PREFIX")
                .unwrap_or_else(|_| "kc-".to_string()),
            org_slug: std::env::var("KILOCLAW_ORG_SLUG")
                .unwrap_or_else(|_| "personal".to_string()),
            gateway_hmac_secret_b64: std::env::var("KILOCLAW_GATEWAY_HMAC_SECRET")
                .context("KILOCLAW_GATEWAY_HMAC_SECRET must be set")?,
            machine_image: std::env::var("KILOCLAW_MACHINE_IMAGE")
                .context("KILOCLAW_MACHINE_IMAGE must be set")?,
            default_regions,
            rsa_private_key_path: std::env::var("KILOCLAW_RSA_PRIVATE_KEY_PATH")
                .context("KILOCLAW_RSA_PRIVATE_KEY_PATH must be set")?,
            platform_default_env,
        })
    }
}
