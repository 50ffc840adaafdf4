use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::RsaPrivateKey;

use kiloclaw_controller::store::SqliteStore;
use kiloclaw_controller::{
    AppController, AppControllerConfig, ControllerRegistry, InstanceController,
    InstanceControllerConfig, NullInstanceRegistry,
};
use kiloclaw_crypto::{RsaAesEnvelopeDecryptor, SecretEnvelopeDecryptor};
use kiloclaw_provider::{ProviderClient, ProviderConfig};

use crate::config::Config;

type ConcreteAppController = AppController<SqliteStore>;
type ConcreteInstanceController = InstanceController<SqliteStore, SqliteStore, NullInstanceRegistry>;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    store: Arc<SqliteStore>,
    provider: ProviderClient,
    app_controller_config: AppControllerConfig,
    instance_controller_config: InstanceControllerConfig,
    decryptor: Arc<dyn SecretEnvelopeDecryptor>,
    instance_registry: Arc<NullInstanceRegistry>,
    app_controllers: Arc<ControllerRegistry<ConcreteAppController>>,
    instance_controllers: Arc<ControllerRegistry<ConcreteInstanceController>>,
    pub start_time: Instant,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::connect(&config.database_url).await?);

        let provider_config = ProviderConfig::from_env()
            .context("failed to load compute-provider configuration from the environment")?;
        let provider = ProviderClient::new(&provider_config)
            .map_err(|e| anyhow::anyhow!(e.to_string()))
            .context("failed to build compute-provider HTTP client")?;

        let app_controller_config = AppControllerConfig {
            app_name_prefix: config.app_name_prefix.clone(),
            org_slug: config.org_slug.clone(),
        };

        let gateway_hmac_secret = BASE64
            .decode(&config.gateway_hmac_secret_b64)
            .context("KILOCLAW_GATEWAY_HMAC_SECRET must be valid base64")?;

        let instance_controller_config = InstanceControllerConfig {
            default_regions: config.default_regions.clone(),
            gateway_hmac_secret,
            platform_default_env: config.platform_default_env.clone(),
            machine_image: config.machine_image.clone(),
        };

        let key_pem = std::fs::read_to_string(&config.rsa_private_key_path)
            .with_context(|| format!("failed to read RSA private key at {}", config.rsa_private_key_path))?;
        let private_key = RsaPrivateKey::from_pkcs1_pem(&key_pem)
            .context("failed to parse RSA private key as PKCS#1 PEM")?;
        let decryptor: Arc<dyn SecretEnvelopeDecryptor> =
            Arc::new(RsaAesEnvelopeDecryptor::new(private_key));

        Ok(Self {
            config,
            store,
            provider,
            app_controller_config,
            instance_controller_config,
            decryptor,
            instance_registry: Arc::new(NullInstanceRegistry),
            app_controllers: Arc::new(ControllerRegistry::new()),
            instance_controllers: Arc::new(ControllerRegistry::new()),
            start_time: Instant::now(),
        })
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    pub fn app_controller(&self, user_id: &str) -> Arc<ConcreteAppController> {
        let config = self.app_controller_config.clone();
        let client = self.provider.clone();
        let store = Arc::clone(&self.store);
        let owned_user_id = user_id.to_string();
        self.app_controllers
            .get_or_insert_with(user_id, move || AppController::new(owned_user_id, config, client, store))
    }

    pub fn instance_controller(&self, user_id: &str) -> Arc<ConcreteInstanceController> {
        let app_controller = self.app_controller(user_id);
        let config = self.instance_controller_config.clone();
        let client = self.provider.clone();
        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.instance_registry);
        let decryptor = Arc::clone(&self.decryptor);
        let owned_user_id = user_id.to_string();
        self.instance_controllers.get_or_insert_with(user_id, move || {
            InstanceController::new(owned_user_id, config, client, store, app_controller, registry, decryptor)
        })
    }
}
