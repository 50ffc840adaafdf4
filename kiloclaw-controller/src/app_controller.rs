//! Per-user App Controller (spec §4.2). Owns `AppRecord` and serializes all
//! work for one user's application; a partial-setup alarm retries `ensure_app`
//! roughly one minute after any failed step.

use std::sync::Arc;
use std::time::Duration;

use kiloclaw_core::models::AppRecord;
use kiloclaw_core::{Error, Result};
use kiloclaw_provider::models::IpAddressType;
use kiloclaw_provider::ProviderClient;

use crate::actor::OpLock;
use crate::alarm::Alarm;
use crate::provider_error::classify;
use crate::store::AppStore;

const APP_SETUP_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct AppControllerConfig {
    /// Environment-specific app-name prefix, e.g. `"dev-"` or `"acct-"`.
    pub app_name_prefix: String,
    pub org_slug: String,
}

pub struct EnsureAppOutcome {
    pub app_name: String,
}

pub struct EnsureEnvKeyOutcome {
    pub key: String,
    pub secrets_version: u64,
}

pub struct AppController<S: AppStore> {
    user_id: String,
    config: AppControllerConfig,
    client: ProviderClient,
    store: Arc<S>,
    op_lock: OpLock,
    alarm: Alarm,
}

impl<S: AppStore + 'static> AppController<S> {
    pub fn new(
        user_id: String,
        config: AppControllerConfig,
        client: ProviderClient,
        store: Arc<S>,
    ) -> Self {
        Self {
            user_id,
            config,
            client,
            store,
            op_lock: OpLock::new(),
            alarm: Alarm::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn check_owner(&self, record: &AppRecord) -> Result<()> {
        if let Some(existing) = &record.user_id {
            if existing != &self.user_id {
                return Err(Error::UserIdMismatch);
            }
        }
        Ok(())
    }

    /// Idempotent. Derives `app_name` once, persists `{user_id, app_name}`
    /// before any remote call, then performs the four setup steps in order,
    /// persisting each completion flag as it lands.
    pub async fn ensure_app(self: &Arc<Self>) -> Result<EnsureAppOutcome> {
        let _guard = self.op_lock.guard().await;
        match self.ensure_app_inner().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.schedule_retry_alarm();
                Err(e)
            }
        }
    }

    async fn ensure_app_inner(self: &Arc<Self>) -> Result<EnsureAppOutcome> {
        let mut record = self.store.load_app(&self.user_id).await?;
        self.check_owner(&record)?;

        if record.app_name.is_none() {
            let app_name = crate::ids::derive_app_name(&self.config.app_name_prefix, &self.user_id);
            record.user_id = Some(self.user_id.clone());
            record.app_name = Some(app_name);
            self.store.save_app(&self.user_id, &record).await?;
        }
        let app_name = record.app_name.clone().expect("just set above");

        if self
            .client
            .get_app(&app_name)
            .await
            .map_err(classify)?
            .is_none()
        {
            // Apps carry no metadata of their own in this provider's wire
            // model; ownership is asserted through the machines created
            // under the app (tagged `kiloclaw_user_id`), which is exactly
            // what `create_app`'s 409 handling inspects.
            self.client
                .create_app(&app_name, &self.config.org_slug, &self.user_id)
                .await
                .map_err(classify)?;
        }

        if !record.ipv6_allocated {
            self.client
                .allocate_ip(&app_name, IpAddressType::V6)
                .await
                .map_err(classify)?;
            record.ipv6_allocated = true;
            self.store.save_app(&self.user_id, &record).await?;
        }

        if !record.ipv4_allocated {
            self.client
                .allocate_ip(&app_name, IpAddressType::SharedV4)
                .await
                .map_err(classify)?;
            record.ipv4_allocated = true;
            self.store.save_app(&self.user_id, &record).await?;
        }

        if !record.env_key_set {
            self.ensure_env_key_locked(&mut record).await?;
        }

        Ok(EnsureAppOutcome { app_name })
    }

    /// If `env_key` is null, generate and persist it with `env_key_set =
    /// false` *before* publishing — any concurrent caller entering this
    /// method sees the non-null key and reuses it rather than generating a
    /// second one. Always re-publishes so a secret deleted out-of-band
    /// self-heals.
    pub async fn ensure_env_key(self: &Arc<Self>) -> Result<EnsureEnvKeyOutcome> {
        let _guard = self.op_lock.guard().await;
        let mut record = self.store.load_app(&self.user_id).await?;
        self.check_owner(&record)?;
        self.ensure_env_key_locked(&mut record).await
    }

    async fn ensure_env_key_locked(&self, record: &mut AppRecord) -> Result<EnsureEnvKeyOutcome> {
        let app_name = record
            .app_name
            .clone()
            .ok_or_else(|| Error::Internal("ensure_env_key called before app_name exists".to_string()))?;

        if record.env_key.is_none() {
            record.env_key = Some(kiloclaw_crypto::generate_env_key());
            self.store.save_app(&self.user_id, record).await?;
        }
        let key = record.env_key.clone().expect("just set above");

        let secrets_version = self
            .client
            .set_secret(&app_name, "KILOCLAW_ENV_KEY", &key)
            .await
            .map_err(classify)?;

        record.env_key_set = true;
        self.store.save_app(&self.user_id, record).await?;

        Ok(EnsureEnvKeyOutcome { key, secrets_version })
    }

    fn schedule_retry_alarm(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.alarm.arm(APP_SETUP_RETRY_DELAY, async move {
            this.run_alarm().await;
        });
    }

    async fn run_alarm(self: &Arc<Self>) {
        let record = match self.store.load_app(&self.user_id).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(user_id = %self.user_id, error = %e, "app controller alarm: failed to load record");
                self.schedule_retry_alarm();
                return;
            }
        };

        if record.user_id.is_none() || record.app_name.is_none() || record.is_setup_complete() {
            return;
        }

        tracing::info!(tag = "reconcile", user_id = %self.user_id, action = "retry_ensure_app", "retrying incomplete app setup");
        if let Err(e) = self.ensure_app_inner().await {
            tracing::warn!(user_id = %self.user_id, error = %e, "app controller alarm retry failed");
            self.schedule_retry_alarm();
        }
    }

    /// Delete the remote app, then wipe all persisted fields. Only used at
    /// account deletion, never as part of instance destroy.
    pub async fn destroy_app(&self) -> Result<()> {
        let _guard = self.op_lock.guard().await;
        let record = self.store.load_app(&self.user_id).await?;
        self.check_owner(&record)?;
        if let Some(app_name) = &record.app_name {
            self.client.delete_app(app_name).await.map_err(classify)?;
        }
        self.store.delete_app(&self.user_id).await?;
        self.alarm.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> ProviderClient {
        let config = kiloclaw_provider::ProviderConfig::new("test-token", server.uri());
        ProviderClient::new(&config).expect("client builds")
    }

    fn controller(client: ProviderClient) -> Arc<AppController<InMemoryStore>> {
        let config = AppControllerConfig {
            app_name_prefix: "kc-".to_string(),
            org_slug: "personal".to_string(),
        };
        Arc::new(AppController::new(
            "user-123".to_string(),
            config,
            client,
            Arc::new(InMemoryStore::new()),
        ))
    }

    // S7 — createApp 409 whose owning machine is tagged to a different user
    // is a fatal, non-recoverable collision.
    #[tokio::test]
    async fn app_name_collision_owned_by_other_user_is_fatal() {
        let app_name = crate::ids::derive_app_name("kc-", "user-123");
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/apps/{app_name}")))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({"error": "not found"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/apps"))
            .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({"error": "name taken"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/apps/{app_name}/machines")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "id": "m1",
                    "name": "instance",
                    "state": "started",
                    "region": "ord",
                    "config": {
                        "image": "img",
                        "guest": {"cpu_kind": "shared", "cpus": 1, "memory_mb": 256},
                        "metadata": {"kiloclaw_user_id": "some-other-user"}
                    }
                }
            ])))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let ctrl = controller(client);

        let err = ctrl.ensure_app().await.expect_err("collision must be fatal");
        assert!(matches!(
            err,
            Error::AppNameCollision { requesting_user_id, .. } if requesting_user_id == "user-123"
        ));

        let record = ctrl.store.load_app("user-123").await.unwrap();
        assert!(!record.ipv4_allocated);
        assert!(!record.ipv6_allocated);
        assert!(!record.env_key_set);
    }

    // Property 5 — ensure_env_key is idempotent: repeated calls against the
    // same record always return the same key, generating it at most once.
    #[tokio::test]
    async fn ensure_env_key_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apps/kc-app/secrets/KILOCLAW_ENV_KEY"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"version": 1})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let ctrl = controller(client);
        let mut seed = AppRecord::default();
        seed.user_id = Some("user-123".to_string());
        seed.app_name = Some("kc-app".to_string());
        ctrl.store.save_app("user-123", &seed).await.unwrap();

        let first = ctrl.ensure_env_key().await.expect("first call succeeds");
        let second = ctrl.ensure_env_key().await.expect("second call succeeds");
        let third = ctrl.ensure_env_key().await.expect("third call succeeds");

        assert_eq!(first.key, second.key);
        assert_eq!(second.key, third.key);

        let record = ctrl.store.load_app("user-123").await.unwrap();
        assert_eq!(record.env_key.as_deref(), Some(first.key.as_str()));
        assert!(record.env_key_set);
    }
}
