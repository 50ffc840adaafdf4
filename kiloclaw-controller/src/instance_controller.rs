//! Per-user Instance Controller (spec §4.3): provision/start/stop/destroy,
//! the reconciliation alarm, and the low-latency status read. Owns
//! `InstanceRecord` exclusively; consumes `app_name`/`env_key` from the App
//! Controller through its narrow ensure-interface.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kiloclaw_core::constants::{
    DEFAULT_VOLUME_SIZE_GB, INSTANCE_MOUNT_PATH, LIVE_CHECK_THROTTLE_MS,
    METADATA_KEY_SANDBOX_ID, METADATA_KEY_USER_ID, METADATA_RECOVERY_COOLDOWN_MS,
    SELF_HEAL_THRESHOLD, STARTUP_TIMEOUT_SECONDS,
};
use kiloclaw_core::models::{InstanceConfig, InstanceRecord, InstanceStatus, MachineSize, StatusView};
use kiloclaw_core::{Error, Result};
use kiloclaw_provider::models::{
    AutostartConfig, AutostopConfig, ComputeHint, Machine, MachineConfig, MountConfig,
    PortHandler, ServiceConfig, WaitState,
};
use kiloclaw_provider::volumes::VolumePlacement;
use kiloclaw_provider::ProviderClient;

use crate::actor::OpLock;
use crate::alarm::Alarm;
use crate::app_controller::AppController;
use crate::env_materialize::{self, MaterializeInput};
use crate::pairing::PairingCache;
use crate::provider_error::{classify, is_insufficient_resources, is_not_found};
use crate::recovery::select_recovery_candidate;
use crate::registry::InstanceRegistry;
use crate::store::{AppStore, InstanceStore};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone)]
pub struct InstanceControllerConfig {
    /// Candidate regions in priority order, used when a request carries no
    /// explicit region.
    pub default_regions: Vec<String>,
    /// Worker-level HMAC secret behind `OPENCLAW_GATEWAY_TOKEN`.
    pub gateway_hmac_secret: Vec<u8>,
    /// Non-sensitive platform defaults, layer 1 of env-var materialization.
    pub platform_default_env: HashMap<String, String>,
    /// Guest image reference — a deployment knob, not a spec constant.
    pub machine_image: String,
}

pub struct ProvisionOutcome {
    pub sandbox_id: String,
}

#[derive(Default)]
struct LiveCheckState {
    last_checked_at_ms: i64,
    status_override: Option<InstanceStatus>,
}

enum ExistingMachineOutcome {
    Started,
    NotFound,
}

pub struct InstanceController<AS, IS, R>
where
    AS: AppStore + 'static,
    IS: InstanceStore + 'static,
    R: InstanceRegistry + 'static,
{
    user_id: String,
    config: InstanceControllerConfig,
    client: ProviderClient,
    store: Arc<IS>,
    app_controller: Arc<AppController<AS>>,
    registry: Arc<R>,
    decryptor: Arc<dyn kiloclaw_crypto::SecretEnvelopeDecryptor>,
    pairing_cache: Arc<PairingCache>,
    op_lock: OpLock,
    alarm: Alarm,
    live_check: Mutex<LiveCheckState>,
}

impl<AS, IS, R> InstanceController<AS, IS, R>
where
    AS: AppStore + 'static,
    IS: InstanceStore + 'static,
    R: InstanceRegistry + 'static,
{
    pub fn new(
        user_id: String,
        config: InstanceControllerConfig,
        client: ProviderClient,
        store: Arc<IS>,
        app_controller: Arc<AppController<AS>>,
        registry: Arc<R>,
        decryptor: Arc<dyn kiloclaw_crypto::SecretEnvelopeDecryptor>,
    ) -> Self {
        Self {
            user_id,
            config,
            client,
            store,
            app_controller,
            registry,
            decryptor,
            pairing_cache: Arc::new(PairingCache::new()),
            op_lock: OpLock::new(),
            alarm: Alarm::new(),
            live_check: Mutex::new(LiveCheckState::default()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn check_owner(&self, record: &InstanceRecord) -> Result<()> {
        if let Some(existing) = &record.user_id {
            if existing != &self.user_id {
                return Err(Error::UserIdMismatch);
            }
        }
        Ok(())
    }

    fn candidate_regions(&self, preferred: Option<&str>) -> Vec<String> {
        match preferred {
            Some(r) => {
                let mut regions = vec![r.to_string()];
                regions.extend(
                    self.config
                        .default_regions
                        .iter()
                        .filter(|d| d.as_str() != r)
                        .cloned(),
                );
                regions
            }
            None => self.config.default_regions.clone(),
        }
    }

    /// Same candidate list but with `failed_region` moved to the back —
    /// spec §4.3.11's "region list MUST be deprioritized".
    fn candidate_regions_deprioritizing(&self, failed_region: Option<&str>) -> Vec<String> {
        match failed_region {
            Some(r) => {
                let mut regions: Vec<String> = self
                    .config
                    .default_regions
                    .iter()
                    .filter(|d| d.as_str() != r)
                    .cloned()
                    .collect();
                regions.push(r.to_string());
                regions
            }
            None => self.config.default_regions.clone(),
        }
    }

    // ---- 4.3.1 provision ---------------------------------------------

    pub async fn provision(self: &Arc<Self>, config: InstanceConfig) -> Result<ProvisionOutcome> {
        if let Some(env_vars) = &config.env_vars {
            for name in env_vars.keys() {
                env_materialize::validate_user_env_var_name(name)?;
            }
        }

        let _guard = self.op_lock.guard().await;
        let mut record = self.store.load_instance(&self.user_id).await?;
        self.check_owner(&record)?;
        if record.status == InstanceStatus::Destroying {
            return Err(Error::Destroying);
        }

        let is_first = record.sandbox_id.is_none();
        let sandbox_id = record
            .sandbox_id
            .clone()
            .unwrap_or_else(|| crate::ids::derive_sandbox_id(&self.user_id));

        if is_first {
            record.user_id = Some(self.user_id.clone());
            record.sandbox_id = Some(sandbox_id.clone());
            let ensure_outcome = self.app_controller.ensure_app().await?;
            record.fly_app_name = Some(ensure_outcome.app_name.clone());
            self.store.save_instance(&self.user_id, &record).await?;

            let regions = self.candidate_regions(config.region.as_deref());
            let volume_name = format!("vol-{sandbox_id}");
            let placement = match self
                .client
                .create_volume_with_fallback(
                    &ensure_outcome.app_name,
                    &volume_name,
                    &regions,
                    DEFAULT_VOLUME_SIZE_GB,
                    None,
                    None,
                )
                .await
            {
                Ok(p) => p,
                Err(e) => {
                    // app_name is already persisted, so a retried `provision`
                    // would skip straight past the volume step; arm an idle
                    // alarm so the reconciler's `ensure_volume` picks it up.
                    self.schedule_alarm(InstanceStatus::Provisioned);
                    return Err(classify(e));
                }
            };
            record.fly_volume_id = Some(placement.volume.id);
            record.fly_region = Some(placement.region);
        }

        record.env_vars = config.env_vars;
        record.encrypted_secrets = config.encrypted_secrets;
        record.channels = config.channels;
        record.kilocode_api_key = config.kilocode_api_key;
        record.kilocode_default_model = config.kilocode_default_model;
        record.kilocode_models = config.kilocode_models;
        record.machine_size = config.machine_size;

        if is_first {
            record.provisioned_at = Some(now_ms());
            record.status = InstanceStatus::Provisioned;
            record.health_check_fail_count = 0;
            record.pending_destroy_machine_id = None;
            record.pending_destroy_volume_id = None;
        }

        self.store.save_instance(&self.user_id, &record).await?;
        self.schedule_alarm(record.status);

        Ok(ProvisionOutcome { sandbox_id })
    }

    // ---- 4.3.2 start ----------------------------------------------------

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let _guard = self.op_lock.guard().await;
        let mut record = self.store.load_instance(&self.user_id).await?;
        self.check_owner(&record)?;
        if record.status == InstanceStatus::Destroying {
            return Err(Error::Destroying);
        }

        if record.is_empty_record() {
            self.restore_from_registry(&mut record).await?;
            if record.is_empty_record() {
                return Err(Error::NotFound(format!(
                    "no instance record for user {}",
                    self.user_id
                )));
            }
        }

        self.ensure_volume_for_start(&mut record).await?;

        // Step 2: fast path.
        if record.status == InstanceStatus::Running {
            if let (Some(app_name), Some(machine_id)) =
                (record.fly_app_name.clone(), record.fly_machine_id.clone())
            {
                if let Some(machine) = self
                    .client
                    .get_machine(&app_name, &machine_id)
                    .await
                    .map_err(classify)?
                {
                    if machine.state.is_running_class() {
                        self.mount_reconcile_if_needed(&app_name, &machine_id, &mut record, &machine)
                            .await?;
                        return Ok(());
                    }
                }
            }
        }

        let app_name = record
            .fly_app_name
            .clone()
            .ok_or_else(|| Error::Internal("start called before app_name is known".to_string()))?;
        let sandbox_id = record
            .sandbox_id
            .clone()
            .ok_or_else(|| Error::Internal("start called before sandbox_id is known".to_string()))?;
        let volume_id = record
            .fly_volume_id
            .clone()
            .ok_or_else(|| Error::Internal("start called before volume is provisioned".to_string()))?;

        // Step 3: build env vars.
        let ensure_key = self.app_controller.ensure_env_key().await?;
        let env = self.build_env_map(&record, &sandbox_id, &ensure_key.key)?;
        let guest = record.machine_size.clone().unwrap_or_default();
        let mut machine_config = self.build_machine_config(&guest, &env, &volume_id, &sandbox_id);

        // Step 4: try the existing machine, if any.
        if let Some(machine_id) = record.fly_machine_id.clone() {
            match self
                .start_existing_machine(
                    &app_name,
                    &machine_id,
                    machine_config.clone(),
                    ensure_key.secrets_version,
                )
                .await
            {
                Ok(ExistingMachineOutcome::Started) => {
                    return self.finish_start(&mut record).await;
                }
                Ok(ExistingMachineOutcome::NotFound) => {
                    record.fly_machine_id = None;
                    self.store.save_instance(&self.user_id, &record).await?;
                }
                Err(e) if is_insufficient_resources(&e) => {
                    self.run_capacity_recovery(&mut record, &mut machine_config, ensure_key.secrets_version)
                        .await?;
                    return self.finish_start(&mut record).await;
                }
                Err(e) => return Err(classify(e)),
            }
        }

        // Step 5: create a brand-new machine. Persist the id before waiting
        // so a wait-timeout never orphans the machine.
        let created = self
            .client
            .create_machine(
                &app_name,
                None,
                record.fly_region.as_deref(),
                machine_config.clone(),
                Some(ensure_key.secrets_version),
            )
            .await
            .map_err(classify)?;
        record.fly_machine_id = Some(created.id.clone());
        self.store.save_instance(&self.user_id, &record).await?;
        self.client
            .wait(
                &app_name,
                &created.id,
                WaitState::Started,
                Duration::from_secs(STARTUP_TIMEOUT_SECONDS),
            )
            .await
            .map_err(classify)?;

        self.finish_start(&mut record).await
    }

    async fn finish_start(self: &Arc<Self>, record: &mut InstanceRecord) -> Result<()> {
        record.status = InstanceStatus::Running;
        record.last_started_at = Some(now_ms());
        record.health_check_fail_count = 0;
        self.store.save_instance(&self.user_id, record).await?;
        self.schedule_alarm(record.status);
        Ok(())
    }

    async fn ensure_volume_for_start(&self, record: &mut InstanceRecord) -> Result<()> {
        let app_name = record
            .fly_app_name
            .clone()
            .ok_or_else(|| Error::Internal("ensure_volume_for_start without app_name".to_string()))?;

        if record.fly_volume_id.is_none() {
            self.ensure_volume(record, &app_name).await?;
            return Ok(());
        }

        let volume_id = record.fly_volume_id.clone().unwrap();
        match self.client.get_volume(&app_name, &volume_id).await.map_err(classify)? {
            Some(volume) => {
                if Some(&volume.region) != record.fly_region.as_ref() {
                    record.fly_region = Some(volume.region);
                    self.store.save_instance(&self.user_id, record).await?;
                }
            }
            None => {
                record.fly_volume_id = None;
                self.ensure_volume(record, &app_name).await?;
            }
        }
        Ok(())
    }

    /// §4.3.6 starting an existing machine.
    async fn start_existing_machine(
        &self,
        app_name: &str,
        machine_id: &str,
        config: MachineConfig,
        min_secrets_version: u64,
    ) -> std::result::Result<ExistingMachineOutcome, kiloclaw_provider::ClientError> {
        let Some(machine) = self.client.get_machine(app_name, machine_id).await? else {
            return Ok(ExistingMachineOutcome::NotFound);
        };

        if machine.state.is_running_class() {
            return Ok(ExistingMachineOutcome::Started);
        }
        if machine.state.is_stopped_class() {
            self.client
                .update_machine(app_name, machine_id, config, Some(min_secrets_version))
                .await?;
        }
        self.client
            .wait(
                app_name,
                machine_id,
                WaitState::Started,
                Duration::from_secs(STARTUP_TIMEOUT_SECONDS),
            )
            .await?;
        Ok(ExistingMachineOutcome::Started)
    }

    /// §4.3.11 capacity-exhaustion recovery, invoked when `start_existing_machine`
    /// or the fresh-create attempt fails with `insufficient_resources`.
    async fn run_capacity_recovery(
        &self,
        record: &mut InstanceRecord,
        machine_config: &mut MachineConfig,
        secrets_version: u64,
    ) -> Result<VolumePlacement> {
        let app_name = record
            .fly_app_name
            .clone()
            .ok_or_else(|| Error::Internal("capacity recovery without app_name".to_string()))?;
        let sandbox_id = record
            .sandbox_id
            .clone()
            .ok_or_else(|| Error::Internal("capacity recovery without sandbox_id".to_string()))?;
        let old_volume_id = record
            .fly_volume_id
            .clone()
            .ok_or_else(|| Error::Internal("capacity recovery without a volume".to_string()))?;

        let regions = self.candidate_regions_deprioritizing(record.fly_region.as_deref());
        let volume_name = format!("vol-{sandbox_id}");
        let compute_hint = ComputeHint {
            cpu_kind: machine_config.guest.cpu_kind.clone(),
            cpus: machine_config.guest.cpus,
            memory_mb: machine_config.guest.memory_mb,
        };
        let is_fresh = record.last_started_at.is_none();

        let placement = if is_fresh {
            crate::capacity::recover_fresh_provision(
                &self.client,
                &app_name,
                &volume_name,
                &old_volume_id,
                &regions,
                DEFAULT_VOLUME_SIZE_GB,
                compute_hint,
            )
            .await
            .map_err(classify)?
        } else {
            crate::capacity::recover_existing_instance(
                &self.client,
                &app_name,
                &volume_name,
                &old_volume_id,
                &regions,
                DEFAULT_VOLUME_SIZE_GB,
                compute_hint,
            )
            .await
            .map_err(classify)?
        };

        record.fly_volume_id = Some(placement.volume.id.clone());
        record.fly_region = Some(placement.region.clone());
        self.store.save_instance(&self.user_id, record).await?;

        crate::capacity::destroy_stranded_machine(&self.client, &app_name, record.fly_machine_id.as_deref())
            .await;
        record.fly_machine_id = None;
        self.store.save_instance(&self.user_id, record).await?;

        machine_config.mounts = vec![MountConfig {
            volume: placement.volume.id.clone(),
            path: INSTANCE_MOUNT_PATH.to_string(),
        }];

        let created = self
            .client
            .create_machine(
                &app_name,
                None,
                Some(&placement.region),
                machine_config.clone(),
                Some(secrets_version),
            )
            .await
            .map_err(classify)?;
        record.fly_machine_id = Some(created.id.clone());
        self.store.save_instance(&self.user_id, record).await?;
        self.client
            .wait(
                &app_name,
                &created.id,
                WaitState::Started,
                Duration::from_secs(STARTUP_TIMEOUT_SECONDS),
            )
            .await
            .map_err(classify)?;

        Ok(placement)
    }

    // ---- 4.3.3 stop -------------------------------------------------------

    pub async fn stop(self: &Arc<Self>) -> Result<()> {
        let _guard = self.op_lock.guard().await;
        let mut record = self.store.load_instance(&self.user_id).await?;
        self.check_owner(&record)?;

        match record.status {
            InstanceStatus::Stopped | InstanceStatus::Provisioned | InstanceStatus::Destroying => {
                return Ok(());
            }
            InstanceStatus::Running => {}
        }

        let app_name = record
            .fly_app_name
            .clone()
            .ok_or_else(|| Error::Internal("stop called without app_name".to_string()))?;

        let Some(machine_id) = record.fly_machine_id.clone() else {
            record.status = InstanceStatus::Stopped;
            record.last_stopped_at = Some(now_ms());
            self.store.save_instance(&self.user_id, &record).await?;
            return Ok(());
        };

        match self
            .client
            .stop_machine_and_wait(&app_name, &machine_id, Duration::from_secs(STARTUP_TIMEOUT_SECONDS))
            .await
        {
            Ok(()) => {
                record.status = InstanceStatus::Stopped;
                record.last_stopped_at = Some(now_ms());
                self.store.save_instance(&self.user_id, &record).await?;
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                record.status = InstanceStatus::Stopped;
                record.last_stopped_at = Some(now_ms());
                self.store.save_instance(&self.user_id, &record).await?;
                Ok(())
            }
            Err(e) => Err(classify(e)),
        }
    }

    // ---- 4.3.4 destroy (two-phase) ----------------------------------------

    pub async fn destroy(self: &Arc<Self>) -> Result<()> {
        let _guard = self.op_lock.guard().await;
        let mut record = self.store.load_instance(&self.user_id).await?;
        self.check_owner(&record)?;
        if record.is_empty_record() {
            return Ok(());
        }

        if record.status != InstanceStatus::Destroying {
            record.pending_destroy_machine_id = record.fly_machine_id.clone();
            record.pending_destroy_volume_id = record.fly_volume_id.clone();
            record.status = InstanceStatus::Destroying;
            self.store.save_instance(&self.user_id, &record).await?;
        }

        self.reconcile_destroying(&mut record).await?;

        let current = self.store.load_instance(&self.user_id).await?;
        if !current.is_empty_record() {
            self.schedule_alarm(InstanceStatus::Destroying);
        }
        Ok(())
    }

    // ---- 4.3.5 reconciler ---------------------------------------------

    fn schedule_alarm(self: &Arc<Self>, status: InstanceStatus) {
        let delay = crate::alarm::next_delay(status);
        let this = Arc::clone(self);
        self.alarm.arm(delay, async move {
            this.run_alarm().await;
        });
    }

    async fn run_alarm(self: &Arc<Self>) {
        let _guard = self.op_lock.guard().await;
        let mut record = match self.store.load_instance(&self.user_id).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(user_id = %self.user_id, error = %e, "reconciler: failed to load instance record, rearming idle");
                self.schedule_alarm(InstanceStatus::Stopped);
                return;
            }
        };
        if record.is_empty_record() {
            return;
        }

        let result = if record.status == InstanceStatus::Destroying {
            self.reconcile_destroying(&mut record).await
        } else {
            let machine_result = self.reconcile_machine(&mut record).await;
            let volume_result = self.reconcile_volume(&mut record).await;
            machine_result.and(volume_result)
        };

        if let Err(e) = result {
            tracing::warn!(tag = "reconcile", user_id = %self.user_id, error = %e, "reconcile pass failed");
        }

        match self.store.load_instance(&self.user_id).await {
            Ok(current) if !current.is_empty_record() => self.schedule_alarm(current.status),
            _ => {}
        }
    }

    async fn reconcile_destroying(&self, record: &mut InstanceRecord) -> Result<()> {
        let app_name = record.fly_app_name.clone();

        if let (Some(app_name), Some(machine_id)) = (&app_name, record.pending_destroy_machine_id.clone()) {
            match self.client.destroy_machine(app_name, &machine_id, true).await {
                Ok(()) => {
                    record.pending_destroy_machine_id = None;
                    tracing::info!(tag = "reconcile", user_id = %self.user_id, action = "destroy_machine", %machine_id, "pending machine delete cleared");
                }
                Err(e) => {
                    tracing::warn!(tag = "reconcile", user_id = %self.user_id, error = %e, "pending machine delete failed, will retry");
                }
            }
            self.store.save_instance(&self.user_id, record).await?;
        }

        if let (Some(app_name), Some(volume_id)) = (&app_name, record.pending_destroy_volume_id.clone()) {
            match self.client.delete_volume(app_name, &volume_id).await {
                Ok(()) => {
                    record.pending_destroy_volume_id = None;
                    tracing::info!(tag = "reconcile", user_id = %self.user_id, action = "destroy_volume", %volume_id, "pending volume delete cleared");
                }
                Err(e) => {
                    tracing::warn!(tag = "reconcile", user_id = %self.user_id, error = %e, "pending volume delete failed, will retry");
                }
            }
            self.store.save_instance(&self.user_id, record).await?;
        }

        if record.pending_destroy_clear() {
            self.store.delete_instance(&self.user_id).await?;
            self.alarm.cancel();
            tracing::info!(tag = "reconcile", user_id = %self.user_id, action = "finalize_destroy", "both pending ids cleared, record wiped");
        }
        Ok(())
    }

    async fn reconcile_machine(&self, record: &mut InstanceRecord) -> Result<()> {
        if record.fly_machine_id.is_none() {
            return self.metadata_recovery(record).await;
        }

        let app_name = record
            .fly_app_name
            .clone()
            .ok_or_else(|| Error::Internal("machine_id set without app_name".to_string()))?;
        let machine_id = record.fly_machine_id.clone().unwrap();

        match self.client.get_machine(&app_name, &machine_id).await {
            Ok(None) => {
                record.fly_machine_id = None;
                record.status = InstanceStatus::Stopped;
                record.health_check_fail_count = 0;
                self.store.save_instance(&self.user_id, record).await?;
                tracing::info!(tag = "reconcile", user_id = %self.user_id, action = "clear_machine_id", reason = "not_found", "machine gone");
                Ok(())
            }
            Ok(Some(machine)) => {
                if machine.state.is_running_class() {
                    if record.status != InstanceStatus::Running || record.health_check_fail_count != 0 {
                        record.status = InstanceStatus::Running;
                        record.health_check_fail_count = 0;
                        self.store.save_instance(&self.user_id, record).await?;
                    }
                } else if machine.state.is_stopped_class() && record.status == InstanceStatus::Running {
                    record.health_check_fail_count += 1;
                    if record.health_check_fail_count >= SELF_HEAL_THRESHOLD {
                        record.status = InstanceStatus::Stopped;
                        record.health_check_fail_count = 0;
                        tracing::info!(tag = "reconcile", user_id = %self.user_id, action = "self_heal_stop", "self-heal threshold reached");
                    }
                    self.store.save_instance(&self.user_id, record).await?;
                }
                self.mount_reconcile_if_needed(&app_name, &machine_id, record, &machine).await
            }
            Err(e) => {
                tracing::warn!(tag = "reconcile", user_id = %self.user_id, error = %e, "transient error fetching machine");
                Ok(())
            }
        }
    }

    /// §4.3.7 mount reconciliation.
    async fn mount_reconcile_if_needed(
        &self,
        app_name: &str,
        machine_id: &str,
        record: &mut InstanceRecord,
        machine: &Machine,
    ) -> Result<()> {
        let Some(volume_id) = record.fly_volume_id.clone() else {
            return Ok(());
        };
        if machine.config.has_mount(&volume_id, INSTANCE_MOUNT_PATH) {
            return Ok(());
        }

        tracing::info!(tag = "reconcile", user_id = %self.user_id, action = "repair_mount", %machine_id, "machine missing expected mount");
        let mut config = machine.config.clone();
        config.mounts = vec![MountConfig {
            volume: volume_id,
            path: INSTANCE_MOUNT_PATH.to_string(),
        }];

        self.client
            .stop_machine_and_wait(app_name, machine_id, Duration::from_secs(STARTUP_TIMEOUT_SECONDS))
            .await
            .map_err(classify)?;
        self.client
            .update_machine(app_name, machine_id, config, None)
            .await
            .map_err(classify)?;
        self.client
            .wait(
                app_name,
                machine_id,
                WaitState::Started,
                Duration::from_secs(STARTUP_TIMEOUT_SECONDS),
            )
            .await
            .map_err(classify)?;
        Ok(())
    }

    /// §4.3.5 metadata recovery.
    async fn metadata_recovery(&self, record: &mut InstanceRecord) -> Result<()> {
        let Some(app_name) = record.fly_app_name.clone() else {
            return Ok(());
        };

        let now = now_ms();
        if let Some(last) = record.last_metadata_recovery_at {
            if now - last < METADATA_RECOVERY_COOLDOWN_MS as i64 {
                return Ok(());
            }
        }
        record.last_metadata_recovery_at = Some(now);
        self.store.save_instance(&self.user_id, record).await?;

        let machines = self
            .client
            .list_machines(&app_name, Some((METADATA_KEY_USER_ID, self.user_id.as_str())))
            .await
            .map_err(classify)?;

        if machines.len() > 1 {
            tracing::warn!(tag = "reconcile", user_id = %self.user_id, count = machines.len(), "multiple live machines for user during metadata recovery");
        }

        let Some(candidate) = select_recovery_candidate(&machines) else {
            return Ok(());
        };

        record.fly_machine_id = Some(candidate.id.clone());
        record.fly_region = Some(candidate.region.clone());
        if candidate.state.is_running_class() {
            record.status = InstanceStatus::Running;
        } else if candidate.state.is_stopped_class() {
            record.status = InstanceStatus::Stopped;
        }

        if record.fly_volume_id.is_none() {
            if let Some(mount) = candidate.config.mounts.iter().find(|m| m.path == INSTANCE_MOUNT_PATH) {
                match self.client.get_volume(&app_name, &mount.volume).await {
                    Ok(Some(volume)) => record.fly_volume_id = Some(volume.id),
                    Ok(None) => {
                        tracing::warn!(tag = "reconcile", user_id = %self.user_id, volume_id = %mount.volume, "candidate volume not found, leaving for next cycle");
                    }
                    Err(e) => {
                        tracing::warn!(tag = "reconcile", user_id = %self.user_id, error = %e, "transient error verifying candidate volume");
                    }
                }
            }
        }

        self.store.save_instance(&self.user_id, record).await?;
        tracing::info!(tag = "reconcile", user_id = %self.user_id, action = "metadata_recovery_adopt", machine_id = %candidate.id, "adopted machine via metadata recovery");
        Ok(())
    }

    async fn reconcile_volume(&self, record: &mut InstanceRecord) -> Result<()> {
        let Some(app_name) = record.fly_app_name.clone() else {
            return Ok(());
        };

        match record.fly_volume_id.clone() {
            None => self.ensure_volume(record, &app_name).await,
            Some(volume_id) => match self.client.get_volume(&app_name, &volume_id).await {
                Ok(Some(_)) => Ok(()),
                Ok(None) => {
                    tracing::warn!(tag = "reconcile", user_id = %self.user_id, %volume_id, "volume not found — data loss event, creating replacement");
                    record.fly_volume_id = None;
                    self.ensure_volume(record, &app_name).await
                }
                Err(e) => {
                    tracing::warn!(tag = "reconcile", user_id = %self.user_id, error = %e, "transient error fetching volume");
                    Ok(())
                }
            },
        }
    }

    /// §4.3.8 volume ensure.
    async fn ensure_volume(&self, record: &mut InstanceRecord, app_name: &str) -> Result<()> {
        if record.fly_volume_id.is_some() {
            return Ok(());
        }
        let sandbox_id = record
            .sandbox_id
            .clone()
            .ok_or_else(|| Error::Internal("ensure_volume without sandbox_id".to_string()))?;
        let region = record
            .fly_region
            .clone()
            .unwrap_or_else(|| self.config.default_regions[0].clone());

        let volume = self
            .client
            .create_volume(app_name, &format!("vol-{sandbox_id}"), &region, DEFAULT_VOLUME_SIZE_GB, None, None)
            .await
            .map_err(classify)?;
        record.fly_volume_id = Some(volume.id);
        record.fly_region = Some(volume.region);
        self.store.save_instance(&self.user_id, record).await?;
        Ok(())
    }

    /// §4.3.9 restore from external registry.
    async fn restore_from_registry(&self, record: &mut InstanceRecord) -> Result<()> {
        let Some(hit) = self.registry.lookup_active_instance(&self.user_id).await? else {
            return Ok(());
        };

        record.user_id = Some(self.user_id.clone());
        record.sandbox_id = Some(crate::ids::derive_sandbox_id(&self.user_id));
        record.status = InstanceStatus::Provisioned;
        record.fly_app_name = hit.app_name;
        record.provisioned_at = Some(now_ms());
        self.store.save_instance(&self.user_id, record).await?;

        self.metadata_recovery(record).await
    }

    // ---- 4.3.10 env materialization helpers --------------------------------

    fn build_env_map(
        &self,
        record: &InstanceRecord,
        sandbox_id: &str,
        env_key: &str,
    ) -> Result<HashMap<String, String>> {
        let input = MaterializeInput {
            platform_defaults: &self.config.platform_default_env,
            sandbox_id,
            gateway_hmac_secret: &self.config.gateway_hmac_secret,
            env_vars: record.env_vars.as_ref(),
            encrypted_secrets: record.encrypted_secrets.as_ref(),
            channels: record.channels.as_ref(),
        };
        let materialized = env_materialize::materialize(input, self.decryptor.as_ref())?;
        env_materialize::seal_and_merge(materialized, env_key)
    }

    fn build_machine_config(
        &self,
        guest: &MachineSize,
        env: &HashMap<String, String>,
        volume_id: &str,
        sandbox_id: &str,
    ) -> MachineConfig {
        let mut metadata = HashMap::new();
        metadata.insert(METADATA_KEY_USER_ID.to_string(), self.user_id.clone());
        metadata.insert(METADATA_KEY_SANDBOX_ID.to_string(), sandbox_id.to_string());

        MachineConfig {
            image: self.config.machine_image.clone(),
            guest: guest.clone(),
            env: Some(env.clone()),
            services: self.default_services(),
            mounts: vec![MountConfig {
                volume: volume_id.to_string(),
                path: INSTANCE_MOUNT_PATH.to_string(),
            }],
            metadata,
        }
    }

    fn default_services(&self) -> Vec<ServiceConfig> {
        vec![ServiceConfig {
            internal_port: kiloclaw_core::constants::OPENCLAW_PORT,
            protocol: "tcp".to_string(),
            ports: vec![PortHandler {
                port: 443,
                handlers: vec!["tls".to_string(), "http".to_string()],
            }],
            autostart: Some(AutostartConfig { enabled: true }),
            autostop: Some(AutostopConfig { enabled: false }),
        }]
    }

    // ---- 4.3.12 getStatus ------------------------------------------------

    pub async fn get_status(self: &Arc<Self>) -> Result<Option<StatusView>> {
        let _guard = self.op_lock.guard().await;
        let mut record = self.store.load_instance(&self.user_id).await?;
        if record.is_empty_record() {
            return Ok(None);
        }

        let now = now_ms();
        let should_check = {
            let state = self.live_check.lock().unwrap();
            record.status == InstanceStatus::Running
                && now - state.last_checked_at_ms >= LIVE_CHECK_THROTTLE_MS as i64
        };

        if should_check {
            self.live_check.lock().unwrap().last_checked_at_ms = now;
            let this = Arc::clone(self);
            let app_name = record.fly_app_name.clone();
            let machine_id = record.fly_machine_id.clone();
            tokio::spawn(async move {
                this.run_live_check(app_name, machine_id).await;
            });
        }

        record.status = {
            let state = self.live_check.lock().unwrap();
            state.status_override.unwrap_or(record.status)
        };

        Ok(StatusView::from_record(&record))
    }

    /// Fire-and-forget background check: flips the in-memory status belief
    /// only. Persistence remains the reconciler's job (spec §4.3.12).
    async fn run_live_check(self: Arc<Self>, app_name: Option<String>, machine_id: Option<String>) {
        let (Some(app_name), Some(machine_id)) = (app_name, machine_id) else {
            return;
        };
        match self.client.get_machine(&app_name, &machine_id).await {
            Ok(Some(machine)) if machine.state.is_running_class() => {
                self.live_check.lock().unwrap().status_override = None;
            }
            Ok(Some(machine)) if machine.state.is_stopped_class() || machine.state.is_terminal() => {
                self.live_check.lock().unwrap().status_override = Some(InstanceStatus::Stopped);
            }
            Ok(None) => {
                self.live_check.lock().unwrap().status_override = Some(InstanceStatus::Stopped);
            }
            Ok(Some(_)) | Err(_) => {
                // Transitional state or transient error: keep the cached belief.
            }
        }
    }

    // ---- 4.3.13 pairing-request passthrough --------------------------------

    pub async fn pairing_list(self: &Arc<Self>) -> Result<String> {
        let record = self.store.load_instance(&self.user_id).await?;
        if record.status != InstanceStatus::Running {
            return Err(Error::InvalidArgument("instance is not running".to_string()));
        }
        let app_name = record
            .fly_app_name
            .clone()
            .ok_or_else(|| Error::Internal("pairing_list without app_name".to_string()))?;
        let machine_id = record
            .fly_machine_id
            .clone()
            .ok_or_else(|| Error::Internal("pairing_list without machine_id".to_string()))?;

        if let Some(cached) = self.pairing_cache.get(&app_name, &machine_id) {
            return Ok(cached);
        }

        let result = self
            .client
            .exec(
                &app_name,
                &machine_id,
                vec!["kiloclaw-pairing".to_string(), "list".to_string()],
                Some(15),
            )
            .await
            .map_err(classify)?;
        if result.exit_code != 0 {
            return Err(Error::Internal(format!("pairing list exec failed: {}", result.stderr)));
        }
        self.pairing_cache.put(&app_name, &machine_id, result.stdout.clone());
        Ok(result.stdout)
    }

    pub async fn pairing_approve(self: &Arc<Self>, channel: &str, code: &str) -> Result<()> {
        crate::pairing::validate_channel(channel)?;
        crate::pairing::validate_code(code)?;

        let record = self.store.load_instance(&self.user_id).await?;
        if record.status != InstanceStatus::Running {
            return Err(Error::InvalidArgument("instance is not running".to_string()));
        }
        let app_name = record
            .fly_app_name
            .clone()
            .ok_or_else(|| Error::Internal("pairing_approve without app_name".to_string()))?;
        let machine_id = record
            .fly_machine_id
            .clone()
            .ok_or_else(|| Error::Internal("pairing_approve without machine_id".to_string()))?;

        let result = self
            .client
            .exec(
                &app_name,
                &machine_id,
                vec![
                    "kiloclaw-pairing".to_string(),
                    "approve".to_string(),
                    channel.to_string(),
                    code.to_string(),
                ],
                Some(15),
            )
            .await
            .map_err(classify)?;
        if result.exit_code != 0 {
            return Err(Error::Internal(format!("pairing approve exec failed: {}", result.stderr)));
        }
        self.pairing_cache.invalidate(&app_name, &machine_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_controller::{AppController, AppControllerConfig};
    use crate::registry::NullInstanceRegistry;
    use crate::store::memory::InMemoryStore;
    use kiloclaw_crypto::CryptoError;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct PassthroughDecryptor;
    impl kiloclaw_crypto::SecretEnvelopeDecryptor for PassthroughDecryptor {
        fn decrypt(
            &self,
            envelope: &kiloclaw_core::models::SecretEnvelope,
        ) -> std::result::Result<String, CryptoError> {
            Ok(envelope.ciphertext.clone())
        }
    }

    async fn client_for(server: &MockServer) -> ProviderClient {
        let config = kiloclaw_provider::ProviderConfig::new("test-token", server.uri());
        ProviderClient::new(&config).expect("client builds")
    }

    fn controller(
        client: ProviderClient,
        store: Arc<InMemoryStore>,
    ) -> Arc<InstanceController<InMemoryStore, InMemoryStore, NullInstanceRegistry>> {
        let app_controller = Arc::new(AppController::new(
            "user-123".to_string(),
            AppControllerConfig {
                app_name_prefix: "kc-".to_string(),
                org_slug: "personal".to_string(),
            },
            client.clone(),
            Arc::clone(&store),
        ));
        let config = InstanceControllerConfig {
            default_regions: vec!["ord".to_string()],
            gateway_hmac_secret: b"test-secret".to_vec(),
            platform_default_env: HashMap::new(),
            machine_image: "registry/kiloclaw:latest".to_string(),
        };
        Arc::new(InstanceController::new(
            "user-123".to_string(),
            config,
            client,
            store,
            app_controller,
            Arc::new(NullInstanceRegistry),
            Arc::new(PassthroughDecryptor),
        ))
    }

    fn running_record(app_name: &str, machine_id: &str) -> InstanceRecord {
        InstanceRecord {
            user_id: Some("user-123".to_string()),
            sandbox_id: Some("sandbox-abc".to_string()),
            status: InstanceStatus::Running,
            fly_app_name: Some(app_name.to_string()),
            fly_machine_id: Some(machine_id.to_string()),
            ..Default::default()
        }
    }

    // S1 — two-phase destroy: the machine delete fails, the volume delete
    // succeeds. Only the volume's pending id is cleared.
    #[tokio::test]
    async fn destroy_clears_only_the_pending_id_that_succeeded() {
        let mut record = running_record("app-1", "m1");
        record.fly_volume_id = Some("v1".to_string());

        let store = Arc::new(InMemoryStore::new());
        store.save_instance("user-123", &record).await.unwrap();

        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/apps/app-1/machines/m1"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({"error": "fail"})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/apps/app-1/volumes/v1"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let ctrl = controller(client, Arc::clone(&store));

        ctrl.destroy().await.expect("destroy itself never fails on pending-delete errors");

        let persisted = store.load_instance("user-123").await.unwrap();
        assert_eq!(persisted.status, InstanceStatus::Destroying);
        assert_eq!(persisted.pending_destroy_machine_id.as_deref(), Some("m1"));
        assert_eq!(persisted.pending_destroy_volume_id, None);
    }

    // S8 — a reserved-prefix env var name is rejected synchronously, before
    // any persistence happens.
    #[tokio::test]
    async fn provision_rejects_reserved_prefix_env_var_before_persisting() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;
        let store = Arc::new(InMemoryStore::new());
        let ctrl = controller(client, Arc::clone(&store));

        let mut env_vars = HashMap::new();
        env_vars.insert("KILOCLAW_ENC_HACK".to_string(), "x".to_string());
        let config = InstanceConfig {
            env_vars: Some(env_vars),
            ..Default::default()
        };

        let err = ctrl.provision(config).await.expect_err("reserved prefix must be rejected");
        assert!(matches!(err, Error::InvalidArgument(_)));

        let persisted = store.load_instance("user-123").await.unwrap();
        assert!(persisted.is_empty_record());
    }

    // S2 — a machine stuck in `stopped` for `SELF_HEAL_THRESHOLD` consecutive
    // reconcile passes is declared stopped and the fail counter resets.
    #[tokio::test]
    async fn self_heal_threshold_stops_a_stuck_machine() {
        let record = running_record("app-1", "m1");
        let store = Arc::new(InMemoryStore::new());
        store.save_instance("user-123", &record).await.unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apps/app-1/machines/m1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "m1",
                "name": "instance",
                "state": "stopped",
                "region": "ord",
                "config": {
                    "image": "img",
                    "guest": {"cpu_kind": "shared", "cpus": 1, "memory_mb": 256},
                    "metadata": {}
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let ctrl = controller(client, Arc::clone(&store));

        let mut record = store.load_instance("user-123").await.unwrap();
        for _ in 0..SELF_HEAL_THRESHOLD {
            ctrl.reconcile_machine(&mut record).await.unwrap();
        }

        assert_eq!(record.status, InstanceStatus::Stopped);
        assert_eq!(record.health_check_fail_count, 0);
    }

    // S3 — the machine is gone (404): clear the machine id and fall back to
    // stopped rather than retrying forever.
    #[tokio::test]
    async fn reconcile_clears_machine_id_on_404() {
        let record = running_record("app-1", "m1");
        let store = Arc::new(InMemoryStore::new());
        store.save_instance("user-123", &record).await.unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apps/app-1/machines/m1"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({"error": "not found"})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let ctrl = controller(client, Arc::clone(&store));

        let mut record = store.load_instance("user-123").await.unwrap();
        ctrl.reconcile_machine(&mut record).await.unwrap();

        assert_eq!(record.fly_machine_id, None);
        assert_eq!(record.status, InstanceStatus::Stopped);
    }

    // S10 — the live-check flips the in-memory status belief only; the
    // persisted record remains the reconciler's exclusive responsibility.
    #[tokio::test]
    async fn live_check_updates_in_memory_view_without_persisting() {
        let record = running_record("app-1", "m1");
        let store = Arc::new(InMemoryStore::new());
        store.save_instance("user-123", &record).await.unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apps/app-1/machines/m1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "m1",
                "name": "instance",
                "state": "stopped",
                "region": "ord",
                "config": {
                    "image": "img",
                    "guest": {"cpu_kind": "shared", "cpus": 1, "memory_mb": 256},
                    "metadata": {}
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let ctrl = controller(client, Arc::clone(&store));

        let first = ctrl.get_status().await.unwrap().expect("record exists");
        assert_eq!(first.status, InstanceStatus::Running);

        // Let the background live-check task spawned by the call above run.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let second = ctrl.get_status().await.unwrap().expect("record exists");
        assert_eq!(second.status, InstanceStatus::Stopped);

        let persisted = store.load_instance("user-123").await.unwrap();
        assert_eq!(persisted.status, InstanceStatus::Running);
    }
}
