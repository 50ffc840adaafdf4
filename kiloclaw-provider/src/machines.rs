use std::time::Duration;

use reqwest::Method;

use crate::client::ProviderClient;
use crate::error::ClientError;
use crate::models::{
    CreateMachineRequest, Machine, MachineConfig, StartMachineResponse, StopMachineResponse,
    WaitState,
};

impl ProviderClient {
    pub async fn create_machine(
        &self,
        app_name: &str,
        name: Option<&str>,
        region: Option<&str>,
        config: MachineConfig,
        min_secrets_version: Option<u64>,
    ) -> Result<Machine, ClientError> {
        let req = CreateMachineRequest {
            name: name.map(str::to_string),
            region: region.map(str::to_string),
            config,
            skip_launch: None,
            min_secrets_version,
        };
        let builder = ProviderClient::json_body(
            self.request(Method::POST, &format!("/apps/{app_name}/machines")),
            &req,
        );
        self.send_json(builder).await
    }

    pub async fn get_machine(
        &self,
        app_name: &str,
        machine_id: &str,
    ) -> Result<Option<Machine>, ClientError> {
        let builder = self.request(
            Method::GET,
            &format!("/apps/{app_name}/machines/{machine_id}"),
        );
        self.send_json_optional(builder).await
    }

    pub async fn update_machine(
        &self,
        app_name: &str,
        machine_id: &str,
        config: MachineConfig,
        min_secrets_version: Option<u64>,
    ) -> Result<Machine, ClientError> {
        let req = crate::models::UpdateMachineRequest {
            config,
            min_secrets_version,
        };
        let builder = ProviderClient::json_body(
            self.request(
                Method::POST,
                &format!("/apps/{app_name}/machines/{machine_id}"),
            ),
            &req,
        );
        self.send_json(builder).await
    }

    pub async fn start_machine(
        &self,
        app_name: &str,
        machine_id: &str,
    ) -> Result<StartMachineResponse, ClientError> {
        let builder = self.request(
            Method::POST,
            &format!("/apps/{app_name}/machines/{machine_id}/start"),
        );
        self.send_json(builder).await
    }

    pub async fn stop_machine(
        &self,
        app_name: &str,
        machine_id: &str,
    ) -> Result<StopMachineResponse, ClientError> {
        let builder = self.request(
            Method::POST,
            &format!("/apps/{app_name}/machines/{machine_id}/stop"),
        );
        self.send_json(builder).await
    }

    /// Stop then long-poll until the machine reports `stopped`, per spec
    /// §4.3 stop sequencing (the controller must not return "stopped" to a
    /// caller until the provider agrees).
    pub async fn stop_machine_and_wait(
        &self,
        app_name: &str,
        machine_id: &str,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        self.stop_machine(app_name, machine_id).await?;
        self.wait(app_name, machine_id, WaitState::Stopped, timeout)
            .await
    }

    /// `force=true` tells the provider to destroy a running machine without
    /// requiring a prior stop — used by the two-phase destroy path, which has
    /// already stopped the machine via its own alarm-driven flow but must
    /// still tolerate a machine that raced back to `started`.
    pub async fn destroy_machine(
        &self,
        app_name: &str,
        machine_id: &str,
        force: bool,
    ) -> Result<(), ClientError> {
        let path = format!("/apps/{app_name}/machines/{machine_id}?force={force}");
        let builder = self.request(Method::DELETE, &path);
        match self.send_unit(builder).await {
            Ok(()) => Ok(()),
            Err(e) if crate::error::not_found(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Long-poll the provider's `wait` endpoint until `machine_id` reaches
    /// `state`, or the request times out. A `404` during wait means the
    /// machine is gone, which the caller treats the same as the destroyed
    /// terminal state when waiting for destruction.
    pub async fn wait(
        &self,
        app_name: &str,
        machine_id: &str,
        state: WaitState,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let path = format!(
            "/apps/{app_name}/machines/{machine_id}/wait?state={}&timeout={}",
            state.wire_value(),
            timeout.as_secs()
        );
        let builder = self.request(Method::GET, &path);
        match self.send_unit(builder).await {
            Ok(()) => Ok(()),
            Err(e) if crate::error::not_found(&e) && state == WaitState::Destroyed => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// List machines in an app, optionally filtered by a single metadata
    /// key/value pair — used for both the `user_id` ownership check on app
    /// creation and the metadata-based recovery scan (spec §4.3.7).
    pub async fn list_machines(
        &self,
        app_name: &str,
        metadata_filter: Option<(&str, &str)>,
    ) -> Result<Vec<Machine>, ClientError> {
        let path = match metadata_filter {
            Some((key, value)) => {
                format!("/apps/{app_name}/machines?metadata.{key}={value}")
            }
            None => format!("/apps/{app_name}/machines"),
        };
        let builder = self.request(Method::GET, &path);
        match self.send_json_optional::<Vec<Machine>>(builder).await? {
            Some(machines) => Ok(machines),
            None => Ok(Vec::new()),
        }
    }
}
