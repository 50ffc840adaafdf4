use reqwest::Method;

use crate::client::ProviderClient;
use crate::error::ClientError;
use crate::models::{ExecRequest, ExecResponse};

impl ProviderClient {
    pub async fn exec(
        &self,
        app_name: &str,
        machine_id: &str,
        command: Vec<String>,
        timeout: Option<u32>,
    ) -> Result<ExecResponse, ClientError> {
        let req = ExecRequest { command, timeout };
        let builder = ProviderClient::json_body(
            self.request(
                Method::POST,
                &format!("/apps/{app_name}/machines/{machine_id}/exec"),
            ),
            &req,
        );
        self.send_json(builder).await
    }
}
