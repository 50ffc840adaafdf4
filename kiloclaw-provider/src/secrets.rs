use reqwest::Method;

use crate::client::ProviderClient;
use crate::error::ClientError;
use crate::models::{SecretInfo, SetSecretRequest, SetSecretResponse};

impl ProviderClient {
    /// Set (create or overwrite) a single named app secret. The returned
    /// version feeds `min_secrets_version` on the next machine create/update
    /// so the provider won't launch against a stale secret (spec §4.2 step 3,
    /// §4.3.10).
    pub async fn set_secret(
        &self,
        app_name: &str,
        name: &str,
        value: &str,
    ) -> Result<u64, ClientError> {
        let req = SetSecretRequest {
            value: value.to_string(),
        };
        let builder = ProviderClient::json_body(
            self.request(Method::POST, &format!("/apps/{app_name}/secrets/{name}")),
            &req,
        );
        let resp: SetSecretResponse = self.send_json(builder).await?;
        Ok(resp.version)
    }

    pub async fn delete_secret(&self, app_name: &str, name: &str) -> Result<(), ClientError> {
        let builder = self.request(Method::DELETE, &format!("/apps/{app_name}/secrets/{name}"));
        match self.send_unit(builder).await {
            Ok(()) => Ok(()),
            Err(e) if crate::error::not_found(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn list_secrets(&self, app_name: &str) -> Result<Vec<SecretInfo>, ClientError> {
        let builder = self.request(Method::GET, &format!("/apps/{app_name}/secrets"));
        match self.send_json_optional::<Vec<SecretInfo>>(builder).await? {
            Some(secrets) => Ok(secrets),
            None => Ok(Vec::new()),
        }
    }
}
