use reqwest::Method;

use crate::client::ProviderClient;
use crate::error::ClientError;
use crate::models::{App, CreateAppRequest};
use kiloclaw_core::constants::METADATA_KEY_USER_ID;

impl ProviderClient {
    /// Create an app, isolated on its own network (spec §4.2 step 1: network
    /// name equals app name). On a `409` (name already exists) the client
    /// verifies tenant ownership before treating it as success — see
    /// [`Self::verify_app_ownership_on_conflict`].
    pub async fn create_app(
        &self,
        app_name: &str,
        org_slug: &str,
        requesting_user_id: &str,
    ) -> Result<App, ClientError> {
        let req = CreateAppRequest {
            app_name: app_name.to_string(),
            org_slug: org_slug.to_string(),
            network: app_name.to_string(),
        };

        let builder = ProviderClient::json_body(self.request(Method::POST, "/apps"), &req);
        match self.send_json::<App>(builder).await {
            Ok(app) => Ok(app),
            Err(ClientError::Provider(p)) if p.status == 409 => {
                self.verify_app_ownership_on_conflict(app_name, requesting_user_id)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Spec §4.1 "create_app 409 handling": list the app's machines and
    /// check the `kiloclaw_user_id` metadata tag. A machine tagged to a
    /// different user means two user ids derived the same app name — a
    /// security-relevant, non-recoverable collision. An empty list, a list
    /// where every machine is tagged to the requesting user, or a failure to
    /// even enumerate (transient) all succeed: this fails open on inability
    /// to enumerate, matching the pre-check behavior the spec documents as
    /// an explicit Open Question.
    async fn verify_app_ownership_on_conflict(
        &self,
        app_name: &str,
        requesting_user_id: &str,
    ) -> Result<App, ClientError> {
        match self.list_machines(app_name, None).await {
            Ok(machines) => {
                for machine in &machines {
                    if let Some(owner) = machine.config.metadata.get(METADATA_KEY_USER_ID) {
                        if owner != requesting_user_id {
                            return Err(ClientError::AppNameCollision {
                                app_name: app_name.to_string(),
                                requesting_user_id: requesting_user_id.to_string(),
                            });
                        }
                    }
                }
                self.fetch_existing_app(app_name).await
            }
            Err(_) => self.fetch_existing_app(app_name).await,
        }
    }

    async fn fetch_existing_app(&self, app_name: &str) -> Result<App, ClientError> {
        match self.get_app(app_name).await? {
            Some(app) => Ok(app),
            None => Ok(App {
                id: app_name.to_string(),
                name: app_name.to_string(),
                organization: None,
            }),
        }
    }

    /// `None` is the not-found signal, matching spec §4.1's "returns the app
    /// or a not-found signal" rather than turning a routine check into an
    /// error.
    pub async fn get_app(&self, app_name: &str) -> Result<Option<App>, ClientError> {
        let builder = self.request(Method::GET, &format!("/apps/{app_name}"));
        self.send_json_optional(builder).await
    }

    pub async fn delete_app(&self, app_name: &str) -> Result<(), ClientError> {
        let builder = self.request(Method::DELETE, &format!("/apps/{app_name}"));
        match self.send_unit(builder).await {
            Ok(()) => Ok(()),
            Err(e) if crate::error::not_found(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
