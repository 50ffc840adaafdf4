use reqwest::Method;

use crate::client::ProviderClient;
use crate::error::ClientError;
use crate::models::{AllocateIpRequest, AllocatedIp, IpAddressType};

impl ProviderClient {
    /// Allocate an IP of the given type for `app_name`. A `409` here means an
    /// address of that type is already allocated — idempotent-success, per
    /// spec §4.2 step 2 ("already-allocated is success, not failure").
    pub async fn allocate_ip(
        &self,
        app_name: &str,
        ip_type: IpAddressType,
    ) -> Result<(), ClientError> {
        let req = AllocateIpRequest {
            ip_type: ip_type.wire_value().to_string(),
        };
        let builder = ProviderClient::json_body(
            self.request(Method::POST, &format!("/apps/{app_name}/ips")),
            &req,
        );
        match self.send_json::<AllocatedIp>(builder).await {
            Ok(_) => Ok(()),
            Err(ClientError::Provider(p)) if p.status == 409 || p.status == 422 => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn list_ips(&self, app_name: &str) -> Result<Vec<AllocatedIp>, ClientError> {
        let builder = self.request(Method::GET, &format!("/apps/{app_name}/ips"));
        match self.send_json_optional::<Vec<AllocatedIp>>(builder).await? {
            Some(ips) => Ok(ips),
            None => Ok(Vec::new()),
        }
    }
}
