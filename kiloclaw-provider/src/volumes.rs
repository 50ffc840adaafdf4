use reqwest::Method;

use crate::client::ProviderClient;
use crate::error::{insufficient_resources, ClientError};
use crate::models::{ComputeHint, CreateVolumeRequest, Volume, VolumeSnapshot};

/// Outcome of a region-fallback volume create: the volume that was actually
/// created, the region it landed in, and a re-ordered region list with every
/// region that returned `insufficient_resources` moved to the back — callers
/// persist this so the next attempt tries the last-successful region first
/// (spec §4.3.11 capacity-exhaustion recovery).
pub struct VolumePlacement {
    pub volume: Volume,
    pub region: String,
    pub reordered_regions: Vec<String>,
}

impl ProviderClient {
    pub async fn create_volume(
        &self,
        app_name: &str,
        name: &str,
        region: &str,
        size_gb: u32,
        source_volume_id: Option<&str>,
        compute_hint: Option<ComputeHint>,
    ) -> Result<Volume, ClientError> {
        let req = CreateVolumeRequest {
            name: name.to_string(),
            region: region.to_string(),
            size_gb,
            source_volume_id: source_volume_id.map(str::to_string),
            compute: compute_hint,
        };
        let builder = ProviderClient::json_body(
            self.request(Method::POST, &format!("/apps/{app_name}/volumes")),
            &req,
        );
        self.send_json(builder).await
    }

    /// Walk `regions` in order, creating a volume in the first one that
    /// succeeds. A region whose attempt fails with `insufficient_resources`
    /// is skipped and deprioritized for next time; any other error aborts the
    /// walk immediately (capacity exhaustion is the only retryable cause).
    pub async fn create_volume_with_fallback(
        &self,
        app_name: &str,
        name: &str,
        regions: &[String],
        size_gb: u32,
        source_volume_id: Option<&str>,
        compute_hint: Option<ComputeHint>,
    ) -> Result<VolumePlacement, ClientError> {
        let mut exhausted = Vec::new();

        for region in regions {
            match self
                .create_volume(
                    app_name,
                    name,
                    region,
                    size_gb,
                    source_volume_id,
                    compute_hint.clone(),
                )
                .await
            {
                Ok(volume) => {
                    let mut reordered: Vec<String> = regions
                        .iter()
                        .filter(|r| *r != region && !exhausted.contains(*r))
                        .cloned()
                        .collect();
                    reordered.insert(0, region.clone());
                    reordered.extend(exhausted);
                    return Ok(VolumePlacement {
                        volume,
                        region: region.clone(),
                        reordered_regions: reordered,
                    });
                }
                Err(e) if insufficient_resources(&e) => {
                    exhausted.push(region.clone());
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(ClientError::Decode(format!(
            "capacity exhausted in every candidate region for volume {name}"
        )))
    }

    pub async fn get_volume(
        &self,
        app_name: &str,
        volume_id: &str,
    ) -> Result<Option<Volume>, ClientError> {
        let builder = self.request(
            Method::GET,
            &format!("/apps/{app_name}/volumes/{volume_id}"),
        );
        self.send_json_optional(builder).await
    }

    pub async fn delete_volume(&self, app_name: &str, volume_id: &str) -> Result<(), ClientError> {
        let builder = self.request(
            Method::DELETE,
            &format!("/apps/{app_name}/volumes/{volume_id}"),
        );
        match self.send_unit(builder).await {
            Ok(()) => Ok(()),
            Err(e) if crate::error::not_found(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn list_volumes(&self, app_name: &str) -> Result<Vec<Volume>, ClientError> {
        let builder = self.request(Method::GET, &format!("/apps/{app_name}/volumes"));
        match self.send_json_optional::<Vec<Volume>>(builder).await? {
            Some(volumes) => Ok(volumes),
            None => Ok(Vec::new()),
        }
    }

    pub async fn list_volume_snapshots(
        &self,
        app_name: &str,
        volume_id: &str,
    ) -> Result<Vec<VolumeSnapshot>, ClientError> {
        let builder = self.request(
            Method::GET,
            &format!("/apps/{app_name}/volumes/{volume_id}/snapshots"),
        );
        match self.send_json_optional::<Vec<VolumeSnapshot>>(builder).await? {
            Some(snapshots) => Ok(snapshots),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placement_reorders_exhausted_regions_to_the_back() {
        let regions = vec!["ord".to_string(), "sjc".to_string(), "fra".to_string()];
        let exhausted = vec!["ord".to_string()];
        let success_region = "sjc".to_string();

        let mut reordered: Vec<String> = regions
            .iter()
            .filter(|r| **r != success_region && !exhausted.contains(r))
            .cloned()
            .collect();
        reordered.insert(0, success_region.clone());
        reordered.extend(exhausted);

        assert_eq!(reordered, vec!["sjc", "fra", "ord"]);
    }
}
