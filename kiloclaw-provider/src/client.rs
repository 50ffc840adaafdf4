use reqwest::{header, Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ProviderConfig;
use crate::error::{ClientError, ProviderError};

/// Typed HTTP client for the compute provider's REST surface (spec §4.1).
///
/// Every method takes `&self` and is safe to call concurrently — the client
/// holds no per-user state, it's the controllers above it that serialize.
#[derive(Clone)]
pub struct ProviderClient {
    pub(crate) http: Client,
    pub(crate) base_url: String,
    pub(crate) app_name: Option<String>,
}

impl ProviderClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ClientError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", config.api_token))
                .map_err(|e| ClientError::Decode(e.to_string()))?,
        );

        let http = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(ClientError::Transport)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            app_name: config.app_name.clone(),
        })
    }

    pub fn app_name(&self) -> Option<&str> {
        self.app_name.as_deref()
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.url(path))
    }

    /// Send a request with no expected response body beyond an ok/failure
    /// signal.
    pub(crate) async fn send_unit(&self, builder: RequestBuilder) -> Result<(), ClientError> {
        let response = builder.send().await.map_err(ClientError::Transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Provider(ProviderError::new(status.as_u16(), body)))
    }

    /// Send a request and decode a JSON response body into `T`.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = builder.send().await.map_err(ClientError::Transport)?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(ClientError::Provider(ProviderError::new(status.as_u16(), body)));
        }

        serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Like [`Self::send_json`] but a `404` is mapped to `Ok(None)` instead
    /// of an error — used by `get` operations whose callers treat "missing"
    /// as a plain value rather than a control-flow error.
    pub(crate) async fn send_json_optional<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<Option<T>, ClientError> {
        match self.send_json(builder).await {
            Ok(value) => Ok(Some(value)),
            Err(ClientError::Provider(p)) if p.status == 404 => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn json_body<T: Serialize>(builder: RequestBuilder, body: &T) -> RequestBuilder {
        builder.json(body)
    }
}
