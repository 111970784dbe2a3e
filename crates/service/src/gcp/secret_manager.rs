use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::join_endpoint;
use super::token::TokenProvider;
use crate::errors::SecretError;

/// Read access to versioned secret payloads.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// `name` is a full version resource name,
    /// `projects/{project}/secrets/{secret}/versions/{version}`.
    async fn access_secret_version(&self, name: &str) -> Result<Vec<u8>, SecretError>;
}

#[derive(Debug, Deserialize)]
struct AccessSecretVersionResponse {
    #[serde(default)]
    payload: Option<SecretPayload>,
}

#[derive(Debug, Deserialize)]
struct SecretPayload {
    #[serde(default)]
    data: String,
}

/// Secret Manager v1 REST client.
pub struct SecretManagerClient {
    client: reqwest::Client,
    endpoint: String,
    tokens: Arc<dyn TokenProvider>,
}

impl SecretManagerClient {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { client, endpoint: endpoint.into(), tokens }
    }
}

#[async_trait]
impl SecretSource for SecretManagerClient {
    #[instrument(skip(self))]
    async fn access_secret_version(&self, name: &str) -> Result<Vec<u8>, SecretError> {
        let url = join_endpoint(&self.endpoint, &format!("v1/{name}:access"));
        let mut req = self.client.get(&url);
        if let Some(token) = self.tokens.token().await? {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(|e| SecretError::Request(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(SecretError::Status { status: status.as_u16(), message });
        }

        let body: AccessSecretVersionResponse = resp
            .json()
            .await
            .map_err(|e| SecretError::Payload(e.to_string()))?;
        let payload = body
            .payload
            .ok_or_else(|| SecretError::Payload("response has no payload".into()))?;
        let data = general_purpose::STANDARD
            .decode(payload.data.as_bytes())
            .map_err(|e| SecretError::Payload(format!("payload is not base64: {e}")))?;
        debug!(bytes = data.len(), "secret version accessed");
        Ok(data)
    }
}
