use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use configs::GcpConfig;
use reqwest::{StatusCode, Url};
use tracing::{debug, info, instrument};

use super::token::{Anonymous, CredentialsFile, TokenProvider};
use crate::errors::StorageError;

/// Read access to objects in named buckets.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn read_object(&self, bucket: &str, name: &str) -> Result<Vec<u8>, StorageError>;
}

/// Cloud Storage JSON API client. Cheap to share behind an `Arc`.
pub struct GcsClient {
    client: reqwest::Client,
    base: Url,
    tokens: Arc<dyn TokenProvider>,
}

fn emulator_endpoint(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

impl GcsClient {
    pub fn new(client: reqwest::Client, endpoint: &str, tokens: Arc<dyn TokenProvider>) -> Result<Self, StorageError> {
        let base = Url::parse(endpoint)
            .map_err(|e| StorageError::Config(format!("invalid storage endpoint {endpoint:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(StorageError::Config(format!("storage endpoint {endpoint:?} cannot be a base URL")));
        }
        Ok(Self { client, base, tokens })
    }

    /// Build a client authenticated with the credentials file stored at `path`
    /// (service-account key or gcloud user credentials).
    /// With an emulator host configured, requests go there unauthenticated; the
    /// file is still parsed so a bad payload fails here rather than on first read.
    pub async fn from_credentials_file(gcp: &GcpConfig, path: &Path) -> Result<Self, StorageError> {
        let creds = CredentialsFile::from_file(path).await?;
        let client = reqwest::Client::new();
        match gcp.storage_emulator_host.as_deref() {
            Some(host) => {
                let endpoint = emulator_endpoint(host);
                info!(%endpoint, "storage client targets emulator");
                Self::new(client, &endpoint, Arc::new(Anonymous))
            }
            None => {
                info!(principal = %creds.principal(), endpoint = %gcp.storage_endpoint, "storage client initialized");
                let tokens = creds.into_provider(client.clone())?;
                Self::new(client, &gcp.storage_endpoint, tokens)
            }
        }
    }

    fn object_url(&self, bucket: &str, name: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["storage", "v1", "b", bucket, "o", name]);
        }
        url.query_pairs_mut().append_pair("alt", "media");
        url
    }
}

#[async_trait]
impl ObjectStore for GcsClient {
    #[instrument(skip(self))]
    async fn read_object(&self, bucket: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        let url = self.object_url(bucket, name);
        let mut req = self.client.get(url);
        if let Some(token) = self.tokens.token().await? {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| StorageError::Read(format!("failed to create reader: {e}")))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(format!("gs://{bucket}/{name}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::Read(format!("failed to create reader: storage returned {status}: {body}")));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StorageError::Read(format!("failed to read file: {e}")))?;
        debug!(bytes = bytes.len(), "object read");
        Ok(bytes.to_vec())
    }
}
