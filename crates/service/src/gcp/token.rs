//! OAuth2 access tokens for Google APIs.
//!
//! Sources: the instance metadata server, a service-account JSON key
//! (self-signed JWT exchanged at the token endpoint), gcloud user
//! credentials (refresh-token grant), and no credentials for emulators.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use configs::GcpConfig;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::TokenError;

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const REFRESH_TOKEN_GRANT: &str = "refresh_token";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

/// Source of bearer tokens for outgoing API calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// `None` means the request is sent without an `Authorization` header.
    async fn token(&self) -> Result<Option<String>, TokenError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

async fn exchange(req: reqwest::RequestBuilder) -> Result<CachedToken, TokenError> {
    let resp = req.send().await.map_err(|e| TokenError::Request(e.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(TokenError::Rejected { status: status.as_u16(), body });
    }
    let parsed: TokenResponse = resp
        .json()
        .await
        .map_err(|e| TokenError::Malformed(e.to_string()))?;
    let ttl = parsed.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS);
    Ok(CachedToken {
        value: parsed.access_token,
        expires_at: Utc::now() + Duration::seconds(ttl),
    })
}

/// No credentials. Used against emulators.
#[derive(Debug, Default, Clone, Copy)]
pub struct Anonymous;

#[async_trait]
impl TokenProvider for Anonymous {
    async fn token(&self) -> Result<Option<String>, TokenError> {
        Ok(None)
    }
}

/// Default service account of the instance, via the metadata server.
pub struct MetadataServer {
    client: reqwest::Client,
    url: String,
    cache: Mutex<Option<CachedToken>>,
}

impl MetadataServer {
    pub fn new(client: reqwest::Client, host: &str) -> Self {
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{host}")
        };
        Self {
            client,
            url: format!("{base}/computeMetadata/v1/instance/service-accounts/default/token"),
            cache: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TokenProvider for MetadataServer {
    async fn token(&self) -> Result<Option<String>, TokenError> {
        let mut cache = self.cache.lock().await;
        if let Some(t) = cache.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(Some(t.value.clone()));
        }
        let req = self.client.get(&self.url).header("Metadata-Flavor", "Google");
        let fresh = exchange(req).await?;
        debug!(expires_at = %fresh.expires_at, "metadata server token refreshed");
        let value = fresh.value.clone();
        *cache = Some(fresh);
        Ok(Some(value))
    }
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The subset of a service-account JSON key needed to mint tokens.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type", default)]
    pub key_type: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TokenError> {
        let key: ServiceAccountKey = serde_json::from_slice(bytes)
            .map_err(|e| TokenError::Credentials(format!("not a service account key: {e}")))?;
        if let Some(kind) = key.key_type.as_deref() {
            if kind != "service_account" {
                return Err(TokenError::Credentials(format!(
                    "unsupported credential type {kind:?}, expected \"service_account\""
                )));
            }
        }
        if key.client_email.trim().is_empty() {
            return Err(TokenError::Credentials("client_email is empty".into()));
        }
        Ok(key)
    }

    pub async fn from_file(path: &Path) -> Result<Self, TokenError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TokenError::Credentials(format!("cannot read {}: {e}", path.display())))?;
        Self::from_slice(&bytes)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Service-account key exchanged for access tokens with the JWT bearer grant.
pub struct ServiceAccount {
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    client: reqwest::Client,
    scope: String,
    cache: Mutex<Option<CachedToken>>,
}

impl ServiceAccount {
    pub fn new(client: reqwest::Client, key: ServiceAccountKey) -> Result<Self, TokenError> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| TokenError::Credentials(format!("invalid private_key: {e}")))?;
        Ok(Self {
            key,
            signing_key,
            client,
            scope: CLOUD_PLATFORM_SCOPE.to_string(),
            cache: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    fn assertion(&self, now: DateTime<Utc>) -> Result<String, TokenError> {
        let iat = now.timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();
        encode(&header, &claims, &self.signing_key)
            .map_err(|e| TokenError::Credentials(format!("cannot sign assertion: {e}")))
    }
}

#[async_trait]
impl TokenProvider for ServiceAccount {
    async fn token(&self) -> Result<Option<String>, TokenError> {
        let mut cache = self.cache.lock().await;
        let now = Utc::now();
        if let Some(t) = cache.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(Some(t.value.clone()));
        }
        let assertion = self.assertion(now)?;
        let req = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())]);
        let fresh = exchange(req).await?;
        debug!(client_email = %self.key.client_email, expires_at = %fresh.expires_at, "service account token refreshed");
        let value = fresh.value.clone();
        *cache = Some(fresh);
        Ok(Some(value))
    }
}

/// User credentials written by `gcloud auth application-default login`.
#[derive(Clone, Deserialize)]
pub struct AuthorizedUserKey {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub quota_project_id: Option<String>,
}

impl std::fmt::Debug for AuthorizedUserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedUserKey")
            .field("client_id", &self.client_id)
            .field("token_uri", &self.token_uri)
            .field("quota_project_id", &self.quota_project_id)
            .finish_non_exhaustive()
    }
}

impl AuthorizedUserKey {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TokenError> {
        let key: AuthorizedUserKey = serde_json::from_slice(bytes)
            .map_err(|e| TokenError::Credentials(format!("not an authorized_user credential: {e}")))?;
        if key.refresh_token.trim().is_empty() {
            return Err(TokenError::Credentials("refresh_token is empty".into()));
        }
        Ok(key)
    }
}

/// Refresh-token grant against `token_uri`.
pub struct AuthorizedUser {
    key: AuthorizedUserKey,
    client: reqwest::Client,
    cache: Mutex<Option<CachedToken>>,
}

impl AuthorizedUser {
    pub fn new(client: reqwest::Client, key: AuthorizedUserKey) -> Self {
        Self { key, client, cache: Mutex::new(None) }
    }

    pub fn client_id(&self) -> &str {
        &self.key.client_id
    }
}

#[async_trait]
impl TokenProvider for AuthorizedUser {
    async fn token(&self) -> Result<Option<String>, TokenError> {
        let mut cache = self.cache.lock().await;
        if let Some(t) = cache.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(Some(t.value.clone()));
        }
        let req = self.client.post(&self.key.token_uri).form(&[
            ("grant_type", REFRESH_TOKEN_GRANT),
            ("client_id", self.key.client_id.as_str()),
            ("client_secret", self.key.client_secret.as_str()),
            ("refresh_token", self.key.refresh_token.as_str()),
        ]);
        let fresh = exchange(req).await?;
        debug!(client_id = %self.key.client_id, expires_at = %fresh.expires_at, "user token refreshed");
        let value = fresh.value.clone();
        *cache = Some(fresh);
        Ok(Some(value))
    }
}

/// A credentials JSON file, dispatched on its `type` field.
/// A file without `type` is read as a service-account key.
#[derive(Debug, Clone)]
pub enum CredentialsFile {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUserKey),
}

#[derive(Deserialize)]
struct CredentialKind {
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

impl CredentialsFile {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TokenError> {
        let header: CredentialKind = serde_json::from_slice(bytes)
            .map_err(|e| TokenError::Credentials(format!("credentials are not JSON: {e}")))?;
        match header.kind.as_deref() {
            None | Some("service_account") => ServiceAccountKey::from_slice(bytes).map(Self::ServiceAccount),
            Some("authorized_user") => AuthorizedUserKey::from_slice(bytes).map(Self::AuthorizedUser),
            Some(other) => Err(TokenError::Credentials(format!(
                "unsupported credential type {other:?}, expected \"service_account\" or \"authorized_user\""
            ))),
        }
    }

    pub async fn from_file(path: &Path) -> Result<Self, TokenError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TokenError::Credentials(format!("cannot read {}: {e}", path.display())))?;
        Self::from_slice(&bytes)
    }

    /// Account the credentials act as, for logs.
    pub fn principal(&self) -> &str {
        match self {
            Self::ServiceAccount(key) => &key.client_email,
            Self::AuthorizedUser(key) => &key.client_id,
        }
    }

    pub fn into_provider(self, client: reqwest::Client) -> Result<Arc<dyn TokenProvider>, TokenError> {
        match self {
            Self::ServiceAccount(key) => Ok(Arc::new(ServiceAccount::new(client, key)?)),
            Self::AuthorizedUser(key) => Ok(Arc::new(AuthorizedUser::new(client, key))),
        }
    }
}

/// Credentials used to reach Secret Manager before the storage credentials exist.
/// Searched in order: `GOOGLE_APPLICATION_CREDENTIALS`, gcloud's well-known
/// application-default file when it exists, then the metadata server.
pub async fn ambient_provider(
    gcp: &GcpConfig,
    client: reqwest::Client,
) -> Result<Arc<dyn TokenProvider>, TokenError> {
    if let Some(path) = &gcp.ambient_credentials {
        let creds = CredentialsFile::from_file(path).await?;
        info!(path = %path.display(), principal = %creds.principal(), "using GOOGLE_APPLICATION_CREDENTIALS for secret manager");
        return creds.into_provider(client);
    }
    if let Some(path) = &gcp.adc_well_known_file {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            let creds = CredentialsFile::from_file(path).await?;
            info!(path = %path.display(), principal = %creds.principal(), "using gcloud application default credentials for secret manager");
            return creds.into_provider(client);
        }
    }
    info!(host = %gcp.metadata_host, "using metadata server for secret manager");
    Ok(Arc::new(MetadataServer::new(client, &gcp.metadata_host)))
}
