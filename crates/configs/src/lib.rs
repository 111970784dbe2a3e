use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SECRET_VERSION: &str = "latest";
pub const DEFAULT_CREDENTIALS_PATH: &str = "/tmp/credentials.json";
pub const DEFAULT_SECRET_MANAGER_ENDPOINT: &str = "https://secretmanager.googleapis.com";
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";
pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
pub const ADC_FILE_NAME: &str = "application_default_credentials.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("cannot load config file {path}: {reason}")]
    File { path: String, reason: String },
}

#[derive(Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gcp: GcpConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: DEFAULT_PORT, worker_threads: None }
    }
}

/// Where the storage credentials live and how Google Cloud is reached.
#[derive(Debug, Clone, Deserialize)]
pub struct GcpConfig {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub credentials_secret_name: String,
    #[serde(default = "default_secret_version")]
    pub credentials_secret_version: String,
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    #[serde(default = "default_secret_manager_endpoint")]
    pub secret_manager_endpoint: String,
    #[serde(default = "default_storage_endpoint")]
    pub storage_endpoint: String,
    #[serde(default)]
    pub storage_emulator_host: Option<String>,
    #[serde(default = "default_metadata_host")]
    pub metadata_host: String,
    /// Service-account file used to reach Secret Manager itself.
    /// When unset the metadata server is asked for a token.
    #[serde(default)]
    pub ambient_credentials: Option<PathBuf>,
    /// gcloud's application-default credentials, tried when present and
    /// `ambient_credentials` is unset.
    #[serde(default)]
    pub adc_well_known_file: Option<PathBuf>,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            credentials_secret_name: String::new(),
            credentials_secret_version: default_secret_version(),
            credentials_path: default_credentials_path(),
            secret_manager_endpoint: default_secret_manager_endpoint(),
            storage_endpoint: default_storage_endpoint(),
            storage_emulator_host: None,
            metadata_host: default_metadata_host(),
            ambient_credentials: None,
            adc_well_known_file: None,
        }
    }
}

#[derive(Clone, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub api_key: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = if self.api_key.is_empty() { "<unset>" } else { "<redacted>" };
        f.debug_struct("AuthConfig").field("api_key", &shown).finish()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub bucket_name: String,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("server", &self.server)
            .field("gcp", &self.gcp)
            .field("auth", &self.auth)
            .field("storage", &self.storage)
            .finish()
    }
}

fn default_host() -> String { "0.0.0.0".into() }
fn default_port() -> u16 { DEFAULT_PORT }
fn default_secret_version() -> String { DEFAULT_SECRET_VERSION.into() }
fn default_credentials_path() -> PathBuf { PathBuf::from(DEFAULT_CREDENTIALS_PATH) }
fn default_secret_manager_endpoint() -> String { DEFAULT_SECRET_MANAGER_ENDPOINT.into() }
fn default_storage_endpoint() -> String { DEFAULT_STORAGE_ENDPOINT.into() }
fn default_metadata_host() -> String { DEFAULT_METADATA_HOST.into() }

/// Read the optional TOML file. A missing file yields `None`.
pub fn load_file(path: &Path) -> Result<Option<AppConfig>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ConfigError::File { path: path.display().to_string(), reason: e.to_string() })
        }
    };
    let cfg: AppConfig = toml::from_str(&content)
        .map_err(|e| ConfigError::File { path: path.display().to_string(), reason: e.to_string() })?;
    Ok(Some(cfg))
}

impl AppConfig {
    /// Assemble the configuration from `CONFIG_PATH` (default `config.toml`)
    /// and the process environment. Environment values win.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        let file = load_file(Path::new(&path))?;
        Self::from_lookup(file, |key| std::env::var(key).ok())
    }

    /// Merge `lookup` over `base` (or the defaults). Empty variables count as unset.
    pub fn from_lookup<F>(base: Option<AppConfig>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = base.unwrap_or_default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("GOOGLE_CLOUD_PROJECT") { cfg.gcp.project_id = v; }
        if let Some(v) = get("CREDENTIALS_SECRET_NAME") { cfg.gcp.credentials_secret_name = v; }
        if let Some(v) = get("CREDENTIALS_SECRET_VERSION") { cfg.gcp.credentials_secret_version = v; }
        if let Some(v) = get("CREDENTIALS_PATH") { cfg.gcp.credentials_path = PathBuf::from(v); }
        if let Some(v) = get("SECRET_MANAGER_ENDPOINT") { cfg.gcp.secret_manager_endpoint = v; }
        if let Some(v) = get("STORAGE_ENDPOINT") { cfg.gcp.storage_endpoint = v; }
        if let Some(v) = get("STORAGE_EMULATOR_HOST") { cfg.gcp.storage_emulator_host = Some(v); }
        if let Some(v) = get("GCE_METADATA_HOST") { cfg.gcp.metadata_host = v; }
        if let Some(v) = get("GOOGLE_APPLICATION_CREDENTIALS") { cfg.gcp.ambient_credentials = Some(PathBuf::from(v)); }
        if let Some(dir) = get("CLOUDSDK_CONFIG") {
            cfg.gcp.adc_well_known_file = Some(Path::new(&dir).join(ADC_FILE_NAME));
        } else if let Some(home) = get("HOME") {
            cfg.gcp.adc_well_known_file = Some(Path::new(&home).join(".config/gcloud").join(ADC_FILE_NAME));
        }
        if let Some(v) = get("API_KEY") { cfg.auth.api_key = v; }
        if let Some(v) = get("BUCKET_NAME") { cfg.storage.bucket_name = v; }
        if let Some(v) = get("SERVER_HOST") { cfg.server.host = v; }
        if let Some(v) = get("PORT_NUM") {
            cfg.server.port = v.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                key: "PORT_NUM",
                reason: e.to_string(),
            })?;
        }
        if let Some(v) = get("TOKIO_WORKER_THREADS") {
            let n = v.trim().parse::<usize>().map_err(|e| ConfigError::Invalid {
                key: "TOKIO_WORKER_THREADS",
                reason: e.to_string(),
            })?;
            cfg.server.worker_threads = Some(n);
        }

        cfg.normalize()?;
        Ok(cfg)
    }

    fn normalize(&mut self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            self.server.host = default_host();
        }
        if self.server.port == 0 {
            return Err(ConfigError::Invalid { key: "PORT_NUM", reason: "port must be in 1..=65535".into() });
        }
        if self.server.worker_threads == Some(0) {
            self.server.worker_threads = None;
        }
        if self.gcp.credentials_secret_version.trim().is_empty() {
            self.gcp.credentials_secret_version = default_secret_version();
        }
        Ok(())
    }

    /// Settings the request path depends on. Checked once credentials are in place.
    pub fn validate_serving(&self) -> Result<(), ConfigError> {
        if self.auth.api_key.is_empty() {
            return Err(ConfigError::Missing("API_KEY"));
        }
        if self.storage.bucket_name.trim().is_empty() {
            return Err(ConfigError::Missing("BUCKET_NAME"));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl GcpConfig {
    /// Fully-qualified Secret Manager resource name of the credentials version.
    pub fn secret_version_name(&self) -> String {
        format!(
            "projects/{}/secrets/{}/versions/{}",
            self.project_id, self.credentials_secret_name, self.credentials_secret_version
        )
    }
}
