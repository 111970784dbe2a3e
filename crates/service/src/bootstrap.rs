//! One-shot credential bootstrap.
//!
//! Fetches the storage service-account key from Secret Manager, installs it
//! at the configured local path with owner-only permissions, and builds the
//! storage client from that file. Runs once, before the listener is bound.

use std::path::PathBuf;

use configs::GcpConfig;
use tracing::{info, instrument};

use crate::errors::BootstrapError;
use crate::gcp::{GcsClient, SecretSource};

/// Result of a successful bootstrap.
pub struct Bootstrapped {
    pub credentials_path: PathBuf,
    pub storage: GcsClient,
}

/// The settings bootstrap cannot start without. Safe to call before any
/// credentials or clients exist.
pub fn check_config(gcp: &GcpConfig) -> Result<(), BootstrapError> {
    if gcp.project_id.trim().is_empty() || gcp.credentials_secret_name.trim().is_empty() {
        return Err(BootstrapError::Configuration(
            "GOOGLE_CLOUD_PROJECT and CREDENTIALS_SECRET_NAME must be set".into(),
        ));
    }
    Ok(())
}

#[instrument(skip_all, fields(project = %gcp.project_id, secret = %gcp.credentials_secret_name))]
pub async fn bootstrap(gcp: &GcpConfig, secrets: &dyn SecretSource) -> Result<Bootstrapped, BootstrapError> {
    check_config(gcp)?;

    let name = gcp.secret_version_name();
    let payload = secrets
        .access_secret_version(&name)
        .await
        .map_err(|source| BootstrapError::SecretAccess { name: name.clone(), source })?;
    info!(%name, bytes = payload.len(), "credentials fetched from secret manager");

    let credentials_path = gcp.credentials_path.clone();
    common::env::write_private_file(&credentials_path, &payload)
        .await
        .map_err(|source| BootstrapError::LocalWrite { path: credentials_path.clone(), source })?;
    info!(path = %credentials_path.display(), "credentials written");

    let storage = GcsClient::from_credentials_file(gcp, &credentials_path)
        .await
        .map_err(|e| BootstrapError::ClientInit(e.to_string()))?;

    Ok(Bootstrapped { credentials_path, storage })
}
