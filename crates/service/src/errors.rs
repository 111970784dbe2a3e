use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid credentials: {0}")]
    Credentials(String),
    #[error("token request failed: {0}")]
    Request(String),
    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed token response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum SecretError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("request failed: {0}")]
    Request(String),
    #[error("secret manager returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid secret payload: {0}")]
    Payload(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Read(String),
    #[error(transparent)]
    Credentials(#[from] TokenError),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Startup failures. Every variant is fatal to the process.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("{0}")]
    Configuration(String),
    #[error("failed to access secret {name}: {source}")]
    SecretAccess {
        name: String,
        #[source]
        source: SecretError,
    },
    #[error("failed to write credentials file {}: {source}", .path.display())]
    LocalWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create storage client: {0}")]
    ClientInit(String),
}
