pub mod token;
pub mod secret_manager;
pub mod storage;

pub use secret_manager::{SecretManagerClient, SecretSource};
pub use storage::{GcsClient, ObjectStore};
pub use token::{
    Anonymous, AuthorizedUser, AuthorizedUserKey, CredentialsFile, MetadataServer, ServiceAccount, ServiceAccountKey,
    TokenProvider,
};

/// Join a base endpoint and a path without doubling slashes.
pub(crate) fn join_endpoint(endpoint: &str, path: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), path.trim_start_matches('/'))
}
