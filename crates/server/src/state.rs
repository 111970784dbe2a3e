use std::sync::Arc;

use service::gcp::ObjectStore;

/// Shared, read-only state handed to every handler and to the API-key check.
#[derive(Clone)]
pub struct AppState {
    pub api_key: Arc<str>,
    pub bucket: Arc<str>,
    pub store: Arc<dyn ObjectStore>,
}

impl AppState {
    pub fn new(api_key: &str, bucket: &str, store: Arc<dyn ObjectStore>) -> Self {
        Self { api_key: Arc::from(api_key), bucket: Arc::from(bucket), store }
    }
}
