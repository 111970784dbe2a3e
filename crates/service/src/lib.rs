//! Google Cloud access for the gateway.
//! - Token providers for the metadata server and service-account keys.
//! - Secret Manager and Cloud Storage clients over their REST APIs.
//! - The one-shot credential bootstrap run before the listener starts.

pub mod errors;
pub mod gcp;
pub mod bootstrap;
