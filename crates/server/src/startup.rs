use std::sync::Arc;

use axum::Router;
use configs::AppConfig;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use service::bootstrap::{bootstrap, check_config};
use service::gcp::{token, SecretManagerClient, SecretSource};

use crate::errors::StartupError;
use crate::routes;
use crate::state::AppState;

fn build_cors() -> CorsLayer {
    CorsLayer::very_permissive()
}

/// Bootstrap storage credentials, check the serving settings, and build the router.
/// Nothing is bound here, so a failure leaves no listener behind.
pub async fn build_app(cfg: &AppConfig, secrets: &dyn SecretSource) -> Result<Router, StartupError> {
    let boot = bootstrap(&cfg.gcp, secrets).await?;
    cfg.validate_serving()?;

    let state = AppState::new(&cfg.auth.api_key, &cfg.storage.bucket_name, Arc::new(boot.storage));
    info!(
        bucket = %cfg.storage.bucket_name,
        credentials = %boot.credentials_path.display(),
        "storage client ready"
    );
    Ok(routes::build_router(state, build_cors()))
}

/// Public entry: bootstrap, bind, and serve until the process exits.
pub async fn run(cfg: AppConfig) -> Result<(), StartupError> {
    if let Err(e) = check_config(&cfg.gcp) {
        error!(error = %e, "startup aborted");
        return Err(e.into());
    }
    let http = reqwest::Client::new();
    let tokens = token::ambient_provider(&cfg.gcp, http.clone()).await?;
    let secrets = SecretManagerClient::new(http, cfg.gcp.secret_manager_endpoint.clone(), tokens);

    let app = match build_app(&cfg, &secrets).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "startup aborted");
            return Err(e);
        }
    };

    let listener = TcpListener::bind((cfg.server.host.as_str(), cfg.server.port))
        .await
        .map_err(StartupError::Listener)?;
    let addr = listener.local_addr().map_err(StartupError::Listener)?;
    info!(%addr, "server starting");
    axum::serve(listener, app).await.map_err(StartupError::Listener)?;
    Ok(())
}
