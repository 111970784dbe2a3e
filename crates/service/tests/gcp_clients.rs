use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};
use base64::{engine::general_purpose, Engine as _};
use configs::GcpConfig;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use uuid::Uuid;

use service::errors::{SecretError, StorageError, TokenError};
use service::gcp::token::ambient_provider;
use service::gcp::{
    Anonymous, AuthorizedUser, AuthorizedUserKey, CredentialsFile, GcsClient, MetadataServer, ObjectStore,
    SecretManagerClient, SecretSource, ServiceAccount, ServiceAccountKey, TokenProvider,
};

/// Throwaway RSA pair used only to sign and verify test assertions.
const TEST_PRIVATE_KEY: &str = include_str!("fixtures/test_sa_key.pem");
const TEST_PUBLIC_KEY: &str = include_str!("fixtures/test_sa_key.pub.pem");
const CLIENT_EMAIL: &str = "reader@proj.iam.gserviceaccount.com";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

#[derive(Clone, Default)]
struct MockState {
    token_hits: Arc<AtomicUsize>,
    oauth_forms: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl MockState {
    fn forms(&self) -> Vec<HashMap<String, String>> {
        self.oauth_forms.lock().unwrap().clone()
    }
}

async fn oauth_token(State(state): State<MockState>, Form(form): Form<HashMap<String, String>>) -> impl IntoResponse {
    state.oauth_forms.lock().unwrap().push(form.clone());
    let grant = form.get("grant_type").map(String::as_str);
    let token = match grant {
        Some(JWT_BEARER_GRANT) if form.contains_key("assertion") => "sa-token",
        Some("refresh_token") if form.get("refresh_token").map(String::as_str) == Some("1//refresh") => "user-token",
        _ => return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"}))),
    };
    (StatusCode::OK, Json(json!({"access_token": token, "expires_in": 3600, "token_type": "Bearer"})))
}

async fn metadata_token(State(state): State<MockState>, headers: HeaderMap) -> impl IntoResponse {
    if headers.get("Metadata-Flavor").and_then(|v| v.to_str().ok()) != Some("Google") {
        return (StatusCode::FORBIDDEN, Json(json!({"error": "missing Metadata-Flavor"})));
    }
    state.token_hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::OK, Json(json!({"access_token": "meta-token", "expires_in": 3599, "token_type": "Bearer"})))
}

async fn access_secret(
    Path((project, secret, version)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "Bearer meta-token")
        .unwrap_or(false);
    if !authorized {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": {"code": 401}})));
    }
    if project != "proj" || secret != "creds" || version != "latest:access" {
        return (StatusCode::NOT_FOUND, Json(json!({"error": {"code": 404, "message": "secret not found"}})));
    }
    let data = general_purpose::STANDARD.encode(b"{\"k\":\"v\"}");
    (
        StatusCode::OK,
        Json(json!({
            "name": "projects/proj/secrets/creds/versions/1",
            "payload": {"data": data}
        })),
    )
}

async fn read_object(
    Path((bucket, object)): Path<(String, String)>,
    Query(q): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if q.get("alt").map(String::as_str) != Some("media") {
        return (StatusCode::BAD_REQUEST, "alt=media required").into_response();
    }
    if bucket == "private" {
        let bearer = headers.get("authorization").and_then(|v| v.to_str().ok()).unwrap_or_default();
        return match bearer {
            "Bearer sa-token" | "Bearer user-token" => format!("private {object}").into_response(),
            _ => (StatusCode::UNAUTHORIZED, "Anonymous caller does not have storage.objects.get access").into_response(),
        };
    }
    match (bucket.as_str(), object.as_str()) {
        ("files", "dir/hello.txt") => "hello from gcs".into_response(),
        ("files", "broken") => (StatusCode::INTERNAL_SERVER_ERROR, "backend exploded").into_response(),
        _ => (StatusCode::NOT_FOUND, "No such object").into_response(),
    }
}

async fn spawn_mock() -> anyhow::Result<(SocketAddr, MockState)> {
    let state = MockState::default();
    let app = Router::new()
        .route("/computeMetadata/v1/instance/service-accounts/default/token", get(metadata_token))
        .route("/v1/projects/:project/secrets/:secret/versions/:version", get(access_secret))
        .route("/storage/v1/b/:bucket/o/:object", get(read_object))
        .route("/token", post(oauth_token))
        .with_state(state.clone());
    let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await { eprintln!("mock server error: {}", e); }
    });
    Ok((addr, state))
}

#[tokio::test]
async fn metadata_token_is_cached() -> anyhow::Result<()> {
    let (addr, state) = spawn_mock().await?;
    let provider = MetadataServer::new(reqwest::Client::new(), &addr.to_string());

    assert_eq!(provider.token().await?.as_deref(), Some("meta-token"));
    assert_eq!(provider.token().await?.as_deref(), Some("meta-token"));
    assert_eq!(state.token_hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn secret_manager_decodes_payload_with_metadata_token() -> anyhow::Result<()> {
    let (addr, _) = spawn_mock().await?;
    let client = reqwest::Client::new();
    let tokens = Arc::new(MetadataServer::new(client.clone(), &addr.to_string()));
    let secrets = SecretManagerClient::new(client, format!("http://{addr}"), tokens);

    let data = secrets.access_secret_version("projects/proj/secrets/creds/versions/latest").await?;
    assert_eq!(data, b"{\"k\":\"v\"}");
    Ok(())
}

#[tokio::test]
async fn secret_manager_surfaces_http_errors() -> anyhow::Result<()> {
    let (addr, _) = spawn_mock().await?;
    let client = reqwest::Client::new();

    // no token at all
    let anon = SecretManagerClient::new(client.clone(), format!("http://{addr}"), Arc::new(Anonymous));
    let err = anon.access_secret_version("projects/proj/secrets/creds/versions/latest").await.unwrap_err();
    assert!(matches!(err, SecretError::Status { status: 401, .. }));

    // unknown secret
    let tokens = Arc::new(MetadataServer::new(client.clone(), &addr.to_string()));
    let secrets = SecretManagerClient::new(client, format!("http://{addr}"), tokens);
    let err = secrets.access_secret_version("projects/proj/secrets/other/versions/latest").await.unwrap_err();
    assert!(matches!(err, SecretError::Status { status: 404, .. }));
    Ok(())
}

#[tokio::test]
async fn secret_manager_unreachable_is_request_error() {
    let secrets = SecretManagerClient::new(reqwest::Client::new(), "http://127.0.0.1:1", Arc::new(Anonymous));
    let err = secrets.access_secret_version("projects/p/secrets/s/versions/latest").await.unwrap_err();
    assert!(matches!(err, SecretError::Request(_)));
}

#[tokio::test]
async fn storage_reads_nested_object() -> anyhow::Result<()> {
    let (addr, _) = spawn_mock().await?;
    let gcs = GcsClient::new(reqwest::Client::new(), &format!("http://{addr}"), Arc::new(Anonymous))?;
    let bytes = gcs.read_object("files", "dir/hello.txt").await?;
    assert_eq!(bytes, b"hello from gcs");
    Ok(())
}

#[tokio::test]
async fn storage_classifies_missing_and_failed_reads() -> anyhow::Result<()> {
    let (addr, _) = spawn_mock().await?;
    let gcs = GcsClient::new(reqwest::Client::new(), &format!("http://{addr}"), Arc::new(Anonymous))?;

    let err = gcs.read_object("files", "nope.txt").await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound(ref s) if s == "gs://files/nope.txt"));

    let err = gcs.read_object("files", "broken").await.unwrap_err();
    match err {
        StorageError::Read(msg) => assert!(msg.contains("500"), "unexpected message: {msg}"),
        other => panic!("unexpected error: {other:?}"),
    }
    Ok(())
}


fn test_dir() -> PathBuf {
    PathBuf::from(format!("target/test-data/{}", Uuid::new_v4()))
}

async fn write_json(path: &std::path::Path, value: &Value) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, serde_json::to_vec(value)?).await?;
    Ok(())
}

fn service_account_json(addr: SocketAddr) -> Value {
    json!({
        "type": "service_account",
        "project_id": "proj",
        "private_key_id": "k1",
        "private_key": TEST_PRIVATE_KEY,
        "client_email": CLIENT_EMAIL,
        "token_uri": format!("http://{addr}/token"),
    })
}

fn authorized_user_json(addr: SocketAddr) -> Value {
    json!({
        "type": "authorized_user",
        "client_id": "cid.apps.googleusercontent.com",
        "client_secret": "secret",
        "refresh_token": "1//refresh",
        "token_uri": format!("http://{addr}/token"),
    })
}

#[tokio::test]
async fn service_account_exchanges_signed_assertion_and_caches() -> anyhow::Result<()> {
    let (addr, state) = spawn_mock().await?;
    let key = ServiceAccountKey::from_slice(&serde_json::to_vec(&service_account_json(addr))?)?;
    let provider = ServiceAccount::new(reqwest::Client::new(), key)?;

    assert_eq!(provider.token().await?.as_deref(), Some("sa-token"));
    assert_eq!(provider.token().await?.as_deref(), Some("sa-token"));

    let forms = state.forms();
    assert_eq!(forms.len(), 1, "second token() must come from cache");
    assert_eq!(forms[0].get("grant_type").map(String::as_str), Some(JWT_BEARER_GRANT));

    let token_uri = format!("http://{addr}/token");
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[token_uri.as_str()]);
    validation.set_issuer(&[CLIENT_EMAIL]);
    let assertion = forms[0].get("assertion").cloned().unwrap_or_default();
    let decoded = decode::<Value>(&assertion, &DecodingKey::from_rsa_pem(TEST_PUBLIC_KEY.as_bytes())?, &validation)?;
    assert_eq!(decoded.claims["iss"], CLIENT_EMAIL);
    assert_eq!(decoded.claims["aud"], token_uri.as_str());
    assert_eq!(decoded.claims["scope"], "https://www.googleapis.com/auth/cloud-platform");
    assert_eq!(decoded.header.kid.as_deref(), Some("k1"));
    Ok(())
}

#[tokio::test]
async fn rejected_grant_surfaces_status() -> anyhow::Result<()> {
    let (addr, _) = spawn_mock().await?;
    let mut creds = authorized_user_json(addr);
    creds["refresh_token"] = json!("1//revoked");
    let key = AuthorizedUserKey::from_slice(&serde_json::to_vec(&creds)?)?;
    let provider = AuthorizedUser::new(reqwest::Client::new(), key);

    let err = provider.token().await.unwrap_err();
    assert!(matches!(err, TokenError::Rejected { status: 400, .. }), "{err}");
    Ok(())
}

#[tokio::test]
async fn authorized_user_uses_refresh_token_grant() -> anyhow::Result<()> {
    let (addr, state) = spawn_mock().await?;
    let key = AuthorizedUserKey::from_slice(&serde_json::to_vec(&authorized_user_json(addr))?)?;
    let provider = AuthorizedUser::new(reqwest::Client::new(), key);

    assert_eq!(provider.token().await?.as_deref(), Some("user-token"));
    assert_eq!(provider.token().await?.as_deref(), Some("user-token"));

    let forms = state.forms();
    assert_eq!(forms.len(), 1);
    assert_eq!(forms[0].get("grant_type").map(String::as_str), Some("refresh_token"));
    assert_eq!(forms[0].get("client_id").map(String::as_str), Some("cid.apps.googleusercontent.com"));
    assert_eq!(forms[0].get("client_secret").map(String::as_str), Some("secret"));
    Ok(())
}

#[tokio::test]
async fn storage_from_key_file_sends_bearer_token() -> anyhow::Result<()> {
    let (addr, state) = spawn_mock().await?;
    let dir = test_dir();
    let path = dir.join("credentials.json");
    write_json(&path, &service_account_json(addr)).await?;

    let gcp = GcpConfig { storage_endpoint: format!("http://{addr}"), ..GcpConfig::default() };
    let gcs = GcsClient::from_credentials_file(&gcp, &path).await?;
    assert_eq!(gcs.read_object("private", "a.txt").await?, b"private a.txt");
    assert_eq!(gcs.read_object("private", "b.txt").await?, b"private b.txt");
    assert_eq!(state.forms().len(), 1);

    let _ = tokio::fs::remove_dir_all(&dir).await;
    Ok(())
}

#[tokio::test]
async fn storage_accepts_authorized_user_credentials() -> anyhow::Result<()> {
    let (addr, _) = spawn_mock().await?;
    let dir = test_dir();
    let path = dir.join("credentials.json");
    write_json(&path, &authorized_user_json(addr)).await?;

    let gcp = GcpConfig { storage_endpoint: format!("http://{addr}"), ..GcpConfig::default() };
    let gcs = GcsClient::from_credentials_file(&gcp, &path).await?;
    assert_eq!(gcs.read_object("private", "c.txt").await?, b"private c.txt");

    let _ = tokio::fs::remove_dir_all(&dir).await;
    Ok(())
}

#[tokio::test]
async fn ambient_credentials_search_order() -> anyhow::Result<()> {
    let (addr, _) = spawn_mock().await?;
    let dir = test_dir();
    let sa_path = dir.join("sa.json");
    let adc_path = dir.join("gcloud").join("application_default_credentials.json");
    write_json(&sa_path, &service_account_json(addr)).await?;
    write_json(&adc_path, &authorized_user_json(addr)).await?;
    let client = reqwest::Client::new();

    // explicit file wins over the gcloud file
    let gcp = GcpConfig {
        ambient_credentials: Some(sa_path.clone()),
        adc_well_known_file: Some(adc_path.clone()),
        metadata_host: "127.0.0.1:1".into(),
        ..GcpConfig::default()
    };
    let tokens = ambient_provider(&gcp, client.clone()).await?;
    assert_eq!(tokens.token().await?.as_deref(), Some("sa-token"));

    // gcloud file wins over the metadata server
    let gcp = GcpConfig { ambient_credentials: None, ..gcp };
    let tokens = ambient_provider(&gcp, client.clone()).await?;
    assert_eq!(tokens.token().await?.as_deref(), Some("user-token"));

    // absent gcloud file falls through to the metadata server
    let gcp = GcpConfig {
        adc_well_known_file: Some(dir.join("missing.json")),
        metadata_host: addr.to_string(),
        ..gcp
    };
    let tokens = ambient_provider(&gcp, client).await?;
    assert_eq!(tokens.token().await?.as_deref(), Some("meta-token"));

    let _ = tokio::fs::remove_dir_all(&dir).await;
    Ok(())
}

#[tokio::test]
async fn unreadable_ambient_credentials_fail_fast() {
    let gcp = GcpConfig {
        ambient_credentials: Some(PathBuf::from("target/test-data/does-not-exist.json")),
        ..GcpConfig::default()
    };
    let err = ambient_provider(&gcp, reqwest::Client::new()).await.err().unwrap();
    assert!(matches!(err, TokenError::Credentials(_)));

    assert!(matches!(
        CredentialsFile::from_slice(br#"{"type":"impersonated_service_account"}"#),
        Err(TokenError::Credentials(_))
    ));
}
