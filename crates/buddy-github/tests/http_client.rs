//! HTTP contract tests for `GithubClient` against a local axum server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use buddy_github::{ArtifactClient, GithubClient, GithubConfig, GithubError};
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct ServerState {
    release_pages: Arc<AtomicUsize>,
    last_auth: Arc<std::sync::Mutex<Option<String>>>,
}

async fn releases(
    State(state): State<ServerState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    state.release_pages.fetch_add(1, Ordering::SeqCst);
    *state.last_auth.lock().unwrap() = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    // Page 1 is full (100 entries), page 2 is short and ends pagination.
    let count = if page == 1 { 100 } else { 3 };
    let items: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "id": page * 1000 + i,
                "tag_name": format!("v{page}.{i}.0"),
                "name": null,
                "body": "notes",
                "prerelease": false,
                "assets": []
            })
        })
        .collect();
    Json(Value::Array(items))
}

async fn release_by_tag(Path((_, _, tag)): Path<(String, String, String)>) -> impl IntoResponse {
    if tag == "v2.9.0" {
        (
            StatusCode::OK,
            Json(json!({
                "id": 1,
                "tag_name": "v2.9.0",
                "name": "EdgeTX \"Providence\" v2.9.0",
                "body": "release notes",
                "prerelease": false,
                "assets": [{
                    "id": 55,
                    "name": "edgetx-firmware-v2.9.0.zip",
                    "browser_download_url": "https://example.invalid/fw.zip",
                    "size": 1234
                }]
            })),
        )
            .into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(json!({"message": "Not Found"}))).into_response()
    }
}

async fn check_runs() -> Json<Value> {
    Json(json!({
        "total_count": 2,
        "check_runs": [
            {"id": 10, "name": "lint", "app": {"slug": "github-actions"}},
            {"id": 11, "name": "build (tx16s)", "app": {"slug": "github-actions"}}
        ]
    }))
}

async fn broken_job() -> impl IntoResponse {
    (StatusCode::OK, "not json")
}

async fn server_error() -> impl IntoResponse {
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn artifact_zip() -> impl IntoResponse {
    (StatusCode::OK, vec![0x50u8, 0x4B, 0x05, 0x06])
}

async fn spawn_server(state: ServerState) -> SocketAddr {
    let app = Router::new()
        .route("/repos/{owner}/{repo}/releases", get(releases))
        .route("/repos/{owner}/{repo}/releases/tags/{tag}", get(release_by_tag))
        .route(
            "/repos/{owner}/{repo}/commits/{sha}/check-runs",
            get(check_runs),
        )
        .route("/repos/{owner}/{repo}/actions/jobs/{id}", get(broken_job))
        .route("/repos/{owner}/{repo}/pulls", get(server_error))
        .route("/download/artifact.zip", get(artifact_zip))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client_for(addr: SocketAddr) -> GithubClient {
    let config = GithubConfig::new(&format!("http://{addr}"), "EdgeTX", "edgetx");
    GithubClient::new(config).unwrap()
}

#[tokio::test]
async fn list_releases_follows_pages_until_short_page() {
    let state = ServerState::default();
    let addr = spawn_server(state.clone()).await;
    let client = client_for(addr);

    let releases = client.list_releases().await.unwrap();

    assert_eq!(releases.len(), 103);
    assert_eq!(state.release_pages.load(Ordering::SeqCst), 2);
    assert_eq!(releases[100].tag_name, "v2.0.0");
}

#[tokio::test]
async fn release_by_tag_maps_404_to_none() {
    let addr = spawn_server(ServerState::default()).await;
    let client = client_for(addr);

    assert!(client.release_by_tag("v0.0.1").await.unwrap().is_none());

    let release = client.release_by_tag("v2.9.0").await.unwrap().unwrap();
    assert_eq!(release.assets.len(), 1);
    assert_eq!(release.assets[0].id, 55);
}

#[tokio::test]
async fn wrapped_list_stops_at_total_count() {
    let addr = spawn_server(ServerState::default()).await;
    let client = client_for(addr);

    let runs = client.check_runs_for_ref("abc123").await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[1].name, "build (tx16s)");
}

#[tokio::test]
async fn server_errors_propagate_as_http_errors() {
    let addr = spawn_server(ServerState::default()).await;
    let client = client_for(addr);

    match client.list_open_pulls().await {
        Err(GithubError::Http { status, .. }) => assert_eq!(status, 500),
        other => panic!("expected Http error, got {other:?}"),
    }
}

#[tokio::test]
async fn undecodable_body_is_a_decode_error() {
    let addr = spawn_server(ServerState::default()).await;
    let client = client_for(addr);

    match client.job(1).await {
        Err(GithubError::Decode { .. }) => {}
        other => panic!("expected Decode error, got {other:?}"),
    }
}

#[tokio::test]
async fn token_is_sent_as_bearer() {
    let state = ServerState::default();
    let addr = spawn_server(state.clone()).await;
    let config =
        GithubConfig::new(&format!("http://{addr}"), "EdgeTX", "edgetx").with_token("t0ken");
    let client = GithubClient::new(config).unwrap();

    client.list_releases().await.unwrap();

    assert_eq!(
        state.last_auth.lock().unwrap().as_deref(),
        Some("Bearer t0ken")
    );
}

#[tokio::test]
async fn download_returns_raw_bytes() {
    let addr = spawn_server(ServerState::default()).await;
    let client = client_for(addr);

    let bytes = client
        .download(&format!("http://{addr}/download/artifact.zip"))
        .await
        .unwrap();
    assert_eq!(bytes, vec![0x50, 0x4B, 0x05, 0x06]);

    let missing = client
        .download(&format!("http://{addr}/download/nothing.zip"))
        .await;
    assert_eq!(missing.unwrap_err().status(), Some(404));
}
