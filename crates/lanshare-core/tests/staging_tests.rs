//! HTTP staging gateway driven through the router.

#![cfg(feature = "web")]

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use lanshare_core::discovery::{Device, PeerTable};
use lanshare_core::registry::TransferRegistry;
use lanshare_core::web::{router, AppState, WebServerConfig};

const BOUNDARY: &str = "lanshare-test-boundary";

struct Gateway {
    app: Router,
    registry: Arc<TransferRegistry>,
    peers: PeerTable,
    _dir: tempfile::TempDir,
}

async fn gateway() -> Gateway {
    gateway_with(WebServerConfig::default()).await
}

async fn gateway_with(config: WebServerConfig) -> Gateway {
    let dir = common::create_temp_dir();
    let registry = common::open_registry(dir.path()).await;
    let peers = PeerTable::new();
    let state = AppState::new(Arc::clone(&registry), peers.clone(), "test-node");
    Gateway {
        app: router(state, &config),
        registry,
        peers,
        _dir: dir,
    }
}

fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, file_name, content) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match file_name {
            Some(file_name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn download_from(id: &str, fetcher: &str) -> Request<Body> {
    let mut request = get(&format!("/api/download/{id}"));
    let addr: SocketAddr = fetcher.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn upload(app: &Router, name: &str, content: &[u8]) -> String {
    let (status, json) = send_json(
        app,
        upload_request(multipart_body(&[("file", Some(name), content)])),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "upload failed: {json}");
    assert_eq!(json["success"], true);
    json["file_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_upload_list_download_history() {
    let gw = gateway().await;

    let id = upload(&gw.app, "test.txt", b"hello world").await;

    let (status, pending) = send_json(&gw.app, get("/api/pending_files")).await;
    assert_eq!(status, StatusCode::OK);
    let pending = pending.as_array().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["id"], id.as_str());
    assert_eq!(pending[0]["name"], "test.txt");
    assert_eq!(pending[0]["size"], 11);
    assert_eq!(pending[0]["status"], "pending");
    assert!(pending[0].get("storage_path").is_none());

    let response = gw
        .app
        .clone()
        .oneshot(download_from(&id, "192.168.1.7:53000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"test.txt\""
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"hello world");

    let (_, pending) = send_json(&gw.app, get("/api/pending_files")).await;
    assert!(pending.as_array().unwrap().is_empty());

    let (status, history) = send_json(&gw.app, get("/api/transfer_history")).await;
    assert_eq!(status, StatusCode::OK);
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["file_name"], "test.txt");
    assert_eq!(history[0]["device_name"], "192.168.1.7");
    assert_eq!(history[0]["status"], "completed");
}

#[tokio::test]
async fn test_large_download_is_streamed_with_length() {
    let gw = gateway().await;
    let content = common::random_bytes(3 * 1024 * 1024);
    let id = upload(&gw.app, "disk.img", &content).await;
    let stored = gw.registry.get(&id).unwrap().storage_path;

    let response = gw
        .app
        .clone()
        .oneshot(download_from(&id, "10.0.0.9:4000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_LENGTH],
        content.len().to_string().as_str()
    );
    assert!(!stored.exists());

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body.len(), content.len());
    assert!(body[..] == content[..]);
    assert_eq!(gw.registry.list_history().len(), 1);
}

#[tokio::test]
async fn test_second_download_is_not_found() {
    let gw = gateway().await;
    let id = upload(&gw.app, "once.bin", &[1, 2, 3]).await;

    let (first, _) = send(&gw.app, download_from(&id, "10.0.0.2:1000")).await;
    let (second, json) = send_json(&gw.app, download_from(&id, "10.0.0.3:1000")).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "E005");
    assert!(json["error"].is_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_downloads_one_wins() {
    let gw = gateway().await;
    let id = upload(&gw.app, "race.txt", b"contended").await;

    let (a, b) = tokio::join!(
        send(&gw.app, download_from(&id, "10.0.0.2:1000")),
        send(&gw.app, download_from(&id, "10.0.0.3:1000")),
    );

    let mut statuses = [a.0, b.0];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::NOT_FOUND]);
    assert_eq!(gw.registry.list_history().len(), 1);
}

#[tokio::test]
async fn test_remove_skips_history() {
    let gw = gateway().await;
    let id = upload(&gw.app, "draft.txt", b"never mind").await;

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/remove/{id}"))
        .body(Body::empty())
        .unwrap();
    let (status, json) = send_json(&gw.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);

    assert_eq!(gw.registry.pending_count(), 0);
    assert!(gw.registry.list_history().is_empty());

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/remove/{id}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&gw.app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_without_file_field() {
    let gw = gateway().await;

    let body = multipart_body(&[("comment", None, b"just text")]);
    let (status, json) = send_json(&gw.app, upload_request(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());
    assert_eq!(gw.registry.pending_count(), 0);
}

#[tokio::test]
async fn test_upload_with_empty_file_name() {
    let gw = gateway().await;

    let body = multipart_body(&[("file", Some(""), b"")]);
    let (status, json) = send_json(&gw.app, upload_request(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "no file selected");
}

#[tokio::test]
async fn test_upload_ignores_other_fields() {
    let gw = gateway().await;

    let body = multipart_body(&[
        ("comment", None, b"ignored"),
        ("file", Some("../../etc/report.csv"), b"a,b\n1,2\n"),
    ]);
    let (status, json) = send_json(&gw.app, upload_request(body)).await;
    assert_eq!(status, StatusCode::OK, "{json}");

    let pending = gw.registry.list_pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].name, "report.csv");
    assert_eq!(pending[0].size, 8);
}

#[tokio::test]
async fn test_oversized_upload_is_refused() {
    let gw = gateway_with(WebServerConfig {
        max_upload_size: 64,
        ..WebServerConfig::default()
    })
    .await;

    let body = multipart_body(&[("file", Some("big.bin"), &[0u8; 256])]);
    let (status, _) = send(&gw.app, upload_request(body)).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(gw.registry.pending_count(), 0);
}

#[tokio::test]
async fn test_unknown_download_is_json_404() {
    let gw = gateway().await;

    let (status, json) = send_json(&gw.app, get("/api/download/does-not-exist")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "E005");
}

#[tokio::test]
async fn test_unknown_endpoint_is_json_404() {
    let gw = gateway().await;

    let (status, json) = send_json(&gw.app, get("/api/nothing_here")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "no such endpoint: /api/nothing_here");
}

#[tokio::test]
async fn test_peers_and_banner() {
    let gw = gateway().await;
    gw.peers
        .upsert(Device::new("kitchen", "192.168.1.30".parse().unwrap(), 48481));

    let (status, peers) = send_json(&gw.app, get("/api/peers")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(peers[0]["id"], "192.168.1.30:48481");
    assert_eq!(peers[0]["name"], "kitchen");

    let (status, banner) = send(&gw.app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(banner).unwrap().contains("test-node"));
}
