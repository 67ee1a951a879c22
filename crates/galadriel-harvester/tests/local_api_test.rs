//! local admin api over a real unix socket

mod common;

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use galadriel_harvester::api::{LocalApi, create_local_app};
use galadriel_harvester::cli::{
    EXIT_NOT_FOUND, EXIT_TRANSPORT, LocalClient, LocalClientError,
};
use galadriel_types::api::ErrorBody;
use galadriel_types::{ConsentStatus, RelationshipId};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use common::FakeServer;

struct Running {
    _dir: TempDir,
    socket: PathBuf,
    server: Arc<FakeServer>,
    cancel: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

impl Running {
    fn client(&self) -> LocalClient {
        LocalClient::new(&self.socket)
    }

    async fn stop(self) -> PathBuf {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("local api should stop")
            .unwrap()
            .unwrap();
        self.socket
    }
}

fn start() -> Running {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("harvester").join("api.sock");
    let server = Arc::new(FakeServer::default());
    let api = LocalApi::bind(&socket).unwrap();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(api.serve(create_local_app(server.clone()), cancel.clone()));
    Running {
        _dir: dir,
        socket,
        server,
        cancel,
        handle,
    }
}

#[tokio::test]
async fn test_socket_is_owner_only() {
    let running = start();
    let mode = std::fs::metadata(&running.socket)
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);

    let socket = running.stop().await;
    assert!(!socket.exists(), "socket should be removed on shutdown");
}

#[tokio::test]
async fn test_stale_socket_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("api.sock");
    std::fs::write(&socket, b"left over").unwrap();

    let api = LocalApi::bind(&socket).unwrap();
    assert_eq!(api.path(), socket.as_path());
}

#[tokio::test]
async fn test_list_and_approve() {
    let running = start();
    let pending = running
        .server
        .add_relationship("b.test", ConsentStatus::Pending);
    running
        .server
        .add_relationship("c.test", ConsentStatus::Approved);

    let client = running.client();
    let all = client.list_relationships(None).await.unwrap();
    assert_eq!(all.len(), 2);

    let waiting = client
        .list_relationships(Some(ConsentStatus::Pending))
        .await
        .unwrap();
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].peer_trust_domain, "b.test");

    let updated = client
        .set_consent(pending, ConsentStatus::Approved)
        .await
        .unwrap();
    assert_eq!(updated.id, pending);
    assert_eq!(updated.consent_status, ConsentStatus::Approved);

    let waiting = client
        .list_relationships(Some(ConsentStatus::Pending))
        .await
        .unwrap();
    assert!(waiting.is_empty());

    running.stop().await;
}

#[tokio::test]
async fn test_unknown_relationship_exits_not_found() {
    let running = start();
    let err = running
        .client()
        .set_consent(RelationshipId::new_random(), ConsentStatus::Denied)
        .await
        .unwrap_err();
    assert!(matches!(err, LocalClientError::Api { .. }));
    assert_eq!(err.exit_code(), EXIT_NOT_FOUND);
    running.stop().await;
}

#[tokio::test]
async fn test_unreachable_server_is_bad_gateway() {
    let running = start();
    running.server.state.lock().unwrap().unreachable = true;

    let err = running.client().list_relationships(None).await.unwrap_err();
    match &err {
        LocalClientError::Api { status, .. } => assert_eq!(*status, StatusCode::BAD_GATEWAY),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.exit_code(), EXIT_TRANSPORT);
    running.stop().await;
}

#[tokio::test]
async fn test_missing_socket_exits_transport() {
    let dir = tempfile::tempdir().unwrap();
    let err = LocalClient::new(dir.path().join("nope.sock"))
        .list_relationships(None)
        .await
        .unwrap_err();
    assert!(matches!(err, LocalClientError::Connect { .. }));
    assert_eq!(err.exit_code(), EXIT_TRANSPORT);
}

// ─── Request Validation ──────────────────────────────────────────────────────

async fn call(method: Method, uri: &str, body: Option<&str>) -> (StatusCode, ErrorBody) {
    let app = create_local_app(Arc::new(FakeServer::default()));
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();
    let resp = app.oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_invalid_status_filter() {
    let (status, err) = call(Method::GET, "/relationships?status=maybe", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err.code, "invalid_argument");
}

#[tokio::test]
async fn test_invalid_relationship_id() {
    let (status, err) = call(
        Method::PATCH,
        "/relationships/not-a-uuid",
        Some(r#"{"consent_status":"approved"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err.code, "invalid_argument");
}

#[tokio::test]
async fn test_invalid_consent_body() {
    let uri = format!("/relationships/{}", RelationshipId::new_random());
    let (status, err) = call(Method::PATCH, &uri, Some(r#"{"consent_status":"maybe"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err.code, "invalid_argument");

    let (status, _) = call(Method::PATCH, &uri, Some("not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
