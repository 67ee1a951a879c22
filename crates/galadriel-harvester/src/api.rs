//! local admin api on a unix socket.
//!
//! operators approve or deny relationships through this socket; every call is
//! forwarded to the server with the harvester's own credentials.

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch};
use axum::{Json, Router};
use galadriel_types::api::{ConsentRequest, ErrorBody, HarvesterRelationship};
use galadriel_types::{ConsentStatus, RelationshipId};
use serde::Deserialize;
use serde_json::json;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ClientError, ServerApi};

/// error returned by the local api, rendered as `{code, message}`.
#[derive(Debug)]
pub struct LocalApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl LocalApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_argument",
            message: message.into(),
        }
    }
}

impl From<ClientError> for LocalApiError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Api {
                status, message, ..
            } => {
                let code = match status {
                    StatusCode::BAD_REQUEST => "invalid_argument",
                    StatusCode::UNAUTHORIZED => "unauthenticated",
                    StatusCode::FORBIDDEN => "permission_denied",
                    StatusCode::NOT_FOUND => "not_found",
                    StatusCode::CONFLICT => "already_exists",
                    s if s.is_server_error() => "unavailable",
                    _ => "internal",
                };
                Self {
                    status,
                    code,
                    message,
                }
            }
            other => {
                warn!(error = %other, "galadriel server unreachable");
                Self {
                    status: StatusCode::BAD_GATEWAY,
                    code: "unavailable",
                    message: other.to_string(),
                }
            }
        }
    }
}

impl IntoResponse for LocalApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// query of `GET /relationships`
#[derive(Debug, Deserialize)]
pub struct StatusParams {
    /// consent of this side to match
    pub status: Option<String>,
}

/// router of the local api over any [`ServerApi`].
pub fn create_local_app<A: ServerApi + 'static>(server: Arc<A>) -> Router {
    Router::new()
        .route("/relationships", get(list_relationships::<A>))
        .route("/relationships/{id}", patch(update_relationship::<A>))
        .route("/healthz", get(health))
        .with_state(server)
}

async fn list_relationships<A: ServerApi>(
    State(server): State<Arc<A>>,
    Query(params): Query<StatusParams>,
) -> Result<Json<Vec<HarvesterRelationship>>, LocalApiError> {
    let status = params
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<ConsentStatus>)
        .transpose()
        .map_err(|e| LocalApiError::bad_request(e.to_string()))?;
    Ok(Json(server.list_relationships(status).await?))
}

async fn update_relationship<A: ServerApi>(
    State(server): State<Arc<A>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<HarvesterRelationship>, LocalApiError> {
    let id: RelationshipId = id
        .parse()
        .map_err(|_| LocalApiError::bad_request(format!("invalid relationship id: {id}")))?;
    let req: ConsentRequest = serde_json::from_slice(&body)
        .map_err(|e| LocalApiError::bad_request(format!("invalid JSON request body: {e}")))?;

    let updated = server.update_consent(id, req.consent_status).await?;
    info!(relationship = %id, consent = %req.consent_status, "updated consent");
    Ok(Json(updated))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "pass" }))
}

/// the bound local api socket.
pub struct LocalApi {
    path: PathBuf,
    listener: UnixListener,
}

impl LocalApi {
    /// bind `path` with mode 0600, replacing a stale socket file.
    pub fn bind(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(socket = ?path, "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let listener = UnixListener::bind(&path)?;
        std::fs::set_permissions(&path, Permissions::from_mode(0o600))?;
        Ok(Self { path, listener })
    }

    /// socket path.
    pub fn path(&self) -> &FsPath {
        &self.path
    }

    /// serve `app` until cancelled, then remove the socket.
    pub async fn serve(self, app: Router, cancel: CancellationToken) -> std::io::Result<()> {
        let Self { path, listener } = self;
        info!(socket = ?path, "local api listening");
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await;
        if let Err(e) = std::fs::remove_file(&path) {
            debug!(socket = ?path, error = %e, "failed to remove socket");
        }
        result
    }
}
