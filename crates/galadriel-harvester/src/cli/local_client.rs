//! http/1 client for the local api over its unix socket.

use std::path::PathBuf;

use galadriel_types::api::{ConsentRequest, ErrorBody, HarvesterRelationship};
use galadriel_types::{ConsentStatus, RelationshipId};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode, header};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::net::UnixStream;
use tracing::debug;

/// exit code for transport failures
pub const EXIT_TRANSPORT: u8 = 1;
/// exit code when the relationship does not exist
pub const EXIT_NOT_FOUND: u8 = 2;
/// exit code for invalid input
pub const EXIT_INVALID_INPUT: u8 = 3;

/// errors talking to the local api.
#[derive(Debug, Error)]
pub enum LocalClientError {
    /// the socket could not be reached.
    #[error("failed to connect to {path:?}: {source}")]
    Connect {
        /// socket path
        path: PathBuf,
        /// underlying error
        source: std::io::Error,
    },

    /// the http exchange failed.
    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    /// the request could not be built.
    #[error("invalid request: {0}")]
    Request(#[from] hyper::http::Error),

    /// the harvester answered with an error.
    #[error("{status}: {message}")]
    Api {
        /// http status
        status: StatusCode,
        /// harvester-provided message
        message: String,
    },

    /// the response body is not what was expected.
    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl LocalClientError {
    /// process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            LocalClientError::Api { status, .. } if *status == StatusCode::NOT_FOUND => {
                EXIT_NOT_FOUND
            }
            LocalClientError::Api { status, .. } if *status == StatusCode::BAD_REQUEST => {
                EXIT_INVALID_INPUT
            }
            _ => EXIT_TRANSPORT,
        }
    }
}

/// client for the local api.
#[derive(Debug, Clone)]
pub struct LocalClient {
    socket: PathBuf,
}

impl LocalClient {
    /// client for the socket at `socket`.
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        uri: &str,
        body: Option<Vec<u8>>,
    ) -> Result<T, LocalClientError> {
        let stream = UnixStream::connect(&self.socket)
            .await
            .map_err(|source| LocalClientError::Connect {
                path: self.socket.clone(),
                source,
            })?;
        let (mut sender, conn) =
            hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "local api connection closed");
            }
        });

        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, "localhost");
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Full::new(Bytes::from(body)))?,
            None => builder.body(Full::new(Bytes::new()))?,
        };

        let resp = sender.send_request(request).await?;
        let status = resp.status();
        let bytes = resp.into_body().collect().await?.to_bytes();
        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&bytes)
                .map(|b| b.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
            return Err(LocalClientError::Api { status, message });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// relationships of this trust domain, optionally filtered by own consent.
    pub async fn list_relationships(
        &self,
        status: Option<ConsentStatus>,
    ) -> Result<Vec<HarvesterRelationship>, LocalClientError> {
        let uri = match status {
            Some(status) => format!("/relationships?status={status}"),
            None => "/relationships".to_string(),
        };
        self.send(Method::GET, &uri, None).await
    }

    /// set this side's consent on a relationship.
    pub async fn set_consent(
        &self,
        id: RelationshipId,
        consent_status: ConsentStatus,
    ) -> Result<HarvesterRelationship, LocalClientError> {
        let body = serde_json::to_vec(&ConsentRequest { consent_status })?;
        self.send(Method::PATCH, &format!("/relationships/{id}"), Some(body))
            .await
    }
}
