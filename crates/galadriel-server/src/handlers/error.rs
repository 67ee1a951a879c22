//! api error handling for http handlers

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use galadriel_types::api::ErrorBody;
use serde::de::DeserializeOwned;
use tracing::error;

/// api error type for handler responses
#[derive(Debug)]
pub enum ApiError {
    /// malformed input (400)
    BadRequest(String),
    /// missing or rejected credential (401, empty body)
    Unauthorized,
    /// caller is not allowed to touch the resource (403)
    Forbidden(String),
    /// not found error (404)
    NotFound(String),
    /// uniqueness violation (409)
    Conflict(String),
    /// datastore unreachable, retry later (503)
    Unavailable(String),
    /// internal server error (500)
    Internal(String),
}

impl ApiError {
    /// create bad request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// create forbidden error
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// create not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// create internal server error from any error type
    pub fn internal(e: impl std::fmt::Display) -> Self {
        Self::Internal(e.to_string())
    }

    /// http status of this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "invalid_argument",
            Self::Unauthorized => "unauthenticated",
            Self::Forbidden(_) => "permission_denied",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "already_exists",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match self {
            ApiError::Unauthorized => return status.into_response(),
            ApiError::Internal(ref detail) => {
                error!(error = %detail, "internal error");
                "internal error".to_string()
            }
            ApiError::Unavailable(ref detail) => {
                error!(error = %detail, "datastore unavailable");
                "service unavailable".to_string()
            }
            ApiError::BadRequest(ref msg)
            | ApiError::Forbidden(ref msg)
            | ApiError::NotFound(ref msg)
            | ApiError::Conflict(ref msg) => msg.clone(),
        };
        let body = ErrorBody {
            code: self.code().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<galadriel_db::Error> for ApiError {
    fn from(err: galadriel_db::Error) -> Self {
        use galadriel_db::Error;
        match err {
            Error::NotFound(msg) => Self::NotFound(msg),
            Error::AlreadyExists(msg) => Self::Conflict(msg),
            Error::ForeignKey(msg) => Self::BadRequest(format!("still referenced: {msg}")),
            Error::InvalidData(msg) => Self::BadRequest(msg),
            e if e.is_transient() => Self::Unavailable(e.to_string()),
            e => Self::Internal(e.to_string()),
        }
    }
}

impl From<galadriel_types::Error> for ApiError {
    fn from(err: galadriel_types::Error) -> Self {
        Self::BadRequest(err.to_string())
    }
}

/// extension trait for converting results to apierror
pub trait ResultExt<T> {
    /// convert error to internal server error
    fn map_internal(self) -> Result<T, ApiError>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn map_internal(self) -> Result<T, ApiError> {
        self.map_err(ApiError::internal)
    }
}

/// extension trait for converting options to apierror
pub trait OptionExt<T> {
    /// convert none to not found error
    fn or_not_found(self, msg: &str) -> Result<T, ApiError>;
    /// convert none to bad request error
    fn or_bad_request(self, msg: &str) -> Result<T, ApiError>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, msg: &str) -> Result<T, ApiError> {
        self.ok_or_else(|| ApiError::not_found(msg))
    }

    fn or_bad_request(self, msg: &str) -> Result<T, ApiError> {
        self.ok_or_else(|| ApiError::bad_request(msg))
    }
}

/// json body extractor whose rejections render as [`ApiError::BadRequest`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    ApiError::bad_request(rejection.body_text())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_error_mapping() {
        let not_found: ApiError = galadriel_db::Error::NotFound("x".into()).into();
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let exists: ApiError = galadriel_db::Error::AlreadyExists("x".into()).into();
        assert_eq!(exists.status_code(), StatusCode::CONFLICT);

        let fk: ApiError = galadriel_db::Error::ForeignKey("x".into()).into();
        assert_eq!(fk.status_code(), StatusCode::BAD_REQUEST);

        let conn: ApiError = galadriel_db::Error::Connection("gone".into()).into();
        assert_eq!(conn.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unauthorized_has_empty_body() {
        let response = ApiError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_internal_error_is_sanitized() {
        let response = ApiError::internal("disk on fire at /var/lib").into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.code, "internal");
        assert!(!body.message.contains("disk"));
    }
}
