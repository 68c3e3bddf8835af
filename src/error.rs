use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Rejected input, detected before any provider is called.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field is missing: {0}")]
    MissingField(&'static str),

    #[error("Invalid tag type: {0}")]
    InvalidTagType(String),

    #[error("Tag type {0} cannot be changed from here")]
    TagTypeNotAllowed(String),

    #[error("Invalid tag name: {0}")]
    InvalidTagName(String),

    #[error("Page is invalid")]
    InvalidPage,

    #[error("Size is invalid")]
    InvalidSize,

    #[error("Query is empty")]
    EmptyQuery,
}

/// A download token that could not be turned back into a file id.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("token is not valid base64")]
    Encoding,

    #[error("token is too short")]
    Truncated,

    #[error("token failed authentication")]
    Tampered,

    #[error("token payload is malformed")]
    Payload,
}

/// A file id that could not be turned into a download token.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("file id is empty")]
    EmptyId,

    #[error("token payload could not be serialized")]
    Payload,

    #[error("token encryption failed")]
    Cipher,
}

/// Failure reported by the search backend, the key-value cache or the
/// authoritative tag store. Passed through to callers untouched.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("search backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("malformed provider response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Error type of the HTTP surface.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Uri is broken")]
    BrokenUri(#[from] DecodeError),

    #[error("{0}")]
    NotFound(String),

    #[error("Download uri could not be created")]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Provider(ProviderError),
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(what) => ApiError::NotFound(what),
            other => ApiError::Provider(other),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) | ApiError::BrokenUri(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Encode(err) => {
                tracing::error!("download uri failure: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Provider(err) => {
                tracing::error!("provider failure: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            Json(ErrorBody {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}
