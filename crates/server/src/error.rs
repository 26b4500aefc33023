use axum::http::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy shared by the authorize and token endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidRequest,
    Unauthorized,
    Conflict,
    Upstream,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Upstream => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The RFC 6749 `error` code reported for this kind.
    pub fn oauth_code(self) -> &'static str {
        match self {
            ErrorKind::NotFound | ErrorKind::InvalidRequest | ErrorKind::Conflict => {
                "invalid_request"
            }
            ErrorKind::Unauthorized => "access_denied",
            ErrorKind::Upstream => "temporarily_unavailable",
            ErrorKind::Internal => "server_error",
        }
    }
}

/// An error that is rendered to an OAuth2 client.
#[derive(Debug, Clone, Error)]
#[error("{code}: {}", description.as_deref().unwrap_or("no description"))]
pub struct OAuthError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub description: Option<String>,
}

impl OAuthError {
    pub fn new(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.oauth_code(),
            description: Some(description.into()),
        }
    }

    /// Overrides the wire error code while keeping the kind's HTTP status.
    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = code;
        self
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, description)
    }

    pub fn unauthorized(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, description)
    }

    pub fn internal() -> Self {
        Self {
            kind: ErrorKind::Internal,
            code: ErrorKind::Internal.oauth_code(),
            description: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network timeout after {0:?}")]
    Timeout(Duration),
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP status {status}: {context}")]
    Http { status: StatusCode, context: String },
    #[error("JSON parse error: {0}")]
    Json(String),
    #[error("Unexpected content type: {0}")]
    UnexpectedContentType(String),
    #[error("Request could not be signed: {0}")]
    Sign(#[from] SignError),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Network(_) => true,
            FetchError::Http { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Key generation failed: {0}")]
    Generation(String),
    #[error("Unrecognized private key encoding")]
    UnsupportedKey,
    #[error("Key encoding failed: {0}")]
    Encoding(String),
}

#[derive(Debug, Error)]
pub enum SignError {
    #[error("No suitable signer for {key_type} key (tried {})", attempted.join(", "))]
    NoSuitableSigner {
        key_type: &'static str,
        attempted: Vec<&'static str>,
    },
    #[error("Invalid header value for {0}")]
    InvalidHeader(&'static str),
    #[error("Request has no host to sign")]
    MissingHost,
    #[error("Missing or malformed Signature header: {0}")]
    MalformedSignature(String),
    #[error("Signature expired at {0}")]
    Expired(i64),
    #[error("Digest does not match request body")]
    DigestMismatch,
    #[error("Signature verification failed: {0}")]
    Verification(String),
    #[error(transparent)]
    Key(#[from] KeyError),
}
