//! Error taxonomy (§7). One enum per failure family, kept typed rather than
//! collapsed into a single blob — `ConfigError`/`InputError` are fatal and
//! surface through `main`; `RemoteError`/`HistoryError` are caught and
//! logged by the Engine and never stop the run.

use crate::models::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {0}")]
    MissingEnvVars(String),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("credential file not found at {0}")]
    CredentialsNotFound(String),
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path} as JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error, Clone)]
pub enum RemoteError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid email: {0}")]
    EmailInvalid(String),

    #[error("remote error: {0}")]
    Unknown(String),
}

impl RemoteError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RemoteError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            RemoteError::RateLimited(_) => ErrorCode::RateLimited,
            RemoteError::NotFound(_) => ErrorCode::NotFound,
            RemoteError::EmailInvalid(_) => ErrorCode::EmailInvalid,
            RemoteError::Unknown(_) => ErrorCode::Unknown,
        }
    }

    /// Classify a transport-level `reqwest` failure into the spec's
    /// error-code vocabulary. Anything that doesn't map cleanly falls
    /// through to `Unknown`, matching §4.2's "at minimum" wording.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return RemoteError::RateLimited(format!("request timed out: {err}"));
        }
        if let Some(status) = err.status() {
            return match status.as_u16() {
                403 => RemoteError::PermissionDenied(err.to_string()),
                404 => RemoteError::NotFound(err.to_string()),
                429 => RemoteError::RateLimited(err.to_string()),
                400 => RemoteError::EmailInvalid(err.to_string()),
                _ => RemoteError::Unknown(err.to_string()),
            };
        }
        RemoteError::Unknown(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to read history file: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to parse history file: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("failed to write history file: {0}")]
    Write(#[source] std::io::Error),
}

/// Top-level error returned by `main`. Only the fatal families are
/// represented here — `RemoteError`/`HistoryError` are always handled
/// internally by the Engine and never escape to this level.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error("batch cell flush failed: {0}")]
    FlushFailed(RemoteError),
}
