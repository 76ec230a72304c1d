//! Error taxonomies for the translation ensemble.
//!
//! Backend failures are classified into retryable (transient network,
//! 5xx, timeouts) and terminal (4xx, auth, malformed request) kinds. The
//! retry layer consults [`BackendError::is_retryable`]; the orchestrator
//! converts backend errors into per-candidate error strings and only
//! surfaces its own taxonomy ([`EnsembleError`]) to callers.

use reqwest::StatusCode;
use thiserror::Error;

/// A failure from a single translation backend invocation.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("empty input")]
    EmptyInput,

    #[error("source language '{lang}' is not supported by {backend}")]
    UnsupportedLanguage { backend: &'static str, lang: String },

    #[error("authentication failed (HTTP {status})")]
    Auth { status: StatusCode },

    #[error("client error (HTTP {status}): {body}")]
    Client { status: StatusCode, body: String },

    #[error("server error (HTTP {status}): {body}")]
    Server { status: StatusCode, body: String },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned an empty translation")]
    EmptyResult,

    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("operation timed out")]
    Timeout,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl BackendError {
    /// HTTP status carried by this error, either directly or on the
    /// underlying transport error.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Auth { status } | Self::Client { status, .. } | Self::Server { status, .. } => {
                Some(*status)
            }
            Self::Http(e) => e.status(),
            _ => None,
        }
    }

    /// Whether the retry layer should attempt this call again.
    ///
    /// Any 4xx is terminal: the request itself is wrong and retrying
    /// cannot fix it. Everything transport-shaped (timeouts, connection
    /// failures, 5xx, undecodable bodies) is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::EmptyInput | Self::UnsupportedLanguage { .. } | Self::Auth { .. } => false,
            Self::Client { .. } => false,
            Self::DeadlineExceeded => false,
            Self::Server { .. } | Self::Timeout | Self::EmptyResult => true,
            Self::InvalidResponse(_) => true,
            Self::Http(e) => {
                if let Some(status) = e.status() {
                    !status.is_client_error()
                } else {
                    // Connect errors, timeouts, decode failures
                    true
                }
            }
        }
    }

    /// Map an unsuccessful HTTP response to the right error variant.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => Self::Auth { status },
            400..=499 => Self::Client { status, body },
            _ => Self::Server { status, body },
        }
    }
}

/// A failure of the ensemble as a whole, surfaced to the caller.
#[derive(Error, Debug)]
pub enum EnsembleError {
    #[error(
        "no translation backends available; set at least one API key \
         (ANTHROPIC_API_KEY, GOOGLE_TRANSLATE_API_KEY, DEEPL_API_KEY, or OPENAI_API_KEY)"
    )]
    NoBackends,

    #[error("input text is empty")]
    EmptyInput,

    #[error("all translation backends failed: {}", .causes.join("; "))]
    AllBackendsFailed { causes: Vec<String> },
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;
