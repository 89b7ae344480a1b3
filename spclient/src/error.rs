//! Error taxonomy shared across the crate
//!
//! Every failure is a returned value; no code path panics or exits the
//! process. The pipeline retries throttling internally and only surfaces
//! `Throttle` once attempts are exhausted; `Service` errors are never
//! retried.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing auth configuration, unresolvable strategy name
    #[error("config error: {0}")]
    Config(String),

    /// Handshake rejected, unreachable identity provider, malformed token
    #[error("auth error: {0}")]
    Auth(String),

    /// HTTP 429/503 or transient transport failure, after retries exhausted
    #[error("request throttled: {0}")]
    Throttle(String),

    /// Structured error payload decoded from the service
    #[error("{code}: {message}")]
    Service {
        code: String,
        message: String,
        status: u16,
    },

    /// Malformed JSON body fed to the normalizer
    #[error("normalization error: {0}")]
    Normalization(String),

    /// Caller canceled the request or its deadline passed
    #[error("request canceled")]
    Cancelled,

    /// Transport-level failure from the HTTP client
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// True for failures the pipeline is allowed to retry
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Throttle(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Normalization(e.to_string())
    }
}
