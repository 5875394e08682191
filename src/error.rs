//! Error types for the execution engine.
//!
//! Every variant maps to one entry of the step failure taxonomy. The
//! runner converts them into a [`StepError`](crate::model::StepError)
//! at the step boundary, so none of them ever escapes a case.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using the engine [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Engine error taxonomy.
#[derive(Error, Debug)]
pub enum Error {
    #[error("variable '{0}' is not defined")]
    UnresolvedVariable(String),

    #[error("function '{0}' is not registered")]
    UnknownFunction(String),

    #[error("'{name}' failed: {source:#}")]
    HookExecution {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{0}")]
    Assertion(String),

    #[error("invalid template '{template}': {message}")]
    TemplateSyntax { template: String, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    pub(crate) fn hook(name: &str, source: anyhow::Error) -> Self {
        Self::HookExecution {
            name: name.to_string(),
            source,
        }
    }
}

/// Failure reported by the HTTP collaborator.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid url '{0}'")]
    InvalidUrl(String),

    #[error("failed to read response body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Connect(err.to_string())
        } else if err.is_builder() {
            Self::Request(format!("invalid request: {err}"))
        } else if err.is_body() || err.is_decode() {
            Self::Body(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// Signal returned by a lifecycle hook.
#[derive(Error, Debug)]
pub enum HookError {
    /// Assertion-style failure. Raised from a teardown hook it marks the
    /// step `failed` instead of `error`.
    #[error("{0}")]
    Assertion(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_execution_keeps_cause() {
        let err = Error::hook("sign", anyhow::anyhow!("bad key"));
        assert_eq!(err.to_string(), "'sign' failed: bad key");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "bad key");
    }

    #[test]
    fn test_builder_errors_are_request_errors() {
        let err = reqwest::Client::new()
            .get("http://localhost/")
            .header("bad header", "v")
            .build()
            .unwrap_err();
        assert!(err.is_builder());
        let mapped = TransportError::from(err);
        assert!(
            matches!(&mapped, TransportError::Request(msg) if msg.starts_with("invalid request")),
            "{mapped:?}"
        );
    }

    #[test]
    fn test_transport_error_is_transparent() {
        let err: Error =
            TransportError::Timeout(Duration::from_secs(2)).into();
        assert_eq!(err.to_string(), "request timed out after 2s");
    }
}
