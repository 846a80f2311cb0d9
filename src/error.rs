// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Failed to load kubeconfig: {0}")]
    Kubeconfig(String),

    #[error("Invalid export selector: {0}")]
    Selector(String),

    #[error("Error retrieving exported service {namespace}/{name}: {source}")]
    ExportedServiceGone {
        namespace: String,
        name: String,
        source: kube::Error,
    },

    #[error(transparent)]
    Retryable(#[from] RetryableError),
}

impl MirrorError {
    /// Wrap a single error as retryable.
    pub fn retryable(err: impl Into<anyhow::Error>) -> Self {
        MirrorError::Retryable(RetryableError::new(err))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, MirrorError::Retryable(_))
    }
}

/// An error that should be retried by requeueing the event that caused it.
/// Aggregates one or more inner errors so a partially failed sweep reports
/// everything that went wrong.
#[derive(Debug, Default)]
pub struct RetryableError {
    pub inner: Vec<anyhow::Error>,
}

impl RetryableError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: vec![err.into()],
        }
    }

    pub fn aggregate(inner: Vec<anyhow::Error>) -> Self {
        Self { inner }
    }
}

impl fmt::Display for RetryableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.inner.iter().map(|e| e.to_string()).collect();
        write!(f, "Inner errors:\n\t{}", messages.join("\n\t"))
    }
}

impl std::error::Error for RetryableError {}

pub type Result<T> = std::result::Result<T, MirrorError>;

/// The object does not exist (or is already gone, on delete paths).
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// The object was already created, e.g. during an earlier attempt.
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.reason == "AlreadyExists")
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} error"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_is_not_found() {
        assert!(is_not_found(&api_error(404, "NotFound")));
        assert!(!is_not_found(&api_error(409, "AlreadyExists")));
        assert!(!is_not_found(&api_error(500, "InternalError")));
    }

    #[test]
    fn test_is_already_exists() {
        assert!(is_already_exists(&api_error(409, "AlreadyExists")));
        assert!(!is_already_exists(&api_error(409, "Conflict")));
        assert!(!is_already_exists(&api_error(404, "NotFound")));
    }

    #[test]
    fn test_retryable_error_aggregates_messages() {
        let err = RetryableError::aggregate(vec![
            anyhow::anyhow!("first failure"),
            anyhow::anyhow!("second failure"),
        ]);

        let rendered = err.to_string();
        assert!(rendered.contains("first failure"));
        assert!(rendered.contains("second failure"));
    }

    #[test]
    fn test_is_retryable_classification() {
        assert!(MirrorError::retryable(anyhow::anyhow!("boom")).is_retryable());
        assert!(!MirrorError::Kube(api_error(500, "InternalError")).is_retryable());
        assert!(!MirrorError::Selector("bad operator".to_string()).is_retryable());
    }
}
