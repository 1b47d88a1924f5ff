//! Error types for the InMemoryChannel controller
//!
//! Errors are structured with fields to aid debugging in production.
//! Every variant answers one question for the work queue: should the key
//! be redelivered with backoff, or dropped until the object changes?

use thiserror::Error;

/// Main error type for controller operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The object changed since it was read (optimistic concurrency failure)
    #[error("conflict writing {kind} {name}: object was modified concurrently")]
    Conflict {
        /// Resource kind being written
        kind: String,
        /// `namespace/name` of the object
        name: String,
    },

    /// A work-queue key that is not of the form `namespace/name`
    #[error("invalid work-queue key {key:?}: expected namespace/name")]
    MalformedKey {
        /// The offending key as received
        key: String,
    },

    /// A status write could not be serialized
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "prober", "webhook")
        context: String,
    },
}

impl Error {
    /// Create a conflict error for the given kind and `namespace/name`
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a malformed work-queue key error
    pub fn malformed_key(key: impl Into<String>) -> Self {
        Self::MalformedKey { key: key.into() }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Malformed keys and serialization errors are not retryable
    /// (redelivering the same input cannot succeed). Conflicts always retry
    /// with a fresh read. Kubernetes errors retry unless the API server
    /// rejected the request itself (4xx other than 409 and 429).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => {
                    ae.code == 409 || ae.code == 429 || !(400..500).contains(&ae.code)
                }
                _ => true,
            },
            Error::Conflict { .. } => true,
            Error::MalformedKey { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Whether this error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {code}"),
            reason: "Test".to_string(),
            code,
        }))
    }

    /// Story: a key that cannot be split is dropped, not redelivered
    #[test]
    fn story_malformed_keys_are_terminal() {
        let err = Error::malformed_key("too/many/parts");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("too/many/parts"));
        assert!(err.to_string().contains("namespace/name"));
    }

    /// Story: a concurrent writer forces a fresh read on redelivery
    #[test]
    fn story_conflicts_are_retried() {
        let err = Error::conflict("InMemoryChannel", "test-namespace/test-imc");
        assert!(err.is_retryable());
        assert!(err.is_conflict());
        assert!(err.to_string().contains("test-namespace/test-imc"));

        let err = api_error(409);
        assert!(err.is_retryable());
        assert!(err.is_conflict());
    }

    #[test]
    fn test_kube_error_retryability_by_status_code() {
        assert!(api_error(500).is_retryable());
        assert!(api_error(503).is_retryable());
        assert!(api_error(429).is_retryable());
        assert!(!api_error(400).is_retryable());
        assert!(!api_error(403).is_retryable());
        assert!(!api_error(422).is_retryable());
    }

    #[test]
    fn test_internal_error_with_context() {
        let err = Error::internal_with_context("prober", "cache not synced");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("[prober]"));
    }

    #[test]
    fn test_serde_json_errors_convert_to_serialization() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { .. }));
        assert!(!err.is_retryable());
    }
}
