//! Conversion error types

use thiserror::Error;

/// Errors raised while converting between InMemoryChannel versions.
///
/// None of these are transient: retrying the same input yields the same error.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The other side of a conversion was not the version this pair expects
    #[error("unknown version, got: {got}")]
    UnexpectedVersion {
        /// `apiVersion` of the offending representation
        got: String,
    },

    /// The hub version was asked to convert itself
    #[error("{api_version} is the conversion hub and does not convert {direction} other versions")]
    HubVersion {
        /// `apiVersion` of the hub
        api_version: String,
        /// "to" or "from"
        direction: &'static str,
    },

    /// A v1beta1 backoff policy that has no v1 equivalent
    #[error("unknown BackoffPolicy, got: {value:?}")]
    UnknownBackoffPolicy {
        /// The policy as written
        value: String,
    },

    /// A review named an `apiVersion` this converter does not serve
    #[error("unsupported apiVersion {api_version:?}")]
    UnknownApiVersion {
        /// The requested or observed `apiVersion`
        api_version: String,
    },

    /// An object could not be decoded or encoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConversionError {
    /// Short machine-readable reason used in review failure statuses
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnexpectedVersion { .. } | Self::HubVersion { .. } => "UnexpectedVersion",
            Self::UnknownBackoffPolicy { .. } => "InvalidDeliverySpec",
            Self::UnknownApiVersion { .. } => "UnsupportedVersion",
            Self::Serialization(_) => "SerializationFailed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_backoff_policy_message_quotes_value() {
        let err = ConversionError::UnknownBackoffPolicy {
            value: "fibonacci".to_string(),
        };
        assert_eq!(err.to_string(), r#"unknown BackoffPolicy, got: "fibonacci""#);
        assert_eq!(err.reason(), "InvalidDeliverySpec");
    }

    #[test]
    fn test_unexpected_version_names_the_type() {
        let err = ConversionError::UnexpectedVersion {
            got: "messaging.knative.dev/v1beta1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unknown version, got: messaging.knative.dev/v1beta1"
        );
    }
}
