//! InMemoryChannel `messaging.knative.dev/v1beta1`
//!
//! The older served version. Its delivery spec has no `timeout` and keeps
//! `backoffPolicy` as a free-form string.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Addressable, Condition, Destination};

// =============================================================================
// Delivery
// =============================================================================

/// How events are retried and where undeliverable events go
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySpec {
    /// Sink receiving events that could not be delivered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_sink: Option<Destination>,

    /// Minimum number of retries before an event goes to the dead letter sink
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<i32>,

    /// Retry backoff policy ("linear" or "exponential")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_policy: Option<String>,

    /// ISO-8601 base delay between retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_delay: Option<String>,
}

// =============================================================================
// Subscribers
// =============================================================================

/// A single subscriber of the channel
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberSpec {
    /// UID of the Subscription that produced this entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Generation of the Subscription this entry reflects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,

    /// Where events are delivered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_uri: Option<String>,

    /// Where subscriber replies are sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_uri: Option<String>,

    /// Per-subscriber delivery overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliverySpec>,
}

/// Delivery state of a single subscriber
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberStatus {
    /// UID of the Subscription
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Generation of the Subscription that was observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// "True", "False" or "Unknown"
    #[serde(default)]
    pub ready: String,

    /// Human-readable detail when not ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// =============================================================================
// CRD
// =============================================================================

/// In-memory, best-effort channel
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "messaging.knative.dev",
    version = "v1beta1",
    kind = "InMemoryChannel",
    plural = "inmemorychannels",
    shortname = "imc",
    namespaced,
    status = "InMemoryChannelStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.address.url"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InMemoryChannelSpec {
    /// Subscribers receiving events sent to the channel
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscribers: Vec<SubscriberSpec>,

    /// Channel-wide delivery options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliverySpec>,
}

/// Observed state of an InMemoryChannel
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InMemoryChannelStatus {
    /// Generation the status was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Readiness conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Status annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Address at which the channel accepts events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Addressable>,

    /// Per-subscriber delivery state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscribers: Vec<SubscriberStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn test_api_version() {
        assert_eq!(
            InMemoryChannel::api_version(&()),
            "messaging.knative.dev/v1beta1"
        );
        assert_eq!(InMemoryChannel::kind(&()), "InMemoryChannel");
    }

    #[test]
    fn test_backoff_policy_is_free_form() {
        let delivery: DeliverySpec = serde_json::from_value(serde_json::json!({
            "retry": 3,
            "backoffPolicy": "fibonacci",
            "backoffDelay": "PT1S"
        }))
        .unwrap();
        assert_eq!(delivery.backoff_policy.as_deref(), Some("fibonacci"));
        assert_eq!(delivery.retry, Some(3));
    }

    #[test]
    fn test_empty_spec_serializes_to_empty_object() {
        let json = serde_json::to_value(InMemoryChannelSpec::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }
}
