//! InMemoryChannel `messaging.knative.dev/v1`
//!
//! The storage version and conversion hub. The controller reads and writes
//! only this version; status condition bookkeeping lives here.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    find_condition, set_condition, Addressable, Condition, ConditionStatus, Destination,
};

/// Aggregate readiness of the channel
pub const CONDITION_READY: &str = "Ready";
/// The dispatcher Deployment is available
pub const CONDITION_DISPATCHER_READY: &str = "DispatcherReady";
/// The dispatcher Service exists
pub const CONDITION_SERVICE_READY: &str = "ServiceReady";
/// The dispatcher Service has at least one ready endpoint
pub const CONDITION_ENDPOINTS_READY: &str = "EndpointsReady";
/// The channel has a resolvable address
pub const CONDITION_ADDRESSABLE: &str = "Addressable";

/// Conditions that make up `Ready`, in the order their failures take precedence
pub const DEPENDENT_CONDITIONS: [&str; 4] = [
    CONDITION_DISPATCHER_READY,
    CONDITION_SERVICE_READY,
    CONDITION_ENDPOINTS_READY,
    CONDITION_ADDRESSABLE,
];

// =============================================================================
// Delivery
// =============================================================================

/// Retry backoff policy
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffPolicyType {
    /// Delay grows linearly with the attempt number
    Linear,
    /// Delay doubles with each attempt
    Exponential,
}

impl BackoffPolicyType {
    /// Wire name of the policy
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Exponential => "exponential",
        }
    }
}

impl std::fmt::Display for BackoffPolicyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackoffPolicyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Self::Linear),
            "exponential" => Ok(Self::Exponential),
            other => Err(other.to_string()),
        }
    }
}

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

    /// Retry backoff policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_policy: Option<BackoffPolicyType>,

    /// ISO-8601 base delay between retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_delay: Option<String>,

    /// ISO-8601 timeout for each delivery attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
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
    version = "v1",
    kind = "InMemoryChannel",
    plural = "inmemorychannels",
    shortname = "imc",
    namespaced,
    status = "InMemoryChannelStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.address.url"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#,
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

impl InMemoryChannelStatus {
    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        find_condition(&self.conditions, type_)
    }

    /// Add an `Unknown` condition for every type that is not yet present
    pub fn initialize_conditions(&mut self) {
        for type_ in DEPENDENT_CONDITIONS.iter().chain([&CONDITION_READY]) {
            if self.condition(type_).is_none() {
                self.conditions.push(Condition::unknown(*type_));
            }
        }
    }

    /// Mark a dependent condition True
    pub fn mark_true(&mut self, type_: &str) {
        set_condition(
            &mut self.conditions,
            Condition::new(type_, ConditionStatus::True, "", ""),
        );
    }

    /// Mark a dependent condition False
    pub fn mark_false(&mut self, type_: &str, reason: &str, message: &str) {
        set_condition(
            &mut self.conditions,
            Condition::new(type_, ConditionStatus::False, reason, message),
        );
    }

    /// Mark a dependent condition Unknown
    pub fn mark_unknown(&mut self, type_: &str, reason: &str, message: &str) {
        set_condition(
            &mut self.conditions,
            Condition::new(type_, ConditionStatus::Unknown, reason, message),
        );
    }

    /// Record the channel's address, or clear it and mark it unresolved
    pub fn set_address(&mut self, address: Option<Addressable>) {
        match address.filter(|a| a.url.is_some()) {
            Some(address) => {
                self.address = Some(address);
                self.mark_true(CONDITION_ADDRESSABLE);
            }
            None => {
                self.address = None;
                self.mark_unknown(CONDITION_ADDRESSABLE, "EmptyURL", "url is the empty string");
            }
        }
    }

    /// Derive `Ready` from the dependent conditions.
    ///
    /// Call once after all dependent conditions are written so that `Ready`
    /// only transitions when the final outcome differs.
    /// The first False condition in precedence order decides the reason;
    /// otherwise any Unknown leaves `Ready` Unknown.
    pub fn recompute_ready(&mut self) {
        let mut unknown: Option<&Condition> = None;
        let mut failed: Option<&Condition> = None;
        let mut missing = false;

        for type_ in DEPENDENT_CONDITIONS {
            match self.condition(type_) {
                Some(c) if c.status == ConditionStatus::False => {
                    failed = Some(c);
                    break;
                }
                Some(c) if c.status == ConditionStatus::Unknown => {
                    unknown = unknown.or(Some(c));
                }
                Some(_) => {}
                None => missing = true,
            }
        }

        let ready = match (failed, unknown) {
            (Some(c), _) => Condition::new(
                CONDITION_READY,
                ConditionStatus::False,
                c.reason.clone(),
                c.message.clone(),
            ),
            (None, Some(c)) => Condition::new(
                CONDITION_READY,
                ConditionStatus::Unknown,
                c.reason.clone(),
                c.message.clone(),
            ),
            (None, None) if missing => Condition::unknown(CONDITION_READY),
            (None, None) => Condition::new(CONDITION_READY, ConditionStatus::True, "", ""),
        };
        set_condition(&mut self.conditions, ready);
    }

    /// True if the aggregate `Ready` condition is True
    pub fn is_ready(&self) -> bool {
        self.condition(CONDITION_READY).is_some_and(Condition::is_true)
    }
}
