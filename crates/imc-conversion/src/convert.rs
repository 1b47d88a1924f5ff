//! Conversion between the served InMemoryChannel versions

use imc_common::crd::{v1, v1beta1};
use imc_common::SUBSCRIBABLE_DUCK_VERSION_ANNOTATION;
use kube::Resource;
use serde_json::Value;

use crate::ConversionError;

/// `apiVersion` of the older served version
pub const V1BETA1: &str = "messaging.knative.dev/v1beta1";
/// `apiVersion` of the storage and hub version
pub const V1: &str = "messaging.knative.dev/v1";

// =============================================================================
// Versions
// =============================================================================

/// One InMemoryChannel in any served version
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelVersion {
    /// `messaging.knative.dev/v1beta1`
    V1beta1(Box<v1beta1::InMemoryChannel>),
    /// `messaging.knative.dev/v1`
    V1(Box<v1::InMemoryChannel>),
}

impl ChannelVersion {
    /// `apiVersion` of the contained representation
    pub fn api_version(&self) -> &'static str {
        match self {
            Self::V1beta1(_) => V1BETA1,
            Self::V1(_) => V1,
        }
    }

    /// An empty representation of the given `apiVersion`
    pub fn empty(api_version: &str) -> Result<Self, ConversionError> {
        match api_version {
            V1BETA1 => Ok(Self::V1beta1(Box::new(v1beta1::InMemoryChannel::new(
                "",
                v1beta1::InMemoryChannelSpec::default(),
            )))),
            V1 => Ok(Self::V1(Box::new(v1::InMemoryChannel::new(
                "",
                v1::InMemoryChannelSpec::default(),
            )))),
            other => Err(ConversionError::UnknownApiVersion {
                api_version: other.to_string(),
            }),
        }
    }

    /// Decode a raw object, dispatching on its `apiVersion`
    pub fn from_value(value: Value) -> Result<Self, ConversionError> {
        let api_version = value
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match api_version.as_str() {
            V1BETA1 => Ok(Self::V1beta1(Box::new(serde_json::from_value(value)?))),
            V1 => Ok(Self::V1(Box::new(serde_json::from_value(value)?))),
            _ => Err(ConversionError::UnknownApiVersion { api_version }),
        }
    }

    /// Encode as a raw object carrying `apiVersion` and `kind`
    pub fn into_value(self) -> Result<Value, ConversionError> {
        let value = match self {
            Self::V1beta1(obj) => serde_json::to_value(*obj)?,
            Self::V1(obj) => serde_json::to_value(*obj)?,
        };
        Ok(value)
    }
}

/// Conversion to and from the hub version.
///
/// Both directions write the whole destination at once: on error the
/// destination is left untouched.
pub trait Convertible {
    /// Convert `self` into the hub representation held by `sink`
    fn convert_to(&self, sink: &mut ChannelVersion) -> Result<(), ConversionError>;

    /// Replace `self` with the conversion of the hub representation `source`
    fn convert_from(&mut self, source: &ChannelVersion) -> Result<(), ConversionError>;
}

/// Convert `obj` to `desired_api_version`.
///
/// Objects already at the desired version are returned untouched.
pub fn convert(
    obj: ChannelVersion,
    desired_api_version: &str,
) -> Result<ChannelVersion, ConversionError> {
    if obj.api_version() == desired_api_version {
        return Ok(obj);
    }
    let mut out = ChannelVersion::empty(desired_api_version)?;
    match (&obj, &mut out) {
        (ChannelVersion::V1beta1(source), sink @ ChannelVersion::V1(_)) => {
            source.convert_to(sink)?;
        }
        (ChannelVersion::V1(_), ChannelVersion::V1beta1(sink)) => {
            sink.convert_from(&obj)?;
        }
        _ => {
            return Err(ConversionError::UnexpectedVersion {
                got: desired_api_version.to_string(),
            })
        }
    }
    Ok(out)
}

// =============================================================================
// v1beta1 <-> v1
// =============================================================================

impl Convertible for v1beta1::InMemoryChannel {
    fn convert_to(&self, sink: &mut ChannelVersion) -> Result<(), ConversionError> {
        let ChannelVersion::V1(_) = sink else {
            return Err(ConversionError::UnexpectedVersion {
                got: sink.api_version().to_string(),
            });
        };

        let mut metadata = self.metadata.clone();
        metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(SUBSCRIBABLE_DUCK_VERSION_ANNOTATION.to_string(), "v1".to_string());
        let status = self.status.as_ref().map(upgrade_status);
        let spec = upgrade_spec(&self.spec)?;

        *sink = ChannelVersion::V1(Box::new(v1::InMemoryChannel {
            metadata,
            spec,
            status,
        }));
        Ok(())
    }

    fn convert_from(&mut self, source: &ChannelVersion) -> Result<(), ConversionError> {
        let ChannelVersion::V1(source) = source else {
            return Err(ConversionError::UnexpectedVersion {
                got: source.api_version().to_string(),
            });
        };

        let mut metadata = source.metadata.clone();
        let status = source.status.as_ref().map(downgrade_status);
        let spec = downgrade_spec(&source.spec);
        metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(
                SUBSCRIBABLE_DUCK_VERSION_ANNOTATION.to_string(),
                "v1beta1".to_string(),
            );

        self.metadata = metadata;
        self.spec = spec;
        self.status = status;
        Ok(())
    }
}

impl Convertible for v1::InMemoryChannel {
    fn convert_to(&self, _sink: &mut ChannelVersion) -> Result<(), ConversionError> {
        Err(ConversionError::HubVersion {
            api_version: v1::InMemoryChannel::api_version(&()).into_owned(),
            direction: "to",
        })
    }

    fn convert_from(&mut self, _source: &ChannelVersion) -> Result<(), ConversionError> {
        Err(ConversionError::HubVersion {
            api_version: v1::InMemoryChannel::api_version(&()).into_owned(),
            direction: "from",
        })
    }
}

// =============================================================================
// Spec
// =============================================================================

fn upgrade_spec(
    source: &v1beta1::InMemoryChannelSpec,
) -> Result<v1::InMemoryChannelSpec, ConversionError> {
    let subscribers = source
        .subscribers
        .iter()
        .map(upgrade_subscriber)
        .collect::<Result<Vec<_>, _>>()?;
    let delivery = source.delivery.as_ref().map(upgrade_delivery).transpose()?;
    Ok(v1::InMemoryChannelSpec {
        subscribers,
        delivery,
    })
}

fn downgrade_spec(source: &v1::InMemoryChannelSpec) -> v1beta1::InMemoryChannelSpec {
    v1beta1::InMemoryChannelSpec {
        subscribers: source.subscribers.iter().map(downgrade_subscriber).collect(),
        delivery: source.delivery.as_ref().map(downgrade_delivery),
    }
}

fn upgrade_subscriber(
    source: &v1beta1::SubscriberSpec,
) -> Result<v1::SubscriberSpec, ConversionError> {
    Ok(v1::SubscriberSpec {
        uid: source.uid.clone(),
        generation: source.generation,
        subscriber_uri: source.subscriber_uri.clone(),
        reply_uri: source.reply_uri.clone(),
        delivery: source.delivery.as_ref().map(upgrade_delivery).transpose()?,
    })
}

fn downgrade_subscriber(source: &v1::SubscriberSpec) -> v1beta1::SubscriberSpec {
    v1beta1::SubscriberSpec {
        uid: source.uid.clone(),
        generation: source.generation,
        subscriber_uri: source.subscriber_uri.clone(),
        reply_uri: source.reply_uri.clone(),
        delivery: source.delivery.as_ref().map(downgrade_delivery),
    }
}

fn upgrade_delivery(source: &v1beta1::DeliverySpec) -> Result<v1::DeliverySpec, ConversionError> {
    let backoff_policy = source
        .backoff_policy
        .as_deref()
        .map(|p| {
            p.parse::<v1::BackoffPolicyType>()
                .map_err(|value| ConversionError::UnknownBackoffPolicy { value })
        })
        .transpose()?;
    Ok(v1::DeliverySpec {
        dead_letter_sink: source.dead_letter_sink.clone(),
        retry: source.retry,
        backoff_policy,
        backoff_delay: source.backoff_delay.clone(),
        timeout: None,
    })
}

// `timeout` has no v1beta1 field and is dropped
fn downgrade_delivery(source: &v1::DeliverySpec) -> v1beta1::DeliverySpec {
    v1beta1::DeliverySpec {
        dead_letter_sink: source.dead_letter_sink.clone(),
        retry: source.retry,
        backoff_policy: source.backoff_policy.map(|p| p.as_str().to_string()),
        backoff_delay: source.backoff_delay.clone(),
    }
}

// =============================================================================
// Status
// =============================================================================

fn upgrade_status(source: &v1beta1::InMemoryChannelStatus) -> v1::InMemoryChannelStatus {
    v1::InMemoryChannelStatus {
        observed_generation: source.observed_generation,
        conditions: source.conditions.clone(),
        annotations: source.annotations.clone(),
        address: source.address.clone(),
        subscribers: source
            .subscribers
            .iter()
            .map(|s| v1::SubscriberStatus {
                uid: s.uid.clone(),
                observed_generation: s.observed_generation,
                ready: s.ready.clone(),
                message: s.message.clone(),
            })
            .collect(),
    }
}

fn downgrade_status(source: &v1::InMemoryChannelStatus) -> v1beta1::InMemoryChannelStatus {
    v1beta1::InMemoryChannelStatus {
        observed_generation: source.observed_generation,
        conditions: source.conditions.clone(),
        annotations: source.annotations.clone(),
        address: source.address.clone(),
        subscribers: source
            .subscribers
            .iter()
            .map(|s| v1beta1::SubscriberStatus {
                uid: s.uid.clone(),
                observed_generation: s.observed_generation,
                ready: s.ready.clone(),
                message: s.message.clone(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imc_common::crd::{Addressable, Condition, ConditionStatus, Destination, KReference};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn delivery() -> v1beta1::DeliverySpec {
        v1beta1::DeliverySpec {
            dead_letter_sink: Some(Destination {
                ref_: Some(KReference {
                    kind: "Service".to_string(),
                    namespace: Some("test-namespace".to_string()),
                    name: "dls".to_string(),
                    api_version: "serving.knative.dev/v1".to_string(),
                }),
                uri: Some("/dead".to_string()),
            }),
            retry: Some(5),
            backoff_policy: Some("exponential".to_string()),
            backoff_delay: Some("PT0.5S".to_string()),
        }
    }

    fn full_v1beta1() -> v1beta1::InMemoryChannel {
        let mut imc = v1beta1::InMemoryChannel::new(
            "test-imc",
            v1beta1::InMemoryChannelSpec {
                subscribers: vec![v1beta1::SubscriberSpec {
                    uid: Some("sub-uid".to_string()),
                    generation: Some(3),
                    subscriber_uri: Some("http://subscriber.example".to_string()),
                    reply_uri: Some("http://reply.example".to_string()),
                    delivery: Some(delivery()),
                }],
                delivery: Some(delivery()),
            },
        );
        imc.metadata = ObjectMeta {
            name: Some("test-imc".to_string()),
            namespace: Some("test-namespace".to_string()),
            generation: Some(7),
            labels: Some(BTreeMap::from([("app".to_string(), "demo".to_string())])),
            ..Default::default()
        };
        imc.status = Some(v1beta1::InMemoryChannelStatus {
            observed_generation: Some(7),
            conditions: vec![Condition::new(
                "Ready",
                ConditionStatus::True,
                "",
                "",
            )],
            annotations: BTreeMap::from([("k".to_string(), "v".to_string())]),
            address: Some(Addressable::http("test-service.test-namespace.svc.cluster.local")),
            subscribers: vec![v1beta1::SubscriberStatus {
                uid: Some("sub-uid".to_string()),
                observed_generation: Some(3),
                ready: "True".to_string(),
                message: None,
            }],
        });
        imc
    }

    fn annotation(meta: &ObjectMeta) -> Option<&str> {
        meta.annotations
            .as_ref()?
            .get(SUBSCRIBABLE_DUCK_VERSION_ANNOTATION)
            .map(String::as_str)
    }

    fn up(source: &v1beta1::InMemoryChannel) -> Result<v1::InMemoryChannel, ConversionError> {
        let mut sink = ChannelVersion::empty(V1)?;
        source.convert_to(&mut sink)?;
        match sink {
            ChannelVersion::V1(obj) => Ok(*obj),
            other => panic!("expected v1, got {}", other.api_version()),
        }
    }

    /// Story: a v1beta1 channel survives a trip through the hub
    #[test]
    fn story_round_trip_preserves_shared_fields() {
        let original = full_v1beta1();
        let hub = up(&original).unwrap();
        assert_eq!(annotation(&hub.metadata), Some("v1"));

        let mut back = v1beta1::InMemoryChannel::new("", Default::default());
        back.convert_from(&ChannelVersion::V1(Box::new(hub))).unwrap();

        assert_eq!(annotation(&back.metadata), Some("v1beta1"));
        assert_eq!(back.spec, original.spec);
        assert_eq!(back.status, original.status);
        assert_eq!(back.metadata.labels, original.metadata.labels);
        assert_eq!(back.metadata.generation, Some(7));
    }

    #[test]
    fn test_convert_to_copies_metadata_and_status() {
        let hub = up(&full_v1beta1()).unwrap();
        assert_eq!(hub.metadata.name.as_deref(), Some("test-imc"));
        assert_eq!(hub.metadata.namespace.as_deref(), Some("test-namespace"));
        let status = hub.status.unwrap();
        assert_eq!(status.observed_generation, Some(7));
        assert_eq!(
            status.address.and_then(|a| a.url),
            Some("http://test-service.test-namespace.svc.cluster.local".to_string())
        );
        assert_eq!(status.subscribers.len(), 1);
    }

    #[test]
    fn test_delivery_policy_becomes_enum_and_timeout_defaults() {
        let hub = up(&full_v1beta1()).unwrap();
        let delivery = hub.spec.delivery.unwrap();
        assert_eq!(
            delivery.backoff_policy,
            Some(v1::BackoffPolicyType::Exponential)
        );
        assert_eq!(delivery.timeout, None);
        assert_eq!(delivery.retry, Some(5));
    }

    #[test]
    fn test_absent_delivery_stays_absent() {
        let mut source = full_v1beta1();
        source.spec.delivery = None;
        let hub = up(&source).unwrap();
        assert!(hub.spec.delivery.is_none());

        let mut back = v1beta1::InMemoryChannel::new("", Default::default());
        back.convert_from(&ChannelVersion::V1(Box::new(hub))).unwrap();
        assert!(back.spec.delivery.is_none());
    }

    #[test]
    fn test_timeout_is_dropped_going_down() {
        let mut hub = up(&full_v1beta1()).unwrap();
        if let Some(d) = hub.spec.delivery.as_mut() {
            d.timeout = Some("PT10S".to_string());
        }
        let mut back = v1beta1::InMemoryChannel::new("", Default::default());
        back.convert_from(&ChannelVersion::V1(Box::new(hub))).unwrap();
        assert_eq!(back.spec.delivery, Some(delivery()));
    }

    /// Story: a bad nested value aborts the whole conversion
    #[test]
    fn story_unknown_backoff_policy_leaves_sink_untouched() {
        let mut source = full_v1beta1();
        source.spec.subscribers[0]
            .delivery
            .as_mut()
            .unwrap()
            .backoff_policy = Some("fibonacci".to_string());

        let mut sink = ChannelVersion::empty(V1).unwrap();
        let before = sink.clone();
        let err = source.convert_to(&mut sink).unwrap_err();

        assert!(matches!(err, ConversionError::UnknownBackoffPolicy { ref value } if value == "fibonacci"));
        assert_eq!(sink, before);
    }

    #[test]
    fn test_wrong_sink_version_is_rejected() {
        let mut sink = ChannelVersion::empty(V1BETA1).unwrap();
        let err = full_v1beta1().convert_to(&mut sink).unwrap_err();
        assert_eq!(err.to_string(), format!("unknown version, got: {V1BETA1}"));
    }

    #[test]
    fn test_wrong_source_version_is_rejected() {
        let source = ChannelVersion::V1beta1(Box::new(full_v1beta1()));
        let mut sink = v1beta1::InMemoryChannel::new("", Default::default());
        let err = sink.convert_from(&source).unwrap_err();
        assert!(matches!(err, ConversionError::UnexpectedVersion { .. }));
    }

    #[test]
    fn test_hub_does_not_convert() {
        let hub = up(&full_v1beta1()).unwrap();
        let mut sink = ChannelVersion::empty(V1BETA1).unwrap();
        let err = hub.convert_to(&mut sink).unwrap_err();
        assert!(matches!(err, ConversionError::HubVersion { direction: "to", .. }));
    }

    #[test]
    fn test_convert_dispatches_both_ways() {
        let source = ChannelVersion::V1beta1(Box::new(full_v1beta1()));
        let hub = convert(source, V1).unwrap();
        assert_eq!(hub.api_version(), V1);

        let back = convert(hub, V1BETA1).unwrap();
        assert_eq!(back.api_version(), V1BETA1);
    }

    #[test]
    fn test_convert_same_version_is_identity() {
        let source = ChannelVersion::V1beta1(Box::new(full_v1beta1()));
        let out = convert(source.clone(), V1BETA1).unwrap();
        assert_eq!(out, source);
    }

    #[test]
    fn test_convert_to_unserved_version_fails() {
        let source = ChannelVersion::V1beta1(Box::new(full_v1beta1()));
        let err = convert(source, "messaging.knative.dev/v2").unwrap_err();
        assert!(matches!(err, ConversionError::UnknownApiVersion { .. }));
    }

    #[test]
    fn test_from_value_dispatches_on_api_version() {
        let value = serde_json::json!({
            "apiVersion": V1BETA1,
            "kind": "InMemoryChannel",
            "metadata": {"name": "test-imc", "namespace": "test-namespace"},
            "spec": {"delivery": {"backoffPolicy": "linear"}}
        });
        let obj = ChannelVersion::from_value(value).unwrap();
        assert_eq!(obj.api_version(), V1BETA1);

        let value = obj.into_value().unwrap();
        assert_eq!(value["apiVersion"], V1BETA1);
        assert_eq!(value["spec"]["delivery"]["backoffPolicy"], "linear");
    }
}
