//! Common types for the InMemoryChannel controller: CRDs, errors, events, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Annotation recording which subscribable duck contract version produced
/// a representation of the resource
pub const SUBSCRIBABLE_DUCK_VERSION_ANNOTATION: &str = "messaging.knative.dev/subscribable";

/// Field manager used for every write issued by the controller
pub const FIELD_MANAGER: &str = "imc-controller";

/// Cluster DNS suffix appended to `<service>.<namespace>` when resolving addresses
pub const CLUSTER_DOMAIN: &str = "svc.cluster.local";
