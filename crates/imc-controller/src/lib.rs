//! InMemoryChannel controller
//!
//! Keeps each channel's status in line with the shared dispatcher it runs
//! on. One reconcile pass reads the dispatcher Deployment, Service and
//! Endpoints, turns each into a readiness verdict, folds the verdicts into
//! the channel's conditions and address, and writes the status back if it
//! changed.

#![deny(missing_docs)]

mod backoff;
mod config;
mod controller;
mod prober;
mod readiness;
mod status;

pub use backoff::{BackoffConfig, KeyedBackoff};
pub use config::DispatcherConfig;
pub use controller::{
    error_policy, reconcile, reconcile_key, ChannelClient, ChannelClientImpl, ChannelKey, Context,
    ReconcileOutcome,
};
pub use prober::{DependencyLister, DependencyProber, DependencySnapshot, KubeDependencyLister};
pub use readiness::{deployment_readiness, endpoints_readiness, service_readiness, Readiness};
pub use status::aggregate_status;
