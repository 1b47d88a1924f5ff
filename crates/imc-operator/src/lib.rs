//! InMemoryChannel operator
//!
//! Wires the channel reconciler into kube-runtime, installs the
//! multi-version CRD, and serves the conversion webhook.

#![deny(missing_docs)]

pub mod config;
pub mod controller_runner;
pub mod crds;
pub mod webhook;
