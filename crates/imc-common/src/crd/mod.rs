//! Custom Resource Definitions for the InMemoryChannel
//!
//! Two schema versions are served. `v1` is the storage version and the hub
//! every other version converts through; `v1beta1` is kept for older clients.

mod types;
pub mod v1;
pub mod v1beta1;

pub use types::{
    find_condition, set_condition, Addressable, Condition, ConditionStatus, Destination,
    KReference,
};
