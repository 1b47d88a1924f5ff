//! InMemoryChannel schema conversion
//!
//! `v1` is the hub. `v1beta1` converts up to it and back down from it; the
//! API server reaches this code through a `ConversionReview` webhook.

mod convert;
mod error;
pub mod review;

pub use convert::{convert, ChannelVersion, Convertible};
pub use error::ConversionError;
