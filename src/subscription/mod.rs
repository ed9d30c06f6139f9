//! The `subscription` module defines the client's handle on one registered
//! interest.
//!
//! A subscription is either pulled from directly by application threads or
//! fed by a dispatcher, never both. Message limits (auto-unsubscribe) are
//! tracked with atomic counters so they can be read without the delivery lock.

#[allow(clippy::module_inception)]
pub mod subscription;

pub use subscription::{Subscription, UNLIMITED};
