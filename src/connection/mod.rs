//! The `connection` module defines what the delivery core needs from the
//! connection that owns it, and provides an in-memory implementation.
//!
//! A connection routes inbound messages by sid into the [`MessageQueue`] of
//! the target pull subscription or dispatcher. The core calls back into the
//! connection to unsubscribe at the protocol level and to release routing
//! bookkeeping once a subscription has used up its message budget.

pub mod memory;
pub mod subject;

use std::sync::Arc;

use crate::queue::MessageQueue;
use crate::utils::Result;

pub use memory::{MemoryConnection, Statistics};

/// Subscription identifier issued by the connection.
pub type Sid = u64;

/// Operations the delivery core invokes on its connection.
///
/// Implementations must not call back into a dispatcher or subscription
/// while holding a lock that those calls could need.
pub trait Connection: Send + Sync {
    /// Issues a fresh, never reused sid.
    fn next_sid(&self) -> Sid;

    /// Starts routing messages for `subject` into `inbox` under `sid`.
    ///
    /// Used by dispatchers, which share one inbox across registrations.
    fn subscribe(
        &self,
        sid: Sid,
        subject: &str,
        queue_group: Option<&str>,
        inbox: Arc<MessageQueue>,
    ) -> Result<()>;

    /// Issues a protocol-level unsubscribe.
    ///
    /// `None` unsubscribes now. `Some(n)` lets the subscription receive `n`
    /// messages in total before it ends. For pull subscriptions the
    /// connection applies the limit to the subscription itself.
    fn request_unsubscribe(&self, sid: Sid, after: Option<u64>) -> Result<()>;

    /// Releases routing bookkeeping for a subscription the core has already
    /// invalidated or removed.
    fn finalize_subscription(&self, sid: Sid);
}

#[cfg(test)]
mod tests;
