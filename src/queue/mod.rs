//! The `queue` module provides the blocking message queue that sits between
//! the connection's reader and a consumer.
//!
//! Pull subscriptions own one queue each and are drained by whichever
//! application thread calls `next_message`. A dispatcher owns a single queue
//! shared by all of its registrations and drains it from its own thread.

pub mod message_queue;

pub use message_queue::{MessageQueue, Pop};
