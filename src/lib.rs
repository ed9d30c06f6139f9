//! # PopSub client
//!
//! `popsub_client` is the client-side message delivery core of a
//! publish/subscribe client. It takes messages that a connection has already
//! parsed and hands them to application code, either by letting callers pull
//! them from a subscription or by running a callback on a dispatcher thread.
//!
//! ## Core Modules
//!
//! The library is structured into several modules, each with a distinct responsibility:
//!
//! - `queue`: The blocking FIFO that sits between the connection and consumers.
//! - `subscription`: A subject registration with its delivery mode and message limit.
//! - `dispatcher`: A thread that runs one handler for many subjects.
//! - `connection`: The contract the delivery core expects from a connection, plus an in-memory one.
//! - `message`: The message value handed to consumers.
//! - `config`: Handles loading and managing client configuration.
//! - `utils`: Contains shared utilities, such as error handling and logging.

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod message;
pub mod queue;
pub mod subscription;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use connection::{Connection, MemoryConnection, Sid, Statistics};
pub use dispatcher::Dispatcher;
pub use message::Message;
pub use queue::{MessageQueue, Pop};
pub use subscription::{Subscription, UNLIMITED};
pub use utils::{BoxError, Error, Result};
