//! The `error` module defines the error type shared by every part of the
//! delivery core.
//!
//! Errors are always returned to the immediate caller. Failures raised by
//! dispatcher handlers are the one exception: they are reported through
//! `tracing` and never leave the dispatch loop.

use thiserror::Error;

/// Errors surfaced by subscriptions, dispatchers and connections.
#[derive(Error, Debug)]
pub enum Error {
    /// A pull-only operation was invoked on a dispatcher-owned subscription.
    #[error("subscriptions that belong to a dispatcher cannot be used directly")]
    WrongMode,

    /// The subscription has been invalidated and can never be used again.
    #[error("subscription is inactive")]
    Inactive,

    /// No message arrived before the deadline.
    #[error("timed out waiting for a message")]
    Timeout,

    /// No active registration exists for the subject on this dispatcher.
    #[error("no registration found for subject: {0}")]
    NotFound(String),

    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The dispatcher has been stopped and accepts no new registrations.
    #[error("dispatcher stopped")]
    DispatcherStopped,

    /// JSON payload decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The dispatch thread could not be started.
    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by dispatcher handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
