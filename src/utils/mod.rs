//! The `utils` module provides the shared error type and logging setup used
//! across the client.

pub mod error;
pub mod logging;

pub use error::{BoxError, Error, Result};
