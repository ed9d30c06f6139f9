//! The `message` module defines the unit of delivery handed to subscribers.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::connection::Sid;
use crate::utils::Result;

/// A message routed to a subscription or dispatcher registration.
///
/// The `sid` identifies the registration the connection routed the message
/// to; dispatchers use it to resolve the owning registration when several
/// subjects share one delivery thread.
///
/// # Example
///
/// ```rust
/// use popsub_client::Message;
///
/// let msg = Message::new(7, "sensor_updates", None, "{\"temp\":25}");
/// assert_eq!(msg.subject, "sensor_updates");
/// assert_eq!(msg.payload.len(), 11);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub sid: Sid,
    pub subject: String,
    pub reply_to: Option<String>,
    pub payload: Bytes,
    /// Unix timestamp in milliseconds taken when the message was routed.
    pub timestamp: i64,
}

impl Message {
    pub fn new(
        sid: Sid,
        subject: impl Into<String>,
        reply_to: Option<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            sid,
            subject: subject.into(),
            reply_to,
            payload: payload.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Decodes the payload as JSON.
    pub fn payload_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}
