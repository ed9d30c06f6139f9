//! Connection double that records every call the delivery core makes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::connection::{Connection, Sid};
use crate::message::Message;
use crate::queue::MessageQueue;
use crate::utils::{Error, Result};

#[derive(Debug, Default)]
pub(crate) struct RecordingConnection {
    next_sid: AtomicU64,
    pub subscribed: Mutex<Vec<(Sid, String, Option<String>)>>,
    pub unsubscribes: Mutex<Vec<(Sid, Option<u64>)>>,
    pub finalized: Mutex<Vec<Sid>>,
    /// When set, unsubscribes are still recorded but report a closed connection.
    pub fail_unsubscribes: AtomicBool,
    inboxes: Mutex<HashMap<Sid, Arc<MessageQueue>>>,
}

impl RecordingConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn weak(self: &Arc<Self>) -> Weak<dyn Connection> {
        let weak: Weak<Self> = Arc::downgrade(self);
        weak
    }

    pub fn inbox(&self, sid: Sid) -> Option<Arc<MessageQueue>> {
        self.inboxes.lock().get(&sid).cloned()
    }

    /// Pushes a message into the inbox registered for `sid`.
    pub fn deliver(&self, sid: Sid, subject: &str, payload: &'static str) -> bool {
        self.inbox(sid).is_some_and(|inbox| inbox.push(Message::new(sid, subject, None, payload)))
    }
}

impl Connection for RecordingConnection {
    fn next_sid(&self) -> Sid {
        self.next_sid.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn subscribe(
        &self,
        sid: Sid,
        subject: &str,
        queue_group: Option<&str>,
        inbox: Arc<MessageQueue>,
    ) -> Result<()> {
        self.subscribed
            .lock()
            .push((sid, subject.to_string(), queue_group.map(str::to_string)));
        self.inboxes.lock().insert(sid, inbox);
        Ok(())
    }

    fn request_unsubscribe(&self, sid: Sid, after: Option<u64>) -> Result<()> {
        self.unsubscribes.lock().push((sid, after));
        if self.fail_unsubscribes.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    fn finalize_subscription(&self, sid: Sid) {
        self.finalized.lock().push(sid);
    }
}
