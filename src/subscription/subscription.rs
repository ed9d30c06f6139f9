use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use crate::connection::{Connection, Sid};
use crate::dispatcher::Dispatcher;
use crate::dispatcher::engine::DispatcherCore;
use crate::message::Message;
use crate::queue::{MessageQueue, Pop};
use crate::utils::{Error, Result};

/// No message limit.
pub const UNLIMITED: i64 = -1;

/// How messages reach a subscription.
///
/// A subscription is active while it is `Pull` or `Dispatched`. Invalidation
/// moves it to `Inactive`, which is terminal.
#[derive(Debug)]
enum Delivery {
    /// Owns a private queue drained by `next_message`.
    Pull(Arc<MessageQueue>),
    /// Delivery is owned by a dispatcher's thread.
    Dispatched(Weak<DispatcherCore>),
    Inactive,
}

/// A registered interest in a subject.
///
/// Created by a connection (pull mode) or a dispatcher (dispatch mode).
/// Counts the messages it has received and ends itself once an optional
/// maximum is reached.
#[derive(Debug)]
pub struct Subscription {
    sid: Sid,
    subject: String,
    queue_group: Option<String>,
    connection: Weak<dyn Connection>,
    delivery: RwLock<Delivery>,
    max_messages: AtomicI64,
    messages_received: AtomicU64,
    default_timeout: Duration,
}

impl Subscription {
    /// Creates a pull-mode subscription with its own queue.
    ///
    /// The connection routes messages into [`inbox`](Self::inbox).
    pub fn pull(
        sid: Sid,
        subject: impl Into<String>,
        queue_group: Option<String>,
        connection: Weak<dyn Connection>,
    ) -> Self {
        let queue = Arc::new(MessageQueue::new());
        Self::with_delivery(sid, subject.into(), queue_group, connection, Delivery::Pull(queue))
    }

    pub(crate) fn dispatched(
        sid: Sid,
        subject: impl Into<String>,
        queue_group: Option<String>,
        connection: Weak<dyn Connection>,
        dispatcher: Weak<DispatcherCore>,
    ) -> Self {
        Self::with_delivery(
            sid,
            subject.into(),
            queue_group,
            connection,
            Delivery::Dispatched(dispatcher),
        )
    }

    fn with_delivery(
        sid: Sid,
        subject: String,
        queue_group: Option<String>,
        connection: Weak<dyn Connection>,
        delivery: Delivery,
    ) -> Self {
        Self {
            sid,
            subject,
            // an empty group name means no group
            queue_group: queue_group.filter(|g| !g.is_empty()),
            connection,
            delivery: RwLock::new(delivery),
            max_messages: AtomicI64::new(UNLIMITED),
            messages_received: AtomicU64::new(0),
            default_timeout: Duration::from_secs(1),
        }
    }

    /// Sets the timeout used by [`next_message_default`](Self::next_message_default).
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn sid(&self) -> Sid {
        self.sid
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn queue_group(&self) -> Option<&str> {
        self.queue_group.as_deref()
    }

    pub fn is_active(&self) -> bool {
        !matches!(*self.delivery.read(), Delivery::Inactive)
    }

    /// Returns `true` if messages are delivered by a dispatcher.
    pub fn is_dispatched(&self) -> bool {
        matches!(*self.delivery.read(), Delivery::Dispatched(_))
    }

    /// The dispatcher delivering this subscription, if it is still alive.
    pub fn dispatcher(&self) -> Option<Dispatcher> {
        match &*self.delivery.read() {
            Delivery::Dispatched(core) => core.upgrade().map(Dispatcher::from_core),
            _ => None,
        }
    }

    /// The queue the connection should route into, for active pull subscriptions.
    pub fn inbox(&self) -> Option<Arc<MessageQueue>> {
        match &*self.delivery.read() {
            Delivery::Pull(queue) => Some(Arc::clone(queue)),
            _ => None,
        }
    }

    pub fn max_messages(&self) -> i64 {
        self.max_messages.load(Ordering::SeqCst)
    }

    /// Sets the message limit. Values `<= 0` mean unlimited.
    pub fn set_max(&self, max: i64) {
        self.max_messages.store(max, Ordering::SeqCst);
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_received(&self) -> u64 {
        self.messages_received.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns `true` once a positive limit has been reached.
    pub fn reached_max(&self) -> bool {
        let max = self.max_messages();
        max > 0 && max as u64 <= self.messages_received()
    }

    /// Waits for the next message on a pull subscription.
    ///
    /// `None` waits indefinitely, `Some(Duration::ZERO)` only checks what is
    /// already queued. The message that reaches the limit is still returned;
    /// the subscription ends right after it.
    pub fn next_message(&self, timeout: Option<Duration>) -> Result<Message> {
        let queue = match &*self.delivery.read() {
            Delivery::Pull(queue) => Arc::clone(queue),
            Delivery::Dispatched(_) => return Err(Error::WrongMode),
            Delivery::Inactive => return Err(Error::Inactive),
        };

        match queue.pop(timeout) {
            Pop::Message(message) => {
                self.increment_received();
                if self.reached_max() {
                    self.finalize();
                }
                Ok(message)
            }
            Pop::TimedOut => Err(Error::Timeout),
            // only invalidation closes the queue
            Pop::Closed => Err(Error::Inactive),
        }
    }

    /// [`next_message`](Self::next_message) with the configured default timeout.
    pub fn next_message_default(&self) -> Result<Message> {
        self.next_message(Some(self.default_timeout))
    }

    /// Unsubscribes immediately.
    pub fn unsubscribe(&self) -> Result<()> {
        self.ensure_pull()?;
        self.connection()?.request_unsubscribe(self.sid, None)
    }

    /// Unsubscribes once `after` messages have been received in total.
    ///
    /// Returns the subscription so calls can be chained:
    ///
    /// ```no_run
    /// # use popsub_client::MemoryConnection;
    /// # fn example() -> popsub_client::Result<()> {
    /// let conn = MemoryConnection::new();
    /// let sub = conn.subscribe("hello")?;
    /// let msg = sub.unsubscribe_after(1)?.next_message(None)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn unsubscribe_after(&self, after: u64) -> Result<&Self> {
        self.ensure_pull()?;
        let after = (after > 0).then_some(after);
        self.connection()?.request_unsubscribe(self.sid, after)?;
        Ok(self)
    }

    /// Ends the subscription.
    ///
    /// Closes a pull queue, waking any blocked `next_message`. Intended for
    /// connections and dispatchers. Returns `true` only for the call that
    /// performed the invalidation.
    pub fn invalidate(&self) -> bool {
        let previous = std::mem::replace(&mut *self.delivery.write(), Delivery::Inactive);
        match previous {
            Delivery::Pull(queue) => {
                queue.close();
            }
            Delivery::Dispatched(_) => {}
            Delivery::Inactive => return false,
        }
        debug!(sid = self.sid, subject = %self.subject, "subscription invalidated");
        true
    }

    fn finalize(&self) {
        if self.invalidate() {
            if let Some(connection) = self.connection.upgrade() {
                connection.finalize_subscription(self.sid);
            }
        }
    }

    fn ensure_pull(&self) -> Result<()> {
        match &*self.delivery.read() {
            Delivery::Pull(_) => Ok(()),
            Delivery::Dispatched(_) => Err(Error::WrongMode),
            Delivery::Inactive => Err(Error::Inactive),
        }
    }

    fn connection(&self) -> Result<Arc<dyn Connection>> {
        self.connection.upgrade().ok_or(Error::ConnectionClosed)
    }
}
