use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::connection::{Connection, Sid};
use crate::message::Message;
use crate::queue::{MessageQueue, Pop};
use crate::subscription::Subscription;
use crate::utils::{BoxError, Error, Result};

/// State shared between dispatcher handles and the dispatch thread.
#[derive(Debug)]
pub(crate) struct DispatcherCore {
    id: String,
    queue: Arc<MessageQueue>,
    registrations: Mutex<HashMap<Sid, Arc<Subscription>>>,
    running: AtomicBool,
    connection: Weak<dyn Connection>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Delivers messages for many subjects to one handler on one thread.
///
/// Messages are handled strictly in arrival order, one at a time. The
/// handler may subscribe and unsubscribe on its own dispatcher, including
/// its own subject; an unsubscribe takes effect from the next message.
///
/// Handler errors and panics are logged and the loop moves on to the next
/// message.
///
/// `Dispatcher` is a cheap handle; clones refer to the same dispatch thread.
/// Dropping handles does not stop the thread, call [`stop`](Self::stop) or
/// close the connection.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    core: Arc<DispatcherCore>,
}

impl Dispatcher {
    /// Creates a dispatcher and starts its thread.
    pub fn new<F>(
        connection: Weak<dyn Connection>,
        thread_name: impl Into<String>,
        handler: F,
    ) -> Result<Self>
    where
        F: Fn(Message) -> std::result::Result<(), BoxError> + Send + 'static,
    {
        let core = Arc::new(DispatcherCore {
            id: Uuid::new_v4().to_string(),
            queue: Arc::new(MessageQueue::new()),
            registrations: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
            connection,
            thread: Mutex::new(None),
        });

        let worker = Arc::clone(&core);
        let handle = thread::Builder::new()
            .name(thread_name.into())
            .spawn(move || worker.run(handler))?;
        *core.thread.lock() = Some(handle);

        debug!(dispatcher = %core.id, "dispatcher started");
        Ok(Self { core })
    }

    pub(crate) fn from_core(core: Arc<DispatcherCore>) -> Self {
        Self { core }
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn is_active(&self) -> bool {
        self.core.running.load(Ordering::SeqCst)
    }

    /// Messages queued but not yet handed to the handler.
    pub fn pending(&self) -> usize {
        self.core.queue.len()
    }

    /// Subjects with an active registration, sorted.
    pub fn subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self
            .core
            .registrations
            .lock()
            .values()
            .map(|sub| sub.subject().to_string())
            .collect();
        subjects.sort();
        subjects.dedup();
        subjects
    }

    /// Sids of all active registrations.
    pub fn sids(&self) -> Vec<Sid> {
        let mut sids: Vec<Sid> = self.core.registrations.lock().keys().copied().collect();
        sids.sort_unstable();
        sids
    }

    pub fn subscribe(&self, subject: &str) -> Result<Arc<Subscription>> {
        self.register(subject, None)
    }

    pub fn subscribe_queue(&self, subject: &str, queue_group: &str) -> Result<Arc<Subscription>> {
        self.register(subject, Some(queue_group))
    }

    /// Removes every registration for `subject` now.
    pub fn unsubscribe(&self, subject: &str) -> Result<()> {
        self.unregister(subject, None)
    }

    /// Lets `subject` receive `after` messages in total, then removes it.
    ///
    /// If that many have already been received the registration is removed
    /// now. `after == 0` is the same as [`unsubscribe`](Self::unsubscribe).
    pub fn unsubscribe_after(&self, subject: &str, after: u64) -> Result<()> {
        self.unregister(subject, (after > 0).then_some(after))
    }

    /// Closes the queue, drops every registration and ends the dispatch thread.
    ///
    /// Safe to call repeatedly and from inside the handler.
    pub fn stop(&self) {
        if !self.core.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.core.queue.close();

        let removed: Vec<Arc<Subscription>> = self
            .core
            .registrations
            .lock()
            .drain()
            .map(|(_, sub)| sub)
            .collect();
        let connection = self.core.connection.upgrade();
        for sub in removed {
            sub.invalidate();
            if let Some(connection) = &connection {
                connection.finalize_subscription(sub.sid());
            }
        }

        let handle = self.core.thread.lock().take();
        if let Some(handle) = handle {
            // joining ourselves from the handler would never return
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!(dispatcher = %self.core.id, "dispatch thread panicked");
            }
        }
        debug!(dispatcher = %self.core.id, "dispatcher stopped");
    }

    fn register(&self, subject: &str, queue_group: Option<&str>) -> Result<Arc<Subscription>> {
        if !self.is_active() {
            return Err(Error::DispatcherStopped);
        }
        let connection = self.connection()?;
        let queue_group = queue_group.filter(|g| !g.is_empty());

        let sub = {
            let mut registrations = self.core.registrations.lock();
            // stop() clears `running` before it drains this map
            if !self.is_active() {
                return Err(Error::DispatcherStopped);
            }
            let existing = registrations
                .values()
                .find(|sub| sub.subject() == subject && sub.queue_group() == queue_group);
            if let Some(existing) = existing {
                return Ok(Arc::clone(existing));
            }

            let sid = connection.next_sid();
            let sub = Arc::new(Subscription::dispatched(
                sid,
                subject,
                queue_group.map(str::to_string),
                self.core.connection.clone(),
                Arc::downgrade(&self.core),
            ));
            registrations.insert(sid, Arc::clone(&sub));
            sub
        };

        let routed = connection.subscribe(
            sub.sid(),
            subject,
            queue_group,
            Arc::clone(&self.core.queue),
        );
        if let Err(err) = routed {
            self.core.registrations.lock().remove(&sub.sid());
            sub.invalidate();
            return Err(err);
        }
        if !self.is_active() {
            // stopped while the connection was routing; drop the route it just added
            connection.finalize_subscription(sub.sid());
            return Err(Error::DispatcherStopped);
        }

        debug!(dispatcher = %self.core.id, sid = sub.sid(), subject, "registered");
        Ok(sub)
    }

    fn unregister(&self, subject: &str, after: Option<u64>) -> Result<()> {
        let connection = self.connection()?;
        let mut removed = Vec::new();
        let mut limited = Vec::new();

        {
            let mut registrations = self.core.registrations.lock();
            let sids: Vec<Sid> = registrations
                .values()
                .filter(|sub| sub.subject() == subject)
                .map(|sub| sub.sid())
                .collect();
            if sids.is_empty() {
                return Err(Error::NotFound(subject.to_string()));
            }

            for sid in sids {
                let Some(sub) = registrations.get(&sid) else {
                    continue;
                };
                match after {
                    Some(after) => {
                        sub.set_max(i64::try_from(after).unwrap_or(i64::MAX));
                        if sub.messages_received() < after {
                            limited.push(sid);
                            continue;
                        }
                    }
                    None => sub.set_max(crate::subscription::UNLIMITED),
                }
                if let Some(sub) = registrations.remove(&sid) {
                    removed.push(sub);
                }
            }
        }

        for sub in &removed {
            sub.invalidate();
        }
        let requests = removed
            .iter()
            .map(|sub| (sub.sid(), None))
            .chain(limited.into_iter().map(|sid| (sid, after)));

        // every sid gets its unsubscribe even if an earlier one failed
        let mut first_error = None;
        for (sid, after) in requests {
            if let Err(err) = connection.request_unsubscribe(sid, after) {
                warn!(dispatcher = %self.core.id, sid, error = %err, "unsubscribe failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn connection(&self) -> Result<Arc<dyn Connection>> {
        self.core
            .connection
            .upgrade()
            .ok_or(Error::ConnectionClosed)
    }
}

impl DispatcherCore {
    fn run<F>(&self, handler: F)
    where
        F: Fn(Message) -> std::result::Result<(), BoxError>,
    {
        trace!(dispatcher = %self.id, "dispatch loop running");
        loop {
            let message = match self.queue.pop(None) {
                Pop::Message(message) => message,
                Pop::Closed => break,
                Pop::TimedOut => continue,
            };

            let sid = message.sid;
            let Some(sub) = self.begin_delivery(sid) else {
                trace!(dispatcher = %self.id, sid, "no registration, message discarded");
                continue;
            };

            self.invoke(&handler, message, &sub);

            if self.complete_delivery(&sub) {
                if let Some(connection) = self.connection.upgrade() {
                    connection.finalize_subscription(sid);
                }
            }
        }
        trace!(dispatcher = %self.id, "dispatch loop exited");
    }

    /// Resolves the registration for `sid` and counts the delivery.
    fn begin_delivery(&self, sid: Sid) -> Option<Arc<Subscription>> {
        let registrations = self.registrations.lock();
        let sub = registrations.get(&sid)?;
        sub.increment_received();
        Some(Arc::clone(sub))
    }

    /// Removes the registration if its limit is now reached.
    ///
    /// Returns `true` if this call removed it.
    fn complete_delivery(&self, sub: &Subscription) -> bool {
        let mut registrations = self.registrations.lock();
        if !sub.reached_max() || registrations.remove(&sub.sid()).is_none() {
            return false;
        }
        drop(registrations);

        sub.invalidate();
        debug!(dispatcher = %self.id, sid = sub.sid(), subject = %sub.subject(), "message limit reached");
        true
    }

    fn invoke<F>(&self, handler: &F, message: Message, sub: &Subscription)
    where
        F: Fn(Message) -> std::result::Result<(), BoxError>,
    {
        match panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(dispatcher = %self.id, subject = %sub.subject(), error = %err, "message handler failed");
            }
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(dispatcher = %self.id, subject = %sub.subject(), %reason, "message handler panicked");
            }
        }
    }
}
