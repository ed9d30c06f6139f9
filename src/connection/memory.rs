//! In-memory connection.
//!
//! Plays both the connection and the server within one process: published
//! messages are routed straight into the queues of matching subscriptions
//! and dispatchers. It is the reference collaborator for the delivery core
//! and is what the tests and the demo binary run against.
//!
//! ## Semantics
//!
//! - Routing follows subscription order; each matching registration gets
//!   its own copy of the message.
//! - For a queue group exactly one member receives each message, chosen
//!   round robin.
//! - An unsubscribe with a limit stops routing once that many messages have
//!   been routed to the sid, like a server-side auto-unsubscribe.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::subject;
use super::{Connection, Sid};
use crate::config::Settings;
use crate::dispatcher::Dispatcher;
use crate::message::Message;
use crate::queue::MessageQueue;
use crate::subscription::Subscription;
use crate::utils::{BoxError, Error, Result};

#[derive(Debug)]
struct Route {
    subject: String,
    queue_group: Option<String>,
    inbox: Arc<MessageQueue>,
    /// Set for pull subscriptions, which the connection applies limits to.
    subscription: Option<Arc<Subscription>>,
    max: Option<u64>,
    routed: u64,
}

#[derive(Debug, Default)]
struct RoutingTable {
    routes: BTreeMap<Sid, Route>,
    group_cursors: HashMap<String, usize>,
}

/// Counters kept by a [`MemoryConnection`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Message copies pushed into subscriber queues.
    pub routed: u64,
    /// Published messages that matched no registration.
    pub dropped: u64,
    /// Protocol-level unsubscribes issued.
    pub unsubscribes: u64,
}

#[derive(Debug)]
pub struct MemoryConnection {
    id: String,
    settings: Settings,
    self_ref: Weak<MemoryConnection>,
    next_sid: AtomicU64,
    table: Mutex<RoutingTable>,
    dispatchers: Mutex<Vec<Dispatcher>>,
    dispatcher_seq: AtomicUsize,
    closed: AtomicBool,
    routed: AtomicU64,
    dropped: AtomicU64,
    unsubscribes: AtomicU64,
}

impl MemoryConnection {
    pub fn new() -> Arc<Self> {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Arc<Self> {
        let id = format!("client-{}", uuid::Uuid::new_v4());
        info!(connection = %id, name = %settings.client.name, "memory connection opened");

        Arc::new_cyclic(|self_ref| Self {
            id,
            settings,
            self_ref: self_ref.clone(),
            next_sid: AtomicU64::new(1),
            table: Mutex::new(RoutingTable::default()),
            dispatchers: Mutex::new(Vec::new()),
            dispatcher_seq: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            routed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            unsubscribes: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn statistics(&self) -> Statistics {
        Statistics {
            routed: self.routed.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
            unsubscribes: self.unsubscribes.load(Ordering::SeqCst),
        }
    }

    /// Creates a pull subscription on `subject`.
    pub fn subscribe(&self, subject: &str) -> Result<Arc<Subscription>> {
        self.subscribe_pull(subject, None)
    }

    /// Creates a pull subscription that shares delivery with `queue_group`.
    pub fn subscribe_queue(&self, subject: &str, queue_group: &str) -> Result<Arc<Subscription>> {
        self.subscribe_pull(subject, Some(queue_group))
    }

    /// Creates a dispatcher whose thread calls `handler` for every message.
    pub fn create_dispatcher<F>(&self, handler: F) -> Result<Dispatcher>
    where
        F: Fn(Message) -> std::result::Result<(), BoxError> + Send + 'static,
    {
        self.ensure_open()?;
        let seq = self.dispatcher_seq.fetch_add(1, Ordering::SeqCst);
        let name = format!("{}-{seq}", self.settings.dispatcher.thread_name_prefix);

        let dispatcher = Dispatcher::new(self.weak(), name, handler)?;
        {
            let mut dispatchers = self.dispatchers.lock();
            // close() sets `closed` before it takes this list
            if !self.is_closed() {
                dispatchers.push(dispatcher.clone());
                return Ok(dispatcher);
            }
        }
        dispatcher.stop();
        Err(Error::ConnectionClosed)
    }

    /// Unsubscribes all of the dispatcher's registrations and stops it.
    ///
    /// The dispatcher is stopped even when an unsubscribe fails; the first
    /// failure is returned.
    pub fn close_dispatcher(&self, dispatcher: &Dispatcher) -> Result<()> {
        let mut first_error = None;
        for sid in dispatcher.sids() {
            if let Err(err) = self.request_unsubscribe(sid, None) {
                warn!(connection = %self.id, sid, error = %err, "unsubscribe failed");
                first_error.get_or_insert(err);
            }
        }
        dispatcher.stop();
        self.dispatchers.lock().retain(|d| d.id() != dispatcher.id());
        first_error.map_or(Ok(()), Err)
    }

    pub fn publish(&self, subject: &str, payload: impl Into<Bytes>) -> Result<()> {
        self.route(subject, None, payload.into())
    }

    pub fn publish_with_reply(
        &self,
        subject: &str,
        reply_to: &str,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        self.route(subject, Some(reply_to.to_string()), payload.into())
    }

    /// Ends every subscription and dispatcher and refuses further use.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let routes = std::mem::take(&mut self.table.lock().routes);
        for route in routes.into_values() {
            if let Some(sub) = route.subscription {
                sub.invalidate();
            }
        }

        let dispatchers = std::mem::take(&mut *self.dispatchers.lock());
        for dispatcher in dispatchers {
            dispatcher.stop();
        }
        info!(connection = %self.id, "memory connection closed");
    }

    fn subscribe_pull(&self, subject: &str, queue_group: Option<&str>) -> Result<Arc<Subscription>> {
        self.ensure_open()?;
        let sid = self.next_sid();
        let sub = Subscription::pull(sid, subject, queue_group.map(str::to_string), self.weak())
            .with_default_timeout(self.settings.subscription.default_timeout());
        let sub = Arc::new(sub);

        let inbox = sub.inbox().ok_or(Error::Inactive)?;
        let added = self.add_route(sid, subject, sub.queue_group(), inbox, Some(Arc::clone(&sub)));
        if let Err(err) = added {
            sub.invalidate();
            return Err(err);
        }
        Ok(sub)
    }

    fn add_route(
        &self,
        sid: Sid,
        subject: &str,
        queue_group: Option<&str>,
        inbox: Arc<MessageQueue>,
        subscription: Option<Arc<Subscription>>,
    ) -> Result<()> {
        let route = Route {
            subject: subject.to_string(),
            queue_group: queue_group.map(str::to_string),
            inbox,
            subscription,
            max: None,
            routed: 0,
        };
        {
            let mut table = self.table.lock();
            // close() sets `closed` before it takes the routes
            if self.is_closed() {
                return Err(Error::ConnectionClosed);
            }
            table.routes.insert(sid, route);
        }
        debug!(connection = %self.id, sid, subject, "subscribed");
        Ok(())
    }

    fn route(&self, subject: &str, reply_to: Option<String>, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        let mut table = self.table.lock();

        let mut targets = Vec::new();
        let mut groups: BTreeMap<String, Vec<Sid>> = BTreeMap::new();
        for (sid, route) in &table.routes {
            if !subject::matches(&route.subject, subject) {
                continue;
            }
            match &route.queue_group {
                Some(group) => groups.entry(group.clone()).or_default().push(*sid),
                None => targets.push(*sid),
            }
        }
        for (group, members) in groups {
            let cursor = table.group_cursors.entry(group).or_insert(0);
            targets.push(members[*cursor % members.len()]);
            *cursor = cursor.wrapping_add(1);
        }
        targets.sort_unstable();

        if targets.is_empty() {
            self.dropped.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        for sid in targets {
            let Some(route) = table.routes.get_mut(&sid) else {
                continue;
            };
            let message = Message::new(sid, subject, reply_to.clone(), payload.clone());
            if !route.inbox.push(message) {
                continue;
            }
            route.routed += 1;
            self.routed.fetch_add(1, Ordering::SeqCst);

            if route.max.is_some_and(|max| route.routed >= max) {
                table.routes.remove(&sid);
            }
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    fn weak(&self) -> Weak<dyn Connection> {
        self.self_ref.clone()
    }
}

impl Connection for MemoryConnection {
    fn next_sid(&self) -> Sid {
        self.next_sid.fetch_add(1, Ordering::SeqCst)
    }

    fn subscribe(
        &self,
        sid: Sid,
        subject: &str,
        queue_group: Option<&str>,
        inbox: Arc<MessageQueue>,
    ) -> Result<()> {
        self.add_route(sid, subject, queue_group, inbox, None)
    }

    fn request_unsubscribe(&self, sid: Sid, after: Option<u64>) -> Result<()> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);

        let mut table = self.table.lock();
        let Some(route) = table.routes.get_mut(&sid) else {
            return Ok(());
        };

        let subscription = route.subscription.clone();
        let remove = match after {
            Some(max) if max > 0 => {
                route.max = Some(max);
                route.routed >= max
            }
            _ => true,
        };
        if remove {
            table.routes.remove(&sid);
        }
        drop(table);
        debug!(connection = %self.id, sid, ?after, "unsubscribe");

        let Some(sub) = subscription else {
            return Ok(());
        };
        match after {
            Some(max) if max > 0 => {
                sub.set_max(i64::try_from(max).unwrap_or(i64::MAX));
                if sub.reached_max() && sub.invalidate() {
                    self.finalize_subscription(sid);
                }
            }
            _ => {
                sub.invalidate();
            }
        }
        Ok(())
    }

    fn finalize_subscription(&self, sid: Sid) {
        if self.table.lock().routes.remove(&sid).is_some() {
            debug!(connection = %self.id, sid, "routing removed");
        }
    }
}
