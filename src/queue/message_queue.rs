use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::message::Message;

/// Outcome of a [`MessageQueue::pop`].
///
/// `TimedOut` and `Closed` both carry no message but mean different things:
/// a timed out consumer may try again, a closed queue will never yield
/// another message.
#[derive(Debug)]
pub enum Pop {
    Message(Message),
    TimedOut,
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<Message>,
    closed: bool,
}

/// Multi-producer, single-consumer FIFO of delivered messages.
///
/// Producers never block. The consumer blocks in [`pop`](Self::pop) until a
/// message arrives, the timeout elapses or the queue is closed. Closing is
/// permanent and wakes every waiter.
#[derive(Debug, Default)]
pub struct MessageQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message to the tail and wakes one waiting consumer.
    ///
    /// Returns `false` and drops the message if the queue is closed.
    pub fn push(&self, message: Message) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.messages.push_back(message);
        drop(state);

        self.available.notify_one();
        true
    }

    /// Removes the message at the head of the queue, waiting if necessary.
    ///
    /// `None` waits indefinitely, `Some(Duration::ZERO)` returns at once when
    /// the queue is empty. Once the queue is closed every call returns
    /// [`Pop::Closed`] immediately, even if messages were still buffered.
    pub fn pop(&self, timeout: Option<Duration>) -> Pop {
        // an unrepresentable deadline is as good as no deadline
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return Pop::Closed;
            }
            if let Some(message) = state.messages.pop_front() {
                return Pop::Message(message);
            }

            match deadline {
                None => self.available.wait(&mut state),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Pop::TimedOut;
                    }
                    // spurious and timed out wakeups both fall through to the checks above
                    let _ = self.available.wait_until(&mut state, deadline);
                }
            }
        }
    }

    /// Closes the queue and wakes every blocked consumer.
    ///
    /// Returns `true` only for the call that performed the close.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        drop(state);

        self.available.notify_all();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of buffered messages not yet popped.
    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
