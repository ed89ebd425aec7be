use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::debug;

use super::{MailboxError, MailboxResult};
use crate::core::CircularBuffer;

/// Pending messages an inbox holds before it starts evicting the oldest.
pub const DEFAULT_INBOX_CAPACITY: usize = 1000;

struct InboxState<M> {
    pending: CircularBuffer<M>,
    closed: bool,
    evicted: u64,
}

/// Leaky per-actor queue.
///
/// `push` never blocks: once `capacity` messages are pending the oldest one is dropped.
/// After `close` every `next` fails with [`MailboxError::InboxClosed`] and pushes are ignored.
pub struct Inbox<M> {
    state: Mutex<InboxState<M>>,
    notify: Notify,
}

impl<M> Default for Inbox<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Inbox<M> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INBOX_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(InboxState {
                pending: CircularBuffer::new(capacity.max(1)),
                closed: false,
                evicted: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue `msg`. Returns `false` when the inbox is closed and the message was dropped.
    pub fn push(&self, msg: M) -> bool {
        {
            let Ok(mut state) = self.state.lock() else {
                return false;
            };
            if state.closed {
                return false;
            }
            if state.pending.push(msg).is_some() {
                state.evicted += 1;
                debug!(
                    capacity = state.pending.capacity(),
                    evicted = state.evicted,
                    "inbox full; dropped oldest message"
                );
            }
        }
        self.notify.notify_one();
        true
    }

    /// Wait for the next message. No timeout; callers that need one wrap this future.
    pub async fn next(&self) -> MailboxResult<M> {
        loop {
            let notified = self.notify.notified();
            {
                let Ok(mut state) = self.state.lock() else {
                    return Err(MailboxError::InboxClosed);
                };
                if state.closed {
                    return Err(MailboxError::InboxClosed);
                }
                if let Some(msg) = state.pending.pop_front() {
                    return Ok(msg);
                }
            }
            notified.await;
        }
    }

    /// Idempotent. Pending messages are discarded.
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            if state.closed {
                return;
            }
            state.closed = true;
            state.pending.clear();
        }
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().map(|s| s.closed).unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages dropped because the inbox was full.
    pub fn evicted(&self) -> u64 {
        self.state.lock().map(|s| s.evicted).unwrap_or(0)
    }
}
