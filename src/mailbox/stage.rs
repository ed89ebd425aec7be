use std::collections::HashMap;
use std::future::Future;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};
use std::time::Duration;

use sonic_rs::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::actor::ActorContext;
use super::inbox::{DEFAULT_INBOX_CAPACITY, Inbox};
use super::{DISCARD, MailboxError, MailboxResult};
use crate::core::{Envelope, MailboxMessage};

struct StageInner {
    inboxes: Mutex<HashMap<String, Arc<Inbox<MailboxMessage>>>>,
    next_actor: AtomicU64,
    next_reply: AtomicU64,
    inbox_capacity: usize,
}

/// Address registry for in-process mailbox actors.
///
/// Cloning is cheap; clones share the registry.
#[derive(Clone)]
pub struct Stage {
    inner: Arc<StageInner>,
}

impl Default for Stage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("actors", &self.len())
            .field("inbox_capacity", &self.inner.inbox_capacity)
            .finish()
    }
}

/// A spawned actor task.
pub struct ActorHandle {
    address: String,
    task: JoinHandle<MailboxResult<()>>,
}

impl ActorHandle {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the actor. Its mailbox is released once the task unwinds.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the behaviour to return.
    pub async fn join(self) -> MailboxResult<()> {
        match self.task.await {
            Ok(res) => res,
            Err(err) if err.is_cancelled() => Ok(()),
            Err(err) => Err(MailboxError::Bridge(crate::core::BridgeError::ActorError(
                err.to_string(),
            ))),
        }
    }
}

impl Stage {
    pub fn new() -> Self {
        Self::with_inbox_capacity(DEFAULT_INBOX_CAPACITY)
    }

    pub fn with_inbox_capacity(inbox_capacity: usize) -> Self {
        Self {
            inner: Arc::new(StageInner {
                inboxes: Mutex::new(HashMap::new()),
                next_actor: AtomicU64::new(1),
                next_reply: AtomicU64::new(1),
                inbox_capacity: inbox_capacity.max(1),
            }),
        }
    }

    /// Register `address` and hand out the context that owns its inbox.
    pub fn open(&self, address: impl Into<String>) -> MailboxResult<ActorContext> {
        let address = address.into();
        if address.is_empty() || address == DISCARD {
            return Err(MailboxError::InvalidAddress(address));
        }

        let mut inboxes = self
            .inner
            .inboxes
            .lock()
            .map_err(|_| MailboxError::Disconnected)?;
        if inboxes.contains_key(&address) {
            return Err(MailboxError::AddressInUse(address));
        }
        let inbox = Arc::new(Inbox::with_capacity(self.inner.inbox_capacity));
        inboxes.insert(address.clone(), Arc::clone(&inbox));
        drop(inboxes);

        debug!(pid = %address, "mailbox opened");
        Ok(ActorContext::new(address, inbox, self.clone()))
    }

    /// Run `behaviour` under a fresh `s.actor.N` address.
    pub fn spawn<F, Fut>(&self, behaviour: F) -> MailboxResult<ActorHandle>
    where
        F: FnOnce(ActorContext) -> Fut,
        Fut: Future<Output = MailboxResult<()>> + Send + 'static,
    {
        let n = self.inner.next_actor.fetch_add(1, Ordering::Relaxed);
        self.spawn_named(format!("s.actor.{n}"), behaviour)
    }

    /// Run `behaviour` under a caller-chosen address.
    pub fn spawn_named<F, Fut>(
        &self,
        address: impl Into<String>,
        behaviour: F,
    ) -> MailboxResult<ActorHandle>
    where
        F: FnOnce(ActorContext) -> Fut,
        Fut: Future<Output = MailboxResult<()>> + Send + 'static,
    {
        let ctx = self.open(address)?;
        let address = ctx.address().to_string();
        let fut = behaviour(ctx);

        let pid = address.clone();
        let task = tokio::spawn(async move {
            let res = fut.await;
            match &res {
                Ok(()) => info!(pid = %pid, "actor finished"),
                Err(err) => error!(pid = %pid, error = %err, "error while processing actor"),
            }
            res
        });

        Ok(ActorHandle { address, task })
    }

    /// Deliver `payload` (JSON text) to `to`, attributed to `from`.
    pub fn send(&self, from: &str, to: &str, payload: impl Into<String>) -> MailboxResult<()> {
        if to == DISCARD {
            return Ok(());
        }
        let inbox = self
            .lookup(to)
            .ok_or_else(|| MailboxError::InboxNotFound(to.to_string()))?;
        inbox.push(MailboxMessage {
            sender: from.to_string(),
            payload: payload.into(),
        });
        Ok(())
    }

    /// Send `payload` to `to` on behalf of nobody: replies go to `discard`.
    pub fn inject(&self, to: &str, payload: &Value) -> MailboxResult<()> {
        let text = sonic_rs::to_string(payload).map_err(|err| MailboxError::Encode(err.to_string()))?;
        self.send(DISCARD, to, text)
    }

    /// Send `payload` to `to` from a one-shot `reply.N` address and wait up to `ttl` for the
    /// first message that comes back.
    pub async fn request(&self, to: &str, payload: &Value, ttl: Duration) -> MailboxResult<Envelope> {
        let n = self.inner.next_reply.fetch_add(1, Ordering::Relaxed);
        let ctx = self.open(format!("reply.{n}"))?;

        let text = sonic_rs::to_string(payload).map_err(|err| MailboxError::Encode(err.to_string()))?;
        self.send(ctx.address(), to, text)?;

        let record = tokio::time::timeout(ttl, ctx.next())
            .await
            .map_err(|_| MailboxError::Timeout(ttl))??;
        Ok(Envelope::from_record(&record)?)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.lookup(address).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.inboxes.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, address: &str) -> Option<Arc<Inbox<MailboxMessage>>> {
        self.inner
            .inboxes
            .lock()
            .ok()
            .and_then(|inboxes| inboxes.get(address).cloned())
    }

    /// Unregister `address` if it still maps to `inbox`.
    pub(crate) fn release(&self, address: &str, inbox: &Arc<Inbox<MailboxMessage>>) {
        inbox.close();
        if let Ok(mut inboxes) = self.inner.inboxes.lock() {
            let owned = inboxes
                .get(address)
                .is_some_and(|existing| Arc::ptr_eq(existing, inbox));
            if owned {
                inboxes.remove(address);
                debug!(pid = %address, "mailbox released");
            }
        }
    }
}
