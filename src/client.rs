//! Subscribe to an actor's message stream through a bridge endpoint.
//!
//! A subscription key is the full target address, so two subscribers of the same actor on
//! the same bridge share one [`ConnectionSession`]. The session is created with the first
//! subscriber and closed intentionally when the last one leaves.

use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use kameo::prelude::{Actor, ActorRef};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sonic_rs::Value;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

use crate::core::{BridgeClientConfig, BridgeError, BridgeResult, SessionSnapshot};
use crate::transport::{BridgeTransport, tungstenite::TungsteniteTransport};
use crate::ws::{
    ConnectionSession, ConnectionSessionArgs, GetSessionStatus, ObserverId, SessionEvent,
    ValueObservers,
};

/// Characters `encodeURIComponent` leaves untouched besides ASCII alphanumerics.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// `<bridge>?actorid=<identity>` with the identity percent-encoded. A bridge address that
/// already carries a query gets `&actorid=` instead.
pub fn build_target(bridge: &str, identity: &str) -> String {
    let separator = if bridge.contains('?') { '&' } else { '?' };
    format!(
        "{bridge}{separator}actorid={}",
        utf8_percent_encode(identity, URI_COMPONENT)
    )
}

struct SubscriptionEntry<T: BridgeTransport> {
    session: ActorRef<ConnectionSession<T>>,
    observers: Arc<ValueObservers>,
}

type Registry<T> = Arc<Mutex<HashMap<String, SubscriptionEntry<T>>>>;

/// Entry point for bridge subscriptions.
pub struct BridgeClient<T: BridgeTransport = TungsteniteTransport> {
    transport: T,
    config: BridgeClientConfig,
    sessions: Registry<T>,
}

impl BridgeClient<TungsteniteTransport> {
    pub fn new(config: BridgeClientConfig) -> Self {
        Self::with_transport(TungsteniteTransport::default(), config)
    }
}

impl Default for BridgeClient<TungsteniteTransport> {
    fn default() -> Self {
        Self::new(BridgeClientConfig::default())
    }
}

impl<T: BridgeTransport> BridgeClient<T> {
    pub fn with_transport(transport: T, config: BridgeClientConfig) -> Self {
        Self {
            transport,
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &BridgeClientConfig {
        &self.config
    }

    /// Register `on_value` for every JSON value the actor `identity` emits through `bridge`.
    ///
    /// Callbacks run synchronously on the session task, in arrival order. Transport errors
    /// and malformed frames are logged and never reach them.
    pub async fn subscribe<F>(
        &self,
        bridge: &str,
        identity: &str,
        on_value: F,
    ) -> BridgeResult<SubscriptionHandle<T>>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        if bridge.trim().is_empty() {
            return Err(BridgeError::InvalidArgument(
                "bridge address must not be empty".to_string(),
            ));
        }
        if identity.is_empty() {
            return Err(BridgeError::InvalidArgument(
                "actor identity must not be empty".to_string(),
            ));
        }

        let target = build_target(bridge, identity);
        let mut sessions = self.sessions.lock().await;

        if let Some(entry) = sessions.get(&target) {
            if entry.session.is_alive() {
                let id = entry.observers.add(Arc::new(on_value));
                debug!(url = %target, observers = entry.observers.len(), "joined existing subscription");
                return Ok(SubscriptionHandle::new(
                    target,
                    id,
                    entry.session.clone(),
                    Arc::clone(&entry.observers),
                    Arc::clone(&self.sessions),
                ));
            }
        }

        let observers = Arc::new(ValueObservers::new());
        let id = observers.add(Arc::new(on_value));
        let session = ConnectionSession::spawn(ConnectionSessionArgs::with_config(
            target.clone(),
            self.transport.clone(),
            Arc::clone(&observers),
            &self.config,
        ));
        session
            .tell(SessionEvent::Connect)
            .send()
            .await
            .map_err(|err| BridgeError::ActorError(err.to_string()))?;

        sessions.insert(
            target.clone(),
            SubscriptionEntry {
                session: session.clone(),
                observers: Arc::clone(&observers),
            },
        );
        info!(url = %target, "subscription started");

        Ok(SubscriptionHandle::new(
            target,
            id,
            session,
            observers,
            Arc::clone(&self.sessions),
        ))
    }

    /// Number of live sessions.
    pub async fn active_subscriptions(&self) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|entry| entry.session.is_alive())
            .count()
    }

    /// Tear every subscription down. Outstanding handles become inert.
    pub async fn shutdown(&self) {
        let entries: Vec<(String, SubscriptionEntry<T>)> =
            self.sessions.lock().await.drain().collect();
        for (target, entry) in entries {
            stop_session(&target, &entry.session).await;
        }
    }
}

/// One registered callback. Dropping the handle does not unsubscribe.
pub struct SubscriptionHandle<T: BridgeTransport = TungsteniteTransport> {
    target: String,
    id: ObserverId,
    session: ActorRef<ConnectionSession<T>>,
    observers: Arc<ValueObservers>,
    sessions: Registry<T>,
    unsubscribed: AtomicBool,
}

impl<T: BridgeTransport> SubscriptionHandle<T> {
    fn new(
        target: String,
        id: ObserverId,
        session: ActorRef<ConnectionSession<T>>,
        observers: Arc<ValueObservers>,
        sessions: Registry<T>,
    ) -> Self {
        Self {
            target,
            id,
            session,
            observers,
            sessions,
            unsubscribed: AtomicBool::new(false),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Most recent value delivered on this subscription's session.
    pub fn latest(&self) -> Option<Value> {
        self.observers.latest()
    }

    pub fn watch(&self) -> watch::Receiver<Option<Value>> {
        self.observers.watch()
    }

    pub async fn status(&self) -> BridgeResult<SessionSnapshot> {
        self.session
            .ask(GetSessionStatus)
            .await
            .map_err(|err| BridgeError::ActorError(err.to_string()))
    }

    /// Remove the callback. The last subscriber to leave closes the session; no retry fires
    /// afterwards. Calling this again is a no-op.
    pub async fn unsubscribe(&self) {
        if self.unsubscribed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut sessions = self.sessions.lock().await;
        self.observers.remove(self.id);
        if !self.observers.is_empty() {
            debug!(url = %self.target, observers = self.observers.len(), "subscriber left");
            return;
        }

        let owned = sessions
            .get(&self.target)
            .is_some_and(|entry| Arc::ptr_eq(&entry.observers, &self.observers));
        if owned {
            sessions.remove(&self.target);
        }
        drop(sessions);

        stop_session(&self.target, &self.session).await;
        info!(url = %self.target, "subscription ended");
    }
}

async fn stop_session<T: BridgeTransport>(target: &str, session: &ActorRef<ConnectionSession<T>>) {
    if !session.is_alive() {
        return;
    }
    if let Err(err) = session.ask(SessionEvent::Disconnect).await {
        debug!(url = %target, error = %err, "session stopped before disconnect");
    }
    let _ = session.stop_gracefully().await;
    session.wait_for_shutdown().await;
}
