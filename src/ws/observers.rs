//! Explicit subscriber registry for decoded bridge values.
//!
//! Callbacks run synchronously, in registration order, on the task that publishes. The
//! registry keeps only the most recent value; there is no history.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use sonic_rs::Value;
use tokio::sync::watch;

/// Callback invoked with every decoded value.
pub type ValueCallback = Arc<dyn Fn(&Value) + Send + Sync + 'static>;

/// Identifies one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

pub struct ValueObservers {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(ObserverId, ValueCallback)>>,
    latest: watch::Sender<Option<Value>>,
}

impl Default for ValueObservers {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ValueObservers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueObservers")
            .field("observers", &self.len())
            .finish()
    }
}

impl ValueObservers {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            next_id: AtomicU64::new(1),
            callbacks: Mutex::new(Vec::new()),
            latest,
        }
    }

    pub fn add(&self, callback: ValueCallback) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push((id, callback));
        }
        id
    }

    /// Remove a callback. Returns `false` when `id` was not registered.
    pub fn remove(&self, id: ObserverId) -> bool {
        let Ok(mut callbacks) = self.callbacks.lock() else {
            return false;
        };
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.len() != before
    }

    pub fn len(&self) -> usize {
        self.callbacks.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store `value` as the latest and hand it to every callback.
    pub fn publish(&self, value: Value) {
        // Snapshot under the lock, invoke outside it: callbacks may (un)register.
        let callbacks: Vec<ValueCallback> = match self.callbacks.lock() {
            Ok(callbacks) => callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            Err(_) => Vec::new(),
        };
        for callback in &callbacks {
            callback(&value);
        }
        self.latest.send_replace(Some(value));
    }

    /// Most recent value, if any arrived yet.
    pub fn latest(&self) -> Option<Value> {
        self.latest.borrow().clone()
    }

    /// Reactive read model: a receiver that observes every change of the latest value.
    pub fn watch(&self) -> watch::Receiver<Option<Value>> {
        self.latest.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonic_rs::json;

    #[test]
    fn publishes_to_all_and_keeps_latest() {
        let observers = ValueObservers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let a = {
            let seen = Arc::clone(&seen);
            observers.add(Arc::new(move |v: &Value| seen.lock().unwrap().push(("a", v.clone()))))
        };
        let _b = {
            let seen = Arc::clone(&seen);
            observers.add(Arc::new(move |v: &Value| seen.lock().unwrap().push(("b", v.clone()))))
        };

        observers.publish(json!(1));
        assert!(observers.remove(a));
        assert!(!observers.remove(a));
        observers.publish(json!(2));

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![("a", json!(1)), ("b", json!(1)), ("b", json!(2))]
        );
        assert_eq!(observers.latest(), Some(json!(2)));
        assert_eq!(observers.len(), 1);
    }

    #[tokio::test]
    async fn watch_sees_updates() {
        let observers = ValueObservers::new();
        let mut rx = observers.watch();
        assert!(rx.borrow().is_none());

        observers.publish(json!({"k": "v"}));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().clone(), Some(json!({"k": "v"})));
    }
}
