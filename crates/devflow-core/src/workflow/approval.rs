//! Registry of `wait` steps blocked on external approval.
//!
//! A wait step registers a one-shot reply channel under `run_id::step_id`
//! and suspends on it. `approve_wait` looks the key up and sends the
//! approval payload through the channel.

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Pending approval channels keyed by `run_id::step_id`.
#[derive(Debug, Default)]
pub struct PendingWaits {
    waits: DashMap<String, oneshot::Sender<Value>>,
}

impl PendingWaits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(run_id: Uuid, step_id: &str) -> String {
        format!("{run_id}::{step_id}")
    }

    /// Register a wait and return the receiving end. The returned guard
    /// removes the registration when dropped.
    pub fn register(&self, run_id: Uuid, step_id: &str) -> (oneshot::Receiver<Value>, WaitGuard<'_>) {
        let key = Self::key(run_id, step_id);
        let (tx, rx) = oneshot::channel();
        self.waits.insert(key.clone(), tx);
        (rx, WaitGuard { waits: self, key })
    }

    /// Deliver `data` to the wait registered under `run_id::step_id`.
    /// Returns `false` when no such wait is pending.
    pub fn resolve(&self, run_id: Uuid, step_id: &str, data: Value) -> bool {
        match self.waits.remove(&Self::key(run_id, step_id)) {
            Some((_, tx)) => tx.send(data).is_ok(),
            None => false,
        }
    }

    pub fn is_pending(&self, run_id: Uuid, step_id: &str) -> bool {
        self.waits.contains_key(&Self::key(run_id, step_id))
    }

    /// Keys of all pending waits, sorted.
    pub fn pending(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.waits.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

/// Deregisters a wait on drop.
pub struct WaitGuard<'a> {
    waits: &'a PendingWaits,
    key: String,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.waits.waits.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolve_delivers_payload() {
        let waits = PendingWaits::new();
        let run_id = Uuid::now_v7();
        let (rx, _guard) = waits.register(run_id, "review");
        assert!(waits.is_pending(run_id, "review"));

        assert!(waits.resolve(run_id, "review", json!({ "ok": true })));
        assert_eq!(rx.await.unwrap(), json!({ "ok": true }));
        assert!(!waits.is_pending(run_id, "review"));
    }

    #[test]
    fn resolve_unknown_key_returns_false() {
        let waits = PendingWaits::new();
        assert!(!waits.resolve(Uuid::now_v7(), "nope", Value::Null));
    }

    #[test]
    fn guard_deregisters_on_drop() {
        let waits = PendingWaits::new();
        let run_id = Uuid::now_v7();
        {
            let (_rx, _guard) = waits.register(run_id, "gate");
            assert_eq!(waits.pending(), vec![PendingWaits::key(run_id, "gate")]);
        }
        assert!(waits.pending().is_empty());
    }
}
