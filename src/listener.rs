//! Registry of long-lived per-merchant listener tasks (inbound chat update
//! loops).
//!
//! Invariant: at most one live listener per merchant. Starting a new one
//! cancels the previous one first, atomically under the manager's lock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct ListenerManager {
    active: Mutex<HashMap<i64, CancellationToken>>,
}

impl ListenerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `listen` for the merchant, cancelling any previous listener.
    /// The future must exit promptly once its token is cancelled. Returns
    /// the new listener's token.
    pub fn start<F, Fut>(&self, merchant_id: i64, listen: F) -> CancellationToken
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        {
            let mut active = self.active.lock().expect("listener registry poisoned");
            if let Some(previous) = active.insert(merchant_id, token.clone()) {
                previous.cancel();
            }
        }

        tracing::info!(merchant_id, "starting merchant listener");
        tokio::spawn(listen(token.clone()));
        token
    }

    /// Cancels the merchant's listener. Returns whether one was running.
    pub fn stop(&self, merchant_id: i64) -> bool {
        let mut active = self.active.lock().expect("listener registry poisoned");
        match active.remove(&merchant_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(merchant_id, "stopped merchant listener");
                true
            }
            None => false,
        }
    }

    /// Cancels every listener (process shutdown).
    pub fn stop_all(&self) {
        let mut active = self.active.lock().expect("listener registry poisoned");
        for (merchant_id, token) in active.drain() {
            token.cancel();
            tracing::info!(merchant_id, "stopped merchant listener");
        }
    }

    pub fn is_active(&self, merchant_id: i64) -> bool {
        self.active
            .lock()
            .expect("listener registry poisoned")
            .contains_key(&merchant_id)
    }
}
