//! Per-resource serialization of writes.
//!
//! Each key owns a tokio mutex; tokio mutexes hand the lock out in the order
//! `lock` was called, which gives FIFO ordering per key. Distinct keys never
//! wait on each other. Idle keys are pruned so the map only holds resources
//! with writes in flight.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use crate::capability::Capabilities;
use crate::uri::Resource;

type Slot = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
pub struct WriteQueue {
    queues: Mutex<HashMap<String, Slot>>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue key of `resource`: its full string, lower-cased unless the
    /// provider is path case sensitive.
    pub fn key_for(capabilities: Capabilities, resource: &Resource) -> String {
        let key = resource.to_string();
        if capabilities.is_path_case_sensitive() {
            key
        } else {
            key.to_lowercase()
        }
    }

    /// Runs `task` after every task previously queued under `key` has
    /// finished, successfully or not.
    pub async fn queue<F, T>(&self, key: String, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let slot = {
            let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
            queues.entry(key.clone()).or_default().clone()
        };

        let guard = slot.lock().await;
        let output = task.await;
        drop(guard);

        self.release(&key, slot);
        output
    }

    fn release(&self, key: &str, slot: Slot) {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = queues.get(key) {
            // the map and `slot` are the only owners left: nobody is waiting
            if Arc::ptr_eq(current, &slot) && Arc::strong_count(&slot) == 2 {
                queues.remove(key);
            }
        }
    }

    /// Number of keys with a write running or waiting.
    pub fn active_keys(&self) -> usize {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
