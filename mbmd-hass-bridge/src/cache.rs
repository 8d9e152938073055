//! Cache of published discovery documents, replayed on every (re)connect.

use std::collections::HashMap;

use tokio::sync::{Mutex, MutexGuard};

/// Discovery topic -> last published payload.
///
/// Holds at most one entry per (device, kind, phase); entries are only ever
/// inserted or overwritten.
#[derive(Debug, Default)]
pub struct DiscoveryCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a payload, replacing any previous one for the topic.
    ///
    /// Returns `true` if the topic was not cached before.
    pub async fn record(&self, topic: String, payload: Vec<u8>) -> bool {
        self.entries.lock().await.insert(topic, payload).is_none()
    }

    /// Lock the cache for the duration of a replay.
    pub async fn entries(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.entries.lock().await
    }

    pub async fn get(&self, topic: &str) -> Option<Vec<u8>> {
        self.entries.lock().await.get(topic).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
