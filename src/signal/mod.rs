//! Keyed boolean signals observable by the UI layer.
//!
//! Each key owns a [`watch`] channel, so late subscribers always see the
//! latest value and repeated identical writes wake no one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Set to `false` when a request starts and `true` once it has fully settled.
pub const STREAM_COMPLETE: &str = "stream-complete";

/// Shared store of named flags. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SignalStore {
    channels: Arc<Mutex<HashMap<String, watch::Sender<bool>>>>,
}

impl SignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, key: &str) -> watch::Sender<bool> {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(false).0)
            .clone()
    }

    /// Set `key`; watchers are notified only when the value changes.
    pub fn set(&self, key: &str, value: bool) {
        self.sender(key).send_if_modified(|current| {
            let changed = *current != value;
            *current = value;
            changed
        });
    }

    /// Current value of `key` (`false` if never set).
    pub fn get(&self, key: &str) -> bool {
        *self.sender(key).borrow()
    }

    /// Receiver for `key`.
    pub fn watch(&self, key: &str) -> watch::Receiver<bool> {
        self.sender(key).subscribe()
    }

    /// Stream of values for `key`, starting with the current one.
    pub fn subscribe(&self, key: &str) -> WatchStream<bool> {
        WatchStream::new(self.watch(key))
    }
}
