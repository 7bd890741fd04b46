//! Keyed publish/subscribe side-channel for telemetry strings.
//!
//! Independent of ports and of the link table.  A plugin publishes raw text
//! of the form `"<key>|<value>"`; the bus splits it on the first `|` and
//! fans the pair out to every subscriber of `key`.  Text without a separator
//! is filed under [`DEFAULT_KEY`].
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood, one per key plus
//! one wildcard channel, so a slow subscriber never blocks a publisher.
//! Delivery is best-effort and at-most-once; lagging subscribers lose the
//! oldest items.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::warn;

/// Key used when published text carries no separator.
pub const DEFAULT_KEY: &str = "ECUPUBLISH";

/// Separator between key and value.
pub const KEY_SEPARATOR: char = '|';

/// Default channel capacity per key.
const DEFAULT_CAPACITY: usize = 256;

/// One delivered `(key, value)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub key: String,
    pub value: String,
    pub received_at: DateTime<Utc>,
}

/// Split raw published text into `(key, value)` on the first separator.
///
/// ```
/// use ecubus_middleware::publish_bus::split_message;
///
/// assert_eq!(split_message("bw|42"), ("bw", "42"));
/// assert_eq!(split_message("42"), ("ECUPUBLISH", "42"));
/// ```
pub fn split_message(raw: &str) -> (&str, &str) {
    raw.split_once(KEY_SEPARATOR).unwrap_or((DEFAULT_KEY, raw))
}

/// Shared publish bus.  Clone it cheaply – all clones share the same
/// underlying channels.
#[derive(Clone, Debug)]
pub struct PublishBus {
    keys: Arc<RwLock<HashMap<String, broadcast::Sender<Published>>>>,
    all: broadcast::Sender<Published>,
    capacity: usize,
}

impl PublishBus {
    /// Create a bus whose per-key channels buffer `capacity` items.
    pub fn new(capacity: usize) -> Self {
        let (all, _) = broadcast::channel(capacity);
        Self {
            keys: Arc::new(RwLock::new(HashMap::new())),
            all,
            capacity,
        }
    }

    /// Publish raw `"key|value"` text.
    ///
    /// Returns how many subscribers (keyed and wildcard) were handed the
    /// pair.  Zero is a normal outcome.
    pub fn publish(&self, raw: &str) -> usize {
        let (key, value) = split_message(raw);
        let item = Published {
            key: key.to_string(),
            value: value.to_string(),
            received_at: Utc::now(),
        };

        let keyed = self
            .keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .and_then(|tx| tx.send(item.clone()).ok())
            .unwrap_or(0);
        let wildcard = self.all.send(item).unwrap_or(0);
        keyed + wildcard
    }

    /// Subscribe to pairs published under `key` only.
    pub fn subscribe(&self, key: impl Into<String>) -> KeySubscriber {
        let key = key.into();
        let receiver = self
            .keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        KeySubscriber {
            key: Some(key),
            receiver,
        }
    }

    /// Subscribe to every published pair regardless of key.
    pub fn subscribe_all(&self) -> KeySubscriber {
        KeySubscriber {
            key: None,
            receiver: self.all.subscribe(),
        }
    }
}

impl Default for PublishBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receiver for one key, or for all keys when created with
/// [`PublishBus::subscribe_all`].
pub struct KeySubscriber {
    key: Option<String>,
    receiver: broadcast::Receiver<Published>,
}

impl KeySubscriber {
    /// Wait for the next pair.
    ///
    /// Returns `None` once the bus has been dropped.
    pub async fn recv(&mut self) -> Option<Published> {
        loop {
            match self.receiver.recv().await {
                Ok(item) => return Some(item),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(key = ?self.key, lagged_by = n, "publish subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next pair if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Published> {
        loop {
            match self.receiver.try_recv() {
                Ok(item) => return Some(item),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(key = ?self.key, lagged_by = n, "publish subscriber lagged");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }

    /// The key this subscriber is bound to, `None` for the wildcard.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}
