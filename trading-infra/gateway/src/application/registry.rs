//! Subscription registry
//!
//! Maps stream keys to their waiters. Every waiter owns a channel, so an
//! update resolved while a caller is busy is queued rather than lost, and a
//! waiter registered after an update only sees later ones.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::domain::{Endpoint, MarketEvent, StreamKey};
use crate::error::StreamError;

pub type WaiterId = u64;
pub type StreamItem = Result<Vec<MarketEvent>, StreamError>;
pub type WaiterSender = mpsc::UnboundedSender<StreamItem>;

struct Entry {
    endpoint: Endpoint,
    channel: String,
    waiters: Vec<(WaiterId, WaiterSender)>,
}

impl Entry {
    fn deliver(&self, item: &StreamItem) -> usize {
        self.waiters
            .iter()
            .filter(|(_, tx)| tx.send(item.clone()).is_ok())
            .count()
    }
}

/// Result of registering a waiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub waiter: WaiterId,
    /// No other waiter held the key, so the wire subscription must be made
    pub first: bool,
}

/// The last waiter of a key left; its channel may be released
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released {
    pub endpoint: Endpoint,
    pub channel: String,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<StreamKey, Entry>>,
    next_waiter: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        key: StreamKey,
        endpoint: Endpoint,
        channel: String,
        sender: WaiterSender,
    ) -> Registration {
        let waiter = self.next_waiter.fetch_add(1, Ordering::Relaxed) + 1;
        let mut entries = self.entries.lock();
        match entries.get_mut(&key) {
            Some(entry) => {
                entry.waiters.push((waiter, sender));
                Registration {
                    waiter,
                    first: false,
                }
            }
            None => {
                tracing::debug!("New subscription {} on {}", key, endpoint);
                entries.insert(
                    key,
                    Entry {
                        endpoint,
                        channel,
                        waiters: vec![(waiter, sender)],
                    },
                );
                Registration {
                    waiter,
                    first: true,
                }
            }
        }
    }

    /// Drop one waiter; returns the channel to release if it was the last
    pub fn remove(&self, key: &StreamKey, waiter: WaiterId) -> Option<Released> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key)?;
        entry.waiters.retain(|(id, _)| *id != waiter);
        if !entry.waiters.is_empty() {
            return None;
        }
        entries.remove(key).map(|entry| Released {
            endpoint: entry.endpoint,
            channel: entry.channel,
        })
    }

    /// Deliver events to every current waiter of `key`
    ///
    /// With `origin` set, only waiters subscribed through that endpoint are
    /// resolved.
    pub fn resolve(
        &self,
        key: &StreamKey,
        events: &[MarketEvent],
        origin: Option<&Endpoint>,
    ) -> usize {
        if events.is_empty() {
            return 0;
        }
        let entries = self.entries.lock();
        let Some(entry) = entries.get(key) else {
            return 0;
        };
        if origin.is_some_and(|o| *o != entry.endpoint) {
            return 0;
        }
        entry.deliver(&Ok(events.to_vec()))
    }

    /// Deliver an error to every waiter of `key`, keeping them registered
    pub fn fail(&self, key: &StreamKey, error: &StreamError) -> usize {
        let entries = self.entries.lock();
        entries
            .get(key)
            .map(|entry| entry.deliver(&Err(error.clone())))
            .unwrap_or(0)
    }

    /// Deliver an error to every waiter of `key` and forget the key
    pub fn fail_and_remove(&self, key: &StreamKey, error: &StreamError) -> Option<Released> {
        let entry = self.entries.lock().remove(key)?;
        entry.deliver(&Err(error.clone()));
        Some(Released {
            endpoint: entry.endpoint,
            channel: entry.channel,
        })
    }

    /// Deliver an error to every waiter on `endpoint`, keeping them registered
    pub fn notify_endpoint(&self, endpoint: &Endpoint, error: &StreamError) -> usize {
        let entries = self.entries.lock();
        let item = Err(error.clone());
        entries
            .values()
            .filter(|entry| entry.endpoint == *endpoint)
            .map(|entry| entry.deliver(&item))
            .sum()
    }

    /// Fail and forget every key on `endpoint`
    pub fn drain_endpoint(&self, endpoint: &Endpoint, error: &StreamError) -> Vec<StreamKey> {
        let drained: Vec<(StreamKey, Entry)> = {
            let mut entries = self.entries.lock();
            let keys: Vec<StreamKey> = entries
                .iter()
                .filter(|(_, entry)| entry.endpoint == *endpoint)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| entries.remove(&key).map(|entry| (key, entry)))
                .collect()
        };
        let item = Err(error.clone());
        drained
            .into_iter()
            .map(|(key, entry)| {
                entry.deliver(&item);
                key
            })
            .collect()
    }

    pub fn keys_for_endpoint(&self, endpoint: &Endpoint) -> Vec<StreamKey> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, entry)| entry.endpoint == *endpoint)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn contains(&self, key: &StreamKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn waiter_count(&self, key: &StreamKey) -> usize {
        self.entries
            .lock()
            .get(key)
            .map(|entry| entry.waiters.len())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Forget every key; waiters see their streams end
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
