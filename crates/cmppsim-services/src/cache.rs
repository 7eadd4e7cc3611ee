//! Correlation cache: bridges an asynchronous request to its response or
//! follow-up event.
//!
//! Keys are decimal strings: the submit sequence id on the client side, the
//! allocated Msg_Id on the server side. Values are opaque session contexts.
//! An entry is written at submit time, read once by whoever handles the
//! matching event, then deleted.
//!
//! Entries whose response never arrives are bounded two ways: every entry
//! carries a TTL after which it is invisible and gets reaped, and the cache
//! refuses new keys once `max_entries` live entries exist.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry as Slot;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("correlation cache full ({capacity} entries)")]
    Full { capacity: usize },
    #[error("correlation key {key} is already in use")]
    Occupied { key: String },
}

/// Key/value capability used by both simulator roles.
///
/// Each operation is atomic on its own key; there are no cross-key
/// transactions. `get` on an absent key is `None`, never an error.
pub trait CorrelationCache: Send + Sync {
    fn set(&self, key: &str, value: String) -> Result<(), CacheError>;

    /// Like `set`, but fails with [`CacheError::Occupied`] while a live
    /// entry holds `key`.
    fn set_if_absent(&self, key: &str, value: String) -> Result<(), CacheError>;

    fn get(&self, key: &str) -> Option<String>;

    /// Remove and return the live value under `key`. Of two concurrent
    /// callers at most one gets it.
    fn take(&self, key: &str) -> Option<String>;

    fn delete(&self, key: &str);
}

struct Entry {
    value: String,
    inserted_at: Instant,
}

impl Entry {
    fn new(value: String) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
        }
    }
}

/// In-process correlation cache with TTL and capacity bound.
#[derive(Clone)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, Entry>>,
    ttl: Duration,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            max_entries,
        }
    }

    /// Live and not-yet-reaped entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn reap(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = now.duration_since(entry.inserted_at) < self.ttl;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    fn is_expired(&self, entry: &Entry) -> bool {
        entry.inserted_at.elapsed() >= self.ttl
    }

    /// Refuse a new key while full, after one reap.
    fn make_room(&self, key: &str) -> Result<(), CacheError> {
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            let reaped = self.reap();
            if reaped == 0 || self.entries.len() >= self.max_entries {
                return Err(CacheError::Full {
                    capacity: self.max_entries,
                });
            }
        }
        Ok(())
    }
}

impl CorrelationCache for MemoryCache {
    fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        self.make_room(key)?;
        self.entries.insert(key.to_string(), Entry::new(value));
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: String) -> Result<(), CacheError> {
        self.make_room(key)?;
        match self.entries.entry(key.to_string()) {
            Slot::Occupied(mut slot) => {
                if !self.is_expired(slot.get()) {
                    return Err(CacheError::Occupied {
                        key: key.to_string(),
                    });
                }
                slot.insert(Entry::new(value));
            }
            Slot::Vacant(slot) => {
                slot.insert(Entry::new(value));
            }
        }
        Ok(())
    }

    fn take(&self, key: &str) -> Option<String> {
        let (_, entry) = self.entries.remove(key)?;
        (!self.is_expired(&entry)).then_some(entry.value)
    }

    fn get(&self, key: &str) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) if !self.is_expired(&entry) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| self.is_expired(entry));
        }
        None
    }

    fn delete(&self, key: &str) {
        self.entries.remove(key);
    }
}

/// Periodically reap expired entries until shutdown.
pub async fn reaper_loop(
    cache: MemoryCache,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("correlation reaper shutting down");
                return;
            }
            _ = ticker.tick() => {
                let removed = cache.reap();
                if removed > 0 {
                    tracing::warn!(
                        removed,
                        remaining = cache.len(),
                        "reaped orphaned correlation entries"
                    );
                } else {
                    tracing::trace!(remaining = cache.len(), "correlation reap pass");
                }
            }
        }
    }
}
