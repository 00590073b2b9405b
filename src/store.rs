//! Bounded Event Store
//!
//! Keeps the most recent gateway events in arrival order.
//!
//! Properties:
//! - Fixed capacity, oldest evicted first
//! - Never re-sorted by timestamp
//! - Every entry gets an id that survives eviction of older entries
//! - Snapshots are copies; the lock is held only for the copy, and image
//!   buffers are shared rather than duplicated

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::{WireEvent, WireStatus};

/// One stored event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    /// Arrival sequence number, starting at 0
    pub id: u64,
    /// File name of the persisted capture, if one was written
    pub capture: Option<String>,
    pub event: WireEvent,
}

/// Aggregate view over one snapshot
#[derive(Debug, Clone)]
pub struct StoreSummary {
    pub events: Vec<StoredEvent>,
    pub total: usize,
    pub granted: usize,
    pub denied: usize,
}

/// Lifetime counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub entries: usize,
    pub capacity: usize,
    pub appended: u64,
    pub evictions: u64,
}

pub struct EventStore {
    events: RwLock<VecDeque<StoredEvent>>,
    capacity: usize,
    appended: AtomicU64,
    evictions: AtomicU64,
}

impl EventStore {
    /// Create a store holding at most `capacity` events (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            appended: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Append and return the new entry's id.
    pub fn append(&self, event: WireEvent) -> u64 {
        self.append_with_capture(event, None)
    }

    pub fn append_with_capture(&self, event: WireEvent, capture: Option<String>) -> u64 {
        let mut events = self.events.write();
        if events.len() >= self.capacity {
            events.pop_front();
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        // Assigned under the write lock so ids follow arrival order.
        let id = self.appended.fetch_add(1, Ordering::Relaxed);
        events.push_back(StoredEvent { id, capture, event });
        id
    }

    /// Copy of the current events, oldest first
    pub fn snapshot(&self) -> Vec<WireEvent> {
        self.events.read().iter().map(|e| e.event.clone()).collect()
    }

    /// Copy of the current entries with their ids, oldest first
    pub fn entries(&self) -> Vec<StoredEvent> {
        self.events.read().iter().cloned().collect()
    }

    /// Entry by id, `None` once evicted
    pub fn get(&self, id: u64) -> Option<StoredEvent> {
        self.events.read().iter().find(|e| e.id == id).cloned()
    }

    pub fn summary(&self) -> StoreSummary {
        let events = self.entries();
        let granted = events
            .iter()
            .filter(|e| e.event.status == WireStatus::Granted)
            .count();
        let denied = events
            .iter()
            .filter(|e| e.event.status == WireStatus::Denied)
            .count();
        StoreSummary {
            total: events.len(),
            granted,
            denied,
            events,
        }
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entries: self.len(),
            capacity: self.capacity,
            appended: self.appended.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new(crate::DEFAULT_STORE_CAPACITY)
    }
}
