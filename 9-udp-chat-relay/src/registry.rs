//! Shared table of connected participants.
//!
//! The relay's receive loop is the only writer, but presence snapshots may be
//! read from other tasks or threads at any time, so every operation takes the
//! lock exactly once and never hands out references into the table.

use std::{
    net::SocketAddr,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::{Duration, Instant},
};

/// Network address and port of a participant as seen by the relay socket.
pub type Endpoint = SocketAddr;

/// Name used to attribute messages from endpoints that never sent `CONNECT`.
pub const UNKNOWN_SENDER: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEntry {
    pub endpoint: Endpoint,
    pub name: String,
}

struct Slot {
    entry: ClientEntry,
    last_seen: Instant,
}

/// Endpoint to display-name mapping, kept in registration order.
///
/// Presence listings follow the order in which endpoints first registered.
///
/// Display names are not unique. [`Registry::find_by_name`] returns the
/// earliest registration when two endpoints share a name.
#[derive(Default)]
pub struct Registry {
    slots: RwLock<Vec<Slot>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or renames the entry for `endpoint`.
    ///
    /// A repeated registration keeps the entry's original position and returns
    /// the name it replaced.
    pub fn register(&self, endpoint: Endpoint, name: String) -> Option<String> {
        let mut slots = self.write();
        let now = Instant::now();

        if let Some(slot) = slots.iter_mut().find(|slot| slot.entry.endpoint == endpoint) {
            slot.last_seen = now;
            return Some(std::mem::replace(&mut slot.entry.name, name));
        }

        slots.push(Slot {
            entry: ClientEntry { endpoint, name },
            last_seen: now,
        });
        None
    }

    pub fn find_by_name(&self, name: &str) -> Option<Endpoint> {
        self.read()
            .iter()
            .find(|slot| slot.entry.name == name)
            .map(|slot| slot.entry.endpoint)
    }

    /// Fan-out targets: every registered endpoint except `excluded`.
    pub fn all_endpoints_except(&self, excluded: Option<Endpoint>) -> Vec<Endpoint> {
        self.read()
            .iter()
            .map(|slot| slot.entry.endpoint)
            .filter(|endpoint| Some(*endpoint) != excluded)
            .collect()
    }

    pub fn name_of(&self, endpoint: Endpoint) -> Option<String> {
        self.read()
            .iter()
            .find(|slot| slot.entry.endpoint == endpoint)
            .map(|slot| slot.entry.name.clone())
    }

    /// Like [`Registry::name_of`], falling back to [`UNKNOWN_SENDER`].
    pub fn display_name(&self, endpoint: Endpoint) -> String {
        self.name_of(endpoint)
            .unwrap_or_else(|| UNKNOWN_SENDER.to_string())
    }

    /// Names in registration order, taken under a single lock.
    pub fn names_snapshot(&self) -> Vec<String> {
        self.read()
            .iter()
            .map(|slot| slot.entry.name.clone())
            .collect()
    }

    /// Every entry in registration order, taken under a single lock.
    pub fn entries(&self) -> Vec<ClientEntry> {
        self.read().iter().map(|slot| slot.entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Records activity from `endpoint`. Returns `false` if it is not registered.
    pub fn touch(&self, endpoint: Endpoint) -> bool {
        let mut slots = self.write();
        match slots.iter_mut().find(|slot| slot.entry.endpoint == endpoint) {
            Some(slot) => {
                slot.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, endpoint: Endpoint) -> Option<ClientEntry> {
        let mut slots = self.write();
        let index = slots
            .iter()
            .position(|slot| slot.entry.endpoint == endpoint)?;
        Some(slots.remove(index).entry)
    }

    /// Drops every entry that has been silent for at least `max_idle` and
    /// returns them in registration order.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<ClientEntry> {
        let now = Instant::now();
        let mut slots = self.write();
        let mut evicted = Vec::new();

        slots.retain(|slot| {
            let idle = now.saturating_duration_since(slot.last_seen) >= max_idle;
            if idle {
                evicted.push(slot.entry.clone());
            }
            !idle
        });

        evicted
    }

    // Every mutation completes under one guard, so a poisoned table is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, Vec<Slot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Slot>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}
