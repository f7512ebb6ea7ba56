//! Reentrancy guard for mutating Blueprint actions
//!
//! Only one modification of a given Blueprint may be outstanding in the
//! editor at a time. A second concurrent mutation is rejected rather than
//! queued or coalesced, because two different edits cannot share a result.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::CoalesceError;

/// Set of asset paths with a modification in progress
#[derive(Debug, Default)]
pub struct BusySet {
    marked: Mutex<HashSet<String>>,
}

impl BusySet {
    pub fn new() -> Self {
        Self::default()
    }

    fn marked(&self) -> MutexGuard<'_, HashSet<String>> {
        self.marked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `key` busy. Fails with `Busy` if it already is.
    ///
    /// The mark is cleared when the returned guard is dropped.
    pub fn try_mark(self: &Arc<Self>, key: &str) -> Result<BusyGuard, CoalesceError> {
        if key.trim().is_empty() {
            return Err(CoalesceError::invalid_key("busy key must not be empty"));
        }
        if !self.marked().insert(key.to_string()) {
            tracing::warn!("Rejecting modification of busy '{}'", key);
            return Err(CoalesceError::Busy {
                key: key.to_string(),
            });
        }
        tracing::debug!("Marked '{}' busy", key);
        Ok(BusyGuard {
            set: Arc::clone(self),
            key: key.to_string(),
        })
    }

    pub fn is_busy(&self, key: &str) -> bool {
        self.marked().contains(key)
    }

    pub fn len(&self) -> usize {
        self.marked().len()
    }

    pub fn is_empty(&self) -> bool {
        self.marked().is_empty()
    }
}

/// Busy mark on one asset, released on drop
pub struct BusyGuard {
    set: Arc<BusySet>,
    key: String,
}

impl BusyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for BusyGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusyGuard").field("key", &self.key).finish()
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.set.marked().remove(&self.key);
        tracing::debug!("Released '{}'", self.key);
    }
}
