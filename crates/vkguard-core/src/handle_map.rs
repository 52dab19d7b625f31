use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

/// Concurrent map from a raw Vulkan handle value to its tracked state.
///
/// Drivers reuse handle values after destruction, so entries live exactly
/// from the create call that inserted them to the destroy call that removes
/// them. A second insert under a live key means a destroy was missed; the
/// stale entry is handed back to the caller instead of being silently
/// merged with the new object.
pub struct StateMap<T> {
    entries: DashMap<u64, Arc<T>>,
    kind: &'static str,
}

impl<T> StateMap<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            entries: DashMap::new(),
            kind,
        }
    }

    /// Register state for a freshly created handle.
    pub fn insert(&self, handle: u64, state: Arc<T>) -> Option<Arc<T>> {
        let stale = self.entries.insert(handle, state);
        if stale.is_some() {
            warn!("{} 0x{:x} registered twice; dropping stale state", self.kind, handle);
        }
        stale
    }

    pub fn get(&self, handle: u64) -> Option<Arc<T>> {
        self.entries.get(&handle).map(|v| Arc::clone(v.value()))
    }

    pub fn contains(&self, handle: u64) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Remove state on the destroy/free call for `handle`.
    pub fn remove(&self, handle: u64) -> Option<Arc<T>> {
        self.entries.remove(&handle).map(|(_, v)| v)
    }

    /// Snapshot of all live entries.
    pub fn snapshot(&self) -> Vec<(u64, Arc<T>)> {
        self.entries
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect()
    }

    /// Remove every entry matching `pred`, returning what was removed.
    pub fn drain_where(&self, mut pred: impl FnMut(&T) -> bool) -> Vec<(u64, Arc<T>)> {
        let keys: Vec<u64> = self
            .entries
            .iter()
            .filter(|e| pred(e.value()))
            .map(|e| *e.key())
            .collect();
        keys.into_iter()
            .filter_map(|k| self.entries.remove(&k))
            .collect()
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Return number of live handles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
