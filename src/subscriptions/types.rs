//! Configuration and notification types for the subscription manager.

use crate::types::{Snapshot, Source};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

/// Default capacity for snapshot watcher channels.
pub const DEFAULT_WATCH_BUFFER_SIZE: usize = 64;

/// Callback invoked with the current snapshot after every change.
pub type View<T> = Box<dyn FnMut(&Snapshot<T>) + Send>;

/// Named sources tracked by a manager, ordered by key.
pub struct SourceMap<T> {
    sources: BTreeMap<String, Source<T>>,
}

impl<T> SourceMap<T> {
    pub fn new() -> Self {
        Self {
            sources: BTreeMap::new(),
        }
    }

    /// Add or replace the source in a slot. Returns the previous source.
    pub fn insert(&mut self, key: impl Into<String>, source: Source<T>) -> Option<Source<T>> {
        self.sources.insert(key.into(), source)
    }

    /// Add a slot that may be empty. An empty slot is the same as no slot.
    pub fn insert_opt(
        &mut self,
        key: impl Into<String>,
        source: Option<Source<T>>,
    ) -> Option<Source<T>> {
        let key = key.into();
        match source {
            Some(source) => self.sources.insert(key, source),
            None => self.sources.remove(&key),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Source<T>> {
        self.sources.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Source<T>> {
        self.sources.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.sources.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Source<T>> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl<T> Default for SourceMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SourceMap<T> {
    fn clone(&self) -> Self {
        Self {
            sources: self.sources.clone(),
        }
    }
}

impl<T> fmt::Debug for SourceMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.sources.iter()).finish()
    }
}

impl<K: Into<String>, T> FromIterator<(K, Source<T>)> for SourceMap<T> {
    fn from_iter<I: IntoIterator<Item = (K, Source<T>)>>(iter: I) -> Self {
        Self {
            sources: iter.into_iter().map(|(k, s)| (k.into(), s)).collect(),
        }
    }
}

impl<K: Into<String>, T> FromIterator<(K, Option<Source<T>>)> for SourceMap<T> {
    fn from_iter<I: IntoIterator<Item = (K, Option<Source<T>>)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, source) in iter {
            map.insert_opt(key, source);
        }
        map
    }
}

/// Configuration for a subscription manager.
pub struct ListenerConfig<T> {
    /// Sources to subscribe to on mount.
    pub sources: SourceMap<T>,

    /// View invoked with every new snapshot (None = watchers only).
    pub view: Option<View<T>>,

    /// Channel capacity used by `watch()`.
    /// Default: 64
    pub watch_buffer_size: usize,
}

impl<T> ListenerConfig<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named source.
    pub fn source(mut self, key: impl Into<String>, source: Source<T>) -> Self {
        self.sources.insert(key, source);
        self
    }

    /// Set the view function.
    pub fn view<F>(mut self, view: F) -> Self
    where
        F: FnMut(&Snapshot<T>) + Send + 'static,
    {
        self.view = Some(Box::new(view));
        self
    }
}

impl<T> Default for ListenerConfig<T> {
    fn default() -> Self {
        Self {
            sources: SourceMap::new(),
            view: None,
            watch_buffer_size: DEFAULT_WATCH_BUFFER_SIZE,
        }
    }
}

impl<T> fmt::Debug for ListenerConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerConfig")
            .field("sources", &self.sources)
            .field("view", &self.view.is_some())
            .field("watch_buffer_size", &self.watch_buffer_size)
            .finish()
    }
}

/// Handle to a stream of snapshots.
pub struct SnapshotHandle<T> {
    /// Channel to receive snapshots.
    pub receiver: crossbeam_channel::Receiver<Snapshot<T>>,
}

impl<T> SnapshotHandle<T> {
    /// Receive the next snapshot (blocking).
    pub fn recv(&self) -> Result<Snapshot<T>, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a snapshot (non-blocking).
    pub fn try_recv(&self) -> Result<Snapshot<T>, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Snapshot<T>, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
