//! Core protocol types: messages, talkbacks, sinks, sources and snapshots.

use serde::Serialize;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Message kind code for the handshake.
pub const START: u8 = 0;
/// Message kind code for a value delivery (or a pull on a talkback).
pub const DATA: u8 = 1;
/// Message kind code for termination (or a cancel on a talkback).
pub const END: u8 = 2;

/// A message sent by a source to its sink.
pub enum Message<T> {
    /// Handshake carrying the talkback for this subscription.
    Start(Talkback),
    /// A new value.
    Data(T),
    /// The source terminated on its own.
    End,
    /// A message kind this listener does not understand.
    Unknown(u8),
}

impl<T> Message<T> {
    /// Numeric callbag kind of this message.
    pub fn code(&self) -> u8 {
        match self {
            Message::Start(_) => START,
            Message::Data(_) => DATA,
            Message::End => END,
            Message::Unknown(code) => *code,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Message<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Start(_) => write!(f, "Start"),
            Message::Data(value) => f.debug_tuple("Data").field(value).finish(),
            Message::End => write!(f, "End"),
            Message::Unknown(code) => write!(f, "Unknown({})", code),
        }
    }
}

/// A signal sent by the consumer back to a source through its talkback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Request the next value.
    Pull,
    /// Stop permanently; no further messages should follow.
    Cancel,
}

impl Signal {
    /// Numeric callbag kind of this signal.
    pub fn code(self) -> u8 {
        match self {
            Signal::Pull => DATA,
            Signal::Cancel => END,
        }
    }

    /// Parse a talkback signal from its numeric kind.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            DATA => Some(Signal::Pull),
            END => Some(Signal::Cancel),
            _ => None,
        }
    }
}

/// Pull/cancel handle handed over by a source in [`Message::Start`].
#[derive(Clone)]
pub struct Talkback(Arc<dyn Fn(Signal) + Send + Sync>);

impl Talkback {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(Signal) + Send + Sync + 'static,
    {
        Talkback(Arc::new(handler))
    }

    pub fn send(&self, signal: Signal) {
        (self.0)(signal)
    }

    /// Ask the source for its next value.
    pub fn pull(&self) {
        self.send(Signal::Pull)
    }

    /// Terminate the subscription from the consumer side.
    pub fn cancel(&self) {
        self.send(Signal::Cancel)
    }
}

impl fmt::Debug for Talkback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Talkback({:p})", Arc::as_ptr(&self.0).cast::<()>())
    }
}

/// Receiving end of a subscription; sources push [`Message`]s into it.
pub struct Sink<T>(Arc<dyn Fn(Message<T>) + Send + Sync>);

impl<T> Sink<T> {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(Message<T>) + Send + Sync + 'static,
    {
        Sink(Arc::new(handler))
    }

    pub fn send(&self, message: Message<T>) {
        (self.0)(message)
    }
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Sink(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for Sink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sink({:p})", Arc::as_ptr(&self.0).cast::<()>())
    }
}

/// A callbag source: called once per subscription with the sink to feed.
///
/// Clones share identity. Two sources are the same source only if one was
/// cloned from the other; see [`Source::same_as`].
pub struct Source<T>(Arc<dyn Fn(Sink<T>) + Send + Sync>);

impl<T> Source<T> {
    pub fn new<F>(subscribe: F) -> Self
    where
        F: Fn(Sink<T>) + Send + Sync + 'static,
    {
        Source(Arc::new(subscribe))
    }

    /// Start a subscription by handing the source its sink.
    pub fn subscribe(&self, sink: Sink<T>) {
        (self.0)(sink)
    }

    /// Reference identity.
    pub fn same_as(&self, other: &Source<T>) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0).cast::<()>(),
            Arc::as_ptr(&other.0).cast::<()>(),
        )
    }
}

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        Source(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for Source<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Source({:p})", Arc::as_ptr(&self.0).cast::<()>())
    }
}

/// Unique identifier for a single subscription.
///
/// A key that is unsubscribed and subscribed again gets a fresh id, so late
/// messages from the old source can be told apart.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Latest value per source key.
///
/// Keys that have not emitted (or were cleared) are absent, never present
/// with a placeholder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Snapshot<T> {
    values: BTreeMap<String, T>,
}

impl<T> Snapshot<T> {
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, T> {
        self.values.iter()
    }

    pub(crate) fn insert(&mut self, key: &str, value: T) {
        self.values.insert(key.to_string(), value);
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<T> {
        self.values.remove(key)
    }

    pub fn into_inner(self) -> BTreeMap<String, T> {
        self.values
    }
}

impl<T: Serialize> Snapshot<T> {
    /// Render the snapshot as a plain JSON object.
    pub fn to_json(&self) -> crate::error::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>, T> FromIterator<(K, T)> for Snapshot<T> {
    fn from_iter<I: IntoIterator<Item = (K, T)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl<'a, T> IntoIterator for &'a Snapshot<T> {
    type Item = (&'a String, &'a T);
    type IntoIter = btree_map::Iter<'a, String, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
