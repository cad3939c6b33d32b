//! # Callbag Listener
//!
//! Subscribes to named callbag sources and keeps the latest value each one
//! emitted, handing a fresh snapshot to a view whenever anything changes.
//!
//! ## Core Concepts
//!
//! - **Sources**: Callbag producers, identified by reference
//! - **Talkbacks**: Per-subscription handles for pulling and cancelling
//! - **Snapshots**: Latest value per key; keys without a value are absent
//! - **Lifecycle**: Mount, update (add/remove/replace) and unmount
//!
//! ## Example
//!
//! ```ignore
//! use callbag_listener::{ListenerConfig, Message, Source, SubscriptionManager, Talkback};
//!
//! let answer = Source::new(|sink| {
//!     sink.send(Message::Start(Talkback::new(|_| {})));
//!     sink.send(Message::Data(42));
//! });
//!
//! let manager = SubscriptionManager::mount(
//!     ListenerConfig::new()
//!         .source("answer", answer)
//!         .view(|snapshot| println!("answer = {:?}", snapshot.get("answer"))),
//! )?;
//! ```

pub mod error;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{ListenerError, Result};
pub use subscriptions::{
    ListenerConfig, SnapshotHandle, SourceMap, SubscriptionManager, View,
    DEFAULT_WATCH_BUFFER_SIZE,
};
pub use types::*;
