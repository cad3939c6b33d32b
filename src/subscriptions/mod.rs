//! Subscription lifecycle for named callbag sources.
//!
//! A [`SubscriptionManager`] is mounted with a set of named sources and a
//! view. It:
//! - subscribes to each source and pulls values one at a time
//! - keeps the latest value per key in a [`Snapshot`]
//! - clears a key when its source ends or is removed
//! - cancels, unsubscribes and resubscribes when a slot's source is replaced
//! - cancels everything that is still live on unmount
//!
//! # Example
//!
//! ```ignore
//! let config = ListenerConfig::new()
//!     .source("clicks", clicks)
//!     .source("ticks", ticks)
//!     .view(|snapshot| println!("{:?}", snapshot));
//! let manager = SubscriptionManager::mount(config)?;
//!
//! // Swap the ticks source; clicks keeps its subscription
//! manager.set_source("ticks", Some(faster_ticks))?;
//!
//! // Or watch snapshots from another thread
//! let handle = manager.watch();
//! while let Ok(snapshot) = handle.recv() {
//!     println!("{:?}", snapshot.get("clicks"));
//! }
//! ```
//!
//! [`Snapshot`]: crate::types::Snapshot

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{ListenerConfig, SnapshotHandle, SourceMap, View, DEFAULT_WATCH_BUFFER_SIZE};
