//! Error types for the listener.

use thiserror::Error;

/// Main error type for listener operations.
///
/// Nothing in the message protocol produces an error; these variants cover
/// misuse of the public API by the owner of a [`SubscriptionManager`].
///
/// [`SubscriptionManager`]: crate::SubscriptionManager
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Source key must not be empty")]
    EmptyKey,

    #[error("Key already has an active subscription: {0}")]
    AlreadySubscribed(String),

    #[error("Listener has been torn down")]
    TornDown,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ListenerError {
    fn from(e: serde_json::Error) -> Self {
        ListenerError::Serialization(e.to_string())
    }
}

/// Result type for listener operations.
pub type Result<T> = std::result::Result<T, ListenerError>;
