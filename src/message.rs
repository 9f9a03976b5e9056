//! Message model for the conflating queue.
//!
//! A [`Message`] carries an opaque payload plus an optional conflation key.
//! Keyed ("conflatable") messages may be collapsed by the queue so that only
//! the latest payload per key survives for delivery; unkeyed ("vanilla")
//! messages are always delivered individually and in push order.

use core::fmt;
use std::sync::Arc;

/// A unit of work flowing through a [`ConflatingQueue`](crate::ConflatingQueue).
///
/// Two variants, distinguished by the presence of a conflation key:
///
/// - **Vanilla** — no key. Delivered exactly once, at its push position.
/// - **Conflatable** — keyed. While an earlier push for the same key is still
///   queued, a new push replaces its payload in place instead of occupying a
///   second position in the queue.
///
/// The payload is never mutated by external callers after push; only the
/// queue's conflation path replaces it. The key is stored as an `Arc<str>` so
/// the queue's index can share the allocation instead of cloning the string.
///
/// # Example
///
/// ```
/// use conflating_queue::Message;
///
/// let tick = Message::conflatable("EURUSD", 1.0934).unwrap();
/// assert!(tick.is_conflatable());
/// assert_eq!(tick.key(), Some("EURUSD"));
///
/// let event = Message::vanilla("session open");
/// assert!(!event.is_conflatable());
/// assert_eq!(event.key(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<T> {
    key: Option<Arc<str>>,
    payload: T,
}

impl<T> Message<T> {
    /// Creates a vanilla message.
    ///
    /// Vanilla messages never participate in conflation: every push yields
    /// exactly one delivered message, at the position the push established.
    pub fn vanilla(payload: T) -> Self {
        Message { key: None, payload }
    }

    /// Creates a conflatable message under `key`.
    ///
    /// While this message is queued and undelivered, a later push under the
    /// same key replaces its payload in place. Keys are expected to be
    /// globally meaningful across producers (e.g. an instrument symbol).
    ///
    /// # Errors
    ///
    /// Returns [`InvalidKey`] if `key` is empty. An empty key is a
    /// programming error and is rejected here rather than at push time.
    ///
    /// # Example
    ///
    /// ```
    /// use conflating_queue::Message;
    ///
    /// assert!(Message::conflatable("BTCUSD", 64_000u64).is_ok());
    /// assert!(Message::conflatable("", 0u64).is_err());
    /// ```
    pub fn conflatable(key: impl Into<Arc<str>>, payload: T) -> Result<Self, InvalidKey> {
        let key = key.into();
        if key.is_empty() {
            return Err(InvalidKey);
        }
        Ok(Message {
            key: Some(key),
            payload,
        })
    }

    /// Returns the conflation key, if any.
    #[inline]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Returns `true` if this message participates in conflation.
    ///
    /// Derived from the presence of a key; there is no separate flag to keep
    /// in sync.
    #[inline]
    pub fn is_conflatable(&self) -> bool {
        self.key.is_some()
    }

    /// Returns a reference to the payload.
    #[inline]
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Consumes the message, returning the payload.
    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Consumes the message, returning the key and payload.
    pub fn into_parts(self) -> (Option<Arc<str>>, T) {
        (self.key, self.payload)
    }

    /// Reassembles a message from parts already validated at construction.
    pub(crate) fn from_parts(key: Option<Arc<str>>, payload: T) -> Self {
        Message { key, payload }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error returned when constructing a conflatable message with an empty key.
///
/// An empty key cannot group messages, so it is rejected at construction
/// time. It never propagates through [`push`](crate::ConflatingQueue::push).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidKey;

impl fmt::Display for InvalidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conflation key must be non-empty")
    }
}

impl std::error::Error for InvalidKey {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vanilla_has_no_key() {
        let m = Message::vanilla(7u64);
        assert!(!m.is_conflatable());
        assert_eq!(m.key(), None);
        assert_eq!(*m.payload(), 7);
        assert_eq!(m.into_payload(), 7);
    }

    #[test]
    fn conflatable_carries_key() {
        let m = Message::conflatable("abc123", 7u64).unwrap();
        assert!(m.is_conflatable());
        assert_eq!(m.key(), Some("abc123"));
        assert_eq!(*m.payload(), 7);
    }

    #[test]
    fn empty_key_rejected_at_construction() {
        let err = Message::conflatable("", 7u64).unwrap_err();
        assert_eq!(err, InvalidKey);
        assert_eq!(err.to_string(), "conflation key must be non-empty");
    }

    #[test]
    fn owned_and_borrowed_keys_accepted() {
        let borrowed = Message::conflatable("k", 1u64).unwrap();
        let owned = Message::conflatable(String::from("k"), 2u64).unwrap();
        assert_eq!(borrowed.key(), owned.key());
    }

    #[test]
    fn into_parts_round_trips() {
        let (key, payload) = Message::conflatable("k", 9u64).unwrap().into_parts();
        let rebuilt = Message::from_parts(key, payload);
        assert_eq!(rebuilt.key(), Some("k"));
        assert_eq!(*rebuilt.payload(), 9);
    }
}
