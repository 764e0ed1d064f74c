//! Per-line completion events for saving indicators and error toasts
//!
//! Events fan out through a `tokio::sync::broadcast` channel; every
//! subscriber sees every event emitted after it subscribed. Sending never
//! blocks and never fails the coalescer, even with no subscriber attached.

use cart_types::{CartError, WriteId};
use tokio::sync::broadcast;

/// Event emitted by the coalescer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartEvent<K> {
    /// Outstanding write count for a line changed
    PendingChanged { key: K, pending: usize },
    /// Quantity write confirmed by the server
    WriteSucceeded {
        key: K,
        write_id: WriteId,
        quantity: u32,
    },
    /// Quantity write failed; view rolled back
    WriteFailed {
        key: K,
        write_id: WriteId,
        quantity: u32,
        error: CartError,
    },
    /// Removal confirmed by the server
    LineRemoved { key: K, write_id: WriteId },
    /// Removal failed; a line refetch follows
    RemovalFailed {
        key: K,
        write_id: WriteId,
        error: CartError,
    },
    /// Line reinstated from server state after a failed removal
    LineRestored { key: K, quantity: u32 },
    /// Line refetch after a failed removal also failed
    RefetchFailed { key: K, error: CartError },
    /// Backend reported an expired session
    SessionExpired,
}

impl<K> CartEvent<K> {
    /// Line the event concerns, if any
    #[must_use]
    pub fn key(&self) -> Option<&K> {
        match self {
            Self::PendingChanged { key, .. }
            | Self::WriteSucceeded { key, .. }
            | Self::WriteFailed { key, .. }
            | Self::LineRemoved { key, .. }
            | Self::RemovalFailed { key, .. }
            | Self::LineRestored { key, .. }
            | Self::RefetchFailed { key, .. } => Some(key),
            Self::SessionExpired => None,
        }
    }

    /// Whether the UI should surface this event as an error
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::WriteFailed { .. } | Self::RemovalFailed { .. } | Self::RefetchFailed { .. }
        )
    }
}

/// Broadcast sender wrapper
#[derive(Debug)]
pub(crate) struct EventBus<K> {
    sender: broadcast::Sender<CartEvent<K>>,
}

impl<K: Clone> EventBus<K> {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<CartEvent<K>> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&self, event: CartEvent<K>) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub(crate) fn emit_all(&self, events: impl IntoIterator<Item = CartEvent<K>>) {
        for event in events {
            self.emit(event);
        }
    }
}
