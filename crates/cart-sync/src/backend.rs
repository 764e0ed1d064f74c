//! Remote cart seam
//!
//! The coalescer never talks to the network directly; it drives a
//! [`CartBackend`]. Production wires in [`crate::HttpCartBackend`], tests and
//! the simulator use [`crate::InMemoryCart`].

use async_trait::async_trait;
use cart_types::{CartError, LineSnapshot};
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Bounds for anything usable as a cart line key
pub trait CartKey: Eq + Hash + Clone + Debug + Display + Send + Sync + 'static {}

impl<T> CartKey for T where T: Eq + Hash + Clone + Debug + Display + Send + Sync + 'static {}

/// Kind of write issued for a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    /// Line not yet confirmed by the server
    Add,
    /// Quantity change on a confirmed line
    Update,
    /// Line removal
    Remove,
}

/// Remote cart operations consumed by the coalescer
///
/// Every call may suspend; none is cancelled once issued.
#[async_trait]
pub trait CartBackend<K: CartKey>: Send + Sync {
    /// Create a line the server has not confirmed yet
    ///
    /// Defaults to [`CartBackend::set_quantity`] for backends with upsert
    /// semantics.
    async fn add_line(&self, key: &K, quantity: u32) -> Result<LineSnapshot, CartError> {
        self.set_quantity(key, quantity).await
    }

    /// Set the quantity of a line
    async fn set_quantity(&self, key: &K, quantity: u32) -> Result<LineSnapshot, CartError>;

    /// Remove a line
    async fn remove_line(&self, key: &K) -> Result<(), CartError>;

    /// Fetch one line (`None` if the server has no such line)
    async fn fetch_line(&self, key: &K) -> Result<Option<LineSnapshot>, CartError>;

    /// Fetch the whole cart
    async fn fetch_cart(&self) -> Result<Vec<(K, LineSnapshot)>, CartError>;
}
