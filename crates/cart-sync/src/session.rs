//! Session-scoped cart context
//!
//! The coalescer lives exactly as long as the authenticated session that
//! owns it. Logging out ends the session, which resets the coalescer so
//! late completions and pending timers from the old user are discarded.

use crate::backend::{CartBackend, CartKey};
use crate::coalescer::CartCoalescer;
use cart_types::{CoalescerConfig, LineKey};
use std::sync::Arc;

/// Cart context for one authenticated user
#[derive(Debug)]
pub struct CartSession<K: CartKey = LineKey> {
    user_id: String,
    cart: CartCoalescer<K>,
}

impl<K: CartKey> CartSession<K> {
    /// Start a session with a fresh coalescer
    #[must_use]
    pub fn start(
        user_id: impl Into<String>,
        backend: Arc<dyn CartBackend<K>>,
        config: CoalescerConfig,
    ) -> Self {
        let user_id = user_id.into();
        tracing::info!(user = %user_id, "cart session started");
        Self {
            user_id,
            cart: CartCoalescer::new(backend, config),
        }
    }

    /// Owning user
    #[inline]
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Coalescer handle for UI collaborators
    #[inline]
    #[must_use]
    pub fn cart(&self) -> &CartCoalescer<K> {
        &self.cart
    }

    /// End the session (logout)
    ///
    /// Clones of the coalescer handle held elsewhere see empty state.
    pub fn end(self) {
        self.cart.reset();
        tracing::info!(user = %self.user_id, "cart session ended");
    }
}

impl CartSession<LineKey> {
    /// Key for a variant in this user's cart
    #[must_use]
    pub fn line_key(&self, variant_id: impl Into<String>) -> LineKey {
        LineKey::new(self.user_id.clone(), variant_id)
    }
}
