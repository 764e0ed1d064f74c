//! Cart Sync - client-side cart write coalescing
//!
//! Turns bursty local quantity changes into a safe sequence of cart writes:
//! - Optimistic view update the moment the user acts
//! - Per-line rate limiting of repeated taps
//! - Debounced dispatch (one write per burst, carrying the final value)
//! - At most one in-flight write per line, with queued replay
//! - Reconciliation and rollback when writes complete
//!
//! # Example
//!
//! ```rust,ignore
//! use cart_sync::{CartSession, InMemoryCart};
//! use cart_types::{CoalescerConfig, LineKey};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let backend = Arc::new(InMemoryCart::new());
//! let session = CartSession::start("user-1", backend, CoalescerConfig::default());
//! let cart = session.cart();
//!
//! let key = LineKey::new("user-1", "variant-9");
//! cart.update_quantity(key.clone(), 2);
//! cart.update_quantity(key.clone(), 3);
//!
//! let mut events = cart.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod backend;
pub mod coalescer;
pub mod events;
pub mod http;
pub mod memory;
pub mod session;

pub use backend::{CartBackend, CartKey, WriteKind};
pub use coalescer::CartCoalescer;
pub use events::CartEvent;
pub use http::{HttpCartBackend, HttpClient, HttpRequest, HttpResponse, Method};
pub use memory::{BackendStats, InMemoryCart};
pub use session::CartSession;

#[cfg(feature = "reqwest-client")]
pub use http::ReqwestClient;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Cart Sync
    pub use crate::{CartBackend, CartCoalescer, CartEvent, CartSession};
    pub use cart_types::{
        CartError, CartLineViewState, CoalescerConfig, LineKey, LineSnapshot, RateLimitPolicy,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
