//! Cart Types - shared vocabulary for cart write coalescing
//!
//! Defines the types every other crate in the workspace speaks:
//! - Line keys and write identifiers
//! - Local intents and the UI-facing line view state
//! - Server snapshots of cart lines
//! - Coalescer configuration
//! - The cart error taxonomy
//!
//! # Example
//!
//! ```rust
//! use cart_types::{CartLineViewState, LineKey};
//!
//! let key = LineKey::new("user-1", "variant-9");
//! assert_eq!(key.to_string(), "user-1:variant-9");
//!
//! let mut view = CartLineViewState::new(2).with_max_quantity(Some(3));
//! view.apply_optimistic(5);
//! assert_eq!(view.quantity, 5);
//! assert!(view.is_unconfirmed());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod key;
pub mod line;

pub use config::{CoalescerConfig, ConfigError, RateLimitPolicy};
pub use error::CartError;
pub use key::{LineKey, WriteId};
pub use line::{CartLineIntent, CartLineViewState, LineSnapshot};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
