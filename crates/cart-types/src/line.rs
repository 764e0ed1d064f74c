//! Cart line state
//!
//! Three views of one cart line:
//! - `CartLineIntent`: what the user last asked for, not yet confirmed
//! - `CartLineViewState`: what the UI renders (optimistic or confirmed)
//! - `LineSnapshot`: what the server reported

use serde::{Deserialize, Serialize};

/// Desired end-state for a cart line
///
/// At most one live intent exists per key; a newer intent replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineIntent<K> {
    /// Line this intent targets
    pub line_key: K,
    /// Desired quantity (0 means remove)
    pub desired_quantity: u32,
    /// Logical timestamp of the local change
    pub submitted_at: u64,
}

impl<K> CartLineIntent<K> {
    /// Create new intent
    #[inline]
    #[must_use]
    pub fn new(line_key: K, desired_quantity: u32, submitted_at: u64) -> Self {
        Self {
            line_key,
            desired_quantity,
            submitted_at,
        }
    }

    /// Whether this intent removes the line
    #[inline]
    #[must_use]
    pub fn is_removal(&self) -> bool {
        self.desired_quantity == 0
    }
}

/// UI-facing state of a cart line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineViewState {
    /// Last known-good or optimistic quantity
    pub quantity: u32,
    /// Set only while the optimistic quantity exceeds the inventory ceiling
    pub quantity_user_input: Option<u32>,
    /// Known inventory ceiling for the line
    pub max_quantity: Option<u32>,
}

impl CartLineViewState {
    /// Create view state at a confirmed quantity
    #[inline]
    #[must_use]
    pub fn new(quantity: u32) -> Self {
        Self {
            quantity,
            quantity_user_input: None,
            max_quantity: None,
        }
    }

    /// With inventory ceiling
    #[inline]
    #[must_use]
    pub fn with_max_quantity(mut self, max_quantity: Option<u32>) -> Self {
        self.max_quantity = max_quantity;
        self.refresh_unconfirmed();
        self
    }

    /// Apply an optimistic quantity and recompute the unconfirmed flag
    #[inline]
    pub fn apply_optimistic(&mut self, quantity: u32) {
        self.quantity = quantity;
        self.refresh_unconfirmed();
    }

    /// Set a new ceiling and recompute the unconfirmed flag
    #[inline]
    pub fn set_max_quantity(&mut self, max_quantity: Option<u32>) {
        self.max_quantity = max_quantity;
        self.refresh_unconfirmed();
    }

    /// Whether `quantity` fits under the known ceiling
    ///
    /// An unknown ceiling never flags.
    #[inline]
    #[must_use]
    pub fn within_bounds(&self, quantity: u32) -> bool {
        self.max_quantity.map_or(true, |max| quantity <= max)
    }

    /// Whether the UI should flag this line as pending validation
    #[inline]
    #[must_use]
    pub fn is_unconfirmed(&self) -> bool {
        self.quantity_user_input.is_some()
    }

    /// Drop the unconfirmed flag
    #[inline]
    pub fn clear_unconfirmed(&mut self) {
        self.quantity_user_input = None;
    }

    /// Recompute the unconfirmed flag for the current quantity and ceiling
    #[inline]
    pub fn refresh_unconfirmed(&mut self) {
        self.quantity_user_input = if self.within_bounds(self.quantity) {
            None
        } else {
            Some(self.quantity)
        };
    }
}

impl From<LineSnapshot> for CartLineViewState {
    fn from(snapshot: LineSnapshot) -> Self {
        Self::new(snapshot.quantity).with_max_quantity(snapshot.max_quantity)
    }
}

/// Server-reported state of a cart line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineSnapshot {
    /// Confirmed quantity
    pub quantity: u32,
    /// Inventory ceiling, if the backend reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_quantity: Option<u32>,
}

impl LineSnapshot {
    /// Create snapshot without a ceiling
    #[inline]
    #[must_use]
    pub fn new(quantity: u32) -> Self {
        Self {
            quantity,
            max_quantity: None,
        }
    }

    /// With inventory ceiling
    #[inline]
    #[must_use]
    pub fn with_max_quantity(mut self, max_quantity: u32) -> Self {
        self.max_quantity = Some(max_quantity);
        self
    }
}
