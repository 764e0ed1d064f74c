//! Line identity and write identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Composite identity of a cart line: one row per (user, product variant)
///
/// Renders as `user:variant`. Parsing splits on the first `:`, so only the
/// variant may contain colons; a user id containing `:` does not round-trip.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineKey {
    /// Owning user
    pub user_id: String,
    /// Product variant on the line
    pub variant_id: String,
}

impl LineKey {
    /// Create a new line key
    #[inline]
    #[must_use]
    pub fn new(user_id: impl Into<String>, variant_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            variant_id: variant_id.into(),
        }
    }
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.variant_id)
    }
}

/// Error parsing a `user:variant` line key
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid line key '{0}': expected 'user:variant'")]
pub struct ParseLineKeyError(pub String);

impl FromStr for LineKey {
    type Err = ParseLineKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((user, variant)) if !user.is_empty() && !variant.is_empty() => {
                Ok(Self::new(user, variant))
            }
            _ => Err(ParseLineKeyError(s.to_string())),
        }
    }
}

/// Identifier of one network write (ULID for sortability in logs)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WriteId(pub Ulid);

impl WriteId {
    /// Generate new write ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for WriteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WriteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_key_display_and_parse() {
        let key = LineKey::new("u1", "gid-42");
        assert_eq!(key.to_string(), "u1:gid-42");
        assert_eq!(LineKey::from_str("u1:gid-42").unwrap(), key);
    }

    #[test]
    fn line_key_parse_keeps_colons_in_variant() {
        let key = LineKey::from_str("u1:gid://shopify/ProductVariant/7").unwrap();
        assert_eq!(key.user_id, "u1");
        assert_eq!(key.variant_id, "gid://shopify/ProductVariant/7");
    }

    #[test]
    fn only_variant_colons_round_trip() {
        let key = LineKey::new("u1", "gid://shop/Variant/7");
        assert_eq!(LineKey::from_str(&key.to_string()).unwrap(), key);

        let odd = LineKey::new("tenant:u1", "v1");
        assert_ne!(LineKey::from_str(&odd.to_string()).unwrap(), odd);
    }

    #[test]
    fn line_key_parse_rejects_malformed() {
        assert!(LineKey::from_str("no-separator").is_err());
        assert!(LineKey::from_str(":variant").is_err());
        assert!(LineKey::from_str("user:").is_err());
    }

    #[test]
    fn write_ids_are_unique() {
        assert_ne!(WriteId::new(), WriteId::new());
    }
}
