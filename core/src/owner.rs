//! Stable identity of a transient UI owner.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a UI owner across destruction and recreation.
///
/// The owner instance is transient; the key is not. Reattaching a recreated
/// owner to the requests its predecessor submitted is a lookup by key.
///
/// ```
/// use dispatch_core::owner::OwnerKey;
///
/// let key = OwnerKey::new("image-activity");
/// assert_eq!(key.to_string(), "image-activity");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerKey(String);

impl OwnerKey {
    /// Create an owner key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OwnerKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
