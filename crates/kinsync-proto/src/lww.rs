//! Last-Writer-Wins register.

use serde::{Deserialize, Serialize};

/// A register that keeps the value with the greatest timestamp.
///
/// Equal timestamps never replace the held value, so re-delivery of the same
/// update is harmless and arrival order does not change the outcome.
///
/// # Example
///
/// ```rust
/// use kinsync_proto::LwwRegister;
///
/// let mut order = LwwRegister::new("placed", 100);
///
/// // A stale re-delivery is discarded.
/// assert!(!order.set("draft", 99));
/// assert_eq!(order.get(), &"placed");
///
/// assert!(order.set("shipped", 101));
/// assert_eq!(order.timestamp(), 101);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LwwRegister<T> {
    value: T,
    timestamp: u64,
}

impl<T> LwwRegister<T> {
    /// Creates a register holding `value` at `timestamp`.
    #[must_use]
    pub const fn new(value: T, timestamp: u64) -> Self {
        Self { value, timestamp }
    }

    /// Returns a reference to the current value.
    #[must_use]
    pub const fn get(&self) -> &T {
        &self.value
    }

    /// Returns the timestamp of the current value.
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Replaces the value if `timestamp` is strictly newer.
    ///
    /// Returns `true` if the value was updated.
    pub fn set(&mut self, value: T, timestamp: u64) -> bool {
        if timestamp > self.timestamp {
            self.value = value;
            self.timestamp = timestamp;
            true
        } else {
            false
        }
    }

    /// Unwraps the register, returning the inner value.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.value
    }
}
