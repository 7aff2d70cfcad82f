//! Line quantity type.

use core::fmt;
use core::num::NonZeroU32;

use serde::{Deserialize, Serialize};

/// Errors that can occur when validating a [`Quantity`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantityError {
    /// The requested quantity is zero or negative.
    #[error("quantity must be at least 1 (got {0})")]
    BelowMinimum(i64),
    /// The requested quantity does not fit in a cart line.
    #[error("quantity {0} is too large")]
    TooLarge(i64),
}

/// A positive line quantity.
///
/// Quantities below one are rejected at construction, so a `Quantity` can
/// always be sent to the cart API as-is.
///
/// ```
/// use cartsync_core::Quantity;
///
/// assert_eq!(Quantity::new(2).map(Quantity::get), Ok(2));
/// assert!(Quantity::new(0).is_err());
/// assert!(Quantity::new(-1).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(NonZeroU32);

impl Quantity {
    /// A single unit.
    pub const ONE: Self = Self(NonZeroU32::MIN);

    /// Validate a requested quantity.
    ///
    /// # Errors
    ///
    /// Returns `QuantityError::BelowMinimum` for values below 1 and
    /// `QuantityError::TooLarge` for values that overflow `u32`.
    pub fn new(requested: i64) -> Result<Self, QuantityError> {
        if requested < 1 {
            return Err(QuantityError::BelowMinimum(requested));
        }
        let value = u32::try_from(requested).map_err(|_| QuantityError::TooLarge(requested))?;
        NonZeroU32::new(value)
            .map(Self)
            .ok_or(QuantityError::BelowMinimum(requested))
    }

    /// The quantity as a plain integer.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Quantity> for u32 {
    fn from(quantity: Quantity) -> Self {
        quantity.get()
    }
}
