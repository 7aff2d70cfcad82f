//! Core types for cartsync.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod id;
pub mod money;
pub mod quantity;
pub mod status;

pub use id::*;
pub use money::{CurrencyCode, format_amount};
pub use quantity::{Quantity, QuantityError};
pub use status::OrderStatus;
