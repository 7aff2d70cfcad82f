//! Engine error types.
//!
//! Every cart and order operation returns one of these. `user_message()`
//! gives the text to show an end user; the `Display` form carries internal
//! details for logs.

use cartsync_core::{LineId, QuantityError};
use thiserror::Error;

use crate::api::ApiError;
use crate::identity::IdentityError;

/// Cart operation errors.
#[derive(Debug, Error)]
pub enum CartError {
    /// No credential or session token could be resolved.
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Requested quantity was rejected before any request was sent.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(#[from] QuantityError),

    /// Requested quantity is above the product's known stock.
    #[error("Requested {requested} but only {stock} in stock")]
    ExceedsStock { requested: u32, stock: u32 },

    /// The line is not in the local cart.
    #[error("Cart line not found: {0}")]
    LineNotFound(LineId),

    /// The engine was disposed; no further state changes are accepted.
    #[error("Cart engine has been disposed")]
    Disposed,

    /// Commerce API call failed.
    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

impl CartError {
    /// Human-readable failure reason for presentation.
    ///
    /// Transport and server details are not exposed.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Identity(err) => err.to_string(),
            Self::InvalidQuantity(_) => "Quantity must be at least 1".to_string(),
            Self::ExceedsStock { stock, .. } => format!("Only {stock} left in stock"),
            Self::LineNotFound(_) => "That item is no longer in your cart".to_string(),
            Self::Disposed => "The cart is no longer available".to_string(),
            Self::Api(err) => api_message(err),
        }
    }
}

/// Result type alias for `CartError`.
pub type Result<T> = std::result::Result<T, CartError>;

/// Order history errors.
#[derive(Debug, Error)]
pub enum OrdersError {
    /// No usable identity, or the operation needs an authenticated one.
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Commerce API call failed.
    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

impl OrdersError {
    /// Human-readable failure reason for presentation.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Identity(IdentityError::AuthenticationRequired) => {
                "Please log in to view orders".to_string()
            }
            Self::Identity(err) => err.to_string(),
            Self::Api(err) => api_message(err),
        }
    }
}

fn api_message(err: &ApiError) -> String {
    match err {
        ApiError::Http(_) => "Could not reach the store, please try again".to_string(),
        ApiError::RateLimited(_) => "Too many requests, please wait a moment".to_string(),
        ApiError::Status { status: 401 | 403, .. } => "Please log in again".to_string(),
        ApiError::Status { status: 404, .. } => "Not found".to_string(),
        ApiError::Status { status, message } if *status < 500 && !message.is_empty() => {
            message.clone()
        }
        _ => "Something went wrong, please try again".to_string(),
    }
}
