//! cartsync engine - Cart synchronization against a remote commerce API.
//!
//! # Architecture
//!
//! - [`session`] - Anonymous session tokens and their durable store
//! - [`identity`] - Identity headers and user-id recovery
//! - [`api`] - Typed commerce API client with a product look-up cache
//! - [`normalize`] - Raw cart document to resolved cart lines
//! - [`summary`] - Cart and order-page totals
//! - [`cart`] - Mutation protocol and engine state
//! - [`orders`] - Order history listings and summaries
//!
//! All monetary values computed here are display estimates.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod cart;
pub mod config;
pub mod error;
pub mod identity;
pub mod normalize;
pub mod orders;
pub mod session;
pub mod summary;

pub use api::{ApiClient, ApiError};
pub use cart::{CartEngine, CartSnapshot, LineSync, MutationOutcome};
pub use config::{ConfigError, EngineConfig};
pub use error::{CartError, OrdersError};
pub use identity::{
    Identity, IdentityError, IdentityHeaders, IdentityResolver, user_id_from_record,
};
pub use normalize::{NormalizedCartLine, ProductLookup, normalize};
pub use orders::{OrderHistorySummary, OrderScope, OrdersService, OrdersView, SummarySource};
pub use session::{FileStore, MemoryStore, SessionIdentityProvider, SessionStore, SessionToken};
pub use summary::{CartSummary, OrderPageSummary, order_total, summarize, summarize_orders};
