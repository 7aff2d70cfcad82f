//! cartsync core - Shared types library.
//!
//! This crate provides the types shared by the cart synchronization engine
//! and its consumers:
//! - `engine` - Identity resolution, cart normalization, mutations, summaries
//! - `cli` - Command-line consumer of the engine
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients, no storage.
//! This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for IDs, quantities, money, and order statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
