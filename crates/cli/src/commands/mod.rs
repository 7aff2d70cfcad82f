//! Command implementations.

pub mod cart;
pub mod orders;
pub mod session;

use std::path::Path;
use std::sync::Arc;

use cartsync_engine::{
    ApiError, CartEngine, CartError, ConfigError, EngineConfig, FileStore, Identity, OrdersError,
    OrdersService, SessionIdentityProvider,
};
use thiserror::Error;
use tracing::debug;

/// Errors surfaced to the terminal.
///
/// Cart and order failures show their user-facing message.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to create API client: {0}")]
    Client(#[from] ApiError),

    #[error("{}", .0.user_message())]
    Cart(#[from] CartError),

    #[error("{}", .0.user_message())]
    Orders(#[from] OrdersError),

    #[error("Invalid user record: {0}")]
    InvalidUserRecord(String),
}

/// Everything a command needs.
pub struct Context {
    pub engine: CartEngine,
    pub orders: OrdersService,
    pub identity: Identity,
}

impl Context {
    /// Wire up the engine from CLI flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the API URL is invalid or the HTTP client cannot
    /// be built.
    pub fn new(
        api_url: Option<&str>,
        token: Option<String>,
        state_file: &Path,
    ) -> Result<Self, CommandError> {
        let config = match api_url {
            Some(url) => EngineConfig::new(url)?,
            None => EngineConfig::from_env()?,
        };
        debug!(api = %config.api_base_url, state_file = %state_file.display(), "Loaded configuration");

        let sessions = Arc::new(SessionIdentityProvider::new(Arc::new(FileStore::new(
            state_file,
        ))));
        let engine = CartEngine::new(&config, Arc::clone(&sessions))?;
        let orders = OrdersService::new(engine.api().clone(), sessions);

        Ok(Self {
            engine,
            orders,
            identity: Identity::from_parts(token, None),
        })
    }
}
