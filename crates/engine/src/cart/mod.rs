//! Cart mutation protocol.
//!
//! [`CartEngine`] owns the normalized cart and applies add, update, remove
//! and clear against the commerce API:
//!
//! - Every call takes an explicit [`Identity`].
//! - One mutation per line (or product, for adds) at a time; a second
//!   attempt while one is in flight returns [`MutationOutcome::AlreadyInFlight`].
//! - Successful add/update/remove refetch the whole cart; clear resets local
//!   state directly.
//! - Failed updates roll the line back to its last confirmed quantity.
//! - A session token rotated by the server is persisted before the next
//!   request.
//! - Responses that land after [`CartEngine::dispose`] or
//!   [`CartEngine::switch_identity`] are discarded.

mod inflight;
mod state;

pub use state::{CartSnapshot, LineSync};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use cartsync_core::{LineId, ProductId, Quantity};
use rust_decimal::Decimal;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, instrument, warn};

use crate::api::{AddToCartRequest, ApiClient, ApiError, RemoveRoute};
use crate::config::EngineConfig;
use crate::error::{CartError, Result};
use crate::identity::{Identity, IdentityHeaders, IdentityResolver};
use crate::normalize::normalize;
use crate::session::{SessionIdentityProvider, SessionToken};
use inflight::{InFlight, InFlightKey};
use state::CartState;

/// Result of a mutation that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The server accepted the mutation.
    Applied,
    /// A mutation for the same target was already running; nothing was sent.
    AlreadyInFlight,
}

impl MutationOutcome {
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Cart synchronization engine.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CartEngine {
    inner: Arc<CartEngineInner>,
}

struct CartEngineInner {
    api: ApiClient,
    resolver: IdentityResolver,
    tax_rate: Decimal,
    state: RwLock<CartState>,
    in_flight: InFlight,
    /// Bumped on identity switch and dispose; responses from older epochs
    /// are ignored.
    epoch: AtomicU64,
    disposed: AtomicBool,
}

impl CartEngine {
    /// Create an engine talking to the configured API.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(
        config: &EngineConfig,
        sessions: Arc<SessionIdentityProvider>,
    ) -> std::result::Result<Self, ApiError> {
        Ok(Self::with_client(ApiClient::new(config)?, sessions, config.tax_rate))
    }

    /// Create an engine around an existing API client.
    #[must_use]
    pub fn with_client(
        api: ApiClient,
        sessions: Arc<SessionIdentityProvider>,
        tax_rate: Decimal,
    ) -> Self {
        Self {
            inner: Arc::new(CartEngineInner {
                api,
                resolver: IdentityResolver::new(sessions),
                tax_rate,
                state: RwLock::new(CartState::default()),
                in_flight: InFlight::default(),
                epoch: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    #[must_use]
    pub fn resolver(&self) -> &IdentityResolver {
        &self.inner.resolver
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionIdentityProvider> {
        self.inner.resolver.sessions()
    }

    /// Current cart lines, summary and per-line sync state.
    pub async fn snapshot(&self) -> CartSnapshot {
        self.inner.state.read().await.snapshot(self.inner.tax_rate)
    }

    /// Whether a mutation for this line is currently running.
    #[must_use]
    pub fn is_line_busy(&self, line_id: &LineId) -> bool {
        self.inner
            .in_flight
            .is_busy(&InFlightKey::Line(line_id.clone()))
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch and normalize the cart.
    ///
    /// On failure the local cart is emptied and marked stale, and the error
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if no identity resolves, the engine is disposed, or
    /// the cart cannot be fetched.
    #[instrument(skip(self, identity), fields(authenticated = identity.is_authenticated()))]
    pub async fn refresh(&self, identity: &Identity) -> Result<CartSnapshot> {
        self.ensure_live()?;
        let epoch = self.epoch();
        let headers = self.inner.resolver.resolve_headers(identity)?;

        if let Err(e) = self.load(headers, epoch, None).await {
            warn!(error = %e, "Cart fetch failed, showing an empty cart");
            if let Some(mut state) = self.state_if_current(epoch).await {
                state.reset_stale();
            }
            return Err(e);
        }
        Ok(self.snapshot().await)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add `quantity` units of a product.
    ///
    /// # Errors
    ///
    /// Returns an error for a quantity below 1, a quantity above the known
    /// stock, an unresolvable identity, or a failed request.
    #[instrument(skip(self, identity, product_id, notes), fields(product_id = %product_id))]
    pub async fn add(
        &self,
        identity: &Identity,
        product_id: &ProductId,
        quantity: i64,
        notes: Option<&str>,
    ) -> Result<MutationOutcome> {
        self.ensure_live()?;
        let quantity = Quantity::new(quantity)?;

        if let Some((in_cart, Some(stock))) = self.inner.state.read().await.quantity_of(product_id) {
            let requested = in_cart.saturating_add(quantity.get());
            if requested > stock {
                return Err(CartError::ExceedsStock { requested, stock });
            }
        }

        let Some(_guard) = self
            .inner
            .in_flight
            .try_acquire(InFlightKey::Product(product_id.clone()))
        else {
            debug!("Add already in flight for product");
            return Ok(MutationOutcome::AlreadyInFlight);
        };

        let epoch = self.epoch();
        let headers = self.inner.resolver.resolve_headers(identity)?;
        let request = AddToCartRequest {
            product_id: product_id.clone(),
            quantity: quantity.get(),
            notes: notes.map(str::trim).filter(|n| !n.is_empty()).map(str::to_owned),
            session_id: headers.session_token().map(ToString::to_string),
            user_id: self.inner.resolver.resolve_user_id(identity),
        };

        let response = self.inner.api.add_to_cart(&headers, &request).await?;
        let headers = self.adopt_session(headers, response.session_id.as_deref());
        self.settle(headers, epoch, None).await;
        Ok(MutationOutcome::Applied)
    }

    /// Set a line's quantity.
    ///
    /// The new quantity is shown immediately and rolled back if the server
    /// rejects it.
    ///
    /// # Errors
    ///
    /// Returns an error for a quantity below 1, a quantity above the known
    /// stock, a line missing from the loaded cart, an unresolvable identity,
    /// or a failed request.
    #[instrument(skip(self, identity, line_id), fields(line_id = %line_id))]
    pub async fn update(
        &self,
        identity: &Identity,
        line_id: &LineId,
        quantity: i64,
    ) -> Result<MutationOutcome> {
        self.ensure_live()?;
        let quantity = Quantity::new(quantity)?;

        let Some(_guard) = self
            .inner
            .in_flight
            .try_acquire(InFlightKey::Line(line_id.clone()))
        else {
            debug!("Update already in flight for line");
            return Ok(MutationOutcome::AlreadyInFlight);
        };

        let epoch = self.epoch();
        let headers = self.inner.resolver.resolve_headers(identity)?;
        let restore = self.begin_update(line_id, quantity, epoch).await?;

        match self.inner.api.update_line(&headers, line_id, quantity.get()).await {
            Ok(response) => {
                let headers = self.adopt_session(headers, response.session_id.as_deref());
                self.settle(headers, epoch, Some(line_id)).await;
                Ok(MutationOutcome::Applied)
            }
            Err(e) => {
                if let Some(fallback) = restore
                    && let Some(mut state) = self.state_if_current(epoch).await
                    && let Some(restored) = state.rollback(line_id, fallback)
                {
                    warn!(error = %e, restored = %restored, "Update failed, rolled back");
                }
                Err(e.into())
            }
        }
    }

    /// Remove a line.
    ///
    /// If the primary route answers 404 the alternate route is tried once.
    ///
    /// # Errors
    ///
    /// Returns an error for a line missing from the loaded cart, an
    /// unresolvable identity, or a failed request.
    #[instrument(skip(self, identity, line_id), fields(line_id = %line_id))]
    pub async fn remove(&self, identity: &Identity, line_id: &LineId) -> Result<MutationOutcome> {
        self.ensure_live()?;

        let Some(_guard) = self
            .inner
            .in_flight
            .try_acquire(InFlightKey::Line(line_id.clone()))
        else {
            debug!("Remove already in flight for line");
            return Ok(MutationOutcome::AlreadyInFlight);
        };

        let epoch = self.epoch();
        let headers = self.inner.resolver.resolve_headers(identity)?;
        self.ensure_known_line(line_id).await?;

        let api = &self.inner.api;
        let response = match api.remove_line(&headers, line_id, RemoveRoute::Primary).await {
            Err(e) if e.is_not_found() => {
                warn!("Primary remove route returned 404, trying fallback route");
                api.remove_line(&headers, line_id, RemoveRoute::Fallback).await?
            }
            other => other?,
        };

        let headers = self.adopt_session(headers, response.session_id.as_deref());
        self.settle(headers, epoch, None).await;
        Ok(MutationOutcome::Applied)
    }

    /// Remove every line in one request.
    ///
    /// # Errors
    ///
    /// Returns an error for an unresolvable identity or a failed request.
    #[instrument(skip(self, identity))]
    pub async fn clear(&self, identity: &Identity) -> Result<MutationOutcome> {
        self.ensure_live()?;

        let Some(_guard) = self.inner.in_flight.try_acquire(InFlightKey::Cart) else {
            debug!("Clear already in flight");
            return Ok(MutationOutcome::AlreadyInFlight);
        };

        let epoch = self.epoch();
        let headers = self.inner.resolver.resolve_headers(identity)?;
        let response = self.inner.api.clear_cart(&headers).await?;
        self.adopt_session(headers, response.session_id.as_deref());

        if let Some(mut state) = self.state_if_current(epoch).await {
            state.clear();
        }
        Ok(MutationOutcome::Applied)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Drop local state for a new identity and load its cart.
    ///
    /// Responses to requests issued under the previous identity are
    /// discarded. The previous identity's server-side cart is not touched.
    ///
    /// # Errors
    ///
    /// Returns the error from loading the new identity's cart.
    #[instrument(skip(self, identity), fields(authenticated = identity.is_authenticated()))]
    pub async fn switch_identity(&self, identity: &Identity) -> Result<CartSnapshot> {
        self.ensure_live()?;
        {
            let mut state = self.inner.state.write().await;
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            state.reset();
        }
        debug!("Identity switched, local cart reset");
        self.refresh(identity).await
    }

    /// Stop accepting responses. Later operations fail with
    /// [`CartError::Disposed`].
    pub async fn dispose(&self) {
        let _state = self.inner.state.write().await;
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        debug!("Cart engine disposed");
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(CartError::Disposed);
        }
        Ok(())
    }

    /// Write access to the state, unless the epoch moved on.
    async fn state_if_current(&self, epoch: u64) -> Option<RwLockWriteGuard<'_, CartState>> {
        let state = self.inner.state.write().await;
        if self.is_disposed() || self.epoch() != epoch {
            debug!("Discarding response from a previous epoch");
            return None;
        }
        Some(state)
    }

    /// Reject a line that is missing from an already loaded cart.
    async fn ensure_known_line(&self, line_id: &LineId) -> Result<()> {
        let state = self.inner.state.read().await;
        if state.is_loaded() && state.line(line_id).is_none() {
            return Err(CartError::LineNotFound(line_id.clone()));
        }
        Ok(())
    }

    /// Apply the optimistic quantity. Returns the quantity to restore on
    /// failure, or `None` when the cart has not been loaded yet.
    async fn begin_update(
        &self,
        line_id: &LineId,
        quantity: Quantity,
        epoch: u64,
    ) -> Result<Option<Quantity>> {
        let Some(mut state) = self.state_if_current(epoch).await else {
            return Err(CartError::Disposed);
        };
        if !state.is_loaded() {
            return Ok(None);
        }
        let line = state
            .line(line_id)
            .ok_or_else(|| CartError::LineNotFound(line_id.clone()))?;
        if let Some(stock) = line.product.stock
            && quantity.get() > stock
        {
            return Err(CartError::ExceedsStock {
                requested: quantity.get(),
                stock,
            });
        }
        Ok(state.begin_update(line_id, quantity))
    }

    /// Persist a server-rotated session token and return the headers to use
    /// from now on.
    fn adopt_session(&self, headers: IdentityHeaders, session_id: Option<&str>) -> IdentityHeaders {
        let Some(session_id) = session_id else {
            return headers;
        };
        let token = SessionToken::new(session_id);
        if token.is_blank() || headers.session_token().is_none_or(|current| current == &token) {
            return headers;
        }
        self.sessions().persist_session_token(&token);
        debug!("Adopted rotated session token");
        headers.rotated(token)
    }

    /// Fetch and normalize the cart into state.
    ///
    /// `settled` names the line whose update this fetch confirms.
    async fn load(&self, headers: IdentityHeaders, epoch: u64, settled: Option<&LineId>) -> Result<()> {
        let document = self.inner.api.fetch_cart(&headers).await?;
        let headers = self.adopt_session(headers, document.session_id.as_deref());
        let discount = document.cart.discount.unwrap_or_default();
        let lines = normalize(document.cart, &self.inner.api, &headers).await;

        if let Some(mut state) = self.state_if_current(epoch).await {
            state.replace(lines, discount, settled);
        }
        Ok(())
    }

    /// Refetch after a successful mutation.
    ///
    /// The mutation already succeeded, so a failed refetch keeps the local
    /// view (confirming `updated`, if any) and marks it stale.
    async fn settle(&self, headers: IdentityHeaders, epoch: u64, updated: Option<&LineId>) {
        if let Err(e) = self.load(headers, epoch, updated).await {
            warn!(error = %e, "Refetch after mutation failed, cart may be stale");
            if let Some(mut state) = self.state_if_current(epoch).await {
                if let Some(line_id) = updated {
                    state.confirm(line_id);
                }
                state.mark_stale();
            }
        }
    }
}

impl std::fmt::Debug for CartEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartEngine")
            .field("api", &self.inner.api)
            .field("tax_rate", &self.inner.tax_rate)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
