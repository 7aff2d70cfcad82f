//! Order history views.
//!
//! Listings and history summaries are computed client-side from order pages;
//! the server may omit order totals and summary fields.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::api::{ApiClient, ApiError, OrderPage, ServerOrderSummary};
use crate::error::OrdersError;
use crate::identity::{Identity, IdentityError, IdentityResolver};
use crate::session::SessionIdentityProvider;
use crate::summary::{OrderPageSummary, summarize_orders};

/// Page size of the listing a summary is recomputed from.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Whose orders a listing shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderScope {
    /// The caller's own orders.
    Personal,
    /// Every customer's orders (admin listing).
    All,
}

/// A page of orders with its page-local summary.
#[derive(Debug, Clone)]
pub struct OrdersView {
    pub page: OrderPage,
    pub summary: OrderPageSummary,
    pub scope: OrderScope,
}

impl OrdersView {
    fn new(page: OrderPage, scope: OrderScope) -> Self {
        Self {
            summary: summarize_orders(&page.orders),
            page,
            scope,
        }
    }
}

/// Where an order-history summary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarySource {
    /// Recomputed from the first page of orders.
    PageEstimate,
    /// The listing failed and `GET /orders/summary` answered with every field.
    Server,
}

/// Order count and spend for the caller.
#[derive(Debug, Clone, Serialize)]
pub struct OrderHistorySummary {
    pub total_orders: u64,
    pub total_spent: Decimal,
    pub source: SummarySource,
    /// The whole history fit on the first page and the server summary
    /// disagrees with it.
    pub server_mismatch: bool,
}

/// Order history service.
#[derive(Debug, Clone)]
pub struct OrdersService {
    api: ApiClient,
    resolver: IdentityResolver,
}

impl OrdersService {
    #[must_use]
    pub const fn new(api: ApiClient, sessions: Arc<SessionIdentityProvider>) -> Self {
        Self {
            api,
            resolver: IdentityResolver::new(sessions),
        }
    }

    /// List the caller's orders.
    ///
    /// # Errors
    ///
    /// Returns an error if no identity resolves or the listing fails.
    #[instrument(skip(self, identity))]
    pub async fn list(&self, identity: &Identity, page: u32, limit: u32) -> Result<OrdersView, OrdersError> {
        let headers = self.resolver.resolve_headers(identity)?;
        let page = self.api.list_orders(&headers, page, limit).await?;
        Ok(OrdersView::new(page, OrderScope::Personal))
    }

    /// Summarize the caller's order history.
    ///
    /// Totals are recomputed from the first page of orders. The server
    /// summary is fetched alongside and only checked against the page; it is
    /// used on its own only when the listing fails and it reports both
    /// fields.
    ///
    /// # Errors
    ///
    /// Returns an error if no identity resolves, or the listing fails and the
    /// server summary is unavailable or incomplete.
    #[instrument(skip(self, identity))]
    pub async fn summary(&self, identity: &Identity) -> Result<OrderHistorySummary, OrdersError> {
        let headers = self.resolver.resolve_headers(identity)?;

        let (listing, server) = tokio::join!(
            self.api.list_orders(&headers, 1, DEFAULT_PAGE_SIZE),
            self.api.order_summary(&headers),
        );
        let server = match server {
            Ok(ServerOrderSummary {
                total_orders: Some(total_orders),
                total_spent: Some(total_spent),
            }) => Some((total_orders, total_spent)),
            Ok(_) => {
                debug!("Server order summary incomplete");
                None
            }
            Err(e) => {
                debug!(error = %e, "Server order summary unavailable");
                None
            }
        };

        let page = match listing {
            Ok(page) => page,
            Err(e) => {
                let Some((total_orders, total_spent)) = server else {
                    return Err(e.into());
                };
                warn!(error = %e, "Order listing failed, using server summary");
                return Ok(OrderHistorySummary {
                    total_orders,
                    total_spent,
                    source: SummarySource::Server,
                    server_mismatch: false,
                });
            }
        };

        let estimate = summarize_orders(&page.orders);
        let on_page = u64::try_from(estimate.order_count).unwrap_or(u64::MAX);
        let total_orders = page.total_count.unwrap_or(on_page);
        let server_mismatch = match server {
            Some((orders, spent)) if total_orders == on_page => {
                orders != total_orders || spent != estimate.total_revenue
            }
            _ => false,
        };
        if server_mismatch {
            warn!(
                total_orders,
                total_spent = %estimate.total_revenue,
                "Server order summary disagrees with the order listing"
            );
        }

        Ok(OrderHistorySummary {
            total_orders,
            total_spent: estimate.total_revenue,
            source: SummarySource::PageEstimate,
            server_mismatch,
        })
    }

    /// List every customer's orders.
    ///
    /// Only authenticated identities may call this. If the admin listing is
    /// refused, the caller's own orders are shown instead.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::AuthenticationRequired` for anonymous
    /// identities, or an error if the fallback listing fails too.
    #[instrument(skip(self, identity))]
    pub async fn admin_all(
        &self,
        identity: &Identity,
        page: u32,
        limit: u32,
    ) -> Result<OrdersView, OrdersError> {
        if !identity.is_authenticated() {
            return Err(IdentityError::AuthenticationRequired.into());
        }
        let headers = self.resolver.resolve_headers(identity)?;

        match self.api.admin_orders(&headers, page, limit).await {
            Ok(listing) => Ok(OrdersView::new(listing, OrderScope::All)),
            Err(ApiError::Status { status, .. }) => {
                warn!(status, "Admin order listing refused, falling back to own orders");
                let listing = self.api.list_orders(&headers, page, limit).await?;
                Ok(OrdersView::new(listing, OrderScope::Personal))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[tokio::test]
    async fn test_admin_requires_authentication() {
        let api = ApiClient::new(&EngineConfig::new("http://127.0.0.1:9").unwrap()).unwrap();
        let service = OrdersService::new(api, Arc::new(SessionIdentityProvider::in_memory()));

        let err = service.admin_all(&Identity::anonymous(), 1, 10).await.unwrap_err();
        assert!(matches!(
            err,
            OrdersError::Identity(IdentityError::AuthenticationRequired)
        ));
        assert!(service.resolver.sessions().get_session_token().is_none());
    }
}
