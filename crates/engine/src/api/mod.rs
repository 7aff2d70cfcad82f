//! Commerce API client.
//!
//! Thin typed wrapper over the remote cart, product and order resources.
//! Every call takes the [`IdentityHeaders`] to send; the client itself holds
//! no identity.
//!
//! # Endpoints
//!
//! - `GET /cart`, `POST /cart/add`, `PUT /cart/items/{lineId}`
//! - `DELETE /cart/items/{lineId}` (fallback `DELETE /cart/remove/{lineId}`)
//! - `DELETE /cart/clear`
//! - `GET /products/{id}` (cached for display look-ups)
//! - `GET /orders`, `GET /orders/summary`, `GET /orders/admin/all`

mod cache;
mod types;

pub use cache::ProductCache;
pub use types::*;

use std::sync::Arc;

use cartsync_core::{LineId, ProductId};
use reqwest::{RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, instrument};
use url::Url;

use crate::config::EngineConfig;
use crate::identity::IdentityHeaders;
use crate::normalize::ProductLookup;

/// Maximum number of response body characters kept in logs and errors.
const MAX_BODY_CHARS: usize = 500;

/// Errors that can occur when talking to the commerce API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned a non-success status.
    #[error("API error: {status} - {message}")]
    Status { status: u16, message: String },

    /// Rate limited by the API.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Failed to parse a response body.
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// An endpoint URL could not be built.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl ApiError {
    /// HTTP status of the failure, if the server answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::RateLimited(_) => Some(429),
            _ => None,
        }
    }

    /// Whether the server answered 404.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.status(), Some(404))
    }
}

/// Client for the commerce API.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    client: reqwest::Client,
    base_url: Url,
    products: ProductCache,
}

impl ApiClient {
    /// Create a new API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(config: &EngineConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(ApiClientInner {
                client,
                base_url: config.api_base_url.clone(),
                products: ProductCache::new(
                    config.product_cache_ttl,
                    config.product_cache_capacity,
                ),
            }),
        })
    }

    /// The API origin requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    // =========================================================================
    // Cart
    // =========================================================================

    /// Fetch the current cart.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-success status, or an
    /// unreadable cart document.
    #[instrument(skip(self, identity))]
    pub async fn fetch_cart(&self, identity: &IdentityHeaders) -> Result<CartDocument, ApiError> {
        let url = self.endpoint(&["cart"])?;
        let body = self.execute(identity.apply(self.inner.client.get(url))).await?;
        Ok(CartDocument::from_value(body)?)
    }

    /// Add a product to the cart.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or non-success status.
    #[instrument(skip(self, identity, request), fields(product_id = %request.product_id, quantity = request.quantity))]
    pub async fn add_to_cart(
        &self,
        identity: &IdentityHeaders,
        request: &AddToCartRequest,
    ) -> Result<MutationResponse, ApiError> {
        let url = self.endpoint(&["cart", "add"])?;
        let builder = identity.apply(self.inner.client.post(url)).json(request);
        mutation_response(self.execute(builder).await?)
    }

    /// Set the quantity of a cart line.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or non-success status.
    #[instrument(skip(self, identity, line_id), fields(line_id = %line_id))]
    pub async fn update_line(
        &self,
        identity: &IdentityHeaders,
        line_id: &LineId,
        quantity: u32,
    ) -> Result<MutationResponse, ApiError> {
        let url = self.endpoint(&["cart", "items", line_id.as_str()])?;
        let builder = identity
            .apply(self.inner.client.put(url))
            .json(&UpdateLineRequest { quantity });
        mutation_response(self.execute(builder).await?)
    }

    /// Delete a cart line through the given route.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or non-success status.
    #[instrument(skip(self, identity, line_id), fields(line_id = %line_id))]
    pub async fn remove_line(
        &self,
        identity: &IdentityHeaders,
        line_id: &LineId,
        route: RemoveRoute,
    ) -> Result<MutationResponse, ApiError> {
        let url = self.endpoint(&["cart", route.segment(), line_id.as_str()])?;
        mutation_response(self.execute(identity.apply(self.inner.client.delete(url))).await?)
    }

    /// Remove every line from the cart.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or non-success status.
    #[instrument(skip(self, identity))]
    pub async fn clear_cart(&self, identity: &IdentityHeaders) -> Result<MutationResponse, ApiError> {
        let url = self.endpoint(&["cart", "clear"])?;
        mutation_response(self.execute(identity.apply(self.inner.client.delete(url))).await?)
    }

    // =========================================================================
    // Products
    // =========================================================================

    /// Look up a product for display, serving from cache when possible.
    ///
    /// # Errors
    ///
    /// Returns an error if the product cannot be fetched or parsed.
    #[instrument(skip(self, id, identity), fields(product_id = %id))]
    pub async fn product(&self, id: &ProductId, identity: &IdentityHeaders) -> Result<Product, ApiError> {
        if let Some(product) = self.inner.products.get(id).await {
            debug!("Cache hit for product");
            return Ok(product);
        }
        self.fetch_product(id, identity).await
    }

    /// Fetch a product from the server, bypassing the cache.
    ///
    /// The cache is refreshed on success and the entry dropped on failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the product cannot be fetched or parsed.
    #[instrument(skip(self, id, identity), fields(product_id = %id))]
    pub async fn fetch_product(
        &self,
        id: &ProductId,
        identity: &IdentityHeaders,
    ) -> Result<Product, ApiError> {
        match self.request_product(id, identity).await {
            Ok(product) => {
                self.inner.products.insert(product.clone()).await;
                Ok(product)
            }
            Err(e) => {
                self.inner.products.invalidate(id).await;
                Err(e)
            }
        }
    }

    async fn request_product(&self, id: &ProductId, identity: &IdentityHeaders) -> Result<Product, ApiError> {
        let url = self.endpoint(&["products", id.as_str()])?;
        let body = self.execute(identity.apply(self.inner.client.get(url))).await?;
        let envelope: ProductEnvelope = serde_json::from_value(body)?;
        Ok(Product::from_snapshot(envelope.into_snapshot(), Decimal::ZERO))
    }

    /// Drop a product from the look-up cache.
    pub async fn invalidate_product(&self, id: &ProductId) {
        self.inner.products.invalidate(id).await;
    }

    /// Drop every cached product.
    pub async fn invalidate_all(&self) {
        self.inner.products.invalidate_all().await;
    }

    // =========================================================================
    // Orders
    // =========================================================================

    /// Fetch a page of the caller's orders.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-success status, or an
    /// unreadable listing.
    #[instrument(skip(self, identity))]
    pub async fn list_orders(
        &self,
        identity: &IdentityHeaders,
        page: u32,
        limit: u32,
    ) -> Result<OrderPage, ApiError> {
        self.order_listing(&["orders"], identity, page, limit).await
    }

    /// Fetch a page of every customer's orders (admin only).
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-success status, or an
    /// unreadable listing.
    #[instrument(skip(self, identity))]
    pub async fn admin_orders(
        &self,
        identity: &IdentityHeaders,
        page: u32,
        limit: u32,
    ) -> Result<OrderPage, ApiError> {
        self.order_listing(&["orders", "admin", "all"], identity, page, limit)
            .await
    }

    /// Fetch the server's order summary.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or non-success status.
    #[instrument(skip(self, identity))]
    pub async fn order_summary(&self, identity: &IdentityHeaders) -> Result<ServerOrderSummary, ApiError> {
        let url = self.endpoint(&["orders", "summary"])?;
        let body = self.execute(identity.apply(self.inner.client.get(url))).await?;
        if body.is_null() {
            return Ok(ServerOrderSummary::default());
        }
        let body = body.get("summary").cloned().unwrap_or(body);
        Ok(serde_json::from_value(body)?)
    }

    async fn order_listing(
        &self,
        segments: &[&str],
        identity: &IdentityHeaders,
        page: u32,
        limit: u32,
    ) -> Result<OrderPage, ApiError> {
        let mut url = self.endpoint(segments)?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("limit", &limit.to_string());

        let body = self.execute(identity.apply(self.inner.client.get(url))).await?;
        if body.is_null() {
            return Ok(OrderPage {
                page,
                ..OrderPage::default()
            });
        }
        let listing = serde_json::from_value(body)?;
        Ok(OrderPage::from_listing(listing, page))
    }

    // =========================================================================
    // Transport
    // =========================================================================

    /// Build an endpoint URL under the API origin.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidEndpoint(self.inner.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request and read its JSON body.
    ///
    /// An empty success body reads as `Value::Null`.
    async fn execute(&self, request: RequestBuilder) -> Result<Value, ApiError> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(ApiError::RateLimited(retry_after));
        }

        let text = response.text().await?;

        if !status.is_success() {
            let body = truncate(&text);
            error!(status = %status, body = %body, "Commerce API returned non-success status");
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: error_message(&text).unwrap_or(body),
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// Normalization always reads products fresh so stock and resolvability
/// match the cart document being normalized.
impl ProductLookup for ApiClient {
    async fn product(&self, id: &ProductId, identity: &IdentityHeaders) -> Result<Product, ApiError> {
        self.fetch_product(id, identity).await
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.base_url.as_str())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn mutation_response(body: Value) -> Result<MutationResponse, ApiError> {
    if !body.is_object() {
        return Ok(MutationResponse::default());
    }
    Ok(serde_json::from_value(body)?)
}

/// Pull a `message` or `error` string out of an error body.
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|key| value.get(*key)?.as_str().map(str::to_owned))
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_BODY_CHARS).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(&EngineConfig::new(base).unwrap()).unwrap()
    }

    #[test]
    fn test_endpoint_joins_under_base_path() {
        let client = client("http://localhost:5000/api");
        let url = client.endpoint(&["cart", "items", "line 1"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/api/cart/items/line%201");
    }

    #[test]
    fn test_endpoint_on_bare_origin() {
        let client = client("https://shop.example.com");
        let url = client.endpoint(&["orders", "summary"]).unwrap();
        assert_eq!(url.as_str(), "https://shop.example.com/orders/summary");
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"message": "Cart not found"}"#).as_deref(),
            Some("Cart not found")
        );
        assert_eq!(
            error_message(r#"{"error": "Out of stock"}"#).as_deref(),
            Some("Out of stock")
        );
        assert_eq!(error_message("<html>oops</html>"), None);
    }

    #[test]
    fn test_truncate_limits_chars() {
        let long = "x".repeat(MAX_BODY_CHARS + 20);
        assert_eq!(truncate(&long).len(), MAX_BODY_CHARS);
    }

    #[test]
    fn test_not_found_detection() {
        let err = ApiError::Status {
            status: 404,
            message: "missing".into(),
        };
        assert!(err.is_not_found());
        assert!(!ApiError::RateLimited(5).is_not_found());
        assert_eq!(ApiError::RateLimited(5).status(), Some(429));
    }

    #[test]
    fn test_mutation_response_tolerates_non_objects() {
        let response = mutation_response(Value::Null).unwrap();
        assert!(response.session_id.is_none());

        let response = mutation_response(serde_json::json!({"sessionId": "sess_new"})).unwrap();
        assert_eq!(response.session_id.as_deref(), Some("sess_new"));
    }
}
