//! Wire types for the commerce API.
//!
//! The backend's payloads are loosely shaped: a cart line's product is
//! sometimes a bare id and sometimes an embedded document, order totals may
//! be missing, and listings come either as a bare array or inside a
//! pagination envelope. Each variation is modelled as a tagged union here and
//! resolved in exactly one place.

use cartsync_core::{CartId, CurrencyCode, LineId, OrderId, OrderStatus, ProductId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Products
// =============================================================================

/// Product image, sent either as a URL or as an object with a `url` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ImageRef {
    Url(String),
    Object { url: String },
}

impl ImageRef {
    fn into_url(self) -> String {
        match self {
            Self::Url(url) | Self::Object { url } => url,
        }
    }
}

/// Partially populated product document.
///
/// Embedded cart references and product look-ups share this shape; any
/// field other than the id may be missing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    #[serde(alias = "_id")]
    pub id: ProductId,
    #[serde(default, alias = "title")]
    pub name: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default, alias = "countInStock")]
    pub stock: Option<u32>,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    #[serde(default)]
    pub image: Option<ImageRef>,
    #[serde(default, alias = "currencyCode")]
    pub currency: Option<CurrencyCode>,
}

/// How a cart line refers to its product.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProductRef {
    /// Bare product id; needs a look-up.
    ById(ProductId),
    /// Embedded document; used as-is.
    Embedded(Box<ProductSnapshot>),
}

impl ProductRef {
    /// The referenced product's id.
    #[must_use]
    pub fn id(&self) -> &ProductId {
        match self {
            Self::ById(id) => id,
            Self::Embedded(snapshot) => &snapshot.id,
        }
    }
}

/// Complete product projection used by normalized cart lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub brand: Option<String>,
    /// Current live price (display only; lines carry their own price).
    pub price: Decimal,
    /// Units in stock; `None` when the backend did not report it.
    pub stock: Option<u32>,
    pub images: Vec<String>,
    pub currency: CurrencyCode,
}

impl Product {
    /// Complete a snapshot, filling missing fields with neutral defaults.
    ///
    /// `fallback_price` stands in for a missing product price.
    #[must_use]
    pub fn from_snapshot(snapshot: ProductSnapshot, fallback_price: Decimal) -> Self {
        let mut images: Vec<String> = snapshot.images.into_iter().map(ImageRef::into_url).collect();
        if images.is_empty()
            && let Some(image) = snapshot.image
        {
            images.push(image.into_url());
        }

        Self {
            id: snapshot.id,
            name: snapshot.name.unwrap_or_default(),
            brand: snapshot.brand,
            price: snapshot.price.unwrap_or(fallback_price),
            stock: snapshot.stock,
            images,
            currency: snapshot.currency.unwrap_or_default(),
        }
    }

    /// First image, if any.
    #[must_use]
    pub fn primary_image(&self) -> Option<&str> {
        self.images.first().map(String::as_str)
    }
}

/// Response of `GET /products/{id}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ProductEnvelope {
    Wrapped { product: ProductSnapshot },
    Data { data: ProductSnapshot },
    Bare(ProductSnapshot),
}

impl ProductEnvelope {
    pub(crate) fn into_snapshot(self) -> ProductSnapshot {
        match self {
            Self::Wrapped { product } | Self::Data { data: product } | Self::Bare(product) => {
                product
            }
        }
    }
}

// =============================================================================
// Cart
// =============================================================================

/// One line of the raw cart document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCartLine {
    #[serde(alias = "_id")]
    pub id: LineId,
    pub product: ProductRef,
    /// Signed so that malformed server values can be detected and dropped.
    pub quantity: i64,
    /// Price captured by the server when the line was last mutated.
    #[serde(default, alias = "unitPriceAtAdd", alias = "priceAtAdd")]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub added_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The denormalized cart document held by the server.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCart {
    #[serde(default, alias = "_id")]
    pub id: Option<CartId>,
    /// Raw lines, parsed one at a time during normalization so that a
    /// malformed line (e.g. a deleted product populated as `null`) is dropped
    /// on its own.
    #[serde(default)]
    pub items: Option<Vec<Value>>,
    /// Discount amount applied by the server.
    #[serde(default, alias = "discountAmount")]
    pub discount: Option<Decimal>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// A fetched cart together with any rotated session token.
#[derive(Debug, Clone, Default)]
pub struct CartDocument {
    pub cart: RawCart,
    pub session_id: Option<String>,
}

impl CartDocument {
    /// Interpret a `GET /cart` body.
    ///
    /// Accepts `{"cart": {...}, "sessionId": ...}` (where `cart` may be
    /// `null`) as well as a bare cart document. The session id is taken from
    /// the envelope first, then from the cart itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the cart document does not match the expected shape.
    pub fn from_value(mut body: Value) -> Result<Self, serde_json::Error> {
        let envelope_session = body
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let wrapped = body.get_mut("cart").map(Value::take);
        let cart: RawCart = match wrapped {
            Some(Value::Null) => RawCart::default(),
            Some(inner) => serde_json::from_value(inner)?,
            None if body.is_null() => RawCart::default(),
            None => serde_json::from_value(body)?,
        };

        let session_id = envelope_session.or_else(|| cart.session_id.clone());
        Ok(Self { cart, session_id })
    }
}

/// Body of `POST /cart/add`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest {
    pub product_id: ProductId,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

/// Body of `PUT /cart/items/{lineId}`.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateLineRequest {
    pub quantity: u32,
}

/// Whatever a mutation endpoint sends back. Only the rotated session id is
/// acted upon; the cart itself is always refetched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationResponse {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Route shape used to delete a cart line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveRoute {
    /// `DELETE /cart/items/{lineId}`.
    Primary,
    /// `DELETE /cart/remove/{lineId}`.
    Fallback,
}

impl RemoveRoute {
    pub(crate) const fn segment(self) -> &'static str {
        match self {
            Self::Primary => "items",
            Self::Fallback => "remove",
        }
    }
}

// =============================================================================
// Orders
// =============================================================================

/// One line of a historical order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    #[serde(default)]
    pub product: Option<ProductRef>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub quantity: u32,
}

/// An immutable order record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(alias = "_id")]
    pub id: OrderId,
    #[serde(default)]
    pub order_number: Option<Value>,
    #[serde(default)]
    pub status: OrderStatus,
    /// Grand total; not always populated by the backend.
    #[serde(default, alias = "totalAmount", alias = "totalPrice")]
    pub total: Option<Decimal>,
    #[serde(default)]
    pub subtotal: Option<Decimal>,
    #[serde(default, alias = "orderItems")]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub currency: Option<CurrencyCode>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Pagination block of an order listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default, alias = "currentPage")]
    pub page: Option<u32>,
    #[serde(default, alias = "pages")]
    pub total_pages: Option<u32>,
    #[serde(default, alias = "total", alias = "totalOrders")]
    pub total_count: Option<u64>,
}

/// Response of the order listing endpoints.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum OrderListing {
    Bare(Vec<Order>),
    Paged {
        #[serde(alias = "data")]
        orders: Vec<Order>,
        #[serde(default)]
        pagination: Option<Pagination>,
        #[serde(default, alias = "totalPages")]
        pages: Option<u32>,
        #[serde(default)]
        total: Option<u64>,
    },
}

/// A page of orders.
#[derive(Debug, Clone, Default)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub page: u32,
    pub total_pages: Option<u32>,
    pub total_count: Option<u64>,
}

impl OrderPage {
    pub(crate) fn from_listing(listing: OrderListing, requested_page: u32) -> Self {
        match listing {
            OrderListing::Bare(orders) => Self {
                orders,
                page: requested_page,
                total_pages: None,
                total_count: None,
            },
            OrderListing::Paged {
                orders,
                pagination,
                pages,
                total,
            } => {
                let pagination = pagination.unwrap_or_default();
                Self {
                    orders,
                    page: pagination.page.unwrap_or(requested_page),
                    total_pages: pagination.total_pages.or(pages),
                    total_count: pagination.total_count.or(total),
                }
            }
        }
    }
}

/// Response of `GET /orders/summary`. Every field may be absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerOrderSummary {
    #[serde(default)]
    pub total_orders: Option<u64>,
    #[serde(default, alias = "totalRevenue")]
    pub total_spent: Option<Decimal>,
}
