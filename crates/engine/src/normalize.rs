//! Cart normalization.
//!
//! Turns the server's denormalized cart document into fully resolved lines.
//! Bare product ids are looked up concurrently; embedded snapshots are used
//! as-is. A line whose product cannot be resolved is dropped with a warning
//! rather than failing the whole cart.

use std::future::Future;

use cartsync_core::{LineId, ProductId, Quantity};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::api::{ApiError, Product, ProductRef, RawCart, RawCartLine};
use crate::identity::IdentityHeaders;

/// Source of product projections for bare cart references.
pub trait ProductLookup: Sync {
    /// Fetch a product, sending the caller's identity header.
    fn product(
        &self,
        id: &ProductId,
        identity: &IdentityHeaders,
    ) -> impl Future<Output = Result<Product, ApiError>> + Send;
}

/// A cart line with its product fully resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedCartLine {
    pub id: LineId,
    pub product: Product,
    pub quantity: Quantity,
    /// Price of record for this line; not the product's live price.
    pub unit_price: Decimal,
    pub notes: Option<String>,
    pub added_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl NormalizedCartLine {
    /// `unit_price × quantity`.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity.get())
    }
}

/// Resolve every line of a raw cart, preserving server order.
///
/// An absent or empty `items` list yields an empty vector. Lines that do not
/// parse are dropped like lines whose product look-up fails.
#[instrument(skip_all, fields(lines = raw.items.as_ref().map_or(0, Vec::len)))]
pub async fn normalize<L: ProductLookup>(
    raw: RawCart,
    lookup: &L,
    identity: &IdentityHeaders,
) -> Vec<NormalizedCartLine> {
    let items = raw.items.unwrap_or_default();
    let resolved = join_all(
        items
            .into_iter()
            .enumerate()
            .map(|(position, item)| resolve_item(position, item, lookup, identity)),
    )
    .await;
    resolved.into_iter().flatten().collect()
}

async fn resolve_item<L: ProductLookup>(
    position: usize,
    item: Value,
    lookup: &L,
    identity: &IdentityHeaders,
) -> Option<NormalizedCartLine> {
    match serde_json::from_value::<RawCartLine>(item) {
        Ok(line) => resolve_line(line, lookup, identity).await,
        Err(e) => {
            warn!(position, error = %e, "Dropping malformed cart line");
            None
        }
    }
}

async fn resolve_line<L: ProductLookup>(
    line: RawCartLine,
    lookup: &L,
    identity: &IdentityHeaders,
) -> Option<NormalizedCartLine> {
    let quantity = match Quantity::new(line.quantity) {
        Ok(quantity) => quantity,
        Err(e) => {
            warn!(line_id = %line.id, error = %e, "Dropping cart line with invalid quantity");
            return None;
        }
    };

    let product = match line.product {
        ProductRef::Embedded(snapshot) => {
            Product::from_snapshot(*snapshot, line.price.unwrap_or_default())
        }
        ProductRef::ById(product_id) => match lookup.product(&product_id, identity).await {
            Ok(product) => product,
            Err(e) => {
                warn!(
                    line_id = %line.id,
                    product_id = %product_id,
                    error = %e,
                    "Dropping cart line whose product could not be resolved"
                );
                return None;
            }
        },
    };

    Some(NormalizedCartLine {
        id: line.id,
        unit_price: line.price.unwrap_or(product.price),
        product,
        quantity,
        notes: line.notes.filter(|n| !n.is_empty()),
        added_at: line.added_at,
        updated_at: line.updated_at,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use cartsync_core::CurrencyCode;
    use serde_json::json;

    use super::*;
    use crate::session::SessionToken;

    /// Lookup that knows a fixed set of products and records calls.
    struct FakeLookup {
        failing: HashSet<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeLookup {
        fn new(failing: &[&'static str]) -> Self {
            Self {
                failing: failing.iter().copied().collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProductLookup for FakeLookup {
        async fn product(&self, id: &ProductId, _identity: &IdentityHeaders) -> Result<Product, ApiError> {
            self.calls.lock().unwrap().push(id.to_string());
            if self.failing.contains(id.as_str()) {
                return Err(ApiError::Status {
                    status: 404,
                    message: "Product not found".into(),
                });
            }
            Ok(Product {
                id: id.clone(),
                name: format!("Product {id}"),
                brand: None,
                price: Decimal::new(99, 0),
                stock: Some(10),
                images: vec![],
                currency: CurrencyCode::EUR,
            })
        }
    }

    fn headers() -> IdentityHeaders {
        IdentityHeaders::Session(SessionToken::new("sess_test"))
    }

    fn cart(items: serde_json::Value) -> RawCart {
        serde_json::from_value(json!({ "items": items })).unwrap()
    }

    #[tokio::test]
    async fn test_all_refs_resolve() {
        let raw = cart(json!([
            {"_id": "l1", "product": "p1", "quantity": 2, "price": 10},
            {"_id": "l2", "product": {"_id": "p2", "name": "Mug", "price": 5}, "quantity": 1, "price": 5},
            {"_id": "l3", "product": "p3", "quantity": 4, "price": 1},
        ]));
        let lookup = FakeLookup::new(&[]);

        let lines = normalize(raw, &lookup, &headers()).await;

        assert_eq!(lines.len(), 3);
        let ids: Vec<_> = lines.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, ["l1", "l2", "l3"]);
        assert_eq!(lines[1].product.name, "Mug");

        let mut calls = lookup.calls();
        calls.sort();
        assert_eq!(calls, ["p1", "p3"]);
    }

    #[tokio::test]
    async fn test_failed_lookups_are_dropped() {
        let raw = cart(json!([
            {"_id": "l1", "product": "p1", "quantity": 1},
            {"_id": "l2", "product": "gone", "quantity": 1},
            {"_id": "l3", "product": "p3", "quantity": 1},
            {"_id": "l4", "product": "gone-too", "quantity": 1},
        ]));
        let lookup = FakeLookup::new(&["gone", "gone-too"]);

        let lines = normalize(raw, &lookup, &headers()).await;

        let ids: Vec<_> = lines.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, ["l1", "l3"]);
    }

    #[tokio::test]
    async fn test_line_price_is_price_of_record() {
        let raw = cart(json!([
            {"_id": "l1", "product": "p1", "quantity": 3, "price": "12.50"},
        ]));
        let lines = normalize(raw, &FakeLookup::new(&[]), &headers()).await;

        assert_eq!(lines[0].unit_price, Decimal::new(1250, 2));
        assert_eq!(lines[0].product.price, Decimal::new(99, 0));
        assert_eq!(lines[0].line_total(), Decimal::new(3750, 2));
    }

    #[tokio::test]
    async fn test_missing_line_price_uses_product_price() {
        let raw = cart(json!([{"_id": "l1", "product": "p1", "quantity": 1}]));
        let lines = normalize(raw, &FakeLookup::new(&[]), &headers()).await;
        assert_eq!(lines[0].unit_price, Decimal::new(99, 0));
    }

    #[tokio::test]
    async fn test_invalid_quantities_are_dropped() {
        let raw = cart(json!([
            {"_id": "l1", "product": {"_id": "p1"}, "quantity": 0},
            {"_id": "l2", "product": {"_id": "p2"}, "quantity": -3},
            {"_id": "l3", "product": {"_id": "p3"}, "quantity": 2},
        ]));
        let lines = normalize(raw, &FakeLookup::new(&[]), &headers()).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity.get(), 2);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_dropped() {
        let raw = cart(json!([
            {"_id": "l1", "product": "p1", "quantity": 1},
            {"_id": "l2", "product": null, "quantity": 1},
            {"_id": "l3", "product": {"_id": "p3", "countInStock": -1}, "quantity": 1},
            {"_id": "l4", "quantity": 1},
            {"_id": "l5", "product": {"_id": "p5", "price": 2}, "quantity": 2},
        ]));
        let lookup = FakeLookup::new(&[]);

        let lines = normalize(raw, &lookup, &headers()).await;

        let ids: Vec<_> = lines.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, ["l1", "l5"]);
        assert_eq!(lookup.calls(), ["p1"]);
    }

    #[tokio::test]
    async fn test_empty_and_missing_items() {
        let lookup = FakeLookup::new(&[]);
        assert!(normalize(RawCart::default(), &lookup, &headers()).await.is_empty());
        assert!(normalize(cart(json!([])), &lookup, &headers()).await.is_empty());
        assert!(lookup.calls().is_empty());
    }
}
