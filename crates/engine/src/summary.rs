//! Derived financial summaries.
//!
//! Cart summaries are recomputed from the normalized lines on every change
//! and never stored. Order-page summaries apply the same aggregation to a
//! page of orders, tolerating orders whose totals the server left out.
//!
//! All amounts here are display estimates; the backend recomputes them
//! before any charge.

use std::collections::BTreeMap;

use cartsync_core::{CurrencyCode, OrderStatus, format_amount};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::api::{Order, OrderItem};
use crate::normalize::NormalizedCartLine;

/// Tax rate used when none is configured (10%).
pub const DEFAULT_TAX_RATE: Decimal = Decimal::from_parts(10, 0, 0, false, 2);

/// Shipping is free for every cart.
pub const FLAT_SHIPPING: Decimal = Decimal::ZERO;

// =============================================================================
// Cart
// =============================================================================

/// Totals for the current cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartSummary {
    pub total_items: u64,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    /// Currency of the first line's product.
    pub currency: CurrencyCode,
    /// Set when lines are priced in more than one currency.
    pub mixed_currency: bool,
}

impl CartSummary {
    /// Format an amount from this summary in its currency.
    #[must_use]
    pub fn format(&self, amount: Decimal) -> String {
        format_amount(amount, &self.currency)
    }
}

/// Summarize a list of normalized lines.
///
/// Returns `None` for an empty cart. The total is not clamped, so a discount
/// larger than the subtotal yields a negative total.
#[must_use]
pub fn summarize(
    lines: &[NormalizedCartLine],
    discount: Decimal,
    tax_rate: Decimal,
) -> Option<CartSummary> {
    let first = lines.first()?;
    let currency = first.product.currency.clone();

    let total_items = lines.iter().map(|l| u64::from(l.quantity.get())).sum();
    let subtotal: Decimal = lines.iter().map(NormalizedCartLine::line_total).sum();
    let tax = subtotal * tax_rate;
    let shipping = FLAT_SHIPPING;

    Some(CartSummary {
        total_items,
        subtotal,
        tax,
        shipping,
        discount,
        total: subtotal + tax + shipping - discount,
        mixed_currency: lines.iter().any(|l| l.product.currency != currency),
        currency,
    })
}

// =============================================================================
// Orders
// =============================================================================

/// Best available total for an order.
///
/// Falls back from the grand total to the subtotal to the sum of the
/// order's items.
#[must_use]
pub fn order_total(order: &Order) -> Decimal {
    order
        .total
        .or(order.subtotal)
        .unwrap_or_else(|| order.items.iter().map(item_total).sum())
}

fn item_total(item: &OrderItem) -> Decimal {
    item.price * Decimal::from(item.quantity)
}

/// Aggregates over one page of orders.
///
/// A page-local estimate, not a full-history total.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct OrderPageSummary {
    pub order_count: usize,
    pub total_revenue: Decimal,
    pub status_counts: BTreeMap<OrderStatus, usize>,
    pub currency: CurrencyCode,
}

impl OrderPageSummary {
    /// Number of orders on the page with the given status.
    #[must_use]
    pub fn count(&self, status: OrderStatus) -> usize {
        self.status_counts.get(&status).copied().unwrap_or(0)
    }

    /// Format an amount in the page currency.
    #[must_use]
    pub fn format(&self, amount: Decimal) -> String {
        format_amount(amount, &self.currency)
    }
}

/// Summarize a page of orders.
#[must_use]
pub fn summarize_orders(orders: &[Order]) -> OrderPageSummary {
    let mut status_counts = BTreeMap::new();
    for order in orders {
        *status_counts.entry(order.status).or_insert(0) += 1;
    }

    OrderPageSummary {
        order_count: orders.len(),
        total_revenue: orders.iter().map(order_total).sum(),
        status_counts,
        currency: orders
            .iter()
            .find_map(|o| o.currency.clone())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cartsync_core::{LineId, ProductId, Quantity};
    use serde_json::json;

    use super::*;
    use crate::api::Product;

    fn line(id: &str, price: i64, quantity: i64, currency: CurrencyCode) -> NormalizedCartLine {
        NormalizedCartLine {
            id: LineId::new(id),
            product: Product {
                id: ProductId::new(format!("p-{id}")),
                name: id.to_string(),
                brand: None,
                price: Decimal::new(price, 0),
                stock: None,
                images: vec![],
                currency,
            },
            quantity: Quantity::new(quantity).unwrap(),
            unit_price: Decimal::new(price, 0),
            notes: None,
            added_at: None,
            updated_at: None,
        }
    }

    fn order(value: serde_json::Value) -> Order {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_summary_arithmetic() {
        let lines = [
            line("a", 10, 2, CurrencyCode::USD),
            line("b", 5, 1, CurrencyCode::USD),
        ];
        let summary = summarize(&lines, Decimal::ZERO, DEFAULT_TAX_RATE).unwrap();

        assert_eq!(summary.total_items, 3);
        assert_eq!(summary.subtotal, Decimal::new(25, 0));
        assert_eq!(summary.tax, Decimal::new(25, 1));
        assert_eq!(summary.shipping, Decimal::ZERO);
        assert_eq!(summary.total, Decimal::new(275, 1));
        assert_eq!(summary.format(summary.total), "$27.50");
        assert!(!summary.mixed_currency);
    }

    #[test]
    fn test_discount_is_subtracted() {
        let lines = [line("a", 100, 1, CurrencyCode::USD)];
        let summary = summarize(&lines, Decimal::new(15, 0), DEFAULT_TAX_RATE).unwrap();
        assert_eq!(summary.total, Decimal::new(95, 0));
        assert_eq!(summary.discount, Decimal::new(15, 0));
    }

    #[test]
    fn test_discount_larger_than_subtotal_goes_negative() {
        let lines = [line("a", 10, 1, CurrencyCode::USD)];
        let summary = summarize(&lines, Decimal::new(20, 0), Decimal::ZERO).unwrap();
        assert_eq!(summary.total, Decimal::new(-10, 0));
    }

    #[test]
    fn test_empty_cart_has_no_summary() {
        assert!(summarize(&[], Decimal::ZERO, DEFAULT_TAX_RATE).is_none());
    }

    #[test]
    fn test_mixed_currency_uses_first_line() {
        let lines = [
            line("a", 10, 1, CurrencyCode::EUR),
            line("b", 10, 1, CurrencyCode::USD),
        ];
        let summary = summarize(&lines, Decimal::ZERO, DEFAULT_TAX_RATE).unwrap();
        assert_eq!(summary.currency, CurrencyCode::EUR);
        assert!(summary.mixed_currency);
    }

    #[test]
    fn test_order_total_fallback_chain() {
        let from_items = order(json!({
            "_id": "o1", "total": null, "subtotal": null,
            "items": [{"price": 3, "quantity": 2}, {"price": 4, "quantity": 1}]
        }));
        assert_eq!(order_total(&from_items), Decimal::new(10, 0));

        let from_subtotal = order(json!({"_id": "o2", "subtotal": 7, "items": [{"price": 1, "quantity": 1}]}));
        assert_eq!(order_total(&from_subtotal), Decimal::new(7, 0));

        let from_total = order(json!({"_id": "o3", "totalAmount": 12, "subtotal": 7}));
        assert_eq!(order_total(&from_total), Decimal::new(12, 0));
    }

    #[test]
    fn test_order_page_summary() {
        let orders = [
            order(json!({"_id": "o1", "status": "Delivered", "total": 20})),
            order(json!({"_id": "o2", "status": "delivered", "subtotal": 5})),
            order(json!({"_id": "o3", "status": "Pending", "items": [{"price": 2, "quantity": 3}]})),
            order(json!({"_id": "o4", "status": "Canceled", "total": 1})),
        ];
        let summary = summarize_orders(&orders);

        assert_eq!(summary.order_count, 4);
        assert_eq!(summary.total_revenue, Decimal::new(32, 0));
        assert_eq!(summary.count(OrderStatus::Delivered), 2);
        assert_eq!(summary.count(OrderStatus::Pending), 1);
        assert_eq!(summary.count(OrderStatus::Cancelled), 1);
        assert_eq!(summary.count(OrderStatus::Shipped), 0);
    }

    #[test]
    fn test_empty_order_page() {
        let summary = summarize_orders(&[]);
        assert_eq!(summary.order_count, 0);
        assert_eq!(summary.total_revenue, Decimal::ZERO);
        assert_eq!(summary.currency, CurrencyCode::USD);
    }
}
