//! Order history against the fake commerce API.
//!
//! Run with: cargo test -p cartsync-integration-tests

#![allow(clippy::unwrap_used)]

use cartsync_core::OrderStatus;
use cartsync_engine::{ApiError, Identity, IdentityError, OrderScope, OrdersError, SummarySource};
use cartsync_integration_tests::{FakeCommerce, route};
use rust_decimal::Decimal;
use serde_json::{Value, json};

fn history() -> Vec<Value> {
    vec![
        json!({"_id": "o1", "status": "Delivered", "totalAmount": "40.00"}),
        json!({"_id": "o2", "status": "Shipped", "total": null, "subtotal": "15.00"}),
        json!({
            "_id": "o3", "status": "pending", "total": null, "subtotal": null,
            "items": [{"price": "3", "quantity": 2}, {"price": "4", "quantity": 1}]
        }),
        json!({"_id": "o4", "status": "Cancelled", "totalPrice": 5}),
    ]
}

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
async fn test_list_summarizes_page_with_total_fallback() {
    let api = FakeCommerce::start().await;
    api.set_orders(history());

    let view = api
        .orders()
        .list(&Identity::authenticated("cred-1"), 1, 10)
        .await
        .expect("listing should succeed");

    assert_eq!(view.scope, OrderScope::Personal);
    assert_eq!(view.page.orders.len(), 4);
    assert_eq!(view.page.total_pages, Some(1));
    assert_eq!(view.summary.order_count, 4);
    assert_eq!(view.summary.total_revenue, Decimal::new(70, 0));
    assert_eq!(view.summary.count(OrderStatus::Delivered), 1);
    assert_eq!(view.summary.count(OrderStatus::Pending), 1);
    assert_eq!(view.summary.count(OrderStatus::Processing), 0);
}

#[tokio::test]
async fn test_list_paginates() {
    let api = FakeCommerce::start().await;
    api.set_orders(history());

    let view = api
        .orders()
        .list(&Identity::authenticated("cred-1"), 2, 3)
        .await
        .expect("listing should succeed");

    assert_eq!(view.page.page, 2);
    assert_eq!(view.page.total_pages, Some(2));
    assert_eq!(view.page.total_count, Some(4));
    assert_eq!(view.page.orders.len(), 1);
    assert_eq!(view.summary.total_revenue, Decimal::new(5, 0));
}

// ============================================================================
// Summary
// ============================================================================

#[tokio::test]
async fn test_summary_recomputed_when_server_agrees() {
    let api = FakeCommerce::start().await;
    api.set_orders(history());
    api.set_order_summary(Some(json!({"totalOrders": 4, "totalSpent": "70.00"})));

    let summary = api
        .orders()
        .summary(&Identity::authenticated("cred-1"))
        .await
        .expect("summary should succeed");

    assert_eq!(summary.source, SummarySource::PageEstimate);
    assert_eq!(summary.total_orders, 4);
    assert_eq!(summary.total_spent, Decimal::new(70, 0));
    assert!(!summary.server_mismatch);
    assert_eq!(api.count(route::ORDERS), 1);
    assert_eq!(api.count(route::ORDER_SUMMARY), 1);
}

#[tokio::test]
async fn test_summary_flags_disagreeing_server_totals() {
    let api = FakeCommerce::start().await;
    api.set_orders(history());
    api.set_order_summary(Some(json!({"totalOrders": 12, "totalSpent": "480.25"})));

    let summary = api
        .orders()
        .summary(&Identity::authenticated("cred-1"))
        .await
        .expect("summary should succeed");

    assert_eq!(summary.source, SummarySource::PageEstimate);
    assert_eq!(summary.total_orders, 4);
    assert_eq!(summary.total_spent, Decimal::new(70, 0));
    assert!(summary.server_mismatch);
}

#[tokio::test]
async fn test_summary_mismatch_ignored_beyond_first_page() {
    let api = FakeCommerce::start().await;
    let mut orders = history();
    orders.extend(history().into_iter().cycle().take(8));
    api.set_orders(orders);
    api.set_order_summary(Some(json!({"totalOrders": 12, "totalSpent": "480.25"})));

    let summary = api
        .orders()
        .summary(&Identity::authenticated("cred-1"))
        .await
        .expect("summary should succeed");

    assert_eq!(summary.source, SummarySource::PageEstimate);
    assert_eq!(summary.total_orders, 12);
    assert!(!summary.server_mismatch);
}

#[tokio::test]
async fn test_server_summary_used_when_listing_fails() {
    let api = FakeCommerce::start().await;
    api.fail_order_listing(true);
    api.set_order_summary(Some(json!({"summary": {"totalOrders": 12, "totalSpent": "480.25"}})));

    let summary = api
        .orders()
        .summary(&Identity::authenticated("cred-1"))
        .await
        .expect("server summary should stand in");

    assert_eq!(summary.source, SummarySource::Server);
    assert_eq!(summary.total_orders, 12);
    assert_eq!(summary.total_spent, Decimal::new(48025, 2));
}

#[tokio::test]
async fn test_listing_failure_without_server_summary_is_an_error() {
    let api = FakeCommerce::start().await;
    api.fail_order_listing(true);
    api.set_order_summary(Some(json!({"totalOrders": 4})));

    let err = api
        .orders()
        .summary(&Identity::authenticated("cred-1"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OrdersError::Api(ApiError::Status { status: 503, .. })
    ));
    assert_eq!(err.user_message(), "Something went wrong, please try again");
}

#[tokio::test]
async fn test_incomplete_summary_is_recomputed() {
    let api = FakeCommerce::start().await;
    api.set_orders(history());
    api.set_order_summary(Some(json!({"totalOrders": 4})));

    let summary = api
        .orders()
        .summary(&Identity::authenticated("cred-1"))
        .await
        .expect("summary should succeed");

    assert_eq!(summary.source, SummarySource::PageEstimate);
    assert_eq!(summary.total_orders, 4);
    assert_eq!(summary.total_spent, Decimal::new(70, 0));
    assert!(!summary.server_mismatch);
    assert_eq!(api.count(route::ORDERS), 1);
}

#[tokio::test]
async fn test_missing_summary_endpoint_is_recomputed() {
    let api = FakeCommerce::start().await;
    api.set_orders(history());

    let summary = api
        .orders()
        .summary(&Identity::anonymous())
        .await
        .expect("summary should fall back to the listing");

    assert_eq!(summary.source, SummarySource::PageEstimate);
    assert_eq!(summary.total_spent, Decimal::new(70, 0));
    let listing = api.requests(route::ORDERS).pop().unwrap();
    assert!(listing.session.is_some());
    assert!(listing.authorization.is_none());
}

// ============================================================================
// Admin
// ============================================================================

#[tokio::test]
async fn test_admin_listing_when_allowed() {
    let api = FakeCommerce::start().await;
    api.set_orders(history());

    let view = api
        .orders()
        .admin_all(&Identity::authenticated("admin-cred"), 1, 10)
        .await
        .expect("admin listing should succeed");

    assert_eq!(view.scope, OrderScope::All);
    assert_eq!(api.count(route::ADMIN_ORDERS), 1);
    assert_eq!(api.count(route::ORDERS), 0);
}

#[tokio::test]
async fn test_admin_falls_back_to_own_orders() {
    let api = FakeCommerce::start().await;
    api.set_orders(history());
    api.forbid_admin(true);

    let view = api
        .orders()
        .admin_all(&Identity::authenticated("cred-1"), 1, 10)
        .await
        .expect("fallback listing should succeed");

    assert_eq!(view.scope, OrderScope::Personal);
    assert_eq!(view.page.orders.len(), 4);
    assert_eq!(api.count(route::ADMIN_ORDERS), 1);
    assert_eq!(api.count(route::ORDERS), 1);
}

#[tokio::test]
async fn test_admin_requires_authentication() {
    let api = FakeCommerce::start().await;

    let err = api
        .orders()
        .admin_all(&Identity::anonymous(), 1, 10)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OrdersError::Identity(IdentityError::AuthenticationRequired)
    ));
    assert_eq!(api.total_requests(), 0);
}
