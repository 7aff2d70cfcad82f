//! Order history commands.

use cartsync_core::OrderStatus;
use cartsync_engine::{OrderScope, OrdersView, SummarySource, order_total};
use tracing::{info, warn};

use super::{CommandError, Context};

/// List the caller's orders.
///
/// # Errors
///
/// Returns an error if the listing fails.
pub async fn list(ctx: &Context, page: u32, limit: u32) -> Result<(), CommandError> {
    let view = ctx.orders.list(&ctx.identity, page, limit).await?;
    report(&view);
    Ok(())
}

/// Print order count and total spent.
///
/// # Errors
///
/// Returns an error if the listing fails and no complete server summary is
/// available.
pub async fn summary(ctx: &Context) -> Result<(), CommandError> {
    let summary = ctx.orders.summary(&ctx.identity).await?;
    let source = match summary.source {
        SummarySource::PageEstimate => "recomputed from recent orders",
        SummarySource::Server => "server (order listing unavailable)",
    };
    if summary.server_mismatch {
        warn!("Server summary disagrees with your order history");
    }
    info!(
        orders = summary.total_orders,
        spent = %summary.total_spent.round_dp(2),
        source,
        "Order history"
    );
    Ok(())
}

/// List every customer's orders.
///
/// # Errors
///
/// Returns an error for anonymous callers or if both listings fail.
pub async fn admin(ctx: &Context, page: u32, limit: u32) -> Result<(), CommandError> {
    let view = ctx.orders.admin_all(&ctx.identity, page, limit).await?;
    if view.scope == OrderScope::Personal {
        info!("Admin listing unavailable, showing your own orders");
    }
    report(&view);
    Ok(())
}

fn report(view: &OrdersView) {
    if view.page.orders.is_empty() {
        info!("No orders found");
        return;
    }

    for order in &view.page.orders {
        info!(
            order_id = %order.id,
            status = %order.status,
            items = order.items.len(),
            "{}",
            view.summary.format(order_total(order))
        );
    }

    let summary = &view.summary;
    info!(
        page = view.page.page,
        total_pages = ?view.page.total_pages,
        orders = summary.order_count,
        revenue = %summary.format(summary.total_revenue),
        "Page summary (this page only)"
    );
    for status in OrderStatus::KNOWN {
        let count = summary.count(status);
        if count > 0 {
            info!(status = %status, count, "By status");
        }
    }
}
