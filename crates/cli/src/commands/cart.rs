//! Cart commands.
//!
//! Line mutations load the cart first so that updates are applied
//! optimistically and unknown line ids are caught without a request.

use cartsync_core::{LineId, ProductId};
use cartsync_engine::{CartSnapshot, LineSync, MutationOutcome};
use tracing::{info, warn};

use super::{CommandError, Context};

/// Print the current cart.
///
/// # Errors
///
/// Returns an error if the cart cannot be fetched.
pub async fn show(ctx: &Context) -> Result<(), CommandError> {
    let snapshot = ctx.engine.refresh(&ctx.identity).await?;
    report(&snapshot);
    Ok(())
}

/// Add a product and print the updated cart.
///
/// # Errors
///
/// Returns an error if the quantity is invalid or the add fails.
pub async fn add(
    ctx: &Context,
    product_id: &str,
    quantity: i64,
    notes: Option<&str>,
) -> Result<(), CommandError> {
    load_for_mutation(ctx).await;
    let outcome = ctx
        .engine
        .add(&ctx.identity, &ProductId::new(product_id), quantity, notes)
        .await?;
    finish(ctx, outcome, "Added to cart").await;
    Ok(())
}

/// Change a line's quantity and print the updated cart.
///
/// # Errors
///
/// Returns an error if the quantity is invalid, the line is unknown, or the
/// update fails.
pub async fn update(ctx: &Context, line_id: &str, quantity: i64) -> Result<(), CommandError> {
    load_for_mutation(ctx).await;
    let outcome = ctx
        .engine
        .update(&ctx.identity, &LineId::new(line_id), quantity)
        .await?;
    finish(ctx, outcome, "Quantity updated").await;
    Ok(())
}

/// Remove a line and print the updated cart.
///
/// # Errors
///
/// Returns an error if the line is unknown or the removal fails.
pub async fn remove(ctx: &Context, line_id: &str) -> Result<(), CommandError> {
    load_for_mutation(ctx).await;
    let outcome = ctx
        .engine
        .remove(&ctx.identity, &LineId::new(line_id))
        .await?;
    finish(ctx, outcome, "Item removed").await;
    Ok(())
}

/// Empty the cart.
///
/// # Errors
///
/// Returns an error if the clear request fails.
pub async fn clear(ctx: &Context) -> Result<(), CommandError> {
    let outcome = ctx.engine.clear(&ctx.identity).await?;
    finish(ctx, outcome, "Cart cleared").await;
    Ok(())
}

/// Load the cart before a mutation. A failed load is not fatal; the
/// mutation is still sent.
async fn load_for_mutation(ctx: &Context) {
    if let Err(e) = ctx.engine.refresh(&ctx.identity).await {
        warn!(error = %e, "Could not load cart before mutation");
    }
}

async fn finish(ctx: &Context, outcome: MutationOutcome, message: &str) {
    match outcome {
        MutationOutcome::Applied => info!("{message}"),
        MutationOutcome::AlreadyInFlight => info!("Another change is still in progress"),
    }
    report(&ctx.engine.snapshot().await);
}

fn report(snapshot: &CartSnapshot) {
    let Some(summary) = &snapshot.summary else {
        info!("Your cart is empty");
        return;
    };

    for line in &snapshot.lines {
        let state = match snapshot.sync(&line.id) {
            LineSync::Confirmed => "",
            LineSync::Pending { .. } => " (saving)",
            LineSync::RolledBack { .. } => " (change reverted)",
        };
        info!(
            line_id = %line.id,
            product_id = %line.product.id,
            "{} x{} @ {} = {}{state}",
            line.product.name,
            line.quantity,
            summary.format(line.unit_price),
            summary.format(line.line_total()),
        );
    }

    info!(
        items = summary.total_items,
        subtotal = %summary.format(summary.subtotal),
        tax = %summary.format(summary.tax),
        shipping = %summary.format(summary.shipping),
        discount = %summary.format(summary.discount),
        "Total {}",
        summary.format(summary.total)
    );
    if summary.mixed_currency {
        warn!(currency = %summary.currency, "Cart mixes currencies; totals use the first line's currency");
    }
    if snapshot.stale {
        warn!("Cart may be out of date; run `cartsync cart show` to reload");
    }
}
