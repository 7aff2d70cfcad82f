//! In-memory cart state and the read-only snapshots handed to consumers.

use std::collections::BTreeMap;

use cartsync_core::{LineId, ProductId, Quantity};
use rust_decimal::Decimal;

use crate::normalize::NormalizedCartLine;
use crate::summary::{CartSummary, summarize};

/// Synchronization state of one cart line.
///
/// `Confirmed -> Pending -> Confirmed | RolledBack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineSync {
    /// Local quantity matches the last server response.
    #[default]
    Confirmed,
    /// An update is in flight; the local quantity shows `requested`.
    Pending {
        confirmed: Quantity,
        requested: Quantity,
    },
    /// The last update failed and the quantity was restored.
    RolledBack { restored: Quantity },
}

/// Engine-owned cart state.
#[derive(Debug, Default)]
pub(crate) struct CartState {
    lines: Vec<NormalizedCartLine>,
    discount: Decimal,
    /// Lines not in `Confirmed` state.
    sync: BTreeMap<LineId, LineSync>,
    loaded: bool,
    stale: bool,
}

impl CartState {
    pub(crate) const fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub(crate) fn line(&self, id: &LineId) -> Option<&NormalizedCartLine> {
        self.lines.iter().find(|l| &l.id == id)
    }

    /// Quantity already in the cart for a product.
    pub(crate) fn quantity_of(&self, product: &ProductId) -> Option<(u32, Option<u32>)> {
        let matching: Vec<_> = self.lines.iter().filter(|l| &l.product.id == product).collect();
        let first = matching.first()?;
        let quantity = matching.iter().map(|l| l.quantity.get()).sum();
        Some((quantity, first.product.stock))
    }

    /// Adopt a freshly normalized cart.
    ///
    /// Lines with an update still in flight keep showing their requested
    /// quantity, with the server's quantity as the new confirmed value. Every
    /// other line, including `settled` (the line whose update this fetch
    /// follows), becomes confirmed.
    pub(crate) fn replace(
        &mut self,
        mut lines: Vec<NormalizedCartLine>,
        discount: Decimal,
        settled: Option<&LineId>,
    ) {
        let mut sync = BTreeMap::new();
        for line in &mut lines {
            if Some(&line.id) == settled {
                continue;
            }
            if let Some(LineSync::Pending { requested, .. }) = self.sync.get(&line.id) {
                sync.insert(
                    line.id.clone(),
                    LineSync::Pending {
                        confirmed: line.quantity,
                        requested: *requested,
                    },
                );
                line.quantity = *requested;
            }
        }

        self.lines = lines;
        self.discount = discount;
        self.sync = sync;
        self.loaded = true;
        self.stale = false;
    }

    /// Drop every line after a successful clear.
    pub(crate) fn clear(&mut self) {
        self.replace(Vec::new(), Decimal::ZERO, None);
    }

    /// Forget the local cart after a failed read; the server is unchanged.
    pub(crate) fn reset_stale(&mut self) {
        self.lines.clear();
        self.discount = Decimal::ZERO;
        self.sync.clear();
        self.stale = true;
    }

    /// Forget everything, as on an identity switch.
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) const fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Show `requested` locally and return the quantity to restore on failure.
    pub(crate) fn begin_update(&mut self, id: &LineId, requested: Quantity) -> Option<Quantity> {
        let line = self.lines.iter_mut().find(|l| &l.id == id)?;
        let confirmed = match self.sync.get(id) {
            Some(LineSync::Pending { confirmed, .. }) => *confirmed,
            _ => line.quantity,
        };
        line.quantity = requested;
        self.sync.insert(
            id.clone(),
            LineSync::Pending {
                confirmed,
                requested,
            },
        );
        Some(confirmed)
    }

    /// Restore the last known-good quantity after a failed update.
    ///
    /// Prefers the confirmed quantity of a pending entry, which a refetch
    /// during the update may have moved past `fallback`.
    pub(crate) fn rollback(&mut self, id: &LineId, fallback: Quantity) -> Option<Quantity> {
        let restored = match self.sync.get(id) {
            Some(LineSync::Pending { confirmed, .. }) => *confirmed,
            _ => fallback,
        };
        let line = self.lines.iter_mut().find(|l| &l.id == id)?;
        line.quantity = restored;
        self.sync.insert(id.clone(), LineSync::RolledBack { restored });
        Some(restored)
    }

    /// Accept the optimistic quantity without a confirming refetch.
    pub(crate) fn confirm(&mut self, id: &LineId) {
        self.sync.remove(id);
    }

    pub(crate) fn snapshot(&self, tax_rate: Decimal) -> CartSnapshot {
        CartSnapshot {
            summary: summarize(&self.lines, self.discount, tax_rate),
            lines: self.lines.clone(),
            discount: self.discount,
            line_sync: self.sync.clone(),
            loaded: self.loaded,
            stale: self.stale,
        }
    }
}

/// Read-only view of the cart at one point in time.
#[derive(Debug, Clone, Default)]
pub struct CartSnapshot {
    pub lines: Vec<NormalizedCartLine>,
    /// `None` for an empty cart.
    pub summary: Option<CartSummary>,
    /// Discount amount reported by the server.
    pub discount: Decimal,
    /// Lines whose state is not [`LineSync::Confirmed`].
    pub line_sync: BTreeMap<LineId, LineSync>,
    /// Whether the cart has been fetched at least once.
    pub loaded: bool,
    /// Set when local state may differ from the server.
    pub stale: bool,
}

impl CartSnapshot {
    /// Sync state of a line.
    #[must_use]
    pub fn sync(&self, id: &LineId) -> LineSync {
        self.line_sync.get(id).copied().unwrap_or_default()
    }

    /// Look up a line by id.
    #[must_use]
    pub fn line(&self, id: &LineId) -> Option<&NormalizedCartLine> {
        self.lines.iter().find(|l| &l.id == id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cartsync_core::CurrencyCode;

    use super::*;
    use crate::api::Product;
    use crate::summary::DEFAULT_TAX_RATE;

    fn line(id: &str, quantity: i64) -> NormalizedCartLine {
        NormalizedCartLine {
            id: LineId::new(id),
            product: Product {
                id: ProductId::new("p1"),
                name: "Tee".into(),
                brand: None,
                price: Decimal::new(10, 0),
                stock: Some(5),
                images: vec![],
                currency: CurrencyCode::USD,
            },
            quantity: Quantity::new(quantity).unwrap(),
            unit_price: Decimal::new(10, 0),
            notes: None,
            added_at: None,
            updated_at: None,
        }
    }

    fn q(n: i64) -> Quantity {
        Quantity::new(n).unwrap()
    }

    #[test]
    fn test_update_then_rollback() {
        let mut state = CartState::default();
        state.replace(vec![line("l1", 2)], Decimal::ZERO, None);
        let id = LineId::new("l1");

        let restore = state.begin_update(&id, q(4)).unwrap();
        assert_eq!(restore, q(2));
        assert_eq!(state.line(&id).unwrap().quantity, q(4));
        assert_eq!(
            state.snapshot(DEFAULT_TAX_RATE).sync(&id),
            LineSync::Pending {
                confirmed: q(2),
                requested: q(4)
            }
        );

        assert_eq!(state.rollback(&id, restore), Some(q(2)));
        let snapshot = state.snapshot(DEFAULT_TAX_RATE);
        assert_eq!(snapshot.line(&id).unwrap().quantity, q(2));
        assert_eq!(snapshot.sync(&id), LineSync::RolledBack { restored: q(2) });
    }

    #[test]
    fn test_replace_confirms_settled_line() {
        let mut state = CartState::default();
        state.replace(vec![line("l1", 2)], Decimal::ZERO, None);
        let id = LineId::new("l1");
        state.begin_update(&id, q(3));

        state.replace(vec![line("l1", 3)], Decimal::ZERO, Some(&id));
        let snapshot = state.snapshot(DEFAULT_TAX_RATE);
        assert!(snapshot.line_sync.is_empty());
        assert_eq!(snapshot.summary.unwrap().total_items, 3);
    }

    #[test]
    fn test_replace_keeps_other_pending_lines() {
        let mut state = CartState::default();
        state.replace(vec![line("l1", 1), line("l2", 2)], Decimal::ZERO, None);
        let (l1, l2) = (LineId::new("l1"), LineId::new("l2"));
        state.begin_update(&l2, q(5));
        state.rollback(&l1, q(1));

        // Refetch after l1 was removed elsewhere; l2's update is still out.
        state.replace(vec![line("l2", 2)], Decimal::ZERO, None);

        let snapshot = state.snapshot(DEFAULT_TAX_RATE);
        assert_eq!(snapshot.lines.len(), 1);
        assert_eq!(snapshot.line(&l2).unwrap().quantity, q(5));
        assert_eq!(
            snapshot.sync(&l2),
            LineSync::Pending {
                confirmed: q(2),
                requested: q(5)
            }
        );
        assert_eq!(snapshot.sync(&l1), LineSync::Confirmed);
        assert_eq!(snapshot.line_sync.len(), 1);

        // A failure now restores the quantity the server last reported.
        assert_eq!(state.rollback(&l2, q(9)), Some(q(2)));
        assert_eq!(state.line(&l2).unwrap().quantity, q(2));
    }

    #[test]
    fn test_begin_update_unknown_line() {
        let mut state = CartState::default();
        assert!(state.begin_update(&LineId::new("missing"), q(1)).is_none());
    }

    #[test]
    fn test_quantity_of_product() {
        let mut state = CartState::default();
        state.replace(vec![line("l1", 2), line("l2", 1)], Decimal::ZERO, None);
        assert_eq!(state.quantity_of(&ProductId::new("p1")), Some((3, Some(5))));
        assert_eq!(state.quantity_of(&ProductId::new("p2")), None);
    }

    #[test]
    fn test_reset_stale_empties_cart() {
        let mut state = CartState::default();
        state.replace(vec![line("l1", 2)], Decimal::new(5, 0), None);
        state.reset_stale();
        let snapshot = state.snapshot(DEFAULT_TAX_RATE);
        assert!(snapshot.is_empty());
        assert!(snapshot.summary.is_none());
        assert!(snapshot.stale);
    }
}
