//! # Movement Ledger
//!
//! Queries over the append-only stock ledger, plus reconciliation.
//!
//! `Ingredient::quantity` is denormalized state. Replaying an ingredient's
//! movements in ledger order from zero must land on exactly that value;
//! [`MovementLedger::reconcile`] checks this for every ingredient.

use crate::storage::{StoreRead, StoreTxn};
use crate::{
    BrewlineError, IngredientId, MovementDraft, MovementId, MovementKind, MovementRecord, OrderId,
    Quantity,
};
use serde::{Deserialize, Serialize};

/// Read and append helpers for stock movements.
pub struct MovementLedger;

impl MovementLedger {
    /// Usage rows of an order, one per deducted ingredient.
    pub fn usage_for_order<R: StoreRead + ?Sized>(
        store: &R,
        order: OrderId,
    ) -> Result<Vec<MovementRecord>, BrewlineError> {
        Ok(store
            .movements_for_order(order)?
            .into_iter()
            .filter(|m| m.kind == MovementKind::Usage)
            .collect())
    }

    /// Whether stock was already deducted for this order.
    pub fn has_usage<R: StoreRead + ?Sized>(
        store: &R,
        order: OrderId,
    ) -> Result<bool, BrewlineError> {
        Ok(store
            .movements_for_order(order)?
            .iter()
            .any(|m| m.kind == MovementKind::Usage))
    }

    /// Append a zero-amount annotation against an ingredient's current stock.
    pub fn note(
        txn: &mut dyn StoreTxn,
        ingredient: IngredientId,
        order: Option<OrderId>,
        notes: impl Into<String>,
    ) -> Result<MovementRecord, BrewlineError> {
        let current = txn
            .ingredient(ingredient)?
            .ok_or(BrewlineError::IngredientNotFound(ingredient))?
            .quantity;
        txn.append_movement(MovementDraft {
            ingredient_id: ingredient,
            kind: MovementKind::StatusNote,
            amount: Quantity::ZERO,
            quantity_before: current,
            quantity_after: current,
            order_id: order,
            notes: notes.into(),
        })
    }

    /// Replay every ingredient's movements and report disagreements.
    pub fn reconcile<R: StoreRead + ?Sized>(
        store: &R,
    ) -> Result<ReconciliationReport, BrewlineError> {
        let mut report = ReconciliationReport::default();
        for ingredient in store.ingredients()? {
            let movements = store.movements_for_ingredient(ingredient.id)?;
            report.ingredients_checked += 1;
            report.movements_checked += movements.len();

            let mut running = Quantity::ZERO;
            for movement in &movements {
                if movement.quantity_before != running {
                    report.discrepancies.push(Discrepancy::BrokenChain {
                        ingredient: ingredient.id,
                        movement: movement.id,
                        expected_before: running,
                        recorded_before: movement.quantity_before,
                    });
                }
                if !amount_matches(movement) {
                    report.discrepancies.push(Discrepancy::AmountMismatch {
                        ingredient: ingredient.id,
                        movement: movement.id,
                        kind: movement.kind,
                    });
                }
                running = movement.quantity_after;
            }

            if running != ingredient.quantity {
                report.discrepancies.push(Discrepancy::QuantityMismatch {
                    ingredient: ingredient.id,
                    replayed: running,
                    stored: ingredient.quantity,
                });
            }
        }

        if !report.is_consistent() {
            tracing::error!(
                discrepancies = report.discrepancies.len(),
                "stock ledger does not reconcile"
            );
        }
        Ok(report)
    }
}

/// Whether a row's `amount` agrees with its snapshots and kind.
fn amount_matches(movement: &MovementRecord) -> bool {
    let MovementRecord {
        kind,
        amount,
        quantity_before: before,
        quantity_after: after,
        ..
    } = *movement;
    match kind {
        MovementKind::Usage => before.checked_sub(amount) == Some(after),
        MovementKind::Restock => before.checked_add(amount) == Some(after),
        MovementKind::ManualAdjustment => before.distance(after) == amount,
        MovementKind::StatusNote => amount == Quantity::ZERO && before == after,
    }
}

/// One disagreement between the ledger and stored stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Discrepancy {
    /// A row's `quantity_before` is not the previous row's `quantity_after`.
    BrokenChain {
        ingredient: IngredientId,
        movement: MovementId,
        expected_before: Quantity,
        recorded_before: Quantity,
    },
    /// A row's `amount` contradicts its own before/after snapshot.
    AmountMismatch {
        ingredient: IngredientId,
        movement: MovementId,
        kind: MovementKind,
    },
    /// Replayed quantity differs from `Ingredient::quantity`.
    QuantityMismatch {
        ingredient: IngredientId,
        replayed: Quantity,
        stored: Quantity,
    },
}

/// Result of [`MovementLedger::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub ingredients_checked: usize,
    pub movements_checked: usize,
    pub discrepancies: Vec<Discrepancy>,
}

impl ReconciliationReport {
    /// True when stock and ledger agree everywhere.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::NewIngredient;
    use crate::stock::StockStore;
    use crate::storage::StorageBackend;

    const BEANS: IngredientId = IngredientId(2);

    fn seeded() -> StorageBackend {
        let store = StorageBackend::in_memory();
        store
            .write(|txn| {
                StockStore::register(
                    txn,
                    NewIngredient::new(BEANS, "Beans", "kg").with_quantity(Quantity::from_units(5)),
                )
            })
            .expect("seed");
        store
    }

    #[test]
    fn stock_writes_reconcile() {
        let store = seeded();
        store
            .write(|txn| {
                StockStore::restock(txn, BEANS, Quantity::from_units(1), None, "delivery")?;
                StockStore::adjust(txn, BEANS, Quantity::from_milli(5_800), "count")?;
                MovementLedger::note(txn, BEANS, None, "audit")
            })
            .expect("writes");

        let report = store.read(|r| MovementLedger::reconcile(r)).expect("reconcile");
        assert!(report.is_consistent(), "{:?}", report.discrepancies);
        assert_eq!(report.ingredients_checked, 1);
        assert_eq!(report.movements_checked, 4);
    }

    #[test]
    fn ledger_row_without_stock_write_is_reported() {
        let store = seeded();
        // Bypass the stock store: the ledger moves, the ingredient row does not.
        store
            .write(|txn| {
                txn.append_movement(MovementDraft {
                    ingredient_id: BEANS,
                    kind: MovementKind::Usage,
                    amount: Quantity::from_units(1),
                    quantity_before: Quantity::from_units(5),
                    quantity_after: Quantity::from_units(4),
                    order_id: Some(OrderId(9)),
                    notes: String::new(),
                })
            })
            .expect("append");

        let report = store.read(|r| MovementLedger::reconcile(r)).expect("reconcile");
        assert_eq!(
            report.discrepancies,
            vec![Discrepancy::QuantityMismatch {
                ingredient: BEANS,
                replayed: Quantity::from_units(4),
                stored: Quantity::from_units(5),
            }]
        );
    }

    #[test]
    fn amount_must_match_snapshots() {
        let store = seeded();
        store
            .write(|txn| {
                txn.append_movement(MovementDraft {
                    ingredient_id: BEANS,
                    kind: MovementKind::Restock,
                    amount: Quantity::from_units(2),
                    quantity_before: Quantity::from_units(5),
                    quantity_after: Quantity::from_units(5),
                    order_id: None,
                    notes: String::new(),
                })
            })
            .expect("append");

        let report = store.read(|r| MovementLedger::reconcile(r)).expect("reconcile");
        assert!(report.discrepancies.iter().any(|d| matches!(
            d,
            Discrepancy::AmountMismatch {
                kind: MovementKind::Restock,
                ..
            }
        )));
    }

    #[test]
    fn usage_rows_filtered_by_kind() {
        let store = seeded();
        store
            .write(|txn| MovementLedger::note(txn, BEANS, Some(OrderId(3)), "refund"))
            .expect("note");
        let usage = store
            .read(|r| MovementLedger::usage_for_order(r, OrderId(3)))
            .expect("read");
        assert!(usage.is_empty());
        assert!(!store.read(|r| MovementLedger::has_usage(r, OrderId(3))).expect("read"));
    }
}
