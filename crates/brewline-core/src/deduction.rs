//! # Deduction Engine
//!
//! Applies one order's aggregated demand against stock, exactly once.
//!
//! `deduct` runs inside the caller's write transaction:
//!
//! 1. An existing `usage` movement for the order means the work is done:
//!    return [`Deduction::AlreadyApplied`].
//! 2. Demand is re-resolved from the current recipes.
//! 3. The order must still be `preparing`; a concurrent cancel wins.
//! 4. Every ingredient row is locked and checked. One shortfall aborts the
//!    whole order with `InsufficientStock`; nothing is written.
//! 5. All quantities are written and one `usage` movement per ingredient
//!    is appended.
//!
//! The caller's transaction commits or aborts the whole set.

use crate::fulfillment::FulfillmentValidator;
use crate::ledger::MovementLedger;
use crate::stock::StockStore;
use crate::storage::StoreTxn;
use crate::{BrewlineError, MovementRecord, OrderId, OrderStatus};

/// Outcome of a successful [`DeductionEngine::deduct`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deduction {
    /// Stock was consumed; one usage movement per ingredient.
    Applied(Vec<MovementRecord>),
    /// A previous call already consumed stock for this order.
    AlreadyApplied,
}

impl Deduction {
    /// Movements written by this call.
    #[must_use]
    pub fn movements(&self) -> &[MovementRecord] {
        match self {
            Self::Applied(movements) => movements,
            Self::AlreadyApplied => &[],
        }
    }
}

pub struct DeductionEngine;

impl DeductionEngine {
    pub fn deduct(txn: &mut dyn StoreTxn, order_id: OrderId) -> Result<Deduction, BrewlineError> {
        let order = txn
            .order(order_id)?
            .ok_or(BrewlineError::OrderNotFound(order_id))?;

        if MovementLedger::has_usage(&*txn, order_id)? {
            tracing::debug!(order_id = order_id.0, "deduction already applied");
            return Ok(Deduction::AlreadyApplied);
        }

        let demand = FulfillmentValidator::demand_for(&*txn, &order.line_items)?;

        if order.status != OrderStatus::Preparing {
            return Err(BrewlineError::NotEligible {
                order: order_id,
                status: order.status,
            });
        }

        // Lock and check everything before the first write.
        let mut plan = Vec::with_capacity(demand.len());
        for (ingredient_id, required) in demand {
            let ingredient = StockStore::lock(txn, ingredient_id)?;
            if required > ingredient.quantity {
                tracing::warn!(
                    order_id = order_id.0,
                    ingredient_id = ingredient_id.0,
                    required = required.milli(),
                    available = ingredient.quantity.milli(),
                    "deduction rejected: insufficient stock"
                );
                return Err(BrewlineError::InsufficientStock {
                    ingredient: ingredient_id,
                    required,
                    available: ingredient.quantity,
                });
            }
            plan.push((ingredient, required));
        }

        let mut movements = Vec::with_capacity(plan.len());
        for (ingredient, required) in plan {
            movements.push(StockStore::consume(txn, ingredient, required, order_id)?);
        }

        tracing::info!(
            order_id = order_id.0,
            ingredients = movements.len(),
            "stock deducted"
        );
        Ok(Deduction::Applied(movements))
    }
}
