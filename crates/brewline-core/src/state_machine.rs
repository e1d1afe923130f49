//! # Order State Machine
//!
//! Owns order status and decides when side effects fire:
//!
//! | transition               | side effect                               |
//! |--------------------------|-------------------------------------------|
//! | `preparing -> ready`     | stock deduction                           |
//! | `* -> completed`         | loyalty accrual, payment forced to `paid` |
//! | `preparing -> completed` | deduction, then loyalty accrual           |
//! | `* -> cancelled`         | restock of every deducted amount          |
//!
//! Every status write is a compare-and-set against the status read at the
//! start of the transaction, so two handlers racing on the same transition
//! cannot both fire its side effects. Side effects run in the same
//! transaction as the status write; a failed side effect blocks the
//! transition.

use crate::deduction::{Deduction, DeductionEngine};
use crate::ledger::MovementLedger;
use crate::loyalty::LoyaltyAccrual;
use crate::settings::LoyaltySettings;
use crate::stock::StockStore;
use crate::storage::{Sequence, StoreRead, StoreTxn};
use crate::{
    Actor, BrewlineError, IngredientId, LoyaltyLedgerEntry, Money, MovementRecord, NewOrder,
    Order, OrderId, OrderStatus, PaymentEvent, PaymentStatus, StatusChange,
};
use chrono::Utc;
use std::collections::BTreeSet;

// =============================================================================
// OUTCOMES
// =============================================================================

/// Result of a committed status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub order: Order,
    pub change: StatusChange,
    /// Set when the transition ran the deduction engine.
    pub deduction: Option<Deduction>,
    /// Compensating restocks written by a cancellation.
    pub restocked: Vec<MovementRecord>,
    /// Earn entry written by a completion.
    pub loyalty: Option<LoyaltyLedgerEntry>,
}

impl TransitionOutcome {
    /// Ingredients whose stock this transition changed.
    #[must_use]
    pub fn touched_ingredients(&self) -> Vec<IngredientId> {
        let deducted = self
            .deduction
            .iter()
            .flat_map(|d| d.movements().iter().map(|m| m.ingredient_id));
        let restocked = self.restocked.iter().map(|m| m.ingredient_id);
        deducted
            .chain(restocked)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Result of a committed payment event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOutcome {
    pub order: Order,
    /// Status moves caused by the event, in order.
    pub changes: Vec<StatusChange>,
    /// Zero-amount notes recording that a refund did not restock.
    pub notes: Vec<MovementRecord>,
    /// Loyalty reversal written by a refund.
    pub loyalty: Option<LoyaltyLedgerEntry>,
}

// =============================================================================
// STATE MACHINE
// =============================================================================

pub struct OrderStateMachine;

impl OrderStateMachine {
    /// Validate a checkout request against the catalog and price it.
    pub fn quote<R: StoreRead + ?Sized>(store: &R, new: &NewOrder) -> Result<Money, BrewlineError> {
        new.validate()?;
        if let Some(customer) = new.customer_id {
            if store.customer(customer)?.is_none() {
                return Err(BrewlineError::CustomerNotFound(customer));
            }
        }
        let mut total = Money::ZERO;
        for line in &new.line_items {
            let item = store
                .menu_item(line.menu_item_id)?
                .ok_or(BrewlineError::UnknownMenuItem(line.menu_item_id))?;
            if !item.is_available {
                return Err(BrewlineError::MenuItemUnavailable(item.id));
            }
            let line_total = item
                .price
                .checked_mul(line.quantity)
                .ok_or(BrewlineError::Overflow("line total"))?;
            total = total
                .checked_add(line_total)
                .ok_or(BrewlineError::Overflow("order total"))?;
        }
        Ok(total)
    }

    /// Insert an accepted order as `pending` / `unpaid`.
    pub fn accept(
        txn: &mut dyn StoreTxn,
        new: NewOrder,
        actor: Actor,
    ) -> Result<(Order, StatusChange), BrewlineError> {
        let total = Self::quote(&*txn, &new)?;
        let id = OrderId(txn.next_id(Sequence::Order)?);
        let now = Utc::now();
        let order = Order {
            id,
            customer_id: new.customer_id,
            line_items: new.line_items,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            total,
            notes: new.notes,
            created_at: now,
            updated_at: now,
        };
        txn.insert_order(&order)?;
        let change =
            txn.append_status_change(StatusChange::new(id, None, OrderStatus::Pending, actor))?;
        tracing::info!(order_id = id.0, total_cents = total.cents(), "order accepted");
        Ok((order, change))
    }

    /// Move an order to `to`, running that transition's side effects.
    ///
    /// With `expected` set, the order must still be in that status.
    pub fn transition(
        txn: &mut dyn StoreTxn,
        order_id: OrderId,
        expected: Option<OrderStatus>,
        to: OrderStatus,
        actor: Actor,
        loyalty: LoyaltySettings,
    ) -> Result<TransitionOutcome, BrewlineError> {
        let order = load(&*txn, order_id)?;
        let from = order.status;
        if let Some(expected) = expected {
            if from != expected {
                return Err(BrewlineError::StatusConflict {
                    order: order_id,
                    expected,
                    actual: from,
                });
            }
        }
        if !from.can_transition_to(to) {
            tracing::warn!(order_id = order_id.0, %from, %to, %actor, "transition rejected");
            return Err(BrewlineError::InvalidTransition {
                order: order_id,
                from,
                to,
            });
        }
        if to == OrderStatus::Preparing && order.payment_status != PaymentStatus::Paid {
            tracing::warn!(
                order_id = order_id.0,
                payment_status = %order.payment_status,
                "preparing rejected: payment not verified"
            );
            return Err(BrewlineError::PaymentNotVerified {
                order: order_id,
                status: order.payment_status,
            });
        }

        let mut updated = order;
        updated.status = to;
        updated.updated_at = Utc::now();

        let mut deduction = None;
        let mut restocked = Vec::new();
        let mut earned = None;
        match to {
            OrderStatus::Ready => {
                deduction = Some(DeductionEngine::deduct(txn, order_id)?);
            }
            OrderStatus::Completed => {
                if from == OrderStatus::Preparing {
                    deduction = Some(DeductionEngine::deduct(txn, order_id)?);
                }
                if !matches!(
                    updated.payment_status,
                    PaymentStatus::Paid | PaymentStatus::Refunded
                ) {
                    updated.payment_status = PaymentStatus::Paid;
                }
                earned = LoyaltyAccrual::accrue(txn, &updated, loyalty)?;
            }
            OrderStatus::Cancelled => {
                restocked = Self::compensate(txn, order_id)?;
            }
            OrderStatus::Pending | OrderStatus::PendingVerification | OrderStatus::Preparing => {}
        }

        txn.compare_and_set_order(from, &updated)?;
        let change = txn.append_status_change(StatusChange::new(order_id, Some(from), to, actor))?;

        tracing::info!(order_id = order_id.0, %from, %to, %actor, "order transitioned");
        Ok(TransitionOutcome {
            order: updated,
            change,
            deduction,
            restocked,
            loyalty: earned,
        })
    }

    /// Return every deducted amount to stock, once per (order, ingredient).
    ///
    /// Amounts come from the usage rows, never from the current recipe.
    pub fn compensate(
        txn: &mut dyn StoreTxn,
        order_id: OrderId,
    ) -> Result<Vec<MovementRecord>, BrewlineError> {
        let mut restocked = Vec::new();
        for usage in MovementLedger::usage_for_order(&*txn, order_id)? {
            if txn
                .restock_record(order_id, usage.ingredient_id)?
                .is_some()
            {
                continue;
            }
            restocked.push(StockStore::restock(
                txn,
                usage.ingredient_id,
                usage.amount,
                Some(order_id),
                format!("order {} cancelled", order_id),
            )?);
        }
        if !restocked.is_empty() {
            tracing::info!(
                order_id = order_id.0,
                ingredients = restocked.len(),
                "deducted stock returned"
            );
        }
        Ok(restocked)
    }

    /// Apply an external payment action.
    ///
    /// `submitted` moves a pending order to `pending_verification`;
    /// `verified` moves it on to `preparing`. A refund only changes the
    /// payment status: stock is not returned, and each usage row gets a
    /// zero-amount note saying so.
    pub fn apply_payment(
        txn: &mut dyn StoreTxn,
        order_id: OrderId,
        event: PaymentEvent,
        actor: Actor,
    ) -> Result<PaymentOutcome, BrewlineError> {
        let order = load(&*txn, order_id)?;
        let from = order.status;
        let rejected = BrewlineError::InvalidPaymentTransition {
            order: order_id,
            status: order.payment_status,
            event,
        };
        let collecting = matches!(event, PaymentEvent::Submitted | PaymentEvent::Verified);
        if collecting && from == OrderStatus::Cancelled {
            return Err(rejected);
        }
        let Some(next) = event.apply(order.payment_status) else {
            tracing::warn!(order_id = order_id.0, %event, status = %order.payment_status, "payment event rejected");
            return Err(rejected);
        };

        let path: &[OrderStatus] = match (event, from) {
            (PaymentEvent::Submitted, OrderStatus::Pending) => &[OrderStatus::PendingVerification],
            (PaymentEvent::Verified, OrderStatus::Pending) => {
                &[OrderStatus::PendingVerification, OrderStatus::Preparing]
            }
            (PaymentEvent::Verified, OrderStatus::PendingVerification) => &[OrderStatus::Preparing],
            _ => &[],
        };

        let mut updated = order;
        updated.payment_status = next;
        updated.updated_at = Utc::now();
        if let Some(last) = path.last() {
            updated.status = *last;
        }

        let mut notes = Vec::new();
        let mut loyalty = None;
        if event == PaymentEvent::Refunded {
            for usage in MovementLedger::usage_for_order(&*txn, order_id)? {
                notes.push(MovementLedger::note(
                    txn,
                    usage.ingredient_id,
                    Some(order_id),
                    format!(
                        "payment refunded; {} consumed by usage {} not restocked",
                        usage.amount, usage.id.0
                    ),
                )?);
            }
            loyalty = LoyaltyAccrual::reverse(txn, order_id)?;
        }

        txn.compare_and_set_order(from, &updated)?;
        let mut changes = Vec::with_capacity(path.len());
        let mut previous = from;
        for &to in path {
            changes.push(txn.append_status_change(StatusChange::new(
                order_id,
                Some(previous),
                to,
                actor,
            ))?);
            previous = to;
        }

        tracing::info!(
            order_id = order_id.0,
            %event,
            payment_status = %next,
            status = %updated.status,
            "payment recorded"
        );
        Ok(PaymentOutcome {
            order: updated,
            changes,
            notes,
            loyalty,
        })
    }
}

fn load<R: StoreRead + ?Sized>(store: &R, id: OrderId) -> Result<Order, BrewlineError> {
    store.order(id)?.ok_or(BrewlineError::OrderNotFound(id))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::storage::StorageBackend;
    use crate::{Customer, CustomerId, LineItem, MenuItem, MenuItemId, NewIngredient, Quantity, RecipeRequirement};

    const MILK: IngredientId = IngredientId(1);
    const LATTE: MenuItemId = MenuItemId(1);
    const ALICE: CustomerId = CustomerId(1);

    fn seeded() -> StorageBackend {
        let store = StorageBackend::in_memory();
        store
            .write(|txn| {
                StockStore::register(
                    txn,
                    NewIngredient::new(MILK, "Milk", "l").with_quantity(Quantity::from_units(10)),
                )?;
                txn.put_menu_item(&MenuItem {
                    id: LATTE,
                    name: "Latte".to_string(),
                    price: Money::from_cents(450),
                    is_available: true,
                })?;
                txn.put_recipe(
                    LATTE,
                    &[RecipeRequirement {
                        menu_item_id: LATTE,
                        ingredient_id: MILK,
                        required_amount: Quantity::from_milli(200),
                        is_optional: false,
                    }],
                )?;
                txn.put_customer(&Customer::new(ALICE, "Alice"))
            })
            .expect("seed");
        store
    }

    fn place(store: &StorageBackend, lattes: u32) -> OrderId {
        let new = NewOrder::new(vec![LineItem::new(LATTE, lattes)]).for_customer(ALICE);
        store
            .write(|txn| OrderStateMachine::accept(txn, new, Actor::Customer))
            .expect("accept")
            .0
            .id
    }

    fn step(store: &StorageBackend, id: OrderId, to: OrderStatus) -> Result<TransitionOutcome, BrewlineError> {
        store.write(|txn| {
            OrderStateMachine::transition(txn, id, None, to, Actor::Staff, LoyaltySettings::default())
        })
    }

    fn pay(store: &StorageBackend, id: OrderId, event: PaymentEvent) -> Result<PaymentOutcome, BrewlineError> {
        store.write(|txn| OrderStateMachine::apply_payment(txn, id, event, Actor::Admin))
    }

    fn milk(store: &StorageBackend) -> Quantity {
        store.read(|r| r.ingredient(MILK)).expect("read").unwrap().quantity
    }

    #[test]
    fn accepted_order_is_pending_and_priced() {
        let store = seeded();
        let id = place(&store, 3);
        let order = store.read(|r| r.order(id)).expect("read").unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Unpaid);
        assert_eq!(order.total, Money::from_cents(1_350));

        let history = store.read(|r| r.status_history(id)).expect("read");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from, None);
    }

    #[test]
    fn verification_walks_order_to_preparing() {
        let store = seeded();
        let id = place(&store, 1);
        let outcome = pay(&store, id, PaymentEvent::Verified).expect("verify");
        assert_eq!(outcome.order.status, OrderStatus::Preparing);
        assert_eq!(outcome.order.payment_status, PaymentStatus::Paid);
        let path: Vec<_> = outcome.changes.iter().map(|c| c.to).collect();
        assert_eq!(path, vec![OrderStatus::PendingVerification, OrderStatus::Preparing]);
    }

    #[test]
    fn skipping_states_is_rejected() {
        let store = seeded();
        let id = place(&store, 1);
        let result = step(&store, id, OrderStatus::Ready);
        assert!(matches!(result, Err(BrewlineError::InvalidTransition { .. })));
        assert_eq!(milk(&store), Quantity::from_units(10));
    }

    #[test]
    fn preparing_requires_verified_payment() {
        let store = seeded();
        let id = place(&store, 1);
        pay(&store, id, PaymentEvent::Submitted).expect("submit");

        let result = step(&store, id, OrderStatus::Preparing);
        assert!(matches!(
            result,
            Err(BrewlineError::PaymentNotVerified {
                status: PaymentStatus::AwaitingVerification,
                ..
            })
        ));
        let order = store.read(|r| r.order(id)).expect("read").unwrap();
        assert_eq!(order.status, OrderStatus::PendingVerification);
        assert!(matches!(
            step(&store, id, OrderStatus::Ready),
            Err(BrewlineError::InvalidTransition { .. })
        ));
        assert_eq!(milk(&store), Quantity::from_units(10));
    }

    #[test]
    fn stale_expected_status_conflicts() {
        let store = seeded();
        let id = place(&store, 1);
        pay(&store, id, PaymentEvent::Submitted).expect("submit");
        let result = store.write(|txn| {
            OrderStateMachine::transition(
                txn,
                id,
                Some(OrderStatus::Pending),
                OrderStatus::Cancelled,
                Actor::Staff,
                LoyaltySettings::default(),
            )
        });
        assert!(matches!(result, Err(BrewlineError::StatusConflict { .. })));
    }

    #[test]
    fn completion_from_preparing_deducts_then_credits() {
        let store = seeded();
        let id = place(&store, 2);
        pay(&store, id, PaymentEvent::Verified).expect("verify");
        let outcome = step(&store, id, OrderStatus::Completed).expect("complete");
        assert!(matches!(outcome.deduction, Some(Deduction::Applied(_))));
        assert_eq!(outcome.loyalty.map(|e| e.points_delta), Some(9));
        assert_eq!(milk(&store), Quantity::from_milli(9_600));
    }

    #[test]
    fn cancel_restocks_exact_usage_once() {
        let store = seeded();
        let id = place(&store, 2);
        pay(&store, id, PaymentEvent::Verified).expect("verify");
        step(&store, id, OrderStatus::Ready).expect("ready");

        // Recipe changes after deduction must not change the restock.
        store
            .write(|txn| {
                txn.put_recipe(
                    LATTE,
                    &[RecipeRequirement {
                        menu_item_id: LATTE,
                        ingredient_id: MILK,
                        required_amount: Quantity::from_milli(350),
                        is_optional: false,
                    }],
                )
            })
            .expect("recipe change");

        let outcome = step(&store, id, OrderStatus::Cancelled).expect("cancel");
        assert_eq!(outcome.restocked.len(), 1);
        assert_eq!(outcome.restocked[0].amount, Quantity::from_milli(400));
        assert_eq!(milk(&store), Quantity::from_units(10));

        let again = step(&store, id, OrderStatus::Cancelled);
        assert!(matches!(again, Err(BrewlineError::InvalidTransition { .. })));
        assert_eq!(milk(&store), Quantity::from_units(10));
    }

    #[test]
    fn refund_notes_usage_without_restock() {
        let store = seeded();
        let id = place(&store, 1);
        pay(&store, id, PaymentEvent::Verified).expect("verify");
        step(&store, id, OrderStatus::Ready).expect("ready");
        step(&store, id, OrderStatus::Completed).expect("complete");

        let outcome = pay(&store, id, PaymentEvent::Refunded).expect("refund");
        assert_eq!(outcome.order.payment_status, PaymentStatus::Refunded);
        assert_eq!(outcome.notes.len(), 1);
        assert_eq!(outcome.notes[0].amount, Quantity::ZERO);
        assert_eq!(milk(&store), Quantity::from_milli(9_800));

        let again = pay(&store, id, PaymentEvent::Refunded);
        assert!(matches!(again, Err(BrewlineError::InvalidPaymentTransition { .. })));
    }
}
