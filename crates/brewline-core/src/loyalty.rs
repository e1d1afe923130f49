//! # Loyalty Accrual
//!
//! Points are credited once per order, on entry into `completed`.
//! Every balance change and its ledger entry are written in the same
//! transaction, so the balance always equals the sum of the ledger.

use crate::primitives::POINTS_DIVISOR;
use crate::settings::LoyaltySettings;
use crate::storage::StoreTxn;
use crate::{
    BrewlineError, Customer, CustomerId, LoyaltyDraft, LoyaltyKind, LoyaltyLedgerEntry, Money,
    Order, OrderId, PaymentStatus,
};

/// Points earned for an order total: `floor(cents * rate / 100_000)`.
pub fn points_for(total: Money, points_per_unit_milli: u64) -> Result<u64, BrewlineError> {
    let raw = u128::from(total.cents()) * u128::from(points_per_unit_milli) / POINTS_DIVISOR;
    u64::try_from(raw).map_err(|_| BrewlineError::Overflow("loyalty points"))
}

fn signed(points: u64) -> Result<i64, BrewlineError> {
    i64::try_from(points).map_err(|_| BrewlineError::Overflow("loyalty points"))
}

fn load_customer(txn: &mut dyn StoreTxn, id: CustomerId) -> Result<Customer, BrewlineError> {
    txn.customer(id)?.ok_or(BrewlineError::CustomerNotFound(id))
}

pub struct LoyaltyAccrual;

impl LoyaltyAccrual {
    /// Credit points for a completed order.
    ///
    /// Returns `None` when the program is disabled, the order has no
    /// customer or was refunded, the total earns zero points, or points were
    /// already credited for this order.
    pub fn accrue(
        txn: &mut dyn StoreTxn,
        order: &Order,
        settings: LoyaltySettings,
    ) -> Result<Option<LoyaltyLedgerEntry>, BrewlineError> {
        let Some(customer_id) = order.customer_id else {
            return Ok(None);
        };
        if !settings.enabled {
            return Ok(None);
        }
        if order.payment_status == PaymentStatus::Refunded
            || txn
                .loyalty_entry_for_order(order.id, LoyaltyKind::Refund)?
                .is_some()
        {
            tracing::debug!(order_id = order.id.0, "payment refunded, no points credited");
            return Ok(None);
        }
        if txn
            .loyalty_entry_for_order(order.id, LoyaltyKind::Earn)?
            .is_some()
        {
            tracing::debug!(order_id = order.id.0, "loyalty already credited");
            return Ok(None);
        }

        let points = points_for(order.total, settings.points_per_unit_milli)?;
        if points == 0 {
            return Ok(None);
        }

        let mut customer = load_customer(txn, customer_id)?;
        customer.points_balance = customer
            .points_balance
            .checked_add(points)
            .ok_or(BrewlineError::Overflow("loyalty balance"))?;
        txn.put_customer(&customer)?;
        let entry = txn.append_loyalty(LoyaltyDraft {
            customer_id,
            order_id: Some(order.id),
            points_delta: signed(points)?,
            kind: LoyaltyKind::Earn,
            notes: format!("order {} completed", order.id),
        })?;

        tracing::info!(
            order_id = order.id.0,
            customer_id = customer_id.0,
            points,
            "loyalty points credited"
        );
        Ok(Some(entry))
    }

    /// Reverse the points an order earned, after its payment was refunded.
    ///
    /// The reversal is clamped to the customer's current balance, since
    /// some of the points may already have been redeemed.
    pub fn reverse(
        txn: &mut dyn StoreTxn,
        order: OrderId,
    ) -> Result<Option<LoyaltyLedgerEntry>, BrewlineError> {
        let Some(earned) = txn.loyalty_entry_for_order(order, LoyaltyKind::Earn)? else {
            return Ok(None);
        };
        if txn
            .loyalty_entry_for_order(order, LoyaltyKind::Refund)?
            .is_some()
        {
            return Ok(None);
        }

        let mut customer = load_customer(txn, earned.customer_id)?;
        let reversed = earned.points_delta.unsigned_abs().min(customer.points_balance);
        customer.points_balance -= reversed;
        txn.put_customer(&customer)?;
        let entry = txn.append_loyalty(LoyaltyDraft {
            customer_id: customer.id,
            order_id: Some(order),
            points_delta: -signed(reversed)?,
            kind: LoyaltyKind::Refund,
            notes: format!("payment for order {} refunded", order),
        })?;

        tracing::info!(
            order_id = order.0,
            customer_id = customer.id.0,
            points = reversed,
            "loyalty points reversed"
        );
        Ok(Some(entry))
    }

    /// Spend points, optionally against an order.
    pub fn redeem(
        txn: &mut dyn StoreTxn,
        customer_id: CustomerId,
        points: u64,
        order: Option<OrderId>,
    ) -> Result<LoyaltyLedgerEntry, BrewlineError> {
        if points == 0 {
            return Err(BrewlineError::InvalidInput(
                "redeemed points must be positive".to_string(),
            ));
        }
        let mut customer = load_customer(txn, customer_id)?;
        if customer.points_balance < points {
            return Err(BrewlineError::InsufficientPoints {
                customer: customer_id,
                requested: points,
                balance: customer.points_balance,
            });
        }
        customer.points_balance -= points;
        txn.put_customer(&customer)?;
        txn.append_loyalty(LoyaltyDraft {
            customer_id,
            order_id: order,
            points_delta: -signed(points)?,
            kind: LoyaltyKind::Redeem,
            notes: String::new(),
        })
    }

    /// Manual correction. The balance never goes below zero.
    pub fn adjust(
        txn: &mut dyn StoreTxn,
        customer_id: CustomerId,
        delta: i64,
        notes: impl Into<String>,
    ) -> Result<LoyaltyLedgerEntry, BrewlineError> {
        if delta == 0 {
            return Err(BrewlineError::InvalidInput(
                "adjustment must be non-zero".to_string(),
            ));
        }
        let mut customer = load_customer(txn, customer_id)?;
        customer.points_balance = if delta > 0 {
            customer
                .points_balance
                .checked_add(delta.unsigned_abs())
                .ok_or(BrewlineError::Overflow("loyalty balance"))?
        } else {
            customer
                .points_balance
                .checked_sub(delta.unsigned_abs())
                .ok_or(BrewlineError::InsufficientPoints {
                    customer: customer_id,
                    requested: delta.unsigned_abs(),
                    balance: customer.points_balance,
                })?
        };
        txn.put_customer(&customer)?;
        txn.append_loyalty(LoyaltyDraft {
            customer_id,
            order_id: None,
            points_delta: delta,
            kind: LoyaltyKind::Adjustment,
            notes: notes.into(),
        })
    }
}
