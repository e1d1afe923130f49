//! # Ledger Records
//!
//! Append-only rows for stock movements and loyalty points. Rows are never
//! updated or deleted; corrections are new rows.

use super::{CustomerId, IngredientId, LoyaltyEntryId, MovementId, OrderId, Quantity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// STOCK MOVEMENTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Stock consumed by an order. At most one per (order, ingredient).
    Usage,
    /// Stock returned, either by delivery or by cancelling an order.
    Restock,
    /// Stock count corrected by staff.
    ManualAdjustment,
    /// Zero-amount annotation; never changes stock.
    StatusNote,
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Usage => "usage",
            Self::Restock => "restock",
            Self::ManualAdjustment => "manual_adjustment",
            Self::StatusNote => "status_note",
        };
        f.write_str(name)
    }
}

/// One immutable stock ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub id: MovementId,
    pub ingredient_id: IngredientId,
    pub kind: MovementKind,
    /// Magnitude of the change; the direction follows from `kind`.
    #[serde(rename = "amount_milli")]
    pub amount: Quantity,
    #[serde(rename = "quantity_before_milli")]
    pub quantity_before: Quantity,
    #[serde(rename = "quantity_after_milli")]
    pub quantity_after: Quantity,
    pub order_id: Option<OrderId>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

impl MovementRecord {
    /// Signed change this row applied to the ingredient.
    #[must_use]
    pub fn delta(&self) -> Option<Quantity> {
        self.quantity_after.checked_sub(self.quantity_before)
    }
}

/// A movement before the store assigns its id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementDraft {
    pub ingredient_id: IngredientId,
    pub kind: MovementKind,
    pub amount: Quantity,
    pub quantity_before: Quantity,
    pub quantity_after: Quantity,
    pub order_id: Option<OrderId>,
    pub notes: String,
}

// =============================================================================
// LOYALTY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoyaltyKind {
    /// Points credited on completion. At most one per order.
    Earn,
    Redeem,
    /// Earned points reversed after a payment refund. At most one per order.
    Refund,
    Adjustment,
}

impl LoyaltyKind {
    /// Kinds that may appear at most once per order.
    #[must_use]
    pub const fn is_unique_per_order(self) -> bool {
        matches!(self, Self::Earn | Self::Refund)
    }

    pub(crate) const fn code(self) -> u8 {
        match self {
            Self::Earn => 0,
            Self::Redeem => 1,
            Self::Refund => 2,
            Self::Adjustment => 3,
        }
    }
}

impl fmt::Display for LoyaltyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Earn => "earn",
            Self::Redeem => "redeem",
            Self::Refund => "refund",
            Self::Adjustment => "adjustment",
        };
        f.write_str(name)
    }
}

/// One immutable loyalty ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyLedgerEntry {
    pub id: LoyaltyEntryId,
    pub customer_id: CustomerId,
    pub order_id: Option<OrderId>,
    pub points_delta: i64,
    pub kind: LoyaltyKind,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

/// A loyalty entry before the store assigns its id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoyaltyDraft {
    pub customer_id: CustomerId,
    pub order_id: Option<OrderId>,
    pub points_delta: i64,
    pub kind: LoyaltyKind,
    pub notes: String,
}
