//! # Order Records
//!
//! Orders, their typed line items, and the two status enums the state
//! machine drives.

use super::{Actor, BrewlineError, CustomerId, IngredientId, MenuItemId, Money, OrderId};
use crate::primitives::{MAX_CUSTOMIZATIONS, MAX_LINE_ITEMS, MAX_LINE_QUANTITY, MAX_NOTES_LENGTH};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// ORDER STATUS
// =============================================================================

/// Order lifecycle state.
///
/// ```text
/// pending -> pending_verification -> preparing -> ready -> completed
///     \______________\_________________\___________\-----> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PendingVerification,
    Preparing,
    Ready,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::PendingVerification,
        Self::Preparing,
        Self::Ready,
        Self::Completed,
        Self::Cancelled,
    ];

    /// Terminal states accept no further transition.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether the lifecycle permits `self -> to`.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        match (self, to) {
            (Self::Pending, Self::PendingVerification)
            | (Self::PendingVerification, Self::Preparing)
            | (Self::Preparing, Self::Ready)
            | (Self::Preparing | Self::Ready, Self::Completed) => true,
            (from, Self::Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PendingVerification => "pending_verification",
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = BrewlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| BrewlineError::InvalidInput(format!("unknown order status '{}'", s)))
    }
}

// =============================================================================
// PAYMENT STATUS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    AwaitingVerification,
    Paid,
    Rejected,
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unpaid => "unpaid",
            Self::AwaitingVerification => "awaiting_verification",
            Self::Paid => "paid",
            Self::Rejected => "rejected",
            Self::Refunded => "refunded",
        };
        f.write_str(name)
    }
}

/// External payment action applied to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEvent {
    /// Customer uploaded payment proof.
    Submitted,
    /// Admin or webhook confirmed the payment.
    Verified,
    /// Admin rejected the submitted proof.
    Rejected,
    /// Money returned to the customer. Never restocks.
    Refunded,
}

impl PaymentEvent {
    /// Payment status after applying this event, if permitted from `current`.
    #[must_use]
    pub const fn apply(self, current: PaymentStatus) -> Option<PaymentStatus> {
        match (self, current) {
            (Self::Submitted, PaymentStatus::Unpaid | PaymentStatus::Rejected) => {
                Some(PaymentStatus::AwaitingVerification)
            }
            (
                Self::Verified,
                PaymentStatus::Unpaid | PaymentStatus::AwaitingVerification | PaymentStatus::Rejected,
            ) => Some(PaymentStatus::Paid),
            (Self::Rejected, PaymentStatus::AwaitingVerification) => Some(PaymentStatus::Rejected),
            (Self::Refunded, PaymentStatus::Paid) => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Submitted => "submitted",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
            Self::Refunded => "refunded",
        };
        f.write_str(name)
    }
}

// =============================================================================
// LINE ITEMS
// =============================================================================

/// One line of an order. Immutable once the order is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub menu_item_id: MenuItemId,
    pub quantity: u32,
    /// Optional recipe ingredients the customer selected.
    #[serde(default)]
    pub customizations: Vec<IngredientId>,
}

impl LineItem {
    #[must_use]
    pub fn new(menu_item_id: MenuItemId, quantity: u32) -> Self {
        Self {
            menu_item_id,
            quantity,
            customizations: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_customization(mut self, ingredient: IngredientId) -> Self {
        self.customizations.push(ingredient);
        self
    }

    /// Structural validation, independent of the catalog.
    pub fn validate(&self) -> Result<(), BrewlineError> {
        if self.quantity == 0 || self.quantity > MAX_LINE_QUANTITY {
            return Err(BrewlineError::InvalidOrder(format!(
                "line quantity for menu item {} must be between 1 and {}",
                self.menu_item_id, MAX_LINE_QUANTITY
            )));
        }
        if self.customizations.len() > MAX_CUSTOMIZATIONS {
            return Err(BrewlineError::InvalidOrder(format!(
                "menu item {} has {} customizations, maximum is {}",
                self.menu_item_id,
                self.customizations.len(),
                MAX_CUSTOMIZATIONS
            )));
        }
        let unique: BTreeSet<_> = self.customizations.iter().collect();
        if unique.len() != self.customizations.len() {
            return Err(BrewlineError::InvalidOrder(format!(
                "duplicate customization on menu item {}",
                self.menu_item_id
            )));
        }
        Ok(())
    }
}

/// Checkout request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewOrder {
    #[must_use]
    pub fn new(line_items: Vec<LineItem>) -> Self {
        Self {
            customer_id: None,
            line_items,
            notes: None,
        }
    }

    #[must_use]
    pub fn for_customer(mut self, customer: CustomerId) -> Self {
        self.customer_id = Some(customer);
        self
    }

    /// Structural validation of the whole request.
    pub fn validate(&self) -> Result<(), BrewlineError> {
        if self.line_items.is_empty() {
            return Err(BrewlineError::InvalidOrder(
                "order has no line items".to_string(),
            ));
        }
        if self.line_items.len() > MAX_LINE_ITEMS {
            return Err(BrewlineError::InvalidOrder(format!(
                "order has {} line items, maximum is {}",
                self.line_items.len(),
                MAX_LINE_ITEMS
            )));
        }
        if self
            .notes
            .as_ref()
            .is_some_and(|n| n.len() > MAX_NOTES_LENGTH)
        {
            return Err(BrewlineError::InvalidOrder(format!(
                "notes exceed {} bytes",
                MAX_NOTES_LENGTH
            )));
        }
        self.line_items.iter().try_for_each(LineItem::validate)
    }
}

// =============================================================================
// ORDER
// =============================================================================

/// An accepted order. Owned by the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: Option<CustomerId>,
    pub line_items: Vec<LineItem>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    #[serde(rename = "total_cents")]
    pub total: Money,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of an order's append-only status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub order_id: OrderId,
    /// Position in the order's history. Assigned by the store.
    pub seq: u32,
    /// `None` for the row recording checkout.
    pub from: Option<OrderStatus>,
    pub to: OrderStatus,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    #[must_use]
    pub fn new(order_id: OrderId, from: Option<OrderStatus>, to: OrderStatus, actor: Actor) -> Self {
        Self {
            order_id,
            seq: 0,
            from,
            to,
            actor,
            at: Utc::now(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
