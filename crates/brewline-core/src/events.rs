//! # Event Emitter
//!
//! Fire-and-forget notifications for dashboards.
//!
//! Events are published only after the transaction that produced them has
//! committed. An emitter failure is logged and never changes the outcome
//! of the operation.

use crate::{IngredientId, OrderId, OrderStatus, PaymentStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BrewlineEvent {
    /// Stock of these ingredients changed.
    InventoryChanged { ingredients: Vec<IngredientId> },
    /// An order's status or payment status changed.
    OrderUpdated {
        order_id: OrderId,
        status: OrderStatus,
        payment_status: PaymentStatus,
    },
}

impl BrewlineEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InventoryChanged { .. } => "inventory_changed",
            Self::OrderUpdated { .. } => "order_updated",
        }
    }
}

/// Best-effort event sink.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: &BrewlineEvent) -> Result<(), String>;
}

/// Emitter that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit(&self, _event: &BrewlineEvent) -> Result<(), String> {
        Ok(())
    }
}
