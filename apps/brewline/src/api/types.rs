//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API. Quantities are
//! milli-units and money is cents on the wire, the same as in the engine.

use brewline_core::{
    Actor, BrewlineError, Customer, Deduction, ErrorKind, Ingredient, LineItem, LoyaltyLedgerEntry,
    MovementRecord, Order, OrderId, OrderStatus, PaymentEvent, PaymentOutcome, Quantity,
    ReconciliationReport, Shortfall, StatusChange, TransitionOutcome,
    primitives::MAX_NOTES_LENGTH,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// ERROR RESPONSE
// =============================================================================

/// Body of every non-2xx response produced by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
    /// Whether retrying the same request may succeed.
    pub retryable: bool,
    /// Ingredients that blocked a checkout or a deduction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shortfalls: Vec<Shortfall>,
}

impl From<&BrewlineError> for ErrorResponse {
    fn from(error: &BrewlineError) -> Self {
        let shortfalls = match error {
            BrewlineError::Unfulfillable(shortfalls) => shortfalls.clone(),
            BrewlineError::InsufficientStock {
                ingredient,
                required,
                available,
            } => vec![Shortfall {
                ingredient_id: *ingredient,
                required: *required,
                available: *available,
            }],
            _ => Vec::new(),
        };
        Self {
            error: error.to_string(),
            kind: error.kind(),
            retryable: error.is_retryable(),
            shortfalls,
        }
    }
}

// =============================================================================
// INVENTORY
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryResponse {
    pub ingredients: Vec<Ingredient>,
}

/// Delivery of new stock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestockRequest {
    pub amount_milli: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Stock count correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustRequest {
    pub quantity_milli: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Validate free-text notes at the API boundary.
pub fn checked_notes(notes: Option<String>) -> Result<String, BrewlineError> {
    let notes = notes.unwrap_or_default();
    if notes.len() > MAX_NOTES_LENGTH {
        return Err(BrewlineError::InvalidInput(format!(
            "notes length {} exceeds maximum {} bytes",
            notes.len(),
            MAX_NOTES_LENGTH
        )));
    }
    Ok(notes)
}

impl RestockRequest {
    pub fn amount(&self) -> Quantity {
        Quantity::from_milli(self.amount_milli)
    }
}

impl AdjustRequest {
    pub fn quantity(&self) -> Quantity {
        Quantity::from_milli(self.quantity_milli)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementsResponse {
    pub movements: Vec<MovementRecord>,
}

// =============================================================================
// ORDERS
// =============================================================================

/// Availability check without placing an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub line_items: Vec<LineItem>,
}

/// Status transition request.
///
/// With `expected_from` set the transition only applies if the order is
/// still in that status; otherwise it fails with a conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub to: OrderStatus,
    #[serde(default)]
    pub expected_from: Option<OrderStatus>,
    #[serde(default = "default_staff")]
    pub actor: Actor,
}

/// Payment event request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub event: PaymentEvent,
    #[serde(default = "default_admin")]
    pub actor: Actor,
}

fn default_staff() -> Actor {
    Actor::Staff
}

fn default_admin() -> Actor {
    Actor::Admin
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionResponse {
    pub order: Order,
    pub change: StatusChange,
    /// Usage rows written by this transition.
    pub deducted: Vec<MovementRecord>,
    /// The order's stock had already been consumed by an earlier call.
    pub already_deducted: bool,
    pub restocked: Vec<MovementRecord>,
    pub loyalty: Option<LoyaltyLedgerEntry>,
}

impl From<TransitionOutcome> for TransitionResponse {
    fn from(outcome: TransitionOutcome) -> Self {
        let (deducted, already_deducted) = match outcome.deduction {
            Some(Deduction::Applied(movements)) => (movements, false),
            Some(Deduction::AlreadyApplied) => (Vec::new(), true),
            None => (Vec::new(), false),
        };
        Self {
            order: outcome.order,
            change: outcome.change,
            deducted,
            already_deducted,
            restocked: outcome.restocked,
            loyalty: outcome.loyalty,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub order: Order,
    pub changes: Vec<StatusChange>,
    pub notes: Vec<MovementRecord>,
    pub loyalty: Option<LoyaltyLedgerEntry>,
}

impl From<PaymentOutcome> for PaymentResponse {
    fn from(outcome: PaymentOutcome) -> Self {
        Self {
            order: outcome.order,
            changes: outcome.changes,
            notes: outcome.notes,
            loyalty: outcome.loyalty,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub history: Vec<StatusChange>,
}

// =============================================================================
// LOYALTY
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoyaltyResponse {
    pub customer: Customer,
    pub entries: Vec<LoyaltyLedgerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemRequest {
    pub points: u64,
    #[serde(default)]
    pub order_id: Option<OrderId>,
}

// =============================================================================
// RECONCILIATION
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResponse {
    pub consistent: bool,
    #[serde(flatten)]
    pub report: ReconciliationReport,
}

impl From<ReconciliationReport> for ReconcileResponse {
    fn from(report: ReconciliationReport) -> Self {
        Self {
            consistent: report.is_consistent(),
            report,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
