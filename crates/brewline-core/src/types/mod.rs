//! # Core Type Definitions
//!
//! This module contains the value types shared by every engine component:
//! - Identifiers (`IngredientId`, `MenuItemId`, `OrderId`, ...)
//! - Fixed-point amounts (`Quantity`, `Money`)
//! - The acting party of a mutation (`Actor`)
//! - Error types (`BrewlineError`, `ErrorKind`)
//!
//! Domain records live in the submodules: [`catalog`], [`order`], [`ledger`].
//!
//! ## Determinism Guarantees
//!
//! - Integer arithmetic only (no floating-point)
//! - All identifiers implement `Ord` for deterministic `BTreeMap` ordering
//! - Quantity arithmetic is checked; overflow surfaces as an error

pub mod catalog;
pub mod ledger;
pub mod order;

use crate::fulfillment::Shortfall;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use catalog::{
    Catalog, CatalogMenuItem, CatalogRequirement, Customer, ImportSummary, Ingredient,
    IngredientDetails, MenuItem, NewIngredient, RecipeRequirement,
};
pub use ledger::{
    LoyaltyDraft, LoyaltyKind, LoyaltyLedgerEntry, MovementDraft, MovementKind, MovementRecord,
};
pub use order::{LineItem, NewOrder, Order, OrderStatus, PaymentEvent, PaymentStatus, StatusChange};

// =============================================================================
// IDENTIFIERS
// =============================================================================

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "#{}", self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of a stocked ingredient. Assigned by the catalog.
    IngredientId
);
define_id!(
    /// Identifier of a menu item. Assigned by the catalog.
    MenuItemId
);
define_id!(
    /// Identifier of an order. Assigned by the store on checkout.
    OrderId
);
define_id!(
    /// Identifier of a loyalty customer.
    CustomerId
);
define_id!(
    /// Identifier of a stock movement ledger row. Monotonic per store.
    MovementId
);
define_id!(
    /// Identifier of a loyalty ledger row. Monotonic per store.
    LoyaltyEntryId
);

// =============================================================================
// QUANTITY
// =============================================================================

/// Amount of an ingredient in thousandths of its unit.
///
/// `Quantity(10_000)` is 10 litres of milk when the unit is litres.
/// Stored quantities are never negative; negative values only appear as
/// transient differences.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Quantity(pub i64);

impl Quantity {
    /// Zero quantity.
    pub const ZERO: Self = Self(0);

    /// Number of milli-units in one whole unit.
    pub const MILLI_PER_UNIT: i64 = 1000;

    /// Create a quantity from milli-units.
    #[must_use]
    pub const fn from_milli(milli: i64) -> Self {
        Self(milli)
    }

    /// Create a quantity from whole units (saturating).
    #[must_use]
    pub const fn from_units(units: i64) -> Self {
        Self(units.saturating_mul(Self::MILLI_PER_UNIT))
    }

    /// Raw milli-unit value.
    #[must_use]
    pub const fn milli(self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    #[must_use]
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// Multiply by an item count (recipe amount × line quantity).
    #[must_use]
    pub fn checked_mul(self, factor: u32) -> Option<Self> {
        self.0.checked_mul(i64::from(factor)).map(Self)
    }

    /// Magnitude of the difference between two quantities.
    #[must_use]
    pub fn distance(self, other: Self) -> Self {
        Self(self.0.abs_diff(other.0).min(i64::MAX as u64) as i64)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let per_unit = Self::MILLI_PER_UNIT as u64;
        write!(f, "{}{}.{:03}", sign, abs / per_unit, abs % per_unit)
    }
}

// =============================================================================
// MONEY
// =============================================================================

/// Monetary amount in cents. Never constructed from floats.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Money(pub u64);

impl Money {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    #[must_use]
    pub const fn cents(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    #[must_use]
    pub fn checked_mul(self, factor: u32) -> Option<Self> {
        self.0.checked_mul(u64::from(factor)).map(Self)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// =============================================================================
// ACTOR
// =============================================================================

/// The party that triggered a mutation.
///
/// Several independent trigger points can race on the same order; the actor
/// is recorded in the status history so the audit trail shows who won.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Customer,
    Staff,
    Admin,
    PaymentWebhook,
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Customer => "customer",
            Self::Staff => "staff",
            Self::Admin => "admin",
            Self::PaymentWebhook => "payment_webhook",
            Self::System => "system",
        };
        f.write_str(name)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Classification of a [`BrewlineError`].
///
/// - `Validation`: the request was rejected (insufficient stock, unknown item,
///   invalid transition). Nothing was written.
/// - `NotFound`: a referenced order, ingredient or customer does not exist.
/// - `Conflict`: state changed between pre-check and commit. The caller may
///   retry; the engine never retries on its own.
/// - `Integrity`: an invariant would have been broken (negative stock,
///   duplicate ledger row). The transaction aborted; this is a bug signal.
/// - `Storage`: the backing store or codec failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Integrity,
    Storage,
}

/// Errors that can occur in the Brewline engine.
///
/// Every failure path leaves stock, ledgers and order state exactly as they
/// were before the call.
#[derive(Debug, Error)]
pub enum BrewlineError {
    // -- validation ----------------------------------------------------------
    /// Deducting the order would take an ingredient below zero.
    #[error(
        "Insufficient stock for ingredient {ingredient}: required {required}, available {available}"
    )]
    InsufficientStock {
        ingredient: IngredientId,
        required: Quantity,
        available: Quantity,
    },

    /// Checkout rejected: aggregated demand exceeds stock.
    #[error("Order cannot be fulfilled: {} ingredient(s) short", .0.len())]
    Unfulfillable(Vec<Shortfall>),

    #[error("Unknown menu item: {0}")]
    UnknownMenuItem(MenuItemId),

    #[error("Menu item {0} is not available")]
    MenuItemUnavailable(MenuItemId),

    #[error("Unknown ingredient: {0}")]
    UnknownIngredient(IngredientId),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid transition for order {order}: {from} -> {to}")]
    InvalidTransition {
        order: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("Invalid payment event '{event}' for order {order} with payment status {status}")]
    InvalidPaymentTransition {
        order: OrderId,
        status: PaymentStatus,
        event: PaymentEvent,
    },

    #[error("Order {order} cannot start preparing: payment is {status}")]
    PaymentNotVerified {
        order: OrderId,
        status: PaymentStatus,
    },

    #[error(
        "Insufficient loyalty balance for customer {customer}: requested {requested}, balance {balance}"
    )]
    InsufficientPoints {
        customer: CustomerId,
        requested: u64,
        balance: u64,
    },

    // -- not found -----------------------------------------------------------
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Ingredient not found: {0}")]
    IngredientNotFound(IngredientId),

    #[error("Customer not found: {0}")]
    CustomerNotFound(CustomerId),

    // -- concurrency ---------------------------------------------------------
    /// Conditional status update lost a race.
    #[error("Order {order} changed concurrently: expected {expected}, found {actual}")]
    StatusConflict {
        order: OrderId,
        expected: OrderStatus,
        actual: OrderStatus,
    },

    /// Deduction started for an order that is no longer being prepared.
    #[error("Order {order} is {status} and no longer eligible for stock deduction")]
    NotEligible { order: OrderId, status: OrderStatus },

    // -- integrity -----------------------------------------------------------
    #[error("Stock for ingredient {ingredient} would become negative: {before} -> {after}")]
    NegativeStock {
        ingredient: IngredientId,
        before: Quantity,
        after: Quantity,
    },

    #[error("Duplicate {kind} movement for order {order}, ingredient {ingredient}")]
    DuplicateMovement {
        order: OrderId,
        ingredient: IngredientId,
        kind: MovementKind,
    },

    #[error("Duplicate {kind} loyalty entry for order {order}")]
    DuplicateLoyaltyEntry { order: OrderId, kind: LoyaltyKind },

    #[error("Order already exists: {0}")]
    DuplicateOrder(OrderId),

    #[error("Arithmetic overflow while computing {0}")]
    Overflow(&'static str),

    // -- storage -------------------------------------------------------------
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl BrewlineError {
    /// Map this error onto the engine's error taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InsufficientStock { .. }
            | Self::Unfulfillable(_)
            | Self::UnknownMenuItem(_)
            | Self::MenuItemUnavailable(_)
            | Self::UnknownIngredient(_)
            | Self::InvalidOrder(_)
            | Self::InvalidInput(_)
            | Self::InvalidTransition { .. }
            | Self::InvalidPaymentTransition { .. }
            | Self::PaymentNotVerified { .. }
            | Self::InsufficientPoints { .. } => ErrorKind::Validation,
            Self::OrderNotFound(_) | Self::IngredientNotFound(_) | Self::CustomerNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::StatusConflict { .. } | Self::NotEligible { .. } => ErrorKind::Conflict,
            Self::NegativeStock { .. }
            | Self::DuplicateMovement { .. }
            | Self::DuplicateLoyaltyEntry { .. }
            | Self::DuplicateOrder(_)
            | Self::Overflow(_) => ErrorKind::Integrity,
            Self::IoError(_)
            | Self::SerializationError(_)
            | Self::DeserializationError(_)
            | Self::ConfigError(_) => ErrorKind::Storage,
        }
    }

    /// Whether the caller may retry the operation unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

// =============================================================================
// TESTS
// =============================================================================
