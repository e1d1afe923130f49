//! # brewline-core
//!
//! The order fulfillment and inventory consistency engine for Brewline.
//!
//! This crate decides whether an order's ingredients are available,
//! deducts stock exactly once when the order is prepared, keeps stock and
//! an append-only movement ledger in agreement, and coordinates those
//! side effects with the order lifecycle and loyalty accrual.
//!
//! ## Components (leaves first)
//!
//! - `stock`: the only write path for ingredient quantity
//! - `ledger`: append-only movement queries and reconciliation
//! - `fulfillment`: aggregated demand and the advisory availability check
//! - `deduction`: exactly-once, all-or-nothing stock deduction
//! - `state_machine`: order lifecycle and side-effect scheduling
//! - `loyalty`: once-per-order point accrual
//! - `engine`: transactional facade with post-commit events
//!
//! ## Architectural Constraints
//!
//! - NO async, NO network dependencies (pure Rust)
//! - Integer arithmetic only; quantities are milli-units, money is cents
//! - Every mutating operation is one store transaction; any failure
//!   leaves stock, ledgers and orders exactly as they were

// =============================================================================
// MODULES
// =============================================================================

pub mod deduction;
pub mod engine;
pub mod events;
pub mod fulfillment;
pub mod ledger;
pub mod loyalty;
pub mod primitives;
pub mod settings;
pub mod state_machine;
pub mod stock;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Actor, BrewlineError, Catalog, CatalogMenuItem, CatalogRequirement, Customer, CustomerId,
    ErrorKind, ImportSummary, Ingredient, IngredientDetails, IngredientId, LineItem, LoyaltyDraft,
    LoyaltyEntryId, LoyaltyKind, LoyaltyLedgerEntry, MenuItem, MenuItemId, Money, MovementDraft,
    MovementId, MovementKind, MovementRecord, NewIngredient, NewOrder, Order, OrderId,
    OrderStatus, PaymentEvent, PaymentStatus, Quantity, RecipeRequirement, StatusChange,
};

// =============================================================================
// RE-EXPORTS: Engine Components
// =============================================================================

pub use deduction::{Deduction, DeductionEngine};
pub use engine::Engine;
pub use events::{BrewlineEvent, EventEmitter, NoopEmitter};
pub use fulfillment::{Demand, FulfillmentReport, FulfillmentValidator, Shortfall, aggregate_demand};
pub use ledger::{Discrepancy, MovementLedger, ReconciliationReport};
pub use loyalty::{LoyaltyAccrual, points_for};
pub use settings::{LoyaltySettings, SettingsProvider, StaticSettings};
pub use state_machine::{OrderStateMachine, PaymentOutcome, TransitionOutcome};
pub use stock::{StockStore, StockToken};
pub use storage::{MemoryStore, RedbStore, StorageBackend, StoreRead, StoreTxn};
