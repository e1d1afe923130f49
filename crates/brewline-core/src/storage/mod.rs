//! # Storage
//!
//! Transactional repositories for the engine: ingredients and recipes,
//! orders and their status history, the stock movement ledger, customers and
//! the loyalty ledger.
//!
//! ## Backends
//!
//! - `MemoryStore`: in-memory state behind a mutex. A write keeps an undo
//!   log of the rows it touched and replays it if the closure fails.
//! - `RedbStore`: disk-backed redb database (ACID, MVCC readers, single writer).
//!
//! Both backends serialize write transactions. A row read through
//! [`StoreTxn::lock_ingredient`] therefore cannot change until the
//! transaction that read it commits or aborts.
//!
//! ## Unique constraints
//!
//! Backends enforce the ledger invariants the way a relational unique index
//! would, rejecting the append with an integrity error:
//! - one `usage` movement per (order, ingredient)
//! - one order-linked `restock` movement per (order, ingredient)
//! - one `earn` and one `refund` loyalty entry per order

pub mod memory;
pub mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::stock::StockToken;
use crate::{
    BrewlineError, Customer, CustomerId, Ingredient, IngredientId, LoyaltyDraft, LoyaltyKind,
    LoyaltyLedgerEntry, MenuItem, MenuItemId, MovementDraft, MovementRecord, Order, OrderId,
    OrderStatus, RecipeRequirement, StatusChange,
};
use std::path::Path;

// =============================================================================
// STORE TRAITS
// =============================================================================

/// Read access to every repository.
pub trait StoreRead {
    fn ingredient(&self, id: IngredientId) -> Result<Option<Ingredient>, BrewlineError>;

    /// All ingredients ordered by id.
    fn ingredients(&self) -> Result<Vec<Ingredient>, BrewlineError>;

    fn menu_item(&self, id: MenuItemId) -> Result<Option<MenuItem>, BrewlineError>;

    /// Recipe requirements of a menu item, ordered by ingredient id.
    fn recipe(&self, menu_item: MenuItemId) -> Result<Vec<RecipeRequirement>, BrewlineError>;

    fn order(&self, id: OrderId) -> Result<Option<Order>, BrewlineError>;

    /// Status history of an order, ordered by `seq`.
    fn status_history(&self, order: OrderId) -> Result<Vec<StatusChange>, BrewlineError>;

    /// Movements referencing an order, in ledger order.
    fn movements_for_order(&self, order: OrderId) -> Result<Vec<MovementRecord>, BrewlineError>;

    /// Movements of an ingredient, in ledger order.
    fn movements_for_ingredient(
        &self,
        ingredient: IngredientId,
    ) -> Result<Vec<MovementRecord>, BrewlineError>;

    /// The usage movement for (order, ingredient), if deduction happened.
    fn usage_record(
        &self,
        order: OrderId,
        ingredient: IngredientId,
    ) -> Result<Option<MovementRecord>, BrewlineError>;

    /// The compensating restock for (order, ingredient), if one was written.
    fn restock_record(
        &self,
        order: OrderId,
        ingredient: IngredientId,
    ) -> Result<Option<MovementRecord>, BrewlineError>;

    fn customer(&self, id: CustomerId) -> Result<Option<Customer>, BrewlineError>;

    /// Loyalty entries of a customer, in ledger order.
    fn loyalty_entries(
        &self,
        customer: CustomerId,
    ) -> Result<Vec<LoyaltyLedgerEntry>, BrewlineError>;

    /// The per-order loyalty entry of a unique kind (`earn` or `refund`).
    fn loyalty_entry_for_order(
        &self,
        order: OrderId,
        kind: LoyaltyKind,
    ) -> Result<Option<LoyaltyLedgerEntry>, BrewlineError>;
}

/// Write access inside one atomic transaction.
pub trait StoreTxn: StoreRead {
    /// Read an ingredient row for update.
    fn lock_ingredient(&mut self, id: IngredientId) -> Result<Option<Ingredient>, BrewlineError>;

    /// Write an ingredient row. Only the stock module can produce the token.
    fn put_ingredient(
        &mut self,
        ingredient: &Ingredient,
        token: StockToken,
    ) -> Result<(), BrewlineError>;

    fn put_menu_item(&mut self, item: &MenuItem) -> Result<(), BrewlineError>;

    /// Replace the full recipe of a menu item.
    fn put_recipe(
        &mut self,
        menu_item: MenuItemId,
        requirements: &[RecipeRequirement],
    ) -> Result<(), BrewlineError>;

    /// Allocate the next id of a sequence. Ids start at 1.
    fn next_id(&mut self, sequence: Sequence) -> Result<u64, BrewlineError>;

    /// Insert a new order. Fails if the id is taken.
    fn insert_order(&mut self, order: &Order) -> Result<(), BrewlineError>;

    /// Conditional update: write `order` only if the stored status is still
    /// `expected`.
    fn compare_and_set_order(
        &mut self,
        expected: OrderStatus,
        order: &Order,
    ) -> Result<(), BrewlineError>;

    /// Append to the order's status history. The store assigns `seq`.
    fn append_status_change(
        &mut self,
        change: StatusChange,
    ) -> Result<StatusChange, BrewlineError>;

    /// Append a movement. The store assigns id and timestamp and enforces
    /// the per-order uniqueness of `usage` and `restock` rows.
    fn append_movement(&mut self, draft: MovementDraft) -> Result<MovementRecord, BrewlineError>;

    fn put_customer(&mut self, customer: &Customer) -> Result<(), BrewlineError>;

    /// Append a loyalty entry. The store assigns id and timestamp and
    /// enforces per-order uniqueness of `earn` and `refund` rows.
    fn append_loyalty(
        &mut self,
        draft: LoyaltyDraft,
    ) -> Result<LoyaltyLedgerEntry, BrewlineError>;
}

/// Id sequences allocated by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Sequence {
    Order,
    Movement,
    LoyaltyEntry,
}

impl Sequence {
    pub(crate) const fn key(self) -> &'static str {
        match self {
            Self::Order => "next_order_id",
            Self::Movement => "next_movement_id",
            Self::LoyaltyEntry => "next_loyalty_entry_id",
        }
    }
}

/// Reject an order-linked movement whose (order, ingredient) slot is taken.
///
/// `existing` is the row already occupying the slot for the draft's kind.
pub(crate) fn check_unique_movement(
    existing: Option<MovementRecord>,
    draft: &MovementDraft,
) -> Result<(), BrewlineError> {
    match (existing, draft.order_id) {
        (Some(_), Some(order)) => Err(BrewlineError::DuplicateMovement {
            order,
            ingredient: draft.ingredient_id,
            kind: draft.kind,
        }),
        _ => Ok(()),
    }
}

// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// Storage backend selected at runtime.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory state (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed redb database (ACID, persistent).
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

impl StorageBackend {
    /// Fresh in-memory backend.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open or create a redb database at the given path.
    pub fn open_redb(path: impl AsRef<Path>) -> Result<Self, BrewlineError> {
        Ok(Self::Persistent(RedbStore::open(path)?))
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent(_))
    }

    /// Run `work` against a consistent read snapshot.
    pub fn read<T>(
        &self,
        work: impl FnOnce(&dyn StoreRead) -> Result<T, BrewlineError>,
    ) -> Result<T, BrewlineError> {
        match self {
            Self::InMemory(store) => store.read(work),
            Self::Persistent(store) => store.read(work),
        }
    }

    /// Run `work` in one atomic write transaction.
    ///
    /// If `work` returns `Err`, nothing it wrote becomes visible.
    pub fn write<T>(
        &self,
        work: impl FnOnce(&mut dyn StoreTxn) -> Result<T, BrewlineError>,
    ) -> Result<T, BrewlineError> {
        match self {
            Self::InMemory(store) => store.write(work),
            Self::Persistent(store) => store.write(work),
        }
    }
}
