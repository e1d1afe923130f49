//! # redb-backed Storage
//!
//! A disk-backed store using the redb embedded database, providing:
//! - ACID transactions
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! Rows are postcard-encoded. Secondary index tables keyed by
//! `(order_id, ingredient_id)` and `(order_id, loyalty kind)` carry the
//! ledger's unique constraints.

use super::{Sequence, StoreRead, StoreTxn, check_unique_movement};
use crate::stock::StockToken;
use crate::{
    BrewlineError, Customer, CustomerId, Ingredient, IngredientId, LoyaltyDraft, LoyaltyEntryId,
    LoyaltyKind, LoyaltyLedgerEntry, MenuItem, MenuItemId, MovementDraft, MovementId,
    MovementKind, MovementRecord, Order, OrderId, OrderStatus, RecipeRequirement, StatusChange,
};
use chrono::Utc;
use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Ingredients: IngredientId -> Ingredient
const INGREDIENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("ingredients");

/// Menu items: MenuItemId -> MenuItem
const MENU_ITEMS: TableDefinition<u64, &[u8]> = TableDefinition::new("menu_items");

/// Recipes: (MenuItemId, IngredientId) -> RecipeRequirement
const RECIPES: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("recipes");

/// Orders: OrderId -> Order
const ORDERS: TableDefinition<u64, &[u8]> = TableDefinition::new("orders");

/// Status history: (OrderId, seq) -> StatusChange
const STATUS_HISTORY: TableDefinition<(u64, u32), &[u8]> = TableDefinition::new("status_history");

/// Movement ledger: MovementId -> MovementRecord
const MOVEMENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("movements");

/// (OrderId, MovementId) -> IngredientId
const ORDER_MOVEMENTS: TableDefinition<(u64, u64), u64> = TableDefinition::new("order_movements");

/// (IngredientId, MovementId) -> OrderId (0 when not order-linked)
const INGREDIENT_MOVEMENTS: TableDefinition<(u64, u64), u64> =
    TableDefinition::new("ingredient_movements");

/// Unique usage per (OrderId, IngredientId) -> MovementId
const USAGE_INDEX: TableDefinition<(u64, u64), u64> = TableDefinition::new("usage_index");

/// Unique compensating restock per (OrderId, IngredientId) -> MovementId
const RESTOCK_INDEX: TableDefinition<(u64, u64), u64> = TableDefinition::new("restock_index");

/// Customers: CustomerId -> Customer
const CUSTOMERS: TableDefinition<u64, &[u8]> = TableDefinition::new("customers");

/// Loyalty ledger: LoyaltyEntryId -> LoyaltyLedgerEntry
const LOYALTY: TableDefinition<u64, &[u8]> = TableDefinition::new("loyalty");

/// (CustomerId, LoyaltyEntryId) -> OrderId (0 when not order-linked)
const CUSTOMER_LOYALTY: TableDefinition<(u64, u64), u64> =
    TableDefinition::new("customer_loyalty");

/// Unique earn/refund per (OrderId, kind code) -> LoyaltyEntryId
const LOYALTY_ORDER_INDEX: TableDefinition<(u64, u8), u64> =
    TableDefinition::new("loyalty_order_index");

/// Id sequences: key string -> last allocated id
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

// =============================================================================
// CODEC HELPERS
// =============================================================================

fn io_err(e: impl std::fmt::Display) -> BrewlineError {
    BrewlineError::IoError(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, BrewlineError> {
    postcard::to_allocvec(value).map_err(|e| BrewlineError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, BrewlineError> {
    postcard::from_bytes(bytes).map_err(|e| BrewlineError::DeserializationError(e.to_string()))
}

fn get_row<T: DeserializeOwned>(
    table: &impl ReadableTable<u64, &'static [u8]>,
    key: u64,
) -> Result<Option<T>, BrewlineError> {
    match table.get(key).map_err(io_err)? {
        Some(guard) => decode(guard.value()).map(Some),
        None => Ok(None),
    }
}

fn all_rows<T: DeserializeOwned>(
    table: &impl ReadableTable<u64, &'static [u8]>,
) -> Result<Vec<T>, BrewlineError> {
    let mut rows = Vec::new();
    for entry in table.iter().map_err(io_err)? {
        let (_, value) = entry.map_err(io_err)?;
        rows.push(decode(value.value())?);
    }
    Ok(rows)
}

/// Second key components of every `(first, *)` entry of an index table.
fn index_range(
    table: &impl ReadableTable<(u64, u64), u64>,
    first: u64,
) -> Result<Vec<u64>, BrewlineError> {
    let mut seconds = Vec::new();
    for entry in table
        .range((first, 0u64)..=(first, u64::MAX))
        .map_err(io_err)?
    {
        let (key, _) = entry.map_err(io_err)?;
        seconds.push(key.value().1);
    }
    Ok(seconds)
}

fn index_get(
    table: &impl ReadableTable<(u64, u64), u64>,
    key: (u64, u64),
) -> Result<Option<u64>, BrewlineError> {
    Ok(table.get(key).map_err(io_err)?.map(|v| v.value()))
}

// =============================================================================
// READ IMPLEMENTATION (shared by read and write transactions)
// =============================================================================

struct RedbRead<'a> {
    txn: &'a ReadTransaction,
}

struct RedbTxn<'a> {
    txn: &'a WriteTransaction,
}

macro_rules! impl_store_read {
    ($handle:ty) => {
        impl $handle {
            fn movements_by_id(
                &self,
                ids: &[u64],
            ) -> Result<Vec<MovementRecord>, BrewlineError> {
                let table = self.txn.open_table(MOVEMENTS).map_err(io_err)?;
                let mut records = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(record) = get_row(&table, *id)? {
                        records.push(record);
                    }
                }
                Ok(records)
            }

            fn indexed_movement(
                &self,
                index: TableDefinition<(u64, u64), u64>,
                order: OrderId,
                ingredient: IngredientId,
            ) -> Result<Option<MovementRecord>, BrewlineError> {
                let id = {
                    let table = self.txn.open_table(index).map_err(io_err)?;
                    index_get(&table, (order.0, ingredient.0))?
                };
                match id {
                    Some(id) => Ok(self.movements_by_id(&[id])?.pop()),
                    None => Ok(None),
                }
            }
        }

        impl StoreRead for $handle {
            fn ingredient(&self, id: IngredientId) -> Result<Option<Ingredient>, BrewlineError> {
                let table = self.txn.open_table(INGREDIENTS).map_err(io_err)?;
                get_row(&table, id.0)
            }

            fn ingredients(&self) -> Result<Vec<Ingredient>, BrewlineError> {
                let table = self.txn.open_table(INGREDIENTS).map_err(io_err)?;
                all_rows(&table)
            }

            fn menu_item(&self, id: MenuItemId) -> Result<Option<MenuItem>, BrewlineError> {
                let table = self.txn.open_table(MENU_ITEMS).map_err(io_err)?;
                get_row(&table, id.0)
            }

            fn recipe(
                &self,
                menu_item: MenuItemId,
            ) -> Result<Vec<RecipeRequirement>, BrewlineError> {
                let table = self.txn.open_table(RECIPES).map_err(io_err)?;
                let mut requirements = Vec::new();
                for entry in table
                    .range((menu_item.0, 0u64)..=(menu_item.0, u64::MAX))
                    .map_err(io_err)?
                {
                    let (_, value) = entry.map_err(io_err)?;
                    requirements.push(decode(value.value())?);
                }
                Ok(requirements)
            }

            fn order(&self, id: OrderId) -> Result<Option<Order>, BrewlineError> {
                let table = self.txn.open_table(ORDERS).map_err(io_err)?;
                get_row(&table, id.0)
            }

            fn status_history(&self, order: OrderId) -> Result<Vec<StatusChange>, BrewlineError> {
                let table = self.txn.open_table(STATUS_HISTORY).map_err(io_err)?;
                let mut history = Vec::new();
                for entry in table
                    .range((order.0, 0u32)..=(order.0, u32::MAX))
                    .map_err(io_err)?
                {
                    let (_, value) = entry.map_err(io_err)?;
                    history.push(decode(value.value())?);
                }
                Ok(history)
            }

            fn movements_for_order(
                &self,
                order: OrderId,
            ) -> Result<Vec<MovementRecord>, BrewlineError> {
                let ids = {
                    let table = self.txn.open_table(ORDER_MOVEMENTS).map_err(io_err)?;
                    index_range(&table, order.0)?
                };
                self.movements_by_id(&ids)
            }

            fn movements_for_ingredient(
                &self,
                ingredient: IngredientId,
            ) -> Result<Vec<MovementRecord>, BrewlineError> {
                let ids = {
                    let table = self.txn.open_table(INGREDIENT_MOVEMENTS).map_err(io_err)?;
                    index_range(&table, ingredient.0)?
                };
                self.movements_by_id(&ids)
            }

            fn usage_record(
                &self,
                order: OrderId,
                ingredient: IngredientId,
            ) -> Result<Option<MovementRecord>, BrewlineError> {
                self.indexed_movement(USAGE_INDEX, order, ingredient)
            }

            fn restock_record(
                &self,
                order: OrderId,
                ingredient: IngredientId,
            ) -> Result<Option<MovementRecord>, BrewlineError> {
                self.indexed_movement(RESTOCK_INDEX, order, ingredient)
            }

            fn customer(&self, id: CustomerId) -> Result<Option<Customer>, BrewlineError> {
                let table = self.txn.open_table(CUSTOMERS).map_err(io_err)?;
                get_row(&table, id.0)
            }

            fn loyalty_entries(
                &self,
                customer: CustomerId,
            ) -> Result<Vec<LoyaltyLedgerEntry>, BrewlineError> {
                let ids = {
                    let table = self.txn.open_table(CUSTOMER_LOYALTY).map_err(io_err)?;
                    index_range(&table, customer.0)?
                };
                let table = self.txn.open_table(LOYALTY).map_err(io_err)?;
                let mut entries = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(entry) = get_row(&table, id)? {
                        entries.push(entry);
                    }
                }
                Ok(entries)
            }

            fn loyalty_entry_for_order(
                &self,
                order: OrderId,
                kind: LoyaltyKind,
            ) -> Result<Option<LoyaltyLedgerEntry>, BrewlineError> {
                let id = {
                    let table = self.txn.open_table(LOYALTY_ORDER_INDEX).map_err(io_err)?;
                    table
                        .get((order.0, kind.code()))
                        .map_err(io_err)?
                        .map(|v| v.value())
                };
                match id {
                    Some(id) => {
                        let table = self.txn.open_table(LOYALTY).map_err(io_err)?;
                        get_row(&table, id)
                    }
                    None => Ok(None),
                }
            }
        }
    };
}

impl_store_read!(RedbRead<'_>);
impl_store_read!(RedbTxn<'_>);

// =============================================================================
// WRITE IMPLEMENTATION
// =============================================================================

impl StoreTxn for RedbTxn<'_> {
    fn lock_ingredient(&mut self, id: IngredientId) -> Result<Option<Ingredient>, BrewlineError> {
        // redb admits one write transaction at a time; reading the row here
        // already excludes every other writer until commit.
        self.ingredient(id)
    }

    fn put_ingredient(
        &mut self,
        ingredient: &Ingredient,
        _token: StockToken,
    ) -> Result<(), BrewlineError> {
        let bytes = encode(ingredient)?;
        let mut table = self.txn.open_table(INGREDIENTS).map_err(io_err)?;
        table
            .insert(ingredient.id.0, bytes.as_slice())
            .map_err(io_err)?;
        Ok(())
    }

    fn put_menu_item(&mut self, item: &MenuItem) -> Result<(), BrewlineError> {
        let bytes = encode(item)?;
        let mut table = self.txn.open_table(MENU_ITEMS).map_err(io_err)?;
        table.insert(item.id.0, bytes.as_slice()).map_err(io_err)?;
        Ok(())
    }

    fn put_recipe(
        &mut self,
        menu_item: MenuItemId,
        requirements: &[RecipeRequirement],
    ) -> Result<(), BrewlineError> {
        let mut table = self.txn.open_table(RECIPES).map_err(io_err)?;
        let stale = table
            .range((menu_item.0, 0u64)..=(menu_item.0, u64::MAX))
            .map_err(io_err)?
            .map(|entry| entry.map(|(key, _)| key.value()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_err)?;
        for key in stale {
            table.remove(key).map_err(io_err)?;
        }
        for requirement in requirements {
            let bytes = encode(requirement)?;
            table
                .insert(
                    (menu_item.0, requirement.ingredient_id.0),
                    bytes.as_slice(),
                )
                .map_err(io_err)?;
        }
        Ok(())
    }

    fn next_id(&mut self, sequence: Sequence) -> Result<u64, BrewlineError> {
        let mut table = self.txn.open_table(METADATA).map_err(io_err)?;
        let current = table
            .get(sequence.key())
            .map_err(io_err)?
            .map(|v| v.value())
            .unwrap_or(0);
        let next = current
            .checked_add(1)
            .ok_or(BrewlineError::Overflow("id sequence"))?;
        table.insert(sequence.key(), next).map_err(io_err)?;
        Ok(next)
    }

    fn insert_order(&mut self, order: &Order) -> Result<(), BrewlineError> {
        let bytes = encode(order)?;
        let mut table = self.txn.open_table(ORDERS).map_err(io_err)?;
        if table.get(order.id.0).map_err(io_err)?.is_some() {
            return Err(BrewlineError::DuplicateOrder(order.id));
        }
        table.insert(order.id.0, bytes.as_slice()).map_err(io_err)?;
        Ok(())
    }

    fn compare_and_set_order(
        &mut self,
        expected: OrderStatus,
        order: &Order,
    ) -> Result<(), BrewlineError> {
        let bytes = encode(order)?;
        let mut table = self.txn.open_table(ORDERS).map_err(io_err)?;
        let current: Order =
            get_row(&table, order.id.0)?.ok_or(BrewlineError::OrderNotFound(order.id))?;
        if current.status != expected {
            return Err(BrewlineError::StatusConflict {
                order: order.id,
                expected,
                actual: current.status,
            });
        }
        table.insert(order.id.0, bytes.as_slice()).map_err(io_err)?;
        Ok(())
    }

    fn append_status_change(
        &mut self,
        mut change: StatusChange,
    ) -> Result<StatusChange, BrewlineError> {
        let order = change.order_id.0;
        let mut table = self.txn.open_table(STATUS_HISTORY).map_err(io_err)?;
        let existing = table
            .range((order, 0u32)..=(order, u32::MAX))
            .map_err(io_err)?
            .count();
        change.seq =
            u32::try_from(existing).map_err(|_| BrewlineError::Overflow("status history"))?;
        let bytes = encode(&change)?;
        table
            .insert((order, change.seq), bytes.as_slice())
            .map_err(io_err)?;
        Ok(change)
    }

    fn append_movement(&mut self, draft: MovementDraft) -> Result<MovementRecord, BrewlineError> {
        let unique_index = match (draft.kind, draft.order_id) {
            (MovementKind::Usage, Some(order)) => {
                check_unique_movement(self.usage_record(order, draft.ingredient_id)?, &draft)?;
                Some((USAGE_INDEX, order))
            }
            (MovementKind::Restock, Some(order)) => {
                check_unique_movement(self.restock_record(order, draft.ingredient_id)?, &draft)?;
                Some((RESTOCK_INDEX, order))
            }
            _ => None,
        };

        let id = MovementId(self.next_id(Sequence::Movement)?);
        let record = MovementRecord {
            id,
            ingredient_id: draft.ingredient_id,
            kind: draft.kind,
            amount: draft.amount,
            quantity_before: draft.quantity_before,
            quantity_after: draft.quantity_after,
            order_id: draft.order_id,
            notes: draft.notes,
            created_at: Utc::now(),
        };
        let bytes = encode(&record)?;
        let ingredient = record.ingredient_id.0;
        let order = record.order_id.map(|o| o.0);

        {
            let mut table = self.txn.open_table(MOVEMENTS).map_err(io_err)?;
            table.insert(id.0, bytes.as_slice()).map_err(io_err)?;
        }
        {
            let mut table = self.txn.open_table(INGREDIENT_MOVEMENTS).map_err(io_err)?;
            table
                .insert((ingredient, id.0), order.unwrap_or(0))
                .map_err(io_err)?;
        }
        if let Some(order) = order {
            let mut table = self.txn.open_table(ORDER_MOVEMENTS).map_err(io_err)?;
            table.insert((order, id.0), ingredient).map_err(io_err)?;
        }
        if let Some((index, order)) = unique_index {
            let mut table = self.txn.open_table(index).map_err(io_err)?;
            table.insert((order.0, ingredient), id.0).map_err(io_err)?;
        }
        Ok(record)
    }

    fn put_customer(&mut self, customer: &Customer) -> Result<(), BrewlineError> {
        let bytes = encode(customer)?;
        let mut table = self.txn.open_table(CUSTOMERS).map_err(io_err)?;
        table.insert(customer.id.0, bytes.as_slice()).map_err(io_err)?;
        Ok(())
    }

    fn append_loyalty(
        &mut self,
        draft: LoyaltyDraft,
    ) -> Result<LoyaltyLedgerEntry, BrewlineError> {
        let unique_key = draft
            .order_id
            .filter(|_| draft.kind.is_unique_per_order())
            .map(|order| (order, draft.kind));
        if let Some((order, kind)) = unique_key {
            if self.loyalty_entry_for_order(order, kind)?.is_some() {
                return Err(BrewlineError::DuplicateLoyaltyEntry { order, kind });
            }
        }

        let id = LoyaltyEntryId(self.next_id(Sequence::LoyaltyEntry)?);
        let entry = LoyaltyLedgerEntry {
            id,
            customer_id: draft.customer_id,
            order_id: draft.order_id,
            points_delta: draft.points_delta,
            kind: draft.kind,
            notes: draft.notes,
            created_at: Utc::now(),
        };
        let bytes = encode(&entry)?;

        {
            let mut table = self.txn.open_table(LOYALTY).map_err(io_err)?;
            table.insert(id.0, bytes.as_slice()).map_err(io_err)?;
        }
        {
            let mut table = self.txn.open_table(CUSTOMER_LOYALTY).map_err(io_err)?;
            table
                .insert(
                    (entry.customer_id.0, id.0),
                    entry.order_id.map(|o| o.0).unwrap_or(0),
                )
                .map_err(io_err)?;
        }
        if let Some((order, kind)) = unique_key {
            let mut table = self.txn.open_table(LOYALTY_ORDER_INDEX).map_err(io_err)?;
            table.insert((order.0, kind.code()), id.0).map_err(io_err)?;
        }
        Ok(entry)
    }
}

// =============================================================================
// REDB STORE
// =============================================================================

/// A disk-backed store using redb.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BrewlineError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            write_txn.open_table(INGREDIENTS).map_err(io_err)?;
            write_txn.open_table(MENU_ITEMS).map_err(io_err)?;
            write_txn.open_table(RECIPES).map_err(io_err)?;
            write_txn.open_table(ORDERS).map_err(io_err)?;
            write_txn.open_table(STATUS_HISTORY).map_err(io_err)?;
            write_txn.open_table(MOVEMENTS).map_err(io_err)?;
            write_txn.open_table(ORDER_MOVEMENTS).map_err(io_err)?;
            write_txn.open_table(INGREDIENT_MOVEMENTS).map_err(io_err)?;
            write_txn.open_table(USAGE_INDEX).map_err(io_err)?;
            write_txn.open_table(RESTOCK_INDEX).map_err(io_err)?;
            write_txn.open_table(CUSTOMERS).map_err(io_err)?;
            write_txn.open_table(LOYALTY).map_err(io_err)?;
            write_txn.open_table(CUSTOMER_LOYALTY).map_err(io_err)?;
            write_txn.open_table(LOYALTY_ORDER_INDEX).map_err(io_err)?;
            write_txn.open_table(METADATA).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }

        Ok(Self { db })
    }

    pub(crate) fn read<T>(
        &self,
        work: impl FnOnce(&dyn StoreRead) -> Result<T, BrewlineError>,
    ) -> Result<T, BrewlineError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        work(&RedbRead { txn: &read_txn })
    }

    pub(crate) fn write<T>(
        &self,
        work: impl FnOnce(&mut dyn StoreTxn) -> Result<T, BrewlineError>,
    ) -> Result<T, BrewlineError> {
        let write_txn = self.db.begin_write().map_err(io_err)?;
        let outcome = work(&mut RedbTxn { txn: &write_txn });
        match outcome {
            Ok(value) => {
                write_txn.commit().map_err(io_err)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = write_txn.abort() {
                    tracing::warn!(error = %abort_err, "failed to abort redb transaction");
                }
                Err(e)
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
