//! # In-Memory Storage
//!
//! Volatile backend used by tests and the `memory` CLI backend.
//!
//! A write transaction mutates the state in place and keeps an undo log of
//! every row it touched. If the closure fails (or panics) the log is
//! replayed backwards, so the cost of a transaction follows the rows it
//! writes, not the size of the ledgers. The mutex is held for the whole
//! transaction, which serializes writers exactly like redb does.

use super::{Sequence, StoreRead, StoreTxn, check_unique_movement};
use crate::stock::StockToken;
use crate::{
    BrewlineError, Customer, CustomerId, Ingredient, IngredientId, LoyaltyDraft, LoyaltyEntryId,
    LoyaltyKind, LoyaltyLedgerEntry, MenuItem, MenuItemId, MovementDraft, MovementId,
    MovementKind, MovementRecord, Order, OrderId, OrderStatus, RecipeRequirement, StatusChange,
};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MemoryState {
    ingredients: BTreeMap<IngredientId, Ingredient>,
    menu_items: BTreeMap<MenuItemId, MenuItem>,
    recipes: BTreeMap<MenuItemId, BTreeMap<IngredientId, RecipeRequirement>>,
    orders: BTreeMap<OrderId, Order>,
    history: BTreeMap<OrderId, Vec<StatusChange>>,
    movements: BTreeMap<MovementId, MovementRecord>,
    usage_index: BTreeMap<(OrderId, IngredientId), MovementId>,
    restock_index: BTreeMap<(OrderId, IngredientId), MovementId>,
    customers: BTreeMap<CustomerId, Customer>,
    loyalty: BTreeMap<LoyaltyEntryId, LoyaltyLedgerEntry>,
    loyalty_order_index: BTreeMap<(OrderId, LoyaltyKind), LoyaltyEntryId>,
    sequences: BTreeMap<Sequence, u64>,
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means a closure panicked mid-transaction; the
    // transaction was rolled back while unwinding, so the state is intact.
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn read<T>(
        &self,
        work: impl FnOnce(&dyn StoreRead) -> Result<T, BrewlineError>,
    ) -> Result<T, BrewlineError> {
        let guard = self.lock();
        work(&*guard)
    }

    pub(crate) fn write<T>(
        &self,
        work: impl FnOnce(&mut dyn StoreTxn) -> Result<T, BrewlineError>,
    ) -> Result<T, BrewlineError> {
        let mut guard = self.lock();
        let mut txn = MemoryTxn {
            state: &mut *guard,
            undo: Vec::new(),
        };
        let value = work(&mut txn)?;
        txn.commit();
        Ok(value)
    }
}

// =============================================================================
// UNDO LOG
// =============================================================================

/// Inverse of one write, applied on rollback.
#[derive(Debug)]
enum Undo {
    Ingredient(IngredientId, Option<Ingredient>),
    MenuItem(MenuItemId, Option<MenuItem>),
    Recipe(MenuItemId, Option<BTreeMap<IngredientId, RecipeRequirement>>),
    Order(OrderId, Option<Order>),
    History(OrderId),
    Movement {
        id: MovementId,
        slot: Option<(MovementKind, (OrderId, IngredientId))>,
    },
    Customer(CustomerId, Option<Customer>),
    Loyalty {
        id: LoyaltyEntryId,
        slot: Option<(OrderId, LoyaltyKind)>,
    },
    Sequence(Sequence, Option<u64>),
}

fn restore<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, previous: Option<V>) {
    match previous {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}

/// A write transaction over the locked state.
///
/// Dropping it without [`MemoryTxn::commit`] undoes every write.
struct MemoryTxn<'a> {
    state: &'a mut MemoryState,
    undo: Vec<Undo>,
}

impl MemoryTxn<'_> {
    fn commit(mut self) {
        self.undo.clear();
    }

    fn rollback(&mut self) {
        let state = &mut *self.state;
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Ingredient(id, previous) => restore(&mut state.ingredients, id, previous),
                Undo::MenuItem(id, previous) => restore(&mut state.menu_items, id, previous),
                Undo::Recipe(id, previous) => restore(&mut state.recipes, id, previous),
                Undo::Order(id, previous) => restore(&mut state.orders, id, previous),
                Undo::Customer(id, previous) => restore(&mut state.customers, id, previous),
                Undo::Sequence(sequence, previous) => {
                    restore(&mut state.sequences, sequence, previous);
                }
                Undo::History(order) => {
                    if let Some(history) = state.history.get_mut(&order) {
                        history.pop();
                        if history.is_empty() {
                            state.history.remove(&order);
                        }
                    }
                }
                Undo::Movement { id, slot } => {
                    state.movements.remove(&id);
                    match slot {
                        Some((MovementKind::Usage, key)) => {
                            state.usage_index.remove(&key);
                        }
                        Some((MovementKind::Restock, key)) => {
                            state.restock_index.remove(&key);
                        }
                        _ => {}
                    }
                }
                Undo::Loyalty { id, slot } => {
                    state.loyalty.remove(&id);
                    if let Some(key) = slot {
                        state.loyalty_order_index.remove(&key);
                    }
                }
            }
        }
    }
}

impl Drop for MemoryTxn<'_> {
    fn drop(&mut self) {
        if !self.undo.is_empty() {
            tracing::debug!(writes = self.undo.len(), "rolling back memory transaction");
            self.rollback();
        }
    }
}

impl MemoryState {
    fn movements_where(&self, keep: impl Fn(&MovementRecord) -> bool) -> Vec<MovementRecord> {
        self.movements.values().filter(|m| keep(m)).cloned().collect()
    }

    fn movement_at(&self, id: Option<&MovementId>) -> Option<MovementRecord> {
        id.and_then(|id| self.movements.get(id)).cloned()
    }
}

impl StoreRead for MemoryState {
    fn ingredient(&self, id: IngredientId) -> Result<Option<Ingredient>, BrewlineError> {
        Ok(self.ingredients.get(&id).cloned())
    }

    fn ingredients(&self) -> Result<Vec<Ingredient>, BrewlineError> {
        Ok(self.ingredients.values().cloned().collect())
    }

    fn menu_item(&self, id: MenuItemId) -> Result<Option<MenuItem>, BrewlineError> {
        Ok(self.menu_items.get(&id).cloned())
    }

    fn recipe(&self, menu_item: MenuItemId) -> Result<Vec<RecipeRequirement>, BrewlineError> {
        Ok(self
            .recipes
            .get(&menu_item)
            .map(|reqs| reqs.values().cloned().collect())
            .unwrap_or_default())
    }

    fn order(&self, id: OrderId) -> Result<Option<Order>, BrewlineError> {
        Ok(self.orders.get(&id).cloned())
    }

    fn status_history(&self, order: OrderId) -> Result<Vec<StatusChange>, BrewlineError> {
        Ok(self.history.get(&order).cloned().unwrap_or_default())
    }

    fn movements_for_order(&self, order: OrderId) -> Result<Vec<MovementRecord>, BrewlineError> {
        Ok(self.movements_where(|m| m.order_id == Some(order)))
    }

    fn movements_for_ingredient(
        &self,
        ingredient: IngredientId,
    ) -> Result<Vec<MovementRecord>, BrewlineError> {
        Ok(self.movements_where(|m| m.ingredient_id == ingredient))
    }

    fn usage_record(
        &self,
        order: OrderId,
        ingredient: IngredientId,
    ) -> Result<Option<MovementRecord>, BrewlineError> {
        Ok(self.movement_at(self.usage_index.get(&(order, ingredient))))
    }

    fn restock_record(
        &self,
        order: OrderId,
        ingredient: IngredientId,
    ) -> Result<Option<MovementRecord>, BrewlineError> {
        Ok(self.movement_at(self.restock_index.get(&(order, ingredient))))
    }

    fn customer(&self, id: CustomerId) -> Result<Option<Customer>, BrewlineError> {
        Ok(self.customers.get(&id).cloned())
    }

    fn loyalty_entries(
        &self,
        customer: CustomerId,
    ) -> Result<Vec<LoyaltyLedgerEntry>, BrewlineError> {
        Ok(self
            .loyalty
            .values()
            .filter(|e| e.customer_id == customer)
            .cloned()
            .collect())
    }

    fn loyalty_entry_for_order(
        &self,
        order: OrderId,
        kind: LoyaltyKind,
    ) -> Result<Option<LoyaltyLedgerEntry>, BrewlineError> {
        Ok(self
            .loyalty_order_index
            .get(&(order, kind))
            .and_then(|id| self.loyalty.get(id))
            .cloned())
    }
}

impl StoreRead for MemoryTxn<'_> {
    fn ingredient(&self, id: IngredientId) -> Result<Option<Ingredient>, BrewlineError> {
        self.state.ingredient(id)
    }

    fn ingredients(&self) -> Result<Vec<Ingredient>, BrewlineError> {
        self.state.ingredients()
    }

    fn menu_item(&self, id: MenuItemId) -> Result<Option<MenuItem>, BrewlineError> {
        self.state.menu_item(id)
    }

    fn recipe(&self, menu_item: MenuItemId) -> Result<Vec<RecipeRequirement>, BrewlineError> {
        self.state.recipe(menu_item)
    }

    fn order(&self, id: OrderId) -> Result<Option<Order>, BrewlineError> {
        self.state.order(id)
    }

    fn status_history(&self, order: OrderId) -> Result<Vec<StatusChange>, BrewlineError> {
        self.state.status_history(order)
    }

    fn movements_for_order(&self, order: OrderId) -> Result<Vec<MovementRecord>, BrewlineError> {
        self.state.movements_for_order(order)
    }

    fn movements_for_ingredient(
        &self,
        ingredient: IngredientId,
    ) -> Result<Vec<MovementRecord>, BrewlineError> {
        self.state.movements_for_ingredient(ingredient)
    }

    fn usage_record(
        &self,
        order: OrderId,
        ingredient: IngredientId,
    ) -> Result<Option<MovementRecord>, BrewlineError> {
        self.state.usage_record(order, ingredient)
    }

    fn restock_record(
        &self,
        order: OrderId,
        ingredient: IngredientId,
    ) -> Result<Option<MovementRecord>, BrewlineError> {
        self.state.restock_record(order, ingredient)
    }

    fn customer(&self, id: CustomerId) -> Result<Option<Customer>, BrewlineError> {
        self.state.customer(id)
    }

    fn loyalty_entries(
        &self,
        customer: CustomerId,
    ) -> Result<Vec<LoyaltyLedgerEntry>, BrewlineError> {
        self.state.loyalty_entries(customer)
    }

    fn loyalty_entry_for_order(
        &self,
        order: OrderId,
        kind: LoyaltyKind,
    ) -> Result<Option<LoyaltyLedgerEntry>, BrewlineError> {
        self.state.loyalty_entry_for_order(order, kind)
    }
}

impl StoreTxn for MemoryTxn<'_> {
    fn lock_ingredient(&mut self, id: IngredientId) -> Result<Option<Ingredient>, BrewlineError> {
        // The transaction already holds the store mutex.
        self.state.ingredient(id)
    }

    fn put_ingredient(
        &mut self,
        ingredient: &Ingredient,
        _token: StockToken,
    ) -> Result<(), BrewlineError> {
        let previous = self
            .state
            .ingredients
            .insert(ingredient.id, ingredient.clone());
        self.undo.push(Undo::Ingredient(ingredient.id, previous));
        Ok(())
    }

    fn put_menu_item(&mut self, item: &MenuItem) -> Result<(), BrewlineError> {
        let previous = self.state.menu_items.insert(item.id, item.clone());
        self.undo.push(Undo::MenuItem(item.id, previous));
        Ok(())
    }

    fn put_recipe(
        &mut self,
        menu_item: MenuItemId,
        requirements: &[RecipeRequirement],
    ) -> Result<(), BrewlineError> {
        let recipe = requirements
            .iter()
            .map(|req| (req.ingredient_id, req.clone()))
            .collect();
        let previous = self.state.recipes.insert(menu_item, recipe);
        self.undo.push(Undo::Recipe(menu_item, previous));
        Ok(())
    }

    fn next_id(&mut self, sequence: Sequence) -> Result<u64, BrewlineError> {
        let previous = self.state.sequences.get(&sequence).copied();
        let next = previous
            .unwrap_or(0)
            .checked_add(1)
            .ok_or(BrewlineError::Overflow("id sequence"))?;
        self.state.sequences.insert(sequence, next);
        self.undo.push(Undo::Sequence(sequence, previous));
        Ok(next)
    }

    fn insert_order(&mut self, order: &Order) -> Result<(), BrewlineError> {
        if self.state.orders.contains_key(&order.id) {
            return Err(BrewlineError::DuplicateOrder(order.id));
        }
        self.state.orders.insert(order.id, order.clone());
        self.undo.push(Undo::Order(order.id, None));
        Ok(())
    }

    fn compare_and_set_order(
        &mut self,
        expected: OrderStatus,
        order: &Order,
    ) -> Result<(), BrewlineError> {
        let current = self
            .state
            .orders
            .get(&order.id)
            .ok_or(BrewlineError::OrderNotFound(order.id))?;
        if current.status != expected {
            return Err(BrewlineError::StatusConflict {
                order: order.id,
                expected,
                actual: current.status,
            });
        }
        let previous = self.state.orders.insert(order.id, order.clone());
        self.undo.push(Undo::Order(order.id, previous));
        Ok(())
    }

    fn append_status_change(
        &mut self,
        mut change: StatusChange,
    ) -> Result<StatusChange, BrewlineError> {
        let history = self.state.history.entry(change.order_id).or_default();
        change.seq = u32::try_from(history.len())
            .map_err(|_| BrewlineError::Overflow("status history"))?;
        history.push(change.clone());
        self.undo.push(Undo::History(change.order_id));
        Ok(change)
    }

    fn append_movement(&mut self, draft: MovementDraft) -> Result<MovementRecord, BrewlineError> {
        let slot = draft
            .order_id
            .map(|order| (order, draft.ingredient_id))
            .filter(|_| matches!(draft.kind, MovementKind::Usage | MovementKind::Restock));
        if let Some(key) = slot {
            let index = match draft.kind {
                MovementKind::Usage => &self.state.usage_index,
                _ => &self.state.restock_index,
            };
            check_unique_movement(self.state.movement_at(index.get(&key)), &draft)?;
        }

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
        if let Some(key) = slot {
            match record.kind {
                MovementKind::Usage => self.state.usage_index.insert(key, id),
                _ => self.state.restock_index.insert(key, id),
            };
        }
        self.state.movements.insert(id, record.clone());
        self.undo.push(Undo::Movement {
            id,
            slot: slot.map(|key| (record.kind, key)),
        });
        Ok(record)
    }

    fn put_customer(&mut self, customer: &Customer) -> Result<(), BrewlineError> {
        let previous = self.state.customers.insert(customer.id, customer.clone());
        self.undo.push(Undo::Customer(customer.id, previous));
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
        if let Some(key) = unique_key {
            if self.state.loyalty_order_index.contains_key(&key) {
                return Err(BrewlineError::DuplicateLoyaltyEntry {
                    order: key.0,
                    kind: key.1,
                });
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
        if let Some(key) = unique_key {
            self.state.loyalty_order_index.insert(key, id);
        }
        self.state.loyalty.insert(id, entry.clone());
        self.undo.push(Undo::Loyalty {
            id,
            slot: unique_key,
        });
        Ok(entry)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::stock::StockStore;
    use crate::{NewIngredient, Quantity};
    use std::panic::{AssertUnwindSafe, catch_unwind};

    const MILK: IngredientId = IngredientId(1);

    fn store_with_milk() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .write(|txn| {
                StockStore::register(
                    txn,
                    NewIngredient::new(MILK, "Milk", "l").with_quantity(Quantity::from_units(10)),
                )
            })
            .unwrap();
        store
    }

    fn milk(store: &MemoryStore) -> Quantity {
        store.read(|r| r.ingredient(MILK)).unwrap().unwrap().quantity
    }

    #[test]
    fn failed_write_leaves_no_trace() {
        let store = MemoryStore::new();
        let result = store.write(|txn| {
            StockStore::register(
                txn,
                NewIngredient::new(MILK, "Milk", "l").with_quantity(Quantity::from_units(10)),
            )?;
            txn.put_customer(&Customer::new(CustomerId(1), "Alice"))?;
            Err::<(), _>(BrewlineError::InvalidInput("abort".to_string()))
        });
        assert!(result.is_err());

        assert!(store.read(|r| r.ingredient(MILK)).unwrap().is_none());
        assert!(store.read(|r| r.customer(CustomerId(1))).unwrap().is_none());
        assert!(store.read(|r| r.movements_for_ingredient(MILK)).unwrap().is_empty());

        // The movement sequence was rolled back too.
        let store = store_with_milk();
        let opening = store.read(|r| r.movements_for_ingredient(MILK)).unwrap();
        assert_eq!(opening[0].id, MovementId(1));
    }

    #[test]
    fn failed_write_restores_overwritten_rows() {
        let store = store_with_milk();
        let result = store.write(|txn| {
            StockStore::restock(txn, MILK, Quantity::from_units(5), None, "delivery")?;
            StockStore::restock(txn, MILK, Quantity::from_milli(0), None, "empty delivery")
        });
        assert!(matches!(result, Err(BrewlineError::InvalidInput(_))));
        assert_eq!(milk(&store), Quantity::from_units(10));
        assert_eq!(store.read(|r| r.movements_for_ingredient(MILK)).unwrap().len(), 1);

        let movement = store
            .write(|txn| StockStore::restock(txn, MILK, Quantity::from_units(5), None, "delivery"))
            .unwrap();
        assert_eq!(movement.id, MovementId(2));
        assert_eq!(milk(&store), Quantity::from_units(15));
    }

    #[test]
    fn order_linked_slot_freed_on_rollback() {
        let store = store_with_milk();
        let order = OrderId(7);
        let result = store.write(|txn| {
            StockStore::restock(txn, MILK, Quantity::from_units(1), Some(order), "return")?;
            Err::<(), _>(BrewlineError::InvalidInput("abort".to_string()))
        });
        assert!(result.is_err());
        assert!(store.read(|r| r.restock_record(order, MILK)).unwrap().is_none());

        store
            .write(|txn| StockStore::restock(txn, MILK, Quantity::from_units(1), Some(order), "return"))
            .unwrap();
        assert!(store.read(|r| r.restock_record(order, MILK)).unwrap().is_some());
    }

    #[test]
    fn panicking_write_is_rolled_back() {
        let store = store_with_milk();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            store.write(|txn| -> Result<(), BrewlineError> {
                StockStore::restock(txn, MILK, Quantity::from_units(5), None, "delivery")?;
                panic!("closure failed mid-transaction");
            })
        }));
        assert!(outcome.is_err());
        assert_eq!(milk(&store), Quantity::from_units(10));
        assert_eq!(store.read(|r| r.movements_for_ingredient(MILK)).unwrap().len(), 1);
    }
}
