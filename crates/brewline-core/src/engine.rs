//! # Engine
//!
//! In-process entry point combining the store, settings and event emitter.
//!
//! Each public method runs exactly one store transaction and publishes its
//! events only after that transaction has committed. Failed operations
//! leave stock, ledgers and orders untouched and publish nothing.

use crate::deduction::{Deduction, DeductionEngine};
use crate::events::{BrewlineEvent, EventEmitter, NoopEmitter};
use crate::fulfillment::{FulfillmentReport, FulfillmentValidator};
use crate::ledger::{MovementLedger, ReconciliationReport};
use crate::loyalty::LoyaltyAccrual;
use crate::primitives::MAX_NAME_LENGTH;
use crate::settings::{SettingsProvider, StaticSettings};
use crate::state_machine::{OrderStateMachine, PaymentOutcome, TransitionOutcome};
use crate::stock::StockStore;
use crate::storage::{StorageBackend, StoreTxn};
use crate::{
    Actor, BrewlineError, Catalog, CatalogMenuItem, Customer, CustomerId, ErrorKind,
    ImportSummary, Ingredient, IngredientDetails, IngredientId, LineItem, LoyaltyLedgerEntry,
    MenuItem, MovementRecord, NewIngredient, NewOrder, Order, OrderId, OrderStatus, PaymentEvent,
    Quantity, RecipeRequirement, StatusChange,
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Log a failed operation at a level matching its error kind.
fn observe<T>(
    operation: &'static str,
    result: Result<T, BrewlineError>,
) -> Result<T, BrewlineError> {
    if let Err(e) = &result {
        match e.kind() {
            ErrorKind::Integrity => {
                tracing::error!(operation, error = %e, "integrity violation, transaction aborted");
            }
            ErrorKind::Storage => tracing::error!(operation, error = %e, "storage failure"),
            ErrorKind::Conflict => tracing::warn!(operation, error = %e, "concurrent update"),
            ErrorKind::Validation | ErrorKind::NotFound => {
                tracing::debug!(operation, error = %e, "request rejected");
            }
        }
    }
    result
}

fn check_menu_item(item: &MenuItem, recipe: &[RecipeRequirement]) -> Result<(), BrewlineError> {
    if item.name.trim().is_empty() || item.name.len() > MAX_NAME_LENGTH {
        return Err(BrewlineError::InvalidInput(format!(
            "menu item name must be 1 to {} bytes",
            MAX_NAME_LENGTH
        )));
    }
    let mut seen = BTreeSet::new();
    for requirement in recipe {
        if requirement.menu_item_id != item.id {
            return Err(BrewlineError::InvalidInput(format!(
                "recipe row for {} attached to menu item {}",
                requirement.menu_item_id, item.id
            )));
        }
        if !requirement.required_amount.is_positive() {
            return Err(BrewlineError::InvalidInput(format!(
                "required amount of ingredient {} must be positive",
                requirement.ingredient_id
            )));
        }
        if !seen.insert(requirement.ingredient_id) {
            return Err(BrewlineError::InvalidInput(format!(
                "ingredient {} listed twice in recipe of {}",
                requirement.ingredient_id, item.id
            )));
        }
    }
    Ok(())
}

fn store_menu_item(
    txn: &mut dyn StoreTxn,
    item: &MenuItem,
    recipe: &[RecipeRequirement],
) -> Result<(), BrewlineError> {
    for requirement in recipe {
        if txn.ingredient(requirement.ingredient_id)?.is_none() {
            return Err(BrewlineError::UnknownIngredient(requirement.ingredient_id));
        }
    }
    txn.put_menu_item(item)?;
    txn.put_recipe(item.id, recipe)
}

fn check_customer(customer: &Customer) -> Result<(), BrewlineError> {
    if customer.name.len() > MAX_NAME_LENGTH {
        return Err(BrewlineError::InvalidInput(format!(
            "customer name exceeds {} bytes",
            MAX_NAME_LENGTH
        )));
    }
    Ok(())
}

fn store_customer(txn: &mut dyn StoreTxn, customer: Customer) -> Result<(), BrewlineError> {
    // Opening balances go through the ledger like any other change.
    let opening = customer.points_balance;
    let id = customer.id;
    txn.put_customer(&Customer {
        points_balance: 0,
        ..customer
    })?;
    if opening > 0 {
        let delta =
            i64::try_from(opening).map_err(|_| BrewlineError::Overflow("loyalty points"))?;
        LoyaltyAccrual::adjust(txn, id, delta, "opening balance")?;
    }
    Ok(())
}

/// Order fulfillment and inventory consistency engine.
pub struct Engine {
    store: StorageBackend,
    settings: Arc<dyn SettingsProvider>,
    events: Arc<dyn EventEmitter>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(StorageBackend::default())
    }
}

impl Engine {
    /// Engine over `store` with default settings and no event sink.
    #[must_use]
    pub fn new(store: StorageBackend) -> Self {
        Self {
            store,
            settings: Arc::new(StaticSettings::default()),
            events: Arc::new(NoopEmitter),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_emitter(mut self, events: Arc<dyn EventEmitter>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn store(&self) -> &StorageBackend {
        &self.store
    }

    fn publish(&self, events: impl IntoIterator<Item = BrewlineEvent>) {
        for event in events {
            if let Err(e) = self.events.emit(&event) {
                tracing::warn!(event = event.name(), error = %e, "event emission failed");
            }
        }
    }

    fn inventory_changed(ingredients: impl IntoIterator<Item = IngredientId>) -> Option<BrewlineEvent> {
        let ingredients: Vec<_> = ingredients.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        (!ingredients.is_empty()).then_some(BrewlineEvent::InventoryChanged { ingredients })
    }

    fn order_updated(order: &Order) -> BrewlineEvent {
        BrewlineEvent::OrderUpdated {
            order_id: order.id,
            status: order.status,
            payment_status: order.payment_status,
        }
    }

    // =========================================================================
    // CATALOG
    // =========================================================================

    pub fn register_ingredient(&self, new: NewIngredient) -> Result<Ingredient, BrewlineError> {
        let (ingredient, opening) = observe(
            "register_ingredient",
            self.store.write(|txn| StockStore::register(txn, new)),
        )?;
        if opening.is_some() {
            self.publish(Self::inventory_changed([ingredient.id]));
        }
        Ok(ingredient)
    }

    pub fn update_ingredient_details(
        &self,
        id: IngredientId,
        details: IngredientDetails,
    ) -> Result<Ingredient, BrewlineError> {
        let ingredient = observe(
            "update_ingredient_details",
            self.store
                .write(|txn| StockStore::update_details(txn, id, details)),
        )?;
        self.publish(Self::inventory_changed([id]));
        Ok(ingredient)
    }

    /// Store a menu item and replace its recipe.
    pub fn register_menu_item(
        &self,
        item: MenuItem,
        recipe: Vec<RecipeRequirement>,
    ) -> Result<(), BrewlineError> {
        check_menu_item(&item, &recipe)?;
        observe(
            "register_menu_item",
            self.store.write(|txn| store_menu_item(txn, &item, &recipe)),
        )
    }

    pub fn register_customer(&self, customer: Customer) -> Result<(), BrewlineError> {
        check_customer(&customer)?;
        observe(
            "register_customer",
            self.store.write(|txn| {
                if txn.customer(customer.id)?.is_some() {
                    return Err(BrewlineError::InvalidInput(format!(
                        "customer {} is already registered",
                        customer.id
                    )));
                }
                store_customer(txn, customer)
            }),
        )
    }

    /// Load a catalog in one transaction.
    ///
    /// Existing ingredients get their details updated; their stock is left
    /// to restock and adjust. Menu items and recipes are replaced. Existing
    /// customers are skipped. Any invalid entry aborts the whole import.
    pub fn import_catalog(&self, catalog: Catalog) -> Result<ImportSummary, BrewlineError> {
        let Catalog {
            ingredients,
            menu_items,
            customers,
        } = catalog;
        let menu: Vec<_> = menu_items
            .into_iter()
            .map(CatalogMenuItem::into_parts)
            .collect();
        for (item, recipe) in &menu {
            check_menu_item(item, recipe)?;
        }
        for customer in &customers {
            check_customer(customer)?;
        }

        let (summary, touched) = observe(
            "import_catalog",
            self.store.write(|txn| {
                let mut summary = ImportSummary::default();
                let mut touched = Vec::with_capacity(ingredients.len());
                for new in ingredients {
                    touched.push(new.id);
                    if txn.ingredient(new.id)?.is_some() {
                        StockStore::update_details(txn, new.id, new.details)?;
                        summary.ingredients_updated += 1;
                    } else {
                        StockStore::register(txn, new)?;
                        summary.ingredients_created += 1;
                    }
                }
                for (item, recipe) in &menu {
                    store_menu_item(txn, item, recipe)?;
                    summary.menu_items += 1;
                }
                for customer in customers {
                    if txn.customer(customer.id)?.is_some() {
                        summary.customers_skipped += 1;
                    } else {
                        store_customer(txn, customer)?;
                        summary.customers_created += 1;
                    }
                }
                Ok((summary, touched))
            }),
        )?;

        tracing::info!(
            ingredients_created = summary.ingredients_created,
            ingredients_updated = summary.ingredients_updated,
            menu_items = summary.menu_items,
            customers_created = summary.customers_created,
            "catalog imported"
        );
        self.publish(Self::inventory_changed(touched));
        Ok(summary)
    }

    // =========================================================================
    // STOCK
    // =========================================================================

    pub fn ingredient(&self, id: IngredientId) -> Result<Ingredient, BrewlineError> {
        self.store
            .read(|r| r.ingredient(id))?
            .ok_or(BrewlineError::IngredientNotFound(id))
    }

    pub fn ingredients(&self) -> Result<Vec<Ingredient>, BrewlineError> {
        self.store.read(|r| r.ingredients())
    }

    pub fn low_stock(&self) -> Result<Vec<Ingredient>, BrewlineError> {
        self.store.read(|r| StockStore::low_stock(r))
    }

    pub fn movements_for_ingredient(
        &self,
        id: IngredientId,
    ) -> Result<Vec<MovementRecord>, BrewlineError> {
        self.store.read(|r| {
            if r.ingredient(id)?.is_none() {
                return Err(BrewlineError::IngredientNotFound(id));
            }
            r.movements_for_ingredient(id)
        })
    }

    pub fn restock(
        &self,
        id: IngredientId,
        amount: Quantity,
        notes: impl Into<String>,
    ) -> Result<MovementRecord, BrewlineError> {
        let notes = notes.into();
        let movement = observe(
            "restock",
            self.store
                .write(|txn| StockStore::restock(txn, id, amount, None, notes)),
        )?;
        self.publish(Self::inventory_changed([id]));
        Ok(movement)
    }

    pub fn adjust_stock(
        &self,
        id: IngredientId,
        new_quantity: Quantity,
        notes: impl Into<String>,
    ) -> Result<MovementRecord, BrewlineError> {
        let notes = notes.into();
        let movement = observe(
            "adjust_stock",
            self.store
                .write(|txn| StockStore::adjust(txn, id, new_quantity, notes)),
        )?;
        self.publish(Self::inventory_changed([id]));
        Ok(movement)
    }

    // =========================================================================
    // ORDERS
    // =========================================================================

    /// Advisory availability check, outside any lock.
    pub fn check_fulfillment(
        &self,
        line_items: &[LineItem],
    ) -> Result<FulfillmentReport, BrewlineError> {
        observe(
            "check_fulfillment",
            self.store
                .read(|r| FulfillmentValidator::check(r, line_items)),
        )
    }

    /// Checkout: validate, check availability, insert as `pending`.
    pub fn place_order(&self, new: NewOrder, actor: Actor) -> Result<Order, BrewlineError> {
        let report = observe(
            "place_order",
            self.store.read(|r| {
                OrderStateMachine::quote(r, &new)?;
                FulfillmentValidator::check(r, &new.line_items)
            }),
        )?;
        if !report.can_fulfill {
            tracing::info!(
                shortfalls = report.shortfalls.len(),
                "checkout rejected: insufficient stock"
            );
            return Err(BrewlineError::Unfulfillable(report.shortfalls));
        }

        let (order, _) = observe(
            "place_order",
            self.store
                .write(|txn| OrderStateMachine::accept(txn, new, actor)),
        )?;
        self.publish([Self::order_updated(&order)]);
        Ok(order)
    }

    pub fn order(&self, id: OrderId) -> Result<Order, BrewlineError> {
        self.store
            .read(|r| r.order(id))?
            .ok_or(BrewlineError::OrderNotFound(id))
    }

    pub fn status_history(&self, id: OrderId) -> Result<Vec<StatusChange>, BrewlineError> {
        self.store.read(|r| {
            if r.order(id)?.is_none() {
                return Err(BrewlineError::OrderNotFound(id));
            }
            r.status_history(id)
        })
    }

    pub fn movements_for_order(&self, id: OrderId) -> Result<Vec<MovementRecord>, BrewlineError> {
        self.store.read(|r| {
            if r.order(id)?.is_none() {
                return Err(BrewlineError::OrderNotFound(id));
            }
            r.movements_for_order(id)
        })
    }

    /// Move an order to `to` from whatever status it is in now.
    pub fn transition(
        &self,
        id: OrderId,
        to: OrderStatus,
        actor: Actor,
    ) -> Result<TransitionOutcome, BrewlineError> {
        self.run_transition(id, None, to, actor)
    }

    /// Move an order to `to` only if it is still in `from`.
    pub fn transition_from(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        actor: Actor,
    ) -> Result<TransitionOutcome, BrewlineError> {
        self.run_transition(id, Some(from), to, actor)
    }

    fn run_transition(
        &self,
        id: OrderId,
        expected: Option<OrderStatus>,
        to: OrderStatus,
        actor: Actor,
    ) -> Result<TransitionOutcome, BrewlineError> {
        let loyalty = self.settings.loyalty();
        let outcome = observe(
            "transition",
            self.store.write(|txn| {
                OrderStateMachine::transition(txn, id, expected, to, actor, loyalty)
            }),
        )?;
        let stock = Self::inventory_changed(outcome.touched_ingredients());
        self.publish(stock.into_iter().chain([Self::order_updated(&outcome.order)]));
        Ok(outcome)
    }

    /// Run the deduction engine directly, outside a status transition.
    pub fn deduct(&self, id: OrderId) -> Result<Deduction, BrewlineError> {
        let deduction = observe(
            "deduct",
            self.store.write(|txn| DeductionEngine::deduct(txn, id)),
        )?;
        self.publish(Self::inventory_changed(
            deduction.movements().iter().map(|m| m.ingredient_id),
        ));
        Ok(deduction)
    }

    pub fn record_payment(
        &self,
        id: OrderId,
        event: PaymentEvent,
        actor: Actor,
    ) -> Result<PaymentOutcome, BrewlineError> {
        let outcome = observe(
            "record_payment",
            self.store
                .write(|txn| OrderStateMachine::apply_payment(txn, id, event, actor)),
        )?;
        self.publish([Self::order_updated(&outcome.order)]);
        Ok(outcome)
    }

    // =========================================================================
    // LOYALTY
    // =========================================================================

    pub fn customer(&self, id: CustomerId) -> Result<Customer, BrewlineError> {
        self.store
            .read(|r| r.customer(id))?
            .ok_or(BrewlineError::CustomerNotFound(id))
    }

    pub fn loyalty_entries(&self, id: CustomerId) -> Result<Vec<LoyaltyLedgerEntry>, BrewlineError> {
        self.store.read(|r| {
            if r.customer(id)?.is_none() {
                return Err(BrewlineError::CustomerNotFound(id));
            }
            r.loyalty_entries(id)
        })
    }

    pub fn redeem_points(
        &self,
        customer: CustomerId,
        points: u64,
        order: Option<OrderId>,
    ) -> Result<LoyaltyLedgerEntry, BrewlineError> {
        observe(
            "redeem_points",
            self.store.write(|txn| {
                if let Some(order) = order {
                    if txn.order(order)?.is_none() {
                        return Err(BrewlineError::OrderNotFound(order));
                    }
                }
                LoyaltyAccrual::redeem(txn, customer, points, order)
            }),
        )
    }

    pub fn adjust_points(
        &self,
        customer: CustomerId,
        delta: i64,
        notes: impl Into<String>,
    ) -> Result<LoyaltyLedgerEntry, BrewlineError> {
        let notes = notes.into();
        observe(
            "adjust_points",
            self.store
                .write(|txn| LoyaltyAccrual::adjust(txn, customer, delta, notes)),
        )
    }

    // =========================================================================
    // AUDIT
    // =========================================================================

    /// Replay the movement ledger against stored stock.
    pub fn reconcile(&self) -> Result<ReconciliationReport, BrewlineError> {
        observe(
            "reconcile",
            self.store.read(|r| MovementLedger::reconcile(r)),
        )
    }
}
