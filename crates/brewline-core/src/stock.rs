//! # Stock Store
//!
//! The single write path for `Ingredient::quantity`.
//!
//! Every quantity change goes through one of the functions below, which
//! write the new row and append the matching movement in the same
//! transaction. Storage backends only accept ingredient writes carrying a
//! [`StockToken`], and only this module can mint one.

use crate::primitives::MAX_NAME_LENGTH;
use crate::storage::{StoreRead, StoreTxn};
use crate::{
    BrewlineError, Ingredient, IngredientDetails, IngredientId, MovementDraft, MovementKind,
    MovementRecord, NewIngredient, OrderId, Quantity,
};

/// Capability required by [`StoreTxn::put_ingredient`].
///
/// Not `Clone`: each row write consumes a fresh token.
#[derive(Debug)]
pub struct StockToken(());

fn token() -> StockToken {
    StockToken(())
}

/// Row-locked stock access.
pub struct StockStore;

impl StockStore {
    /// Read an ingredient for update, failing if it does not exist.
    pub fn lock(txn: &mut dyn StoreTxn, id: IngredientId) -> Result<Ingredient, BrewlineError> {
        txn.lock_ingredient(id)?
            .ok_or(BrewlineError::IngredientNotFound(id))
    }

    /// Create an ingredient. Opening stock is recorded as a
    /// `manual_adjustment` from zero so the ledger replays from a zero baseline.
    pub fn register(
        txn: &mut dyn StoreTxn,
        new: NewIngredient,
    ) -> Result<(Ingredient, Option<MovementRecord>), BrewlineError> {
        validate_details(&new.details)?;
        if new.quantity.is_negative() {
            return Err(BrewlineError::InvalidInput(format!(
                "opening stock of ingredient {} cannot be negative",
                new.id
            )));
        }
        if txn.lock_ingredient(new.id)?.is_some() {
            return Err(BrewlineError::InvalidInput(format!(
                "ingredient {} is already registered",
                new.id
            )));
        }

        let ingredient = Ingredient {
            id: new.id,
            name: new.details.name,
            category: new.details.category,
            unit: new.details.unit,
            quantity: new.quantity,
            reorder_level: new.details.reorder_level,
            cost_per_unit: new.details.cost_per_unit,
            is_available: new.details.is_available,
        };
        txn.put_ingredient(&ingredient, token())?;

        let opening = if new.quantity.is_positive() {
            Some(txn.append_movement(MovementDraft {
                ingredient_id: ingredient.id,
                kind: MovementKind::ManualAdjustment,
                amount: new.quantity,
                quantity_before: Quantity::ZERO,
                quantity_after: new.quantity,
                order_id: None,
                notes: "opening stock".to_string(),
            })?)
        } else {
            None
        };
        Ok((ingredient, opening))
    }

    /// Replace the descriptive fields of an ingredient. Quantity is kept.
    pub fn update_details(
        txn: &mut dyn StoreTxn,
        id: IngredientId,
        details: IngredientDetails,
    ) -> Result<Ingredient, BrewlineError> {
        validate_details(&details)?;
        let current = Self::lock(txn, id)?;
        let updated = Ingredient {
            id,
            name: details.name,
            category: details.category,
            unit: details.unit,
            quantity: current.quantity,
            reorder_level: details.reorder_level,
            cost_per_unit: details.cost_per_unit,
            is_available: details.is_available,
        };
        txn.put_ingredient(&updated, token())?;
        Ok(updated)
    }

    /// Add stock. With `order` set this is the compensating restock of a
    /// cancelled order, unique per (order, ingredient).
    pub fn restock(
        txn: &mut dyn StoreTxn,
        id: IngredientId,
        amount: Quantity,
        order: Option<OrderId>,
        notes: impl Into<String>,
    ) -> Result<MovementRecord, BrewlineError> {
        if !amount.is_positive() {
            return Err(BrewlineError::InvalidInput(format!(
                "restock amount for ingredient {} must be positive",
                id
            )));
        }
        let mut ingredient = Self::lock(txn, id)?;
        let before = ingredient.quantity;
        ingredient.quantity = before
            .checked_add(amount)
            .ok_or(BrewlineError::Overflow("restocked quantity"))?;
        txn.put_ingredient(&ingredient, token())?;
        txn.append_movement(MovementDraft {
            ingredient_id: id,
            kind: MovementKind::Restock,
            amount,
            quantity_before: before,
            quantity_after: ingredient.quantity,
            order_id: order,
            notes: notes.into(),
        })
    }

    /// Set stock to a counted value.
    pub fn adjust(
        txn: &mut dyn StoreTxn,
        id: IngredientId,
        new_quantity: Quantity,
        notes: impl Into<String>,
    ) -> Result<MovementRecord, BrewlineError> {
        if new_quantity.is_negative() {
            return Err(BrewlineError::InvalidInput(format!(
                "stock of ingredient {} cannot be set below zero",
                id
            )));
        }
        let mut ingredient = Self::lock(txn, id)?;
        let before = ingredient.quantity;
        ingredient.quantity = new_quantity;
        txn.put_ingredient(&ingredient, token())?;
        txn.append_movement(MovementDraft {
            ingredient_id: id,
            kind: MovementKind::ManualAdjustment,
            amount: before.distance(new_quantity),
            quantity_before: before,
            quantity_after: new_quantity,
            order_id: None,
            notes: notes.into(),
        })
    }

    /// Consume `amount` of a row the caller already locked.
    ///
    /// Callers check availability first; reaching the negative branch means
    /// that check was skipped, so it is reported as an integrity error.
    pub fn consume(
        txn: &mut dyn StoreTxn,
        mut ingredient: Ingredient,
        amount: Quantity,
        order: OrderId,
    ) -> Result<MovementRecord, BrewlineError> {
        let before = ingredient.quantity;
        let after = before
            .checked_sub(amount)
            .ok_or(BrewlineError::Overflow("deducted quantity"))?;
        if after.is_negative() {
            tracing::error!(
                ingredient_id = ingredient.id.0,
                order_id = order.0,
                before = before.milli(),
                after = after.milli(),
                "refusing to write negative stock"
            );
            return Err(BrewlineError::NegativeStock {
                ingredient: ingredient.id,
                before,
                after,
            });
        }
        ingredient.quantity = after;
        txn.put_ingredient(&ingredient, token())?;
        txn.append_movement(MovementDraft {
            ingredient_id: ingredient.id,
            kind: MovementKind::Usage,
            amount,
            quantity_before: before,
            quantity_after: after,
            order_id: Some(order),
            notes: format!("order {}", order),
        })
    }

    /// Ingredients at or below their reorder level.
    pub fn low_stock<R: StoreRead + ?Sized>(store: &R) -> Result<Vec<Ingredient>, BrewlineError> {
        Ok(store
            .ingredients()?
            .into_iter()
            .filter(Ingredient::needs_reorder)
            .collect())
    }
}

fn validate_details(details: &IngredientDetails) -> Result<(), BrewlineError> {
    if details.name.trim().is_empty() || details.name.len() > MAX_NAME_LENGTH {
        return Err(BrewlineError::InvalidInput(format!(
            "ingredient name must be 1 to {} bytes",
            MAX_NAME_LENGTH
        )));
    }
    if details.reorder_level.is_negative() {
        return Err(BrewlineError::InvalidInput(
            "reorder level cannot be negative".to_string(),
        ));
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
