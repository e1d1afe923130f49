//! # Fulfillment Validator
//!
//! Resolves an order's line items into aggregated ingredient demand and
//! compares it against current stock.
//!
//! Demand is summed per ingredient across the whole order before any
//! comparison. Checking line by line undercounts when two lines share an
//! ingredient (two lattes each needing 0.2 L of milk need 0.4 L, not 0.2 L).
//!
//! The check is advisory: it runs outside any lock. The deduction engine
//! re-resolves demand and re-validates stock inside its own transaction.

use crate::storage::StoreRead;
use crate::{BrewlineError, IngredientId, LineItem, Quantity, RecipeRequirement};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregated demand: total quantity required per ingredient.
pub type Demand = BTreeMap<IngredientId, Quantity>;

/// One ingredient whose demand exceeds supply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub ingredient_id: IngredientId,
    #[serde(rename = "required_milli")]
    pub required: Quantity,
    #[serde(rename = "available_milli")]
    pub available: Quantity,
}

/// Validator output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentReport {
    pub can_fulfill: bool,
    pub shortfalls: Vec<Shortfall>,
}

/// Sum recipe requirements across lines.
///
/// Non-optional requirements always count. Optional ones count only when
/// the line selects them as a customization.
pub fn aggregate_demand<'a>(
    lines: impl IntoIterator<Item = (&'a LineItem, &'a [RecipeRequirement])>,
) -> Result<Demand, BrewlineError> {
    let mut demand = Demand::new();
    for (line, recipe) in lines {
        for requirement in recipe {
            if requirement.is_optional && !line.customizations.contains(&requirement.ingredient_id)
            {
                continue;
            }
            let needed = requirement
                .required_amount
                .checked_mul(line.quantity)
                .ok_or(BrewlineError::Overflow("line demand"))?;
            let total = demand
                .entry(requirement.ingredient_id)
                .or_insert(Quantity::ZERO);
            *total = total
                .checked_add(needed)
                .ok_or(BrewlineError::Overflow("aggregated demand"))?;
        }
    }
    Ok(demand)
}

/// Stateless validator over a store snapshot.
pub struct FulfillmentValidator;

impl FulfillmentValidator {
    /// Resolve recipes from the store and aggregate demand.
    ///
    /// Every customization must name an optional requirement of its menu item.
    pub fn demand_for<R: StoreRead + ?Sized>(
        store: &R,
        line_items: &[LineItem],
    ) -> Result<Demand, BrewlineError> {
        let mut recipes = Vec::with_capacity(line_items.len());
        for line in line_items {
            if store.menu_item(line.menu_item_id)?.is_none() {
                return Err(BrewlineError::UnknownMenuItem(line.menu_item_id));
            }
            let recipe = store.recipe(line.menu_item_id)?;
            for selected in &line.customizations {
                let offered = recipe
                    .iter()
                    .any(|req| req.is_optional && req.ingredient_id == *selected);
                if !offered {
                    return Err(BrewlineError::InvalidOrder(format!(
                        "ingredient {} is not a customization of menu item {}",
                        selected, line.menu_item_id
                    )));
                }
            }
            recipes.push(recipe);
        }
        aggregate_demand(
            line_items
                .iter()
                .zip(recipes.iter().map(Vec::as_slice)),
        )
    }

    /// Compare aggregated demand with current stock.
    ///
    /// An ingredient flagged unavailable counts as zero stock.
    pub fn check<R: StoreRead + ?Sized>(
        store: &R,
        line_items: &[LineItem],
    ) -> Result<FulfillmentReport, BrewlineError> {
        let demand = Self::demand_for(store, line_items)?;
        let mut shortfalls = Vec::new();
        for (ingredient_id, required) in demand {
            let ingredient = store
                .ingredient(ingredient_id)?
                .ok_or(BrewlineError::UnknownIngredient(ingredient_id))?;
            let available = if ingredient.is_available {
                ingredient.quantity
            } else {
                Quantity::ZERO
            };
            if required > available {
                shortfalls.push(Shortfall {
                    ingredient_id,
                    required,
                    available,
                });
            }
        }
        Ok(FulfillmentReport {
            can_fulfill: shortfalls.is_empty(),
            shortfalls,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::MenuItemId;

    const LATTE: MenuItemId = MenuItemId(1);
    const MILK: IngredientId = IngredientId(1);
    const SYRUP: IngredientId = IngredientId(2);

    fn latte_recipe() -> Vec<RecipeRequirement> {
        vec![
            RecipeRequirement {
                menu_item_id: LATTE,
                ingredient_id: MILK,
                required_amount: Quantity::from_milli(200),
                is_optional: false,
            },
            RecipeRequirement {
                menu_item_id: LATTE,
                ingredient_id: SYRUP,
                required_amount: Quantity::from_milli(15),
                is_optional: true,
            },
        ]
    }

    #[test]
    fn demand_aggregates_across_lines() {
        let recipe = latte_recipe();
        let a = LineItem::new(LATTE, 1);
        let b = LineItem::new(LATTE, 1);
        let demand = aggregate_demand([(&a, recipe.as_slice()), (&b, recipe.as_slice())])
            .expect("aggregate");
        assert_eq!(demand.get(&MILK), Some(&Quantity::from_milli(400)));
        assert_eq!(demand.get(&SYRUP), None);
    }

    #[test]
    fn optional_requirement_counts_only_when_selected() {
        let recipe = latte_recipe();
        let line = LineItem::new(LATTE, 3).with_customization(SYRUP);
        let demand = aggregate_demand([(&line, recipe.as_slice())]).expect("aggregate");
        assert_eq!(demand.get(&MILK), Some(&Quantity::from_milli(600)));
        assert_eq!(demand.get(&SYRUP), Some(&Quantity::from_milli(45)));
    }

    #[test]
    fn overflow_is_an_error() {
        let recipe = vec![RecipeRequirement {
            menu_item_id: LATTE,
            ingredient_id: MILK,
            required_amount: Quantity(i64::MAX),
            is_optional: false,
        }];
        let line = LineItem::new(LATTE, 2);
        assert!(matches!(
            aggregate_demand([(&line, recipe.as_slice())]),
            Err(BrewlineError::Overflow(_))
        ));
    }
}
