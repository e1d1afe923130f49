//! # Catalog Records
//!
//! Ingredients, menu items, recipes and customers. The catalog itself is
//! owned by external CRUD; the engine only reads it, except for
//! `Ingredient::quantity`, which only the stock module writes.

use super::{CustomerId, IngredientId, MenuItemId, Money, Quantity};
use serde::{Deserialize, Serialize};

/// A stocked ingredient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: IngredientId,
    pub name: String,
    pub category: String,
    /// Unit of measure ("l", "kg", "pcs"). Quantities are thousandths of it.
    pub unit: String,
    /// Current stock. Authoritative, never negative.
    #[serde(rename = "quantity_milli")]
    pub quantity: Quantity,
    #[serde(rename = "reorder_level_milli")]
    pub reorder_level: Quantity,
    #[serde(rename = "cost_per_unit_cents")]
    pub cost_per_unit: Money,
    pub is_available: bool,
}

impl Ingredient {
    /// Whether stock has fallen to or below the reorder level.
    #[must_use]
    pub fn needs_reorder(&self) -> bool {
        self.quantity <= self.reorder_level
    }

    /// Descriptive fields, without the stock level.
    #[must_use]
    pub fn details(&self) -> IngredientDetails {
        IngredientDetails {
            name: self.name.clone(),
            category: self.category.clone(),
            unit: self.unit.clone(),
            reorder_level: self.reorder_level,
            cost_per_unit: self.cost_per_unit,
            is_available: self.is_available,
        }
    }
}

/// Everything about an ingredient except its quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientDetails {
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub unit: String,
    #[serde(rename = "reorder_level_milli", default)]
    pub reorder_level: Quantity,
    #[serde(rename = "cost_per_unit_cents", default)]
    pub cost_per_unit: Money,
    #[serde(default = "available")]
    pub is_available: bool,
}

fn available() -> bool {
    true
}

/// Catalog entry for a new ingredient, with its opening stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIngredient {
    pub id: IngredientId,
    #[serde(flatten)]
    pub details: IngredientDetails,
    /// Opening stock, recorded as a `manual_adjustment` from zero.
    #[serde(rename = "quantity_milli", default)]
    pub quantity: Quantity,
}

impl NewIngredient {
    #[must_use]
    pub fn new(id: IngredientId, name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            id,
            details: IngredientDetails {
                name: name.into(),
                category: String::new(),
                unit: unit.into(),
                reorder_level: Quantity::ZERO,
                cost_per_unit: Money::ZERO,
                is_available: true,
            },
            quantity: Quantity::ZERO,
        }
    }

    #[must_use]
    pub fn with_quantity(mut self, quantity: Quantity) -> Self {
        self.quantity = quantity;
        self
    }

    #[must_use]
    pub fn with_reorder_level(mut self, level: Quantity) -> Self {
        self.details.reorder_level = level;
        self
    }
}

/// A sellable menu item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: MenuItemId,
    pub name: String,
    #[serde(rename = "price_cents")]
    pub price: Money,
    #[serde(default = "available")]
    pub is_available: bool,
}

/// Amount of one ingredient needed for one unit of a menu item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeRequirement {
    pub menu_item_id: MenuItemId,
    pub ingredient_id: IngredientId,
    #[serde(rename = "required_amount_milli")]
    pub required_amount: Quantity,
    /// Only consumed when the customer selects it as a customization.
    #[serde(default)]
    pub is_optional: bool,
}

/// A loyalty customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    #[serde(default)]
    pub points_balance: u64,
}

impl Customer {
    #[must_use]
    pub fn new(id: CustomerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            points_balance: 0,
        }
    }
}

// =============================================================================
// CATALOG IMPORT
// =============================================================================

/// A catalog document. All sections are optional.
///
/// The engine loads it in one transaction: either every entry lands or
/// nothing does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub ingredients: Vec<NewIngredient>,
    pub menu_items: Vec<CatalogMenuItem>,
    pub customers: Vec<Customer>,
}

/// A menu item together with its recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogMenuItem {
    #[serde(flatten)]
    pub item: MenuItem,
    #[serde(default)]
    pub recipe: Vec<CatalogRequirement>,
}

impl CatalogMenuItem {
    /// Split into the menu item and its recipe rows.
    #[must_use]
    pub fn into_parts(self) -> (MenuItem, Vec<RecipeRequirement>) {
        let id = self.item.id;
        let recipe = self
            .recipe
            .into_iter()
            .map(|r| RecipeRequirement {
                menu_item_id: id,
                ingredient_id: r.ingredient_id,
                required_amount: r.required_amount,
                is_optional: r.is_optional,
            })
            .collect();
        (self.item, recipe)
    }
}

/// A recipe row inside a catalog menu item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRequirement {
    pub ingredient_id: IngredientId,
    #[serde(rename = "required_amount_milli")]
    pub required_amount: Quantity,
    #[serde(default)]
    pub is_optional: bool,
}

/// Counts of what an import created or updated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub ingredients_created: usize,
    pub ingredients_updated: usize,
    pub menu_items: usize,
    pub customers_created: usize,
    pub customers_skipped: usize,
}
