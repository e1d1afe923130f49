//! # Property-Based Tests
//!
//! Invariants that must hold for arbitrary orders and arbitrary interleavings
//! of stock and order operations.

use brewline_core::{
    Actor, Engine, IngredientId, LineItem, MenuItem, MenuItemId, Money, MovementKind,
    NewIngredient, NewOrder, OrderId, OrderStatus, PaymentEvent, Quantity, RecipeRequirement,
    StorageBackend, aggregate_demand,
};
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::BTreeMap;

// =============================================================================
// FIXTURES
// =============================================================================

const INGREDIENTS: u64 = 4;

/// (ingredient, amount in milli-units, optional)
type RawRequirement = (u64, i64, bool);

fn recipe(menu: MenuItemId, raw: &[RawRequirement]) -> Vec<RecipeRequirement> {
    // One requirement per ingredient, as the catalog enforces.
    let mut seen = BTreeMap::new();
    for &(ingredient, amount, optional) in raw {
        seen.entry(ingredient).or_insert((amount, optional));
    }
    seen.into_iter()
        .map(|(ingredient, (amount, optional))| RecipeRequirement {
            menu_item_id: menu,
            ingredient_id: IngredientId(ingredient),
            required_amount: Quantity::from_milli(amount),
            is_optional: optional,
        })
        .collect()
}

fn requirement_strategy() -> impl Strategy<Value = RawRequirement> {
    (0..INGREDIENTS, 1i64..5_000, any::<bool>())
}

/// Engine with `stock[i]` milli-units of ingredient `i` and one menu item per recipe.
fn engine_with(stock: &[i64], recipes: &[Vec<RawRequirement>]) -> Engine {
    let engine = Engine::new(StorageBackend::in_memory());
    for (i, &quantity) in stock.iter().enumerate() {
        let id = IngredientId(i as u64);
        engine
            .register_ingredient(
                NewIngredient::new(id, format!("ingredient-{i}"), "g")
                    .with_quantity(Quantity::from_milli(quantity)),
            )
            .expect("ingredient");
    }
    for (i, raw) in recipes.iter().enumerate() {
        let menu = MenuItemId(i as u64);
        engine
            .register_menu_item(
                MenuItem {
                    id: menu,
                    name: format!("item-{i}"),
                    price: Money::from_cents(250),
                    is_available: true,
                },
                recipe(menu, raw),
            )
            .expect("menu item");
    }
    engine
}

// =============================================================================
// DEMAND AND AVAILABILITY
// =============================================================================

proptest! {
    /// Aggregated demand equals a naive per-ingredient sum.
    #[test]
    fn aggregate_demand_matches_naive_sum(
        recipes in vec(vec(requirement_strategy(), 1..4), 1..4),
        lines in vec((0usize..4, 1u32..20, any::<bool>()), 1..8),
    ) {
        let recipes: Vec<Vec<RecipeRequirement>> = recipes
            .iter()
            .enumerate()
            .map(|(i, raw)| recipe(MenuItemId(i as u64), raw))
            .collect();

        let items: Vec<(LineItem, usize)> = lines
            .iter()
            .map(|&(menu, quantity, customize)| {
                let menu = menu % recipes.len();
                let mut line = LineItem::new(MenuItemId(menu as u64), quantity);
                if customize {
                    for requirement in recipes[menu].iter().filter(|r| r.is_optional) {
                        line = line.with_customization(requirement.ingredient_id);
                    }
                }
                (line, menu)
            })
            .collect();

        let demand = aggregate_demand(
            items.iter().map(|(line, menu)| (line, recipes[*menu].as_slice())),
        ).expect("aggregate");

        let mut naive: BTreeMap<IngredientId, i64> = BTreeMap::new();
        for (line, menu) in &items {
            for requirement in &recipes[*menu] {
                if requirement.is_optional && !line.customizations.contains(&requirement.ingredient_id) {
                    continue;
                }
                *naive.entry(requirement.ingredient_id).or_insert(0) +=
                    requirement.required_amount.milli() * i64::from(line.quantity);
            }
        }

        prop_assert_eq!(demand.len(), naive.len());
        for (ingredient, total) in &naive {
            prop_assert_eq!(demand.get(ingredient).map(|q| q.milli()), Some(*total));
        }
    }

    /// The validator reports fulfillable exactly when every demand fits in stock.
    #[test]
    fn can_fulfill_iff_demand_fits(
        stock in vec(0i64..50_000, INGREDIENTS as usize),
        recipes in vec(vec(requirement_strategy(), 1..4), 1..4),
        lines in vec((0usize..4, 1u32..10), 1..6),
    ) {
        let engine = engine_with(&stock, &recipes);
        let line_items: Vec<LineItem> = lines
            .iter()
            .map(|&(menu, quantity)| LineItem::new(MenuItemId((menu % recipes.len()) as u64), quantity))
            .collect();

        let report = engine.check_fulfillment(&line_items).expect("check");

        let mut demand: BTreeMap<u64, i64> = BTreeMap::new();
        for line in &line_items {
            let raw = &recipes[line.menu_item_id.0 as usize];
            for requirement in recipe(line.menu_item_id, raw) {
                if requirement.is_optional {
                    continue;
                }
                *demand.entry(requirement.ingredient_id.0).or_insert(0) +=
                    requirement.required_amount.milli() * i64::from(line.quantity);
            }
        }
        let fits = demand.iter().all(|(&i, &needed)| needed <= stock[i as usize]);

        prop_assert_eq!(report.can_fulfill, fits);
        prop_assert_eq!(report.shortfalls.is_empty(), fits);
        for shortfall in &report.shortfalls {
            prop_assert!(shortfall.required > shortfall.available);
        }
    }
}

// =============================================================================
// OPERATION SEQUENCES
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Place { menu: usize, quantity: u32 },
    Verify(usize),
    Ready(usize),
    Complete(usize),
    Cancel(usize),
    Refund(usize),
    Restock { ingredient: u64, amount: i64 },
    Adjust { ingredient: u64, quantity: i64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..3, 1u32..6).prop_map(|(menu, quantity)| Op::Place { menu, quantity }),
        3 => (0usize..16).prop_map(Op::Verify),
        3 => (0usize..16).prop_map(Op::Ready),
        2 => (0usize..16).prop_map(Op::Complete),
        2 => (0usize..16).prop_map(Op::Cancel),
        1 => (0usize..16).prop_map(Op::Refund),
        1 => (0..INGREDIENTS, 1i64..20_000)
            .prop_map(|(ingredient, amount)| Op::Restock { ingredient, amount }),
        1 => (0..INGREDIENTS, 0i64..20_000)
            .prop_map(|(ingredient, quantity)| Op::Adjust { ingredient, quantity }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever succeeds or fails, stock never goes negative, the ledger
    /// replays to stored stock, and no order consumes more than it asked for.
    #[test]
    fn random_operations_keep_ledger_consistent(
        stock in vec(0i64..30_000, INGREDIENTS as usize),
        recipes in vec(vec(requirement_strategy(), 1..4), 3..=3),
        ops in vec(op_strategy(), 1..60),
    ) {
        let engine = engine_with(&stock, &recipes);
        let mut orders: Vec<OrderId> = Vec::new();
        let pick = |orders: &[OrderId], i: usize| orders.get(i % orders.len().max(1)).copied();

        // Individual operations may fail; only the invariants matter.
        for op in ops {
            match op {
                Op::Place { menu, quantity } => {
                    let line = LineItem::new(MenuItemId(menu as u64), quantity);
                    if let Ok(order) = engine.place_order(NewOrder::new(vec![line]), Actor::Customer) {
                        orders.push(order.id);
                    }
                }
                Op::Verify(i) => if let Some(id) = pick(&orders, i) {
                    let _ = engine.record_payment(id, PaymentEvent::Verified, Actor::PaymentWebhook);
                },
                Op::Ready(i) => if let Some(id) = pick(&orders, i) {
                    let _ = engine.transition(id, OrderStatus::Ready, Actor::Staff);
                },
                Op::Complete(i) => if let Some(id) = pick(&orders, i) {
                    let _ = engine.transition(id, OrderStatus::Completed, Actor::Staff);
                },
                Op::Cancel(i) => if let Some(id) = pick(&orders, i) {
                    let _ = engine.transition(id, OrderStatus::Cancelled, Actor::Admin);
                },
                Op::Refund(i) => if let Some(id) = pick(&orders, i) {
                    let _ = engine.record_payment(id, PaymentEvent::Refunded, Actor::Admin);
                },
                Op::Restock { ingredient, amount } => {
                    let _ = engine.restock(IngredientId(ingredient), Quantity::from_milli(amount), "delivery");
                }
                Op::Adjust { ingredient, quantity } => {
                    let _ = engine.adjust_stock(IngredientId(ingredient), Quantity::from_milli(quantity), "count");
                }
            }
        }

        for ingredient in engine.ingredients().expect("ingredients") {
            prop_assert!(!ingredient.quantity.is_negative());
        }
        let report = engine.reconcile().expect("reconcile");
        prop_assert!(report.is_consistent(), "{:?}", report.discrepancies);

        for id in orders {
            let order = engine.order(id).expect("order");
            let line = &order.line_items[0];
            let raw = &recipes[line.menu_item_id.0 as usize];
            let demand: BTreeMap<IngredientId, i64> = recipe(line.menu_item_id, raw)
                .into_iter()
                .filter(|r| !r.is_optional)
                .map(|r| (r.ingredient_id, r.required_amount.milli() * i64::from(line.quantity)))
                .collect();

            let usage: Vec<_> = engine
                .movements_for_order(id)
                .expect("movements")
                .into_iter()
                .filter(|m| m.kind == MovementKind::Usage)
                .collect();
            for movement in &usage {
                prop_assert_eq!(Some(&movement.amount.milli()), demand.get(&movement.ingredient_id));
            }
            // All-or-nothing: either every demanded ingredient was consumed or none.
            prop_assert!(usage.is_empty() || usage.len() == demand.len());
            if matches!(order.status, OrderStatus::Ready | OrderStatus::Completed) {
                prop_assert_eq!(usage.len(), demand.len());
            }
        }
    }
}
