//! # CLI Command Implementations
//!
//! Each command opens the engine, runs one operation and prints the result
//! either as text or, with `--json-mode`, as pretty JSON.

use crate::api;
use crate::config::Config;
use crate::events::TracingEmitter;
use brewline_core::{
    Actor, BrewlineError, Catalog, Engine, IngredientId, MovementRecord, NewOrder, OrderId,
    OrderStatus, PaymentEvent, Quantity, StorageBackend,
};
use serde::{Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum catalog file size (10 MB).
const MAX_CATALOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum order file size (1 MB).
const MAX_ORDER_FILE_SIZE: u64 = 1024 * 1024;

/// Canonicalize `path`, require a regular file and bound its size.
fn read_input_file(path: &Path, max_size: u64) -> Result<Vec<u8>, BrewlineError> {
    let canonical = path.canonicalize().map_err(|e| {
        BrewlineError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;
    if !canonical.is_file() {
        return Err(BrewlineError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    let metadata = std::fs::metadata(&canonical)
        .map_err(|e| BrewlineError::IoError(format!("Cannot read file metadata: {}", e)))?;
    if metadata.len() > max_size {
        return Err(BrewlineError::InvalidInput(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    std::fs::read(&canonical).map_err(|e| BrewlineError::IoError(format!("Read file: {}", e)))
}

fn parse_json<T: DeserializeOwned>(data: &[u8]) -> Result<T, BrewlineError> {
    serde_json::from_slice(data).map_err(|e| BrewlineError::DeserializationError(e.to_string()))
}

/// Parse a snake_case enum name ("ready", "payment_webhook") the way the
/// JSON API spells it.
fn parse_name<T: DeserializeOwned>(what: &str, name: &str) -> Result<T, BrewlineError> {
    serde_json::from_value(serde_json::Value::String(name.trim().to_ascii_lowercase()))
        .map_err(|_| BrewlineError::InvalidInput(format!("Unknown {}: '{}'", what, name)))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), BrewlineError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| BrewlineError::SerializationError(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

// =============================================================================
// ENGINE SETUP
// =============================================================================

/// Where and how commands open the engine.
#[derive(Debug, Clone)]
pub struct Target {
    pub database: PathBuf,
    pub backend: String,
    pub config: Config,
}

impl Target {
    /// Open the store and wrap it in an engine wired to the config and the
    /// tracing emitter.
    pub fn open(&self) -> Result<Engine, BrewlineError> {
        let store = match self.backend.as_str() {
            "redb" => StorageBackend::open_redb(&self.database)?,
            "memory" => StorageBackend::in_memory(),
            other => {
                return Err(BrewlineError::ConfigError(format!(
                    "Unknown backend: {}. Use: redb, memory",
                    other
                )));
            }
        };
        Ok(Engine::new(store)
            .with_settings(Arc::new(self.config.clone()))
            .with_emitter(Arc::new(TracingEmitter)))
    }
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(
    target: &Target,
    host: Option<String>,
    port: Option<u16>,
    catalog: Option<&Path>,
) -> Result<(), BrewlineError> {
    let engine = target.open()?;
    if let Some(path) = catalog {
        let catalog: Catalog = parse_json(&read_input_file(path, MAX_CATALOG_FILE_SIZE)?)?;
        engine.import_catalog(catalog)?;
    }

    let host = host.unwrap_or_else(|| target.config.server.host.clone());
    let port = port.unwrap_or(target.config.server.port);
    let loyalty = target.config.loyalty.clone();

    println!("Brewline Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:     {}", host);
    println!("  Port:     {}", port);
    println!("  Backend:  {}", target.backend);
    println!("  Database: {:?}", target.database);
    println!(
        "  Loyalty:  {} ({} milli-points per unit)",
        if loyalty.enabled { "enabled" } else { "disabled" },
        loyalty.points_per_unit_milli
    );
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, engine).await
}

// =============================================================================
// INIT / IMPORT
// =============================================================================

/// Initialize new database.
pub fn cmd_init(target: &Target, force: bool) -> Result<(), BrewlineError> {
    if target.backend != "redb" {
        return Err(BrewlineError::ConfigError(
            "Only the redb backend has a database to initialize".to_string(),
        ));
    }
    if target.database.exists() {
        if !force {
            return Err(BrewlineError::IoError(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(&target.database)
            .map_err(|e| BrewlineError::IoError(format!("Remove database: {}", e)))?;
    }
    target.open()?;
    println!("Initialized new redb database at {:?}", target.database);
    Ok(())
}

/// Import a catalog file.
pub fn cmd_import(target: &Target, json_mode: bool, file: &Path) -> Result<(), BrewlineError> {
    let catalog: Catalog = parse_json(&read_input_file(file, MAX_CATALOG_FILE_SIZE)?)?;
    let engine = target.open()?;
    let summary = engine.import_catalog(catalog)?;

    if json_mode {
        return print_json(&summary);
    }
    println!(
        "Imported: {} ingredients created, {} updated, {} menu items, {} customers ({} already present)",
        summary.ingredients_created,
        summary.ingredients_updated,
        summary.menu_items,
        summary.customers_created,
        summary.customers_skipped
    );
    Ok(())
}

// =============================================================================
// STOCK COMMANDS
// =============================================================================

/// List ingredient stock.
pub fn cmd_inventory(target: &Target, json_mode: bool, low_stock: bool) -> Result<(), BrewlineError> {
    let engine = target.open()?;
    let ingredients = if low_stock {
        engine.low_stock()?
    } else {
        engine.ingredients()?
    };

    if json_mode {
        return print_json(&ingredients);
    }

    println!("Brewline Inventory");
    println!("==================");
    if ingredients.is_empty() {
        println!("(no ingredients)");
    }
    for ingredient in &ingredients {
        let flag = if ingredient.needs_reorder() { "  LOW" } else { "" };
        let unavailable = if ingredient.is_available { "" } else { "  (unavailable)" };
        println!(
            "{:>5}  {:<24} {:>12} {:<4} reorder at {}{}{}",
            ingredient.id.0,
            ingredient.name,
            ingredient.quantity.to_string(),
            ingredient.unit,
            ingredient.reorder_level,
            flag,
            unavailable
        );
    }
    Ok(())
}

fn print_movement(movement: &MovementRecord) {
    let order = movement
        .order_id
        .map(|o| format!(" order {}", o))
        .unwrap_or_default();
    println!(
        "{:>6}  ingredient {:<6} {:<18} {:>10}  {} -> {}{}  {}",
        movement.id.0,
        movement.ingredient_id.to_string(),
        movement.kind.to_string(),
        movement.amount.to_string(),
        movement.quantity_before,
        movement.quantity_after,
        order,
        movement.notes
    );
}

/// Record a delivery.
pub fn cmd_restock(
    target: &Target,
    json_mode: bool,
    ingredient: u64,
    amount_milli: i64,
    notes: Option<String>,
) -> Result<(), BrewlineError> {
    let engine = target.open()?;
    let movement = engine.restock(
        IngredientId(ingredient),
        Quantity::from_milli(amount_milli),
        notes.unwrap_or_default(),
    )?;
    if json_mode {
        return print_json(&movement);
    }
    print_movement(&movement);
    Ok(())
}

/// Set stock after a physical count.
pub fn cmd_adjust(
    target: &Target,
    json_mode: bool,
    ingredient: u64,
    quantity_milli: i64,
    notes: Option<String>,
) -> Result<(), BrewlineError> {
    let engine = target.open()?;
    let movement = engine.adjust_stock(
        IngredientId(ingredient),
        Quantity::from_milli(quantity_milli),
        notes.unwrap_or_default(),
    )?;
    if json_mode {
        return print_json(&movement);
    }
    print_movement(&movement);
    Ok(())
}

// =============================================================================
// ORDER COMMANDS
// =============================================================================

/// Place an order read from a JSON file.
pub fn cmd_order(target: &Target, json_mode: bool, file: &Path) -> Result<(), BrewlineError> {
    let new: NewOrder = parse_json(&read_input_file(file, MAX_ORDER_FILE_SIZE)?)?;
    let engine = target.open()?;
    let order = match engine.place_order(new, Actor::Customer) {
        Ok(order) => order,
        Err(BrewlineError::Unfulfillable(shortfalls)) if !json_mode => {
            println!("Order rejected: insufficient stock");
            for s in &shortfalls {
                println!(
                    "  ingredient {}: required {}, available {}",
                    s.ingredient_id, s.required, s.available
                );
            }
            return Err(BrewlineError::Unfulfillable(shortfalls));
        }
        Err(e) => return Err(e),
    };

    if json_mode {
        return print_json(&order);
    }
    println!(
        "Placed order {}: {} line(s), total {}, status {}",
        order.id,
        order.line_items.len(),
        order.total,
        order.status
    );
    Ok(())
}

/// Change an order's status.
pub fn cmd_transition(
    target: &Target,
    json_mode: bool,
    order: u64,
    to: &str,
    expected_from: Option<&str>,
    actor: &str,
) -> Result<(), BrewlineError> {
    let to: OrderStatus = parse_name("order status", to)?;
    let expected_from: Option<OrderStatus> = expected_from
        .map(|s| parse_name("order status", s))
        .transpose()?;
    let actor: Actor = parse_name("actor", actor)?;

    let engine = target.open()?;
    let id = OrderId(order);
    let outcome = match expected_from {
        Some(from) => engine.transition_from(id, from, to, actor)?,
        None => engine.transition(id, to, actor)?,
    };
    let response = api::TransitionResponse::from(outcome);

    if json_mode {
        return print_json(&response);
    }
    println!(
        "Order {}: {} -> {}",
        response.order.id,
        response
            .change
            .from
            .map(|s| s.to_string())
            .unwrap_or_default(),
        response.change.to
    );
    if response.already_deducted {
        println!("  stock already deducted earlier");
    }
    for movement in response.deducted.iter().chain(&response.restocked) {
        print_movement(movement);
    }
    if let Some(entry) = &response.loyalty {
        println!("  loyalty: {:+} points", entry.points_delta);
    }
    Ok(())
}

/// Apply a payment event.
pub fn cmd_payment(
    target: &Target,
    json_mode: bool,
    order: u64,
    event: &str,
    actor: &str,
) -> Result<(), BrewlineError> {
    let event: PaymentEvent = parse_name("payment event", event)?;
    let actor: Actor = parse_name("actor", actor)?;

    let engine = target.open()?;
    let response = api::PaymentResponse::from(engine.record_payment(OrderId(order), event, actor)?);

    if json_mode {
        return print_json(&response);
    }
    println!(
        "Order {}: payment {}, status {}",
        response.order.id, response.order.payment_status, response.order.status
    );
    for change in &response.changes {
        println!(
            "  {} -> {}",
            change.from.map(|s| s.to_string()).unwrap_or_default(),
            change.to
        );
    }
    if !response.notes.is_empty() {
        println!("  {} ingredient(s) not restocked", response.notes.len());
    }
    if let Some(entry) = &response.loyalty {
        println!("  loyalty: {:+} points", entry.points_delta);
    }
    Ok(())
}

/// Show the stock movements of an order.
pub fn cmd_ledger(target: &Target, json_mode: bool, order: u64) -> Result<(), BrewlineError> {
    let engine = target.open()?;
    let movements = engine.movements_for_order(OrderId(order))?;

    if json_mode {
        return print_json(&movements);
    }
    if movements.is_empty() {
        println!("Order {} has no stock movements", OrderId(order));
    }
    for movement in &movements {
        print_movement(movement);
    }
    Ok(())
}

/// Replay the movement ledger.
pub fn cmd_reconcile(target: &Target, json_mode: bool) -> Result<(), BrewlineError> {
    let engine = target.open()?;
    let response = api::ReconcileResponse::from(engine.reconcile()?);

    if json_mode {
        print_json(&response)?;
    } else {
        println!(
            "Checked {} ingredients, {} movements",
            response.report.ingredients_checked, response.report.movements_checked
        );
        for discrepancy in &response.report.discrepancies {
            println!("  {:?}", discrepancy);
        }
        println!(
            "{}",
            if response.consistent {
                "Stock and ledger agree"
            } else {
                "DISCREPANCIES FOUND"
            }
        );
    }

    if response.consistent {
        Ok(())
    } else {
        Err(BrewlineError::IoError(format!(
            "{} ledger discrepancies",
            response.report.discrepancies.len()
        )))
    }
}

// =============================================================================
// TESTS
// =============================================================================
