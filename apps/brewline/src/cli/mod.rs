//! # Brewline CLI Module
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `init` - Initialize a new database
//! - `import` - Load ingredients, menu items, recipes and customers from JSON
//! - `inventory` - List stock (default when no command is given)
//! - `restock` - Record a delivery
//! - `adjust` - Correct a stock count
//! - `order` - Place an order from a JSON file
//! - `transition` - Change an order's status
//! - `payment` - Apply a payment event
//! - `ledger` - Show the stock movements of an order
//! - `reconcile` - Replay the movement ledger against stored stock

mod commands;

use crate::config::Config;
use brewline_core::BrewlineError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Brewline - café order fulfillment and inventory engine
#[derive(Parser, Debug)]
#[command(name = "brewline")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the database
    #[arg(short = 'D', long, global = true, default_value = "brewline.redb")]
    pub database: PathBuf,

    /// Storage backend: "redb" (persistent) or "memory" (volatile)
    #[arg(short = 'B', long, global = true, default_value = "redb")]
    pub backend: String,

    /// Path to a TOML configuration file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to (overrides config)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Catalog JSON to load before serving (useful with the memory backend)
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Import a catalog (ingredients, menu items, recipes, customers)
    Import {
        /// Path to the catalog JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List ingredient stock
    Inventory {
        /// Only ingredients at or below their reorder level
        #[arg(short, long)]
        low_stock: bool,
    },

    /// Record a stock delivery
    Restock {
        /// Ingredient ID
        #[arg(short, long)]
        ingredient: u64,

        /// Amount delivered, in thousandths of the ingredient's unit
        #[arg(short, long)]
        amount_milli: i64,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Set an ingredient's stock after a count
    Adjust {
        /// Ingredient ID
        #[arg(short, long)]
        ingredient: u64,

        /// Counted quantity, in thousandths of the ingredient's unit
        #[arg(long)]
        quantity_milli: i64,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Place an order from a JSON file
    Order {
        /// Path to the order JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Change an order's status
    Transition {
        /// Order ID
        #[arg(short, long)]
        order: u64,

        /// Target status (preparing, ready, completed, cancelled, ...)
        #[arg(short, long)]
        to: String,

        /// Only apply if the order is still in this status
        #[arg(short, long)]
        expected_from: Option<String>,

        /// Acting party (staff, admin, customer, payment_webhook, system)
        #[arg(short, long, default_value = "staff")]
        actor: String,
    },

    /// Apply a payment event to an order
    Payment {
        /// Order ID
        #[arg(short, long)]
        order: u64,

        /// Event (submitted, verified, rejected, refunded)
        #[arg(short, long)]
        event: String,

        /// Acting party
        #[arg(short, long, default_value = "admin")]
        actor: String,
    },

    /// Show the stock movements of an order
    Ledger {
        /// Order ID
        #[arg(short, long)]
        order: u64,
    },

    /// Check that stock and movement ledger agree
    Reconcile,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), BrewlineError> {
    let config = Config::load(cli.config.as_deref())?;
    let target = Target {
        database: cli.database,
        backend: cli.backend,
        config,
    };
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server {
            host,
            port,
            catalog,
        }) => cmd_server(&target, host, port, catalog.as_deref()).await,
        Some(Commands::Init { force }) => cmd_init(&target, force),
        Some(Commands::Import { file }) => cmd_import(&target, json_mode, &file),
        Some(Commands::Inventory { low_stock }) => cmd_inventory(&target, json_mode, low_stock),
        Some(Commands::Restock {
            ingredient,
            amount_milli,
            notes,
        }) => cmd_restock(&target, json_mode, ingredient, amount_milli, notes),
        Some(Commands::Adjust {
            ingredient,
            quantity_milli,
            notes,
        }) => cmd_adjust(&target, json_mode, ingredient, quantity_milli, notes),
        Some(Commands::Order { file }) => cmd_order(&target, json_mode, &file),
        Some(Commands::Transition {
            order,
            to,
            expected_from,
            actor,
        }) => cmd_transition(
            &target,
            json_mode,
            order,
            &to,
            expected_from.as_deref(),
            &actor,
        ),
        Some(Commands::Payment {
            order,
            event,
            actor,
        }) => cmd_payment(&target, json_mode, order, &event, &actor),
        Some(Commands::Ledger { order }) => cmd_ledger(&target, json_mode, order),
        Some(Commands::Reconcile) => cmd_reconcile(&target, json_mode),
        None => cmd_inventory(&target, json_mode, false),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "brewline",
            "transition",
            "--order",
            "7",
            "--to",
            "ready",
            "--backend",
            "memory",
            "--json-mode",
        ])
        .unwrap();
        assert_eq!(cli.backend, "memory");
        assert!(cli.json_mode);
        match cli.command {
            Some(Commands::Transition {
                order, to, actor, ..
            }) => {
                assert_eq!(order, 7);
                assert_eq!(to, "ready");
                assert_eq!(actor, "staff");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn no_subcommand_is_allowed() {
        let cli = Cli::try_parse_from(["brewline", "-q"]).unwrap();
        assert!(cli.quiet);
        assert!(cli.command.is_none());
    }
}
