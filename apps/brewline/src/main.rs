//! # Brewline - Café Order Fulfillment Server
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                apps/brewline (THE BINARY)            │
//! │                                                      │
//! │   ┌─────────────┐          ┌─────────────┐          │
//! │   │    CLI      │          │  HTTP API   │          │
//! │   │   (clap)    │          │   (axum)    │          │
//! │   └──────┬──────┘          └──────┬──────┘          │
//! │          └──────────┬─────────────┘                 │
//! │                     ▼                               │
//! │            ┌─────────────────┐                      │
//! │            │  brewline-core  │                      │
//! │            │  (THE ENGINE)   │                      │
//! │            └─────────────────┘                      │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! brewline server --host 0.0.0.0 --port 8080
//!
//! # CLI operations
//! brewline import -f catalog.json
//! brewline order -f order.json
//! brewline payment --order 1 --event verified
//! brewline transition --order 1 --to ready
//! brewline reconcile
//! ```

use brewline::cli;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // BREWLINE_LOG_FORMAT=json enables machine-parseable output. Logs go to
    // stderr so --json-mode output on stdout stays parseable.
    let log_format = std::env::var("BREWLINE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "brewline=info,brewline_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!(kind = ?e.kind(), "Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner.
fn print_banner() {
    println!(
        r#"
   ___                  _ _
  | _ )_ _ _____ __ __ | (_)_ _  ___
  | _ \ '_/ -_) V  V / | | | ' \/ -_)
  |___/_| \___|\_/\_/  |_|_|_||_\___|

  Brewline v{}

  Exactly-once stock deduction • Append-only ledger
"#,
        env!("CARGO_PKG_VERSION")
    );
}
