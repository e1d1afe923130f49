//! # Brewline HTTP API Module
//!
//! This module implements the HTTP REST API server using axum.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /inventory` - All ingredients
//! - `GET /inventory/low-stock` - Ingredients at or below reorder level
//! - `GET /inventory/{id}/movements` - Stock ledger of one ingredient
//! - `POST /inventory/{id}/restock` - Record a delivery
//! - `POST /inventory/{id}/adjust` - Correct a stock count
//! - `POST /orders/check` - Advisory availability check
//! - `POST /orders` - Checkout
//! - `GET /orders/{id}` - Order details
//! - `GET /orders/{id}/history` - Status history
//! - `GET /orders/{id}/movements` - Stock movements of the order
//! - `POST /orders/{id}/transition` - Change order status
//! - `POST /orders/{id}/payment` - Apply a payment event
//! - `GET /customers/{id}/loyalty` - Balance and loyalty ledger
//! - `POST /customers/{id}/redeem` - Spend points
//! - `GET /reconcile` - Replay the stock ledger
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `BREWLINE_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `BREWLINE_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)
//! - `BREWLINE_API_KEY`: If set, requires Bearer token authentication

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::get_api_key_from_env;
pub use handlers::{ApiError, status_for};
pub use middleware::{create_rate_limiter, get_rate_limit_from_env};
pub use types::{
    AdjustRequest, CheckRequest, ErrorResponse, HealthResponse, HistoryResponse,
    InventoryResponse, LoyaltyResponse, MovementsResponse, PaymentRequest, PaymentResponse,
    ReconcileResponse, RedeemRequest, RestockRequest, TransitionRequest, TransitionResponse,
};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use brewline_core::{BrewlineError, Engine};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Maximum request body size (256 KB). Orders and catalog edits are small.
const MAX_BODY_SIZE: usize = 256 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state containing the engine.
///
/// The engine serializes its own writers, so no lock is held here.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build CORS layer from `BREWLINE_CORS_ORIGINS`.
///
/// - "*": allows all origins
/// - unset: localhost only
/// - otherwise: comma-separated list of allowed origins
fn build_cors_layer() -> CorsLayer {
    let origins_env = std::env::var("BREWLINE_CORS_ORIGINS").ok();

    match origins_env.as_deref() {
        Some("*") => {
            tracing::warn!(
                "CORS: Allowing ALL origins (BREWLINE_CORS_ORIGINS=*). This is insecure for production!"
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in BREWLINE_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                restricted_cors(allowed_origins)
            }
        }
        None => {
            tracing::info!("CORS: No BREWLINE_CORS_ORIGINS set, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|origin| origin.parse::<HeaderValue>().ok())
    .collect();
    restricted_cors(origins)
}

fn restricted_cors(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. CORS - handles preflight requests
/// 3. Body limit
/// 4. Rate Limiting (if enabled)
/// 5. Authentication (if configured)
pub fn create_router(state: AppState) -> Router {
    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let api_key = get_api_key_from_env().map(Arc::<str>::from);
    if api_key.is_some() {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED - all endpoints are publicly accessible! \
             Set BREWLINE_API_KEY environment variable to enable authentication."
        );
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/inventory", get(handlers::inventory_handler))
        .route("/inventory/low-stock", get(handlers::low_stock_handler))
        .route(
            "/inventory/{id}/movements",
            get(handlers::ingredient_movements_handler),
        )
        .route("/inventory/{id}/restock", post(handlers::restock_handler))
        .route("/inventory/{id}/adjust", post(handlers::adjust_handler))
        .route("/orders", post(handlers::place_order_handler))
        .route("/orders/check", post(handlers::check_handler))
        .route("/orders/{id}", get(handlers::order_handler))
        .route("/orders/{id}/history", get(handlers::history_handler))
        .route(
            "/orders/{id}/movements",
            get(handlers::order_movements_handler),
        )
        .route("/orders/{id}/transition", post(handlers::transition_handler))
        .route("/orders/{id}/payment", post(handlers::payment_handler))
        .route("/customers/{id}/loyalty", get(handlers::loyalty_handler))
        .route("/customers/{id}/redeem", post(handlers::redeem_handler))
        .route("/reconcile", get(handlers::reconcile_handler));

    if let Some(key) = api_key {
        router = router.layer(axum_middleware::from_fn_with_state(
            key,
            auth::api_key_auth_middleware,
        ));
    }

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer())
                .layer(DefaultBodyLimit::max(MAX_BODY_SIZE)),
        )
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server and run until Ctrl+C.
pub async fn run_server(addr: &str, engine: Engine) -> Result<(), BrewlineError> {
    let router = create_router(AppState::new(engine));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| BrewlineError::IoError(format!("Bind failed: {}", e)))?;

    tracing::info!("Brewline HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Cannot listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down gracefully...");
        })
        .await
        .map_err(|e| BrewlineError::IoError(format!("Server error: {}", e)))
}
