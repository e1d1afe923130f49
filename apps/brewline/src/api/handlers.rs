//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers. The engine is
//! synchronous and takes store locks, so every call runs on the blocking pool.

use super::{
    AppState,
    types::{
        AdjustRequest, CheckRequest, ErrorResponse, HealthResponse, HistoryResponse,
        InventoryResponse, LoyaltyResponse, MovementsResponse, PaymentRequest, PaymentResponse,
        ReconcileResponse, RedeemRequest, RestockRequest, TransitionRequest, TransitionResponse,
        checked_notes,
    },
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use brewline_core::{
    Actor, BrewlineError, CustomerId, Engine, ErrorKind, FulfillmentReport, IngredientId,
    LoyaltyLedgerEntry, MovementRecord, NewOrder, Order, OrderId,
};

// =============================================================================
// ERROR MAPPING
// =============================================================================

/// Engine error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub BrewlineError);

impl From<BrewlineError> for ApiError {
    fn from(error: BrewlineError) -> Self {
        Self(error)
    }
}

/// HTTP status for an engine error.
///
/// Malformed requests are 400; well-formed requests the business rules
/// reject (stock, transitions, balances) are 422.
pub fn status_for(error: &BrewlineError) -> StatusCode {
    match error.kind() {
        ErrorKind::Validation => match error {
            BrewlineError::InvalidOrder(_) | BrewlineError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        },
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Integrity | ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, kind = ?self.0.kind(), "request failed");
        }
        (status, Json(ErrorResponse::from(&self.0))).into_response()
    }
}

/// Run `work` against the engine on the blocking pool.
async fn blocking<T, F>(state: &AppState, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Engine) -> Result<T, BrewlineError> + Send + 'static,
{
    let engine = state.engine.clone();
    tokio::task::spawn_blocking(move || work(engine.as_ref()))
        .await
        .map_err(|e| BrewlineError::IoError(format!("Engine task failed: {}", e)))?
        .map_err(ApiError)
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// INVENTORY HANDLERS
// =============================================================================

pub async fn inventory_handler(
    State(state): State<AppState>,
) -> Result<Json<InventoryResponse>, ApiError> {
    let ingredients = blocking(&state, |engine| engine.ingredients()).await?;
    Ok(Json(InventoryResponse { ingredients }))
}

/// Ingredients at or below their reorder level.
pub async fn low_stock_handler(
    State(state): State<AppState>,
) -> Result<Json<InventoryResponse>, ApiError> {
    let ingredients = blocking(&state, |engine| engine.low_stock()).await?;
    Ok(Json(InventoryResponse { ingredients }))
}

pub async fn ingredient_movements_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<MovementsResponse>, ApiError> {
    let movements = blocking(&state, move |engine| {
        engine.movements_for_ingredient(IngredientId(id))
    })
    .await?;
    Ok(Json(MovementsResponse { movements }))
}

pub async fn restock_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<RestockRequest>,
) -> Result<Json<MovementRecord>, ApiError> {
    let amount = request.amount();
    let notes = checked_notes(request.notes)?;
    let movement = blocking(&state, move |engine| {
        engine.restock(IngredientId(id), amount, notes)
    })
    .await?;
    Ok(Json(movement))
}

pub async fn adjust_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<AdjustRequest>,
) -> Result<Json<MovementRecord>, ApiError> {
    let quantity = request.quantity();
    let notes = checked_notes(request.notes)?;
    let movement = blocking(&state, move |engine| {
        engine.adjust_stock(IngredientId(id), quantity, notes)
    })
    .await?;
    Ok(Json(movement))
}

// =============================================================================
// ORDER HANDLERS
// =============================================================================

/// Advisory availability check. Never reserves stock.
pub async fn check_handler(
    State(state): State<AppState>,
    Json(request): Json<CheckRequest>,
) -> Result<Json<FulfillmentReport>, ApiError> {
    let report = blocking(&state, move |engine| {
        engine.check_fulfillment(&request.line_items)
    })
    .await?;
    Ok(Json(report))
}

/// Checkout. Responds 422 with shortfalls when stock is insufficient.
pub async fn place_order_handler(
    State(state): State<AppState>,
    Json(request): Json<NewOrder>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = blocking(&state, move |engine| {
        engine.place_order(request, Actor::Customer)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn order_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Order>, ApiError> {
    let order = blocking(&state, move |engine| engine.order(OrderId(id))).await?;
    Ok(Json(order))
}

pub async fn history_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let history = blocking(&state, move |engine| engine.status_history(OrderId(id))).await?;
    Ok(Json(HistoryResponse { history }))
}

pub async fn order_movements_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<MovementsResponse>, ApiError> {
    let movements = blocking(&state, move |engine| {
        engine.movements_for_order(OrderId(id))
    })
    .await?;
    Ok(Json(MovementsResponse { movements }))
}

pub async fn transition_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let id = OrderId(id);
    let outcome = blocking(&state, move |engine| match request.expected_from {
        Some(from) => engine.transition_from(id, from, request.to, request.actor),
        None => engine.transition(id, request.to, request.actor),
    })
    .await?;
    Ok(Json(TransitionResponse::from(outcome)))
}

pub async fn payment_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<PaymentRequest>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let outcome = blocking(&state, move |engine| {
        engine.record_payment(OrderId(id), request.event, request.actor)
    })
    .await?;
    Ok(Json(PaymentResponse::from(outcome)))
}

// =============================================================================
// LOYALTY HANDLERS
// =============================================================================

pub async fn loyalty_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<LoyaltyResponse>, ApiError> {
    let id = CustomerId(id);
    let (customer, entries) = blocking(&state, move |engine| {
        Ok((engine.customer(id)?, engine.loyalty_entries(id)?))
    })
    .await?;
    Ok(Json(LoyaltyResponse { customer, entries }))
}

pub async fn redeem_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<RedeemRequest>,
) -> Result<Json<LoyaltyLedgerEntry>, ApiError> {
    let entry = blocking(&state, move |engine| {
        engine.redeem_points(CustomerId(id), request.points, request.order_id)
    })
    .await?;
    Ok(Json(entry))
}

// =============================================================================
// AUDIT HANDLER
// =============================================================================

/// Replay the movement ledger against stored stock.
pub async fn reconcile_handler(
    State(state): State<AppState>,
) -> Result<Json<ReconcileResponse>, ApiError> {
    let report = blocking(&state, |engine| engine.reconcile()).await?;
    Ok(Json(ReconcileResponse::from(report)))
}
