use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use serde_json::json;
use uuid::Uuid;
use turnstile_core::identity::Principal;
use turnstile_order::OrderWithTickets;

use crate::error::{AppError, AppPath};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/orders/mine", get(my_orders))
        .route("/v1/orders/{id}", get(get_order))
}

/// GET /v1/orders/mine
async fn my_orders(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, AppError> {
    let orders = state.queries.my_orders(&principal).await?;
    Ok(Json(json!({ "orders": orders })))
}

/// GET /v1/orders/{id}
async fn get_order(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<OrderWithTickets>, AppError> {
    Ok(Json(state.queries.order(&principal, id).await?))
}
