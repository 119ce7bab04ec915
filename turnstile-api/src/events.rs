use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde_json::json;
use uuid::Uuid;
use turnstile_catalog::{EventDraft, SalesReport, TicketTypeDraft};
use turnstile_core::identity::Principal;

use crate::error::{AppError, AppJson, AppPath};
use crate::state::AppState;

/// Organizer routes; mounted behind auth.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/events", post(create_event))
        .route("/v1/events/{id}/ticket-types", post(add_ticket_type))
        .route("/v1/events/{id}/stats", get(event_stats))
        .route("/v1/ticket-types/{id}", delete(remove_ticket_type))
}

pub fn public_routes() -> Router<AppState> {
    Router::new().route("/v1/events/{id}/ticket-types", get(list_ticket_types))
}

/// POST /v1/events
async fn create_event(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppJson(draft): AppJson<EventDraft>,
) -> Result<impl IntoResponse, AppError> {
    let event = state.catalog.create_event(&principal, draft).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// POST /v1/events/{id}/ticket-types
async fn add_ticket_type(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(event_id): AppPath<Uuid>,
    AppJson(draft): AppJson<TicketTypeDraft>,
) -> Result<impl IntoResponse, AppError> {
    let ticket_type = state.catalog.add_ticket_type(&principal, event_id, draft).await?;
    Ok((StatusCode::CREATED, Json(ticket_type)))
}

/// GET /v1/events/{id}/ticket-types
///
/// Availability figures are advisory; the purchase path re-checks atomically.
async fn list_ticket_types(
    State(state): State<AppState>,
    AppPath(event_id): AppPath<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let ticket_types = state.catalog.list_ticket_types(event_id).await?;
    Ok(Json(json!({ "ticket_types": ticket_types })))
}

/// DELETE /v1/ticket-types/{id}
async fn remove_ticket_type(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode, AppError> {
    state.catalog.remove_ticket_type(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/events/{id}/stats
async fn event_stats(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(event_id): AppPath<Uuid>,
) -> Result<Json<SalesReport>, AppError> {
    Ok(Json(state.catalog.sales_report(&principal, event_id).await?))
}
