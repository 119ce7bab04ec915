use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;
use turnstile_core::codes::SVG_CONTENT_TYPE;
use turnstile_core::identity::Principal;
use turnstile_core::TicketingError;
use turnstile_order::{Admission, PurchaseRequest, ValidateRequest};
use turnstile_shared::Ticket;

use crate::error::{AppError, AppJson, AppPath};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/tickets/purchase", post(purchase))
        .route("/v1/tickets/validate", post(validate))
        .route("/v1/tickets/mine", get(my_tickets))
        .route("/v1/tickets/{id}", get(get_ticket))
        .route("/v1/tickets/{id}/code", get(get_ticket_code))
        .route("/v1/tickets/{id}/cancel", post(cancel_ticket))
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ValidationResponse {
    pub outcome: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<Ticket>,
}

#[derive(Debug, Serialize)]
pub struct TicketCodeResponse {
    pub ticket_id: Uuid,
    pub code_ref: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/tickets/purchase
async fn purchase(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppJson(req): AppJson<PurchaseRequest>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = state.aggregator.purchase(&principal, req).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST /v1/tickets/validate
async fn validate(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppJson(req): AppJson<ValidateRequest>,
) -> Result<Response, AppError> {
    let lookup = req.into_lookup()?;

    let admission = match state.gate.validate(&principal, lookup).await {
        Ok(admission) => admission,
        Err(e @ TicketingError::NotFound(_)) => {
            let body = ValidationResponse {
                outcome: "not_found",
                message: e.to_string(),
                ticket: None,
            };
            return Ok((StatusCode::NOT_FOUND, Json(body)).into_response());
        }
        Err(e) => return Err(e.into()),
    };

    Ok(admission_response(admission))
}

fn admission_response(admission: Admission) -> Response {
    let status = match admission.outcome {
        turnstile_order::ValidationOutcome::NowUsed => StatusCode::OK,
        turnstile_order::ValidationOutcome::AlreadyUsed => StatusCode::CONFLICT,
        turnstile_order::ValidationOutcome::InvalidStatus => StatusCode::BAD_REQUEST,
    };
    let body = ValidationResponse {
        outcome: admission.outcome.as_str(),
        message: admission.message(),
        ticket: Some(admission.ticket),
    };
    (status, Json(body)).into_response()
}

/// GET /v1/tickets/mine
async fn my_tickets(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, AppError> {
    let tickets = state.queries.my_tickets(&principal).await?;
    Ok(Json(json!({ "tickets": tickets })))
}

/// GET /v1/tickets/{id}
async fn get_ticket(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.queries.ticket(&principal, id).await?))
}

/// GET /v1/tickets/{id}/code
///
/// Returns the stored artifact reference, or renders the code on the fly while it is pending.
async fn get_ticket_code(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Response, AppError> {
    let ticket = state.queries.ticket(&principal, id).await?;

    match ticket.code_ref {
        Some(code_ref) if !code_ref.is_empty() => Ok(Json(TicketCodeResponse {
            ticket_id: ticket.id,
            code_ref,
        })
        .into_response()),
        _ => {
            let bytes = state.dispatcher.render(ticket.id)?;
            Ok(([(header::CONTENT_TYPE, SVG_CONTENT_TYPE)], bytes).into_response())
        }
    }
}

/// POST /v1/tickets/{id}/cancel
async fn cancel_ticket(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Ticket>, AppError> {
    Ok(Json(state.gate.cancel(&principal, id).await?))
}
