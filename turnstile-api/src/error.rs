use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    extract::{FromRequest, FromRequestParts},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use turnstile_core::identity::IdentityError;
use turnstile_core::TicketingError;

#[derive(Debug)]
pub enum AppError {
    Unauthenticated(String),
    Anyhow(anyhow::Error),
}

pub fn status_for(category: &str) -> StatusCode {
    match category {
        "validation" => StatusCode::UNPROCESSABLE_ENTITY,
        "not_found" => StatusCode::NOT_FOUND,
        "forbidden" => StatusCode::FORBIDDEN,
        "insufficient_inventory" | "already_used" | "conflict" => StatusCode::CONFLICT,
        "invalid_status" => StatusCode::BAD_REQUEST,
        "purchase_timeout" => StatusCode::SERVICE_UNAVAILABLE,
        "unauthenticated" => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(category: &str, message: impl Into<String>) -> Response {
    let body = Json(json!({
        "error": {
            "category": category,
            "message": message.into(),
        }
    }));
    (status_for(category), body).into_response()
}

fn ticketing_response(err: TicketingError) -> Response {
    match &err {
        TicketingError::Storage(source) => {
            tracing::error!(error = %source, "Storage failure");
        }
        TicketingError::Timeout => {
            tracing::warn!("Purchase deadline exceeded");
        }
        _ => {}
    }
    error_body(err.category(), err.to_string())
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = match self {
            AppError::Unauthenticated(msg) => return error_body("unauthenticated", msg),
            AppError::Anyhow(err) => err,
        };

        // Domain and extractor errors arrive here through `?`
        let err = match err.downcast::<TicketingError>() {
            Ok(e) => return ticketing_response(e),
            Err(err) => err,
        };
        let err = match err.downcast::<JsonRejection>() {
            Ok(e) => return error_body("validation", e.body_text()),
            Err(err) => err,
        };
        let err = match err.downcast::<PathRejection>() {
            Ok(e) => return error_body("validation", e.body_text()),
            Err(err) => err,
        };
        let err = match err.downcast::<QueryRejection>() {
            Ok(e) => return error_body("validation", e.body_text()),
            Err(err) => err,
        };
        let err = match err.downcast::<IdentityError>() {
            Ok(e) => return error_body("unauthenticated", e.to_string()),
            Err(err) => err,
        };

        tracing::error!("Internal Server Error: {:#}", err);
        error_body("internal", "Internal Server Error")
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Anyhow(err.into())
    }
}

/// `Json` whose rejection renders in the API error format.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// `Path` whose rejection renders in the API error format.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct AppPath<T>(pub T);

/// `Query` whose rejection renders in the API error format.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);
