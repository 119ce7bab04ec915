use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Extension, Router,
};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;
use turnstile_core::identity::{Principal, Role};
use turnstile_core::TicketingError;

use crate::error::{AppError, AppQuery};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/gate/stream", get(gate_stream))
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub event_id: Option<Uuid>,
}

/// GET /v1/gate/stream
///
/// Live purchase and admission feed. Organizers must name one of their events;
/// admins may omit the filter to watch everything.
async fn gate_stream(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppQuery(params): AppQuery<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let filter = match (principal.role, params.event_id) {
        (Role::Admin, event_id) => event_id,
        (Role::Organizer, Some(event_id)) => {
            let event = state.catalog.get_event(event_id).await?;
            if !principal.can_manage(event.organizer_id) {
                return Err(TicketingError::Forbidden("You can only watch your own events".into()).into());
            }
            Some(event_id)
        }
        (Role::Organizer, None) => {
            return Err(TicketingError::Validation("event_id is required".into()).into());
        }
        (Role::Attendee, _) => {
            return Err(TicketingError::Forbidden("Only organizers can watch the gate".into()).into());
        }
    };

    let rx = state.events_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| async move {
        // Lagged receivers skip what they missed
        let event = result.ok()?;
        if filter.is_some_and(|id| id != event.event_id()) {
            return None;
        }
        Event::default().event(event.name()).json_data(&event).ok().map(Ok)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
