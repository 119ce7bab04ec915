use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;
use turnstile_core::identity::{Principal, Role};
use turnstile_core::repository::{TicketStore, TicketTypeRemoval};
use turnstile_core::{TicketingError, TicketingResult};
use turnstile_shared::{Event, TicketType};

use crate::stats::SalesReport;
use crate::ticket_type::{EventDraft, SaleWindow, TicketTypeDraft};

/// Public view of a ticket type with advisory availability.
#[derive(Debug, Clone, Serialize)]
pub struct TicketTypeListing {
    #[serde(flatten)]
    pub ticket_type: TicketType,
    pub remaining: i32,
    pub sold_out: bool,
    pub sale_window: SaleWindow,
}

/// Organizer-side catalog: events, ticket types and their sales figures.
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn TicketStore>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    pub async fn create_event(&self, principal: &Principal, draft: EventDraft) -> TicketingResult<Event> {
        principal.require(Role::Organizer, "create events")?;
        draft.validate()?;

        let event = draft.into_event(principal.user_id);
        self.store.insert_event(&event).await?;
        info!(event_id = %event.id, organizer_id = %event.organizer_id, "Event created");
        Ok(event)
    }

    pub async fn get_event(&self, event_id: Uuid) -> TicketingResult<Event> {
        self.store
            .get_event(event_id)
            .await?
            .ok_or(TicketingError::NotFound("Event"))
    }

    pub async fn add_ticket_type(
        &self,
        principal: &Principal,
        event_id: Uuid,
        draft: TicketTypeDraft,
    ) -> TicketingResult<TicketType> {
        draft.validate()?;
        let event = self.get_event(event_id).await?;
        ensure_manager(principal, &event, "You can only manage ticket types for your own events")?;

        let ticket_type = draft.into_ticket_type(event.id);
        self.store.insert_ticket_type(&ticket_type).await?;
        info!(ticket_type_id = %ticket_type.id, %event_id, quantity = ticket_type.quantity, "Ticket type added");
        Ok(ticket_type)
    }

    pub async fn list_ticket_types(&self, event_id: Uuid) -> TicketingResult<Vec<TicketTypeListing>> {
        let event = self.get_event(event_id).await?;
        let now = Utc::now();

        let listings = self
            .store
            .list_ticket_types(event.id)
            .await?
            .into_iter()
            .map(|tt| TicketTypeListing {
                remaining: tt.remaining(),
                sold_out: tt.is_sold_out(),
                sale_window: SaleWindow::at(&tt, now),
                ticket_type: tt,
            })
            .collect();
        Ok(listings)
    }

    /// Removal is only allowed while nothing has been sold; the check and the delete
    /// are a single conditional statement in storage.
    pub async fn remove_ticket_type(&self, principal: &Principal, ticket_type_id: Uuid) -> TicketingResult<()> {
        let ticket_type = self
            .store
            .get_ticket_type(ticket_type_id)
            .await?
            .ok_or(TicketingError::NotFound("Ticket type"))?;
        let event = self.get_event(ticket_type.event_id).await?;
        ensure_manager(principal, &event, "You can only manage ticket types for your own events")?;

        match self.store.delete_ticket_type(ticket_type_id).await? {
            TicketTypeRemoval::Removed => {
                info!(%ticket_type_id, "Ticket type removed");
                Ok(())
            }
            TicketTypeRemoval::HasSales { quantity_sold } => Err(TicketingError::Conflict(format!(
                "Cannot delete ticket type with {} tickets sold",
                quantity_sold
            ))),
            TicketTypeRemoval::Missing => Err(TicketingError::NotFound("Ticket type")),
        }
    }

    pub async fn sales_report(&self, principal: &Principal, event_id: Uuid) -> TicketingResult<SalesReport> {
        let event = self.get_event(event_id).await?;
        ensure_manager(principal, &event, "You can only view stats for your own events")?;

        let ticket_types = self.store.list_ticket_types(event.id).await?;
        Ok(SalesReport::build(event, ticket_types))
    }
}

fn ensure_manager(principal: &Principal, event: &Event, denied: &str) -> TicketingResult<()> {
    if principal.can_manage(event.organizer_id) {
        Ok(())
    } else {
        Err(TicketingError::Forbidden(denied.to_string()))
    }
}
