use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;
use turnstile_core::identity::{Principal, Role};
use turnstile_core::repository::{StatusTransition, TicketStore};
use turnstile_core::{TicketingError, TicketingResult};
use turnstile_shared::models::events::{TicketAdmittedEvent, TicketingEvent};
use turnstile_shared::{Ticket, TicketStatus};

use crate::models::{Admission, TicketLookup, ValidationOutcome};

/// Admits tickets at the door.
///
/// The status check and the `valid -> used` write are one compare-and-set in storage,
/// so when the same ticket is scanned at two gates at once exactly one is admitted.
#[derive(Clone)]
pub struct ValidationGate {
    store: Arc<dyn TicketStore>,
    events: Option<broadcast::Sender<TicketingEvent>>,
}

impl ValidationGate {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store, events: None }
    }

    pub fn with_events(mut self, events: broadcast::Sender<TicketingEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn validate(&self, principal: &Principal, lookup: TicketLookup) -> TicketingResult<Admission> {
        ensure_staff(principal, "validate tickets")?;

        // 1. Resolve
        let ticket = self.resolve(&lookup).await?;

        // 2. Staff may only admit to their own events
        self.ensure_event_manager(principal, &ticket).await?;

        // 3. Compare-and-set
        let admission = match self
            .store
            .transition_ticket(ticket.id, TicketStatus::Valid, TicketStatus::Used, Utc::now())
            .await?
        {
            StatusTransition::Applied(ticket) => Admission {
                outcome: ValidationOutcome::NowUsed,
                ticket,
            },
            StatusTransition::Rejected(current) => Admission::from_rejected(current),
            StatusTransition::Missing => return Err(TicketingError::NotFound("Ticket")),
        };

        if admission.is_admitted() {
            info!(
                ticket_id = %admission.ticket.id,
                ticket_number = %admission.ticket.ticket_number,
                admitted_by = %principal.user_id,
                "Ticket admitted"
            );
            self.publish(&admission.ticket, principal.user_id);
        } else {
            warn!(
                ticket_id = %admission.ticket.id,
                outcome = admission.outcome.as_str(),
                "Ticket rejected at gate"
            );
        }

        Ok(admission)
    }

    /// `valid -> cancelled`, with the same atomicity as admission.
    pub async fn cancel(&self, principal: &Principal, ticket_id: Uuid) -> TicketingResult<Ticket> {
        ensure_staff(principal, "cancel tickets")?;

        let ticket = self
            .store
            .get_ticket(ticket_id)
            .await?
            .ok_or(TicketingError::NotFound("Ticket"))?;
        self.ensure_event_manager(principal, &ticket).await?;

        match self
            .store
            .transition_ticket(ticket.id, TicketStatus::Valid, TicketStatus::Cancelled, Utc::now())
            .await?
        {
            StatusTransition::Applied(ticket) => {
                info!(ticket_id = %ticket.id, cancelled_by = %principal.user_id, "Ticket cancelled");
                Ok(ticket)
            }
            StatusTransition::Rejected(current) => Admission::from_rejected(current).into_result(),
            StatusTransition::Missing => Err(TicketingError::NotFound("Ticket")),
        }
    }

    async fn resolve(&self, lookup: &TicketLookup) -> TicketingResult<Ticket> {
        let found = match lookup {
            TicketLookup::Id(id) => self.store.get_ticket(*id).await?,
            TicketLookup::Number(number) => self.store.find_ticket_by_number(number).await?,
        };
        found.ok_or(TicketingError::NotFound("Ticket"))
    }

    async fn ensure_event_manager(&self, principal: &Principal, ticket: &Ticket) -> TicketingResult<()> {
        if principal.is_admin() {
            return Ok(());
        }
        let event = self
            .store
            .get_event(ticket.event_id)
            .await?
            .ok_or(TicketingError::NotFound("Event"))?;
        if principal.can_manage(event.organizer_id) {
            Ok(())
        } else {
            Err(TicketingError::Forbidden(
                "You can only manage tickets for your own events".into(),
            ))
        }
    }

    fn publish(&self, ticket: &Ticket, admitted_by: Uuid) {
        if let Some(events) = &self.events {
            let _ = events.send(TicketingEvent::TicketAdmitted(TicketAdmittedEvent {
                ticket_id: ticket.id,
                ticket_number: ticket.ticket_number.clone(),
                event_id: ticket.event_id,
                admitted_by,
                timestamp: Utc::now().timestamp(),
            }));
        }
    }
}

fn ensure_staff(principal: &Principal, action: &str) -> TicketingResult<()> {
    match principal.role {
        Role::Organizer | Role::Admin => Ok(()),
        Role::Attendee => Err(TicketingError::Forbidden(format!("Only organizers can {}", action))),
    }
}
