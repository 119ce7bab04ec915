use uuid::Uuid;

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct TicketsPurchasedEvent {
    pub order_id: Uuid,
    pub order_number: String,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub ticket_count: usize,
    pub total_cents: i64,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct TicketAdmittedEvent {
    pub ticket_id: Uuid,
    pub ticket_number: String,
    pub event_id: Uuid,
    pub admitted_by: Uuid,
    pub timestamp: i64,
}

/// Everything that goes out on the in-process broadcast channel.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TicketingEvent {
    TicketsPurchased(TicketsPurchasedEvent),
    TicketAdmitted(TicketAdmittedEvent),
}

impl TicketingEvent {
    pub fn event_id(&self) -> Uuid {
        match self {
            TicketingEvent::TicketsPurchased(e) => e.event_id,
            TicketingEvent::TicketAdmitted(e) => e.event_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TicketingEvent::TicketsPurchased(_) => "tickets_purchased",
            TicketingEvent::TicketAdmitted(_) => "ticket_admitted",
        }
    }
}
