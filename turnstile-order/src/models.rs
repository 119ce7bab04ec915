use serde::{Deserialize, Serialize};
use uuid::Uuid;
use turnstile_core::{TicketingError, TicketingResult};
use turnstile_shared::{Order, Ticket, TicketStatus};

// ============================================================================
// Purchase
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseLine {
    pub ticket_type_id: Uuid,
    pub quantity: i32,
}

/// Purchase request as received from a client. Shape is checked once by
/// [`PurchaseRequest::validate`]; everything downstream trusts it.
#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseRequest {
    pub event_id: Option<Uuid>,
    #[serde(default)]
    pub tickets: Vec<PurchaseLine>,
    pub payment_method: Option<String>,
}

impl PurchaseRequest {
    pub fn new(event_id: Uuid, tickets: Vec<PurchaseLine>) -> Self {
        Self {
            event_id: Some(event_id),
            tickets,
            payment_method: None,
        }
    }

    /// Returns the target event on success.
    pub fn validate(&self, max_tickets_per_order: i32) -> TicketingResult<Uuid> {
        let event_id = self
            .event_id
            .ok_or_else(|| TicketingError::Validation("Event ID is required".into()))?;

        if self.tickets.is_empty() {
            return Err(TicketingError::Validation("Tickets array is required".into()));
        }

        let mut units: i64 = 0;
        for line in &self.tickets {
            if line.quantity < 1 {
                return Err(TicketingError::Validation(format!(
                    "Quantity for ticket type {} must be at least 1",
                    line.ticket_type_id
                )));
            }
            units += i64::from(line.quantity);
        }

        if units > i64::from(max_tickets_per_order) {
            return Err(TicketingError::Validation(format!(
                "A single order may contain at most {} tickets",
                max_tickets_per_order
            )));
        }

        Ok(event_id)
    }

    pub fn total_units(&self) -> usize {
        self.tickets.iter().map(|l| l.quantity.max(0) as usize).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseReceipt {
    pub order: Order,
    pub tickets: Vec<Ticket>,
    /// Tickets whose code artifact could not be produced yet.
    pub pending_codes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderWithTickets {
    #[serde(flatten)]
    pub order: Order,
    pub tickets: Vec<Ticket>,
}

// ============================================================================
// Validation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketLookup {
    Id(Uuid),
    /// Matched ignoring case and surrounding whitespace.
    Number(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateRequest {
    pub ticket_id: Option<Uuid>,
    pub ticket_number: Option<String>,
}

impl ValidateRequest {
    pub fn into_lookup(self) -> TicketingResult<TicketLookup> {
        if let Some(id) = self.ticket_id {
            return Ok(TicketLookup::Id(id));
        }
        match self.ticket_number {
            Some(number) if !number.trim().is_empty() => Ok(TicketLookup::Number(number)),
            _ => Err(TicketingError::Validation("Ticket ID or ticket number is required".into())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    #[serde(rename = "valid_now_used")]
    NowUsed,
    AlreadyUsed,
    InvalidStatus,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::NowUsed => "valid_now_used",
            ValidationOutcome::AlreadyUsed => "already_used",
            ValidationOutcome::InvalidStatus => "invalid_status",
        }
    }
}

/// Result of presenting a ticket at the gate.
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    pub outcome: ValidationOutcome,
    pub ticket: Ticket,
}

impl Admission {
    pub fn message(&self) -> String {
        match self.outcome {
            ValidationOutcome::NowUsed => "Ticket validated successfully".to_string(),
            ValidationOutcome::AlreadyUsed => "Ticket already used".to_string(),
            ValidationOutcome::InvalidStatus => format!("Ticket is not valid (status: {})", self.ticket.status),
        }
    }

    pub fn is_admitted(&self) -> bool {
        self.outcome == ValidationOutcome::NowUsed
    }

    /// Collapses rejections into the error taxonomy.
    pub fn into_result(self) -> TicketingResult<Ticket> {
        match self.outcome {
            ValidationOutcome::NowUsed => Ok(self.ticket),
            ValidationOutcome::AlreadyUsed => Err(TicketingError::AlreadyUsed),
            ValidationOutcome::InvalidStatus => Err(TicketingError::InvalidStatus(self.ticket.status)),
        }
    }

    pub(crate) fn from_rejected(ticket: Ticket) -> Self {
        let outcome = match ticket.status {
            TicketStatus::Used => ValidationOutcome::AlreadyUsed,
            _ => ValidationOutcome::InvalidStatus,
        };
        Self { outcome, ticket }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(quantity: i32) -> PurchaseLine {
        PurchaseLine {
            ticket_type_id: Uuid::new_v4(),
            quantity,
        }
    }

    #[test]
    fn test_purchase_request_shape() {
        let event_id = Uuid::new_v4();
        let ok = PurchaseRequest::new(event_id, vec![line(3), line(2)]);
        assert_eq!(ok.validate(20).unwrap(), event_id);
        assert_eq!(ok.total_units(), 5);

        let empty = PurchaseRequest::new(event_id, vec![]);
        assert_eq!(empty.validate(20).unwrap_err().category(), "validation");

        let zero = PurchaseRequest::new(event_id, vec![line(0)]);
        assert!(zero.validate(20).is_err());

        let too_many = PurchaseRequest::new(event_id, vec![line(15), line(6)]);
        assert!(too_many.validate(20).is_err());

        let missing_event: PurchaseRequest =
            serde_json::from_value(serde_json::json!({ "tickets": [] })).unwrap();
        assert_eq!(missing_event.validate(20).unwrap_err().to_string(), "Event ID is required");
    }

    #[test]
    fn test_validate_request_requires_a_key() {
        let none = ValidateRequest { ticket_id: None, ticket_number: Some("  ".into()) };
        assert!(none.into_lookup().is_err());

        let by_number = ValidateRequest { ticket_id: None, ticket_number: Some("tkt1".into()) };
        assert_eq!(by_number.into_lookup().unwrap(), TicketLookup::Number("tkt1".into()));

        let id = Uuid::new_v4();
        let both = ValidateRequest { ticket_id: Some(id), ticket_number: Some("x".into()) };
        assert_eq!(both.into_lookup().unwrap(), TicketLookup::Id(id));
    }

    #[test]
    fn test_outcome_wire_names() {
        assert_eq!(serde_json::to_value(ValidationOutcome::NowUsed).unwrap(), "valid_now_used");
        assert_eq!(serde_json::to_value(ValidationOutcome::AlreadyUsed).unwrap(), "already_used");
        assert_eq!(ValidationOutcome::InvalidStatus.as_str(), "invalid_status");
    }
}
