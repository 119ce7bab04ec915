use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use turnstile_core::{TicketingError, TicketingResult};
use turnstile_shared::{Event, TicketType};

/// Incoming event definition from an organizer.
#[derive(Debug, Clone, Deserialize)]
pub struct EventDraft {
    pub title: String,
    pub venue: Option<String>,
    pub starts_at: DateTime<Utc>,
}

impl EventDraft {
    pub fn validate(&self) -> TicketingResult<()> {
        if self.title.trim().is_empty() {
            return Err(TicketingError::Validation("Event title is required".into()));
        }
        Ok(())
    }

    pub fn into_event(self, organizer_id: Uuid) -> Event {
        let venue = self.venue.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Event::new(organizer_id, self.title.trim().to_string(), venue, self.starts_at)
    }
}

/// Incoming ticket type definition. Validated once here, trusted afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct TicketTypeDraft {
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub quantity: i32,
    pub sale_start: Option<DateTime<Utc>>,
    pub sale_end: Option<DateTime<Utc>>,
}

impl TicketTypeDraft {
    pub fn validate(&self) -> TicketingResult<()> {
        if self.name.trim().is_empty() {
            return Err(TicketingError::Validation("Ticket type name is required".into()));
        }
        if self.price_cents < 0 {
            return Err(TicketingError::Validation("Price cannot be negative".into()));
        }
        if self.quantity < 0 {
            return Err(TicketingError::Validation("Quantity cannot be negative".into()));
        }
        if let (Some(start), Some(end)) = (self.sale_start, self.sale_end) {
            if start >= end {
                return Err(TicketingError::Validation("Sale start must be before sale end".into()));
            }
        }
        Ok(())
    }

    pub fn into_ticket_type(self, event_id: Uuid) -> TicketType {
        TicketType {
            id: Uuid::new_v4(),
            event_id,
            name: self.name.trim().to_string(),
            description: self.description,
            price_cents: self.price_cents,
            quantity: self.quantity,
            quantity_sold: 0,
            sale_start: self.sale_start,
            sale_end: self.sale_end,
            created_at: Utc::now(),
        }
    }
}

/// Where `now` falls relative to a ticket type's optional sale bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "at", rename_all = "snake_case")]
pub enum SaleWindow {
    NotStarted(DateTime<Utc>),
    Open,
    Ended(DateTime<Utc>),
}

impl SaleWindow {
    pub fn at(ticket_type: &TicketType, now: DateTime<Utc>) -> Self {
        match (ticket_type.sale_start, ticket_type.sale_end) {
            (Some(start), _) if now < start => SaleWindow::NotStarted(start),
            (_, Some(end)) if now >= end => SaleWindow::Ended(end),
            _ => SaleWindow::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, SaleWindow::Open)
    }

    /// Rejects a purchase line outside the window.
    pub fn ensure_open(ticket_type: &TicketType, now: DateTime<Utc>) -> TicketingResult<()> {
        match Self::at(ticket_type, now) {
            SaleWindow::Open => Ok(()),
            SaleWindow::NotStarted(start) => Err(TicketingError::Validation(format!(
                "Sales for {} open at {}",
                ticket_type.name,
                start.to_rfc3339()
            ))),
            SaleWindow::Ended(end) => Err(TicketingError::Validation(format!(
                "Sales for {} closed at {}",
                ticket_type.name,
                end.to_rfc3339()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn draft() -> TicketTypeDraft {
        TicketTypeDraft {
            name: "VIP".into(),
            description: Some("Front rows".into()),
            price_cents: 15_000,
            quantity: 40,
            sale_start: None,
            sale_end: None,
        }
    }

    #[test]
    fn test_draft_validation() {
        assert!(draft().validate().is_ok());

        let mut d = draft();
        d.price_cents = -1;
        assert_eq!(d.validate().unwrap_err().category(), "validation");

        let mut d = draft();
        d.name = "   ".into();
        assert!(d.validate().is_err());

        let now = Utc::now();
        let mut d = draft();
        d.sale_start = Some(now);
        d.sale_end = Some(now - Duration::hours(1));
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_draft_starts_unsold() {
        let event_id = Uuid::new_v4();
        let tt = draft().into_ticket_type(event_id);
        assert_eq!(tt.event_id, event_id);
        assert_eq!(tt.quantity_sold, 0);
        assert_eq!(tt.remaining(), 40);
    }

    #[test]
    fn test_sale_window() {
        let now = Utc::now();
        let mut tt = draft().into_ticket_type(Uuid::new_v4());
        assert!(SaleWindow::at(&tt, now).is_open());

        tt.sale_start = Some(now + Duration::days(1));
        assert_eq!(SaleWindow::at(&tt, now), SaleWindow::NotStarted(now + Duration::days(1)));
        assert!(SaleWindow::ensure_open(&tt, now).is_err());

        tt.sale_start = Some(now - Duration::days(2));
        tt.sale_end = Some(now - Duration::days(1));
        assert!(matches!(SaleWindow::at(&tt, now), SaleWindow::Ended(_)));

        tt.sale_end = Some(now + Duration::days(1));
        assert!(SaleWindow::ensure_open(&tt, now).is_ok());
    }
}
