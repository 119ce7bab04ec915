use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returned when a persisted status column holds a value we don't know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

// ============================================================================
// Event
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub title: String,
    pub venue: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(organizer_id: Uuid, title: String, venue: Option<String>, starts_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            organizer_id,
            title,
            venue,
            starts_at,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Ticket Type
// ============================================================================

/// A priced category of admission with a fixed inventory cap.
///
/// `quantity_sold` only ever moves through a conditional reservation, so
/// `quantity_sold <= quantity` holds for every persisted row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketType {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Unit price in minor currency units (cents).
    pub price_cents: i64,
    pub quantity: i32,
    pub quantity_sold: i32,
    pub sale_start: Option<DateTime<Utc>>,
    pub sale_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TicketType {
    pub fn remaining(&self) -> i32 {
        (self.quantity - self.quantity_sold).max(0)
    }

    pub fn is_sold_out(&self) -> bool {
        self.remaining() == 0
    }

    /// Revenue already booked against this type.
    pub fn revenue_cents(&self) -> i64 {
        self.price_cents * i64::from(self.quantity_sold)
    }
}

// ============================================================================
// Order
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One purchase transaction. Immutable after creation apart from payment status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub order_number: String,
    pub total_cents: i64,
    pub payment_status: PaymentStatus,
    pub payment_method: String,
    pub transaction_ref: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Ticket
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Valid,
    Used,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Valid => "valid",
            TicketStatus::Used => "used",
            TicketStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valid" => Ok(TicketStatus::Valid),
            "used" => Ok(TicketStatus::Used),
            "cancelled" => Ok(TicketStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A single admissible unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub ticket_type_id: Uuid,
    pub ticket_number: String,
    /// Reference to the rendered code artifact. `None` while generation is pending.
    pub code_ref: Option<String>,
    pub status: TicketStatus,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn has_code(&self) -> bool {
        self.code_ref.as_deref().is_some_and(|r| !r.is_empty())
    }
}

/// Canonical form used for ticket-number lookups: trimmed, upper-cased.
pub fn normalize_ticket_number(raw: &str) -> String {
    raw.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_storage_strings() {
        for status in [TicketStatus::Valid, TicketStatus::Used, TicketStatus::Cancelled] {
            assert_eq!(status.as_str().parse::<TicketStatus>().unwrap(), status);
        }
        assert!("refunded".parse::<TicketStatus>().is_err());
        assert_eq!("completed".parse::<PaymentStatus>().unwrap(), PaymentStatus::Completed);
    }

    #[test]
    fn test_ticket_number_normalization() {
        assert_eq!(normalize_ticket_number("  tkt20240101abc  "), "TKT20240101ABC");
    }

    #[test]
    fn test_remaining_never_negative() {
        let tt = TicketType {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            name: "GA".to_string(),
            description: None,
            price_cents: 2500,
            quantity: 10,
            quantity_sold: 4,
            sale_start: None,
            sale_end: None,
            created_at: Utc::now(),
        };
        assert_eq!(tt.remaining(), 6);
        assert_eq!(tt.revenue_cents(), 10_000);
        assert!(!tt.is_sold_out());
    }
}
