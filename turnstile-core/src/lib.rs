pub mod repository;
pub mod identity;
pub mod codes;

use turnstile_shared::TicketStatus;

pub use repository::StoreError;

/// Failure taxonomy shared by every ticketing operation.
///
/// Each variant maps to a stable machine-readable category (see [`TicketingError::category`]);
/// expected business outcomes (insufficient inventory, already-used tickets) are kept apart
/// from storage faults.
#[derive(Debug, thiserror::Error)]
pub enum TicketingError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(String),

    #[error("Not enough tickets available for {ticket_type}")]
    InsufficientInventory {
        ticket_type: String,
        requested: i32,
    },

    #[error("Ticket already used")]
    AlreadyUsed,

    #[error("Ticket is not valid (status: {0})")]
    InvalidStatus(TicketStatus),

    #[error("{0}")]
    Conflict(String),

    #[error("Purchase did not complete before the deadline")]
    Timeout,

    #[error("Failed to complete purchase")]
    Storage(#[from] StoreError),
}

impl TicketingError {
    pub fn category(&self) -> &'static str {
        match self {
            TicketingError::Validation(_) => "validation",
            TicketingError::NotFound(_) => "not_found",
            TicketingError::Forbidden(_) => "forbidden",
            TicketingError::InsufficientInventory { .. } => "insufficient_inventory",
            TicketingError::AlreadyUsed => "already_used",
            TicketingError::InvalidStatus(_) => "invalid_status",
            TicketingError::Conflict(_) => "conflict",
            TicketingError::Timeout => "purchase_timeout",
            TicketingError::Storage(_) => "purchase_failed",
        }
    }

    /// True for faults (as opposed to business outcomes the caller can act on).
    pub fn is_fault(&self) -> bool {
        matches!(self, TicketingError::Storage(_) | TicketingError::Timeout)
    }
}

pub type TicketingResult<T> = Result<T, TicketingError>;
