pub mod pii;
pub mod models;

pub use models::{
    normalize_ticket_number, Event, Order, PaymentStatus, Ticket, TicketStatus, TicketType, UnknownStatus,
};
