pub mod events;
pub mod ticketing;

pub use ticketing::{
    normalize_ticket_number, Event, Order, PaymentStatus, Ticket, TicketStatus, TicketType, UnknownStatus,
};
