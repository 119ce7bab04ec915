use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use turnstile_shared::{Event, Order, Ticket, TicketStatus, TicketType};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a conditional `sold = sold + qty WHERE sold + qty <= total` update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Reserved { quantity_sold: i32 },
    /// Zero rows matched: the type is missing or would be oversold.
    Insufficient,
}

impl Reservation {
    pub fn is_reserved(&self) -> bool {
        matches!(self, Reservation::Reserved { .. })
    }
}

/// Outcome of an insert guarded by a uniqueness constraint on a generated number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The generated order/ticket number already exists; nothing was written.
    DuplicateNumber,
}

/// Outcome of a compare-and-set on `tickets.status`.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusTransition {
    /// The row was in the expected status and now holds the new one.
    Applied(Ticket),
    /// The row exists but was not in the expected status. Carries the current snapshot.
    Rejected(Ticket),
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketTypeRemoval {
    Removed,
    HasSales { quantity_sold: i32 },
    Missing,
}

/// Position in the pending-code queue, ordered by `(created_at, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl From<&Ticket> for PendingCursor {
    fn from(ticket: &Ticket) -> Self {
        Self {
            created_at: ticket.created_at,
            id: ticket.id,
        }
    }
}

/// A purchase-scoped unit of work.
///
/// Nothing written through it is visible to other readers until [`PurchaseTx::commit`].
/// Dropping it without committing rolls every write back.
#[async_trait]
pub trait PurchaseTx: Send {
    async fn reserve(&mut self, ticket_type_id: Uuid, quantity: i32) -> StoreResult<Reservation>;

    async fn insert_order(&mut self, order: &Order) -> StoreResult<InsertOutcome>;

    async fn insert_ticket(&mut self, ticket: &Ticket) -> StoreResult<InsertOutcome>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Repository trait for everything the ticketing core persists.
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn PurchaseTx>>;

    async fn insert_event(&self, event: &Event) -> StoreResult<()>;

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>>;

    async fn insert_ticket_type(&self, ticket_type: &TicketType) -> StoreResult<()>;

    async fn get_ticket_type(&self, id: Uuid) -> StoreResult<Option<TicketType>>;

    async fn list_ticket_types(&self, event_id: Uuid) -> StoreResult<Vec<TicketType>>;

    /// Deletes a ticket type only while nothing has been sold against it.
    async fn delete_ticket_type(&self, id: Uuid) -> StoreResult<TicketTypeRemoval>;

    /// Auto-committed reservation outside of a purchase.
    async fn reserve(&self, ticket_type_id: Uuid, quantity: i32) -> StoreResult<Reservation>;

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>>;

    async fn list_orders_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>>;

    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>>;

    /// Lookup by ticket number, ignoring case and surrounding whitespace.
    async fn find_ticket_by_number(&self, ticket_number: &str) -> StoreResult<Option<Ticket>>;

    async fn list_tickets_for_order(&self, order_id: Uuid) -> StoreResult<Vec<Ticket>>;

    async fn list_tickets_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Ticket>>;

    /// Atomically moves a ticket from `from` to `to`. Stamps `used_at` when `to` is `Used`.
    async fn transition_ticket(
        &self,
        id: Uuid,
        from: TicketStatus,
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<StatusTransition>;

    /// Records a rendered code artifact. Touches nothing but the code reference.
    async fn set_code_ref(&self, ticket_id: Uuid, code_ref: &str) -> StoreResult<bool>;

    /// Valid tickets whose code artifact is still pending, oldest first, strictly after `after`.
    async fn list_pending_codes(&self, after: Option<PendingCursor>, limit: i64) -> StoreResult<Vec<Ticket>>;
}
