use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use turnstile_core::repository::{
    InsertOutcome, PendingCursor, PurchaseTx, Reservation, StatusTransition, StoreError, StoreResult,
    TicketStore, TicketTypeRemoval,
};
use turnstile_shared::{normalize_ticket_number, Event, Order, Ticket, TicketStatus, TicketType};

#[derive(Default)]
struct Tables {
    events: HashMap<Uuid, Event>,
    ticket_types: HashMap<Uuid, TicketType>,
    orders: HashMap<Uuid, Order>,
    tickets: HashMap<Uuid, Ticket>,
    // Claimed numbers, including those held by uncommitted purchases.
    order_numbers: HashSet<String>,
    ticket_numbers: HashSet<String>,
}

fn lock(tables: &Mutex<Tables>) -> StoreResult<MutexGuard<'_, Tables>> {
    tables
        .lock()
        .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
}

fn apply_reservation(tables: &mut Tables, ticket_type_id: Uuid, quantity: i32) -> Reservation {
    match tables.ticket_types.get_mut(&ticket_type_id) {
        Some(tt) if quantity > 0 && tt.quantity_sold + quantity <= tt.quantity => {
            tt.quantity_sold += quantity;
            Reservation::Reserved { quantity_sold: tt.quantity_sold }
        }
        _ => Reservation::Insufficient,
    }
}

/// In-process implementation of [`TicketStore`].
///
/// Every read-check-write happens under one mutex, which gives the same guarantees the
/// Postgres store gets from conditional updates. Reservations made inside a purchase are
/// applied immediately (holding the capacity, like a row lock would) and undone if the
/// purchase does not commit; orders and tickets only become visible on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    latency: Option<Duration>,
    commit_ack_latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation inside a purchase by `latency`, to mimic a slow backend.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Delay the acknowledgement of a commit whose writes are already applied.
    pub fn with_commit_ack_latency(mut self, latency: Duration) -> Self {
        self.commit_ack_latency = Some(latency);
        self
    }

    pub fn order_count(&self) -> usize {
        lock(&self.tables).map(|t| t.orders.len()).unwrap_or(0)
    }

    pub fn ticket_count(&self) -> usize {
        lock(&self.tables).map(|t| t.tickets.len()).unwrap_or(0)
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn PurchaseTx>> {
        Ok(Box::new(MemoryTx {
            tables: self.tables.clone(),
            latency: self.latency,
            commit_ack_latency: self.commit_ack_latency,
            reserved: Vec::new(),
            claimed_orders: Vec::new(),
            claimed_tickets: Vec::new(),
            orders: Vec::new(),
            tickets: Vec::new(),
            finished: false,
        }))
    }

    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        let mut tables = lock(&self.tables)?;
        tables.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        Ok(lock(&self.tables)?.events.get(&id).cloned())
    }

    async fn insert_ticket_type(&self, ticket_type: &TicketType) -> StoreResult<()> {
        let mut tables = lock(&self.tables)?;
        if !tables.events.contains_key(&ticket_type.event_id) {
            return Err(StoreError::Database(format!(
                "ticket type references missing event {}",
                ticket_type.event_id
            )));
        }
        tables.ticket_types.insert(ticket_type.id, ticket_type.clone());
        Ok(())
    }

    async fn get_ticket_type(&self, id: Uuid) -> StoreResult<Option<TicketType>> {
        Ok(lock(&self.tables)?.ticket_types.get(&id).cloned())
    }

    async fn list_ticket_types(&self, event_id: Uuid) -> StoreResult<Vec<TicketType>> {
        let tables = lock(&self.tables)?;
        let mut types: Vec<TicketType> = tables
            .ticket_types
            .values()
            .filter(|tt| tt.event_id == event_id)
            .cloned()
            .collect();
        types.sort_by(|a, b| a.price_cents.cmp(&b.price_cents).then_with(|| a.name.cmp(&b.name)));
        Ok(types)
    }

    async fn delete_ticket_type(&self, id: Uuid) -> StoreResult<TicketTypeRemoval> {
        let mut tables = lock(&self.tables)?;
        let sold = match tables.ticket_types.get(&id) {
            Some(tt) => tt.quantity_sold,
            None => return Ok(TicketTypeRemoval::Missing),
        };
        if sold > 0 {
            return Ok(TicketTypeRemoval::HasSales { quantity_sold: sold });
        }
        tables.ticket_types.remove(&id);
        Ok(TicketTypeRemoval::Removed)
    }

    async fn reserve(&self, ticket_type_id: Uuid, quantity: i32) -> StoreResult<Reservation> {
        let mut tables = lock(&self.tables)?;
        Ok(apply_reservation(&mut tables, ticket_type_id, quantity))
    }

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(lock(&self.tables)?.orders.get(&id).cloned())
    }

    async fn list_orders_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>> {
        let tables = lock(&self.tables)?;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        Ok(lock(&self.tables)?.tickets.get(&id).cloned())
    }

    async fn find_ticket_by_number(&self, ticket_number: &str) -> StoreResult<Option<Ticket>> {
        let wanted = normalize_ticket_number(ticket_number);
        let tables = lock(&self.tables)?;
        Ok(tables
            .tickets
            .values()
            .find(|t| normalize_ticket_number(&t.ticket_number) == wanted)
            .cloned())
    }

    async fn list_tickets_for_order(&self, order_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let tables = lock(&self.tables)?;
        let mut tickets: Vec<Ticket> = tables
            .tickets
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect();
        tickets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.ticket_number.cmp(&b.ticket_number)));
        Ok(tickets)
    }

    async fn list_tickets_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let tables = lock(&self.tables)?;
        let mut tickets: Vec<Ticket> = tables
            .tickets
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tickets)
    }

    async fn transition_ticket(
        &self,
        id: Uuid,
        from: TicketStatus,
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<StatusTransition> {
        let mut tables = lock(&self.tables)?;
        let ticket = match tables.tickets.get_mut(&id) {
            Some(t) => t,
            None => return Ok(StatusTransition::Missing),
        };
        if ticket.status != from {
            return Ok(StatusTransition::Rejected(ticket.clone()));
        }
        ticket.status = to;
        if to == TicketStatus::Used {
            ticket.used_at = Some(at);
        }
        ticket.updated_at = at;
        Ok(StatusTransition::Applied(ticket.clone()))
    }

    async fn set_code_ref(&self, ticket_id: Uuid, code_ref: &str) -> StoreResult<bool> {
        let mut tables = lock(&self.tables)?;
        match tables.tickets.get_mut(&ticket_id) {
            Some(ticket) => {
                ticket.code_ref = Some(code_ref.to_string());
                ticket.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_pending_codes(&self, after: Option<PendingCursor>, limit: i64) -> StoreResult<Vec<Ticket>> {
        let tables = lock(&self.tables)?;
        let mut pending: Vec<Ticket> = tables
            .tickets
            .values()
            .filter(|t| t.status == TicketStatus::Valid && !t.has_code())
            .filter(|t| after.is_none_or(|c| (t.created_at, t.id) > (c.created_at, c.id)))
            .cloned()
            .collect();
        pending.sort_by_key(|t| (t.created_at, t.id));
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }
}

pub struct MemoryTx {
    tables: Arc<Mutex<Tables>>,
    latency: Option<Duration>,
    commit_ack_latency: Option<Duration>,
    reserved: Vec<(Uuid, i32)>,
    claimed_orders: Vec<String>,
    claimed_tickets: Vec<String>,
    orders: Vec<Order>,
    tickets: Vec<Ticket>,
    finished: bool,
}

impl MemoryTx {
    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn undo(&mut self) {
        let Ok(mut tables) = self.tables.lock() else {
            return;
        };
        for (ticket_type_id, quantity) in self.reserved.drain(..) {
            if let Some(tt) = tables.ticket_types.get_mut(&ticket_type_id) {
                tt.quantity_sold -= quantity;
            }
        }
        for number in self.claimed_orders.drain(..) {
            tables.order_numbers.remove(&number);
        }
        for number in self.claimed_tickets.drain(..) {
            tables.ticket_numbers.remove(&number);
        }
        self.orders.clear();
        self.tickets.clear();
    }
}

#[async_trait]
impl PurchaseTx for MemoryTx {
    async fn reserve(&mut self, ticket_type_id: Uuid, quantity: i32) -> StoreResult<Reservation> {
        self.pause().await;
        let reservation = {
            let mut tables = lock(&self.tables)?;
            apply_reservation(&mut tables, ticket_type_id, quantity)
        };
        if reservation.is_reserved() {
            self.reserved.push((ticket_type_id, quantity));
        }
        Ok(reservation)
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<InsertOutcome> {
        self.pause().await;
        let claimed = {
            let mut tables = lock(&self.tables)?;
            if !tables.events.contains_key(&order.event_id) {
                return Err(StoreError::Database(format!("order references missing event {}", order.event_id)));
            }
            tables.order_numbers.insert(order.order_number.clone())
        };
        if !claimed {
            return Ok(InsertOutcome::DuplicateNumber);
        }
        self.claimed_orders.push(order.order_number.clone());
        self.orders.push(order.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> StoreResult<InsertOutcome> {
        self.pause().await;
        if !self.orders.iter().any(|o| o.id == ticket.order_id) {
            return Err(StoreError::Database(format!("ticket references missing order {}", ticket.order_id)));
        }
        let number = normalize_ticket_number(&ticket.ticket_number);
        let claimed = lock(&self.tables)?.ticket_numbers.insert(number.clone());
        if !claimed {
            return Ok(InsertOutcome::DuplicateNumber);
        }
        self.claimed_tickets.push(number);
        self.tickets.push(ticket.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        self.pause().await;
        {
            let mut tables = lock(&self.tables)?;
            for order in self.orders.drain(..) {
                tables.orders.insert(order.id, order);
            }
            for ticket in self.tickets.drain(..) {
                tables.tickets.insert(ticket.id, ticket);
            }
        }
        self.reserved.clear();
        self.claimed_orders.clear();
        self.claimed_tickets.clear();
        self.finished = true;
        if let Some(latency) = self.commit_ack_latency {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        self.undo();
        self.finished = true;
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.finished {
            self.undo();
        }
    }
}
