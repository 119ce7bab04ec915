use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;
use turnstile_core::repository::{
    InsertOutcome, PendingCursor, PurchaseTx, Reservation, StatusTransition, StoreError, StoreResult,
    TicketStore, TicketTypeRemoval,
};
use turnstile_shared::{normalize_ticket_number, Event, Order, Ticket, TicketStatus, TicketType};

fn db_err(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => StoreError::Unavailable(err.to_string()),
        other => StoreError::Database(other.to_string()),
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    organizer_id: Uuid,
    title: String,
    venue: Option<String>,
    starts_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            id: row.id,
            organizer_id: row.organizer_id,
            title: row.title,
            venue: row.venue,
            starts_at: row.starts_at,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TicketTypeRow {
    id: Uuid,
    event_id: Uuid,
    name: String,
    description: Option<String>,
    price_cents: i64,
    quantity: i32,
    quantity_sold: i32,
    sale_start: Option<DateTime<Utc>>,
    sale_end: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<TicketTypeRow> for TicketType {
    fn from(row: TicketTypeRow) -> Self {
        TicketType {
            id: row.id,
            event_id: row.event_id,
            name: row.name,
            description: row.description,
            price_cents: row.price_cents,
            quantity: row.quantity,
            quantity_sold: row.quantity_sold,
            sale_start: row.sale_start,
            sale_end: row.sale_end,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    event_id: Uuid,
    order_number: String,
    total_cents: i64,
    payment_status: String,
    payment_method: String,
    transaction_ref: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let payment_status = row
            .payment_status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("order {}: {}", row.id, e)))?;
        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            event_id: row.event_id,
            order_number: row.order_number,
            total_cents: row.total_cents,
            payment_status,
            payment_method: row.payment_method,
            transaction_ref: row.transaction_ref,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    order_id: Uuid,
    user_id: Uuid,
    event_id: Uuid,
    ticket_type_id: Uuid,
    ticket_number: String,
    code_ref: Option<String>,
    status: String,
    used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("ticket {}: {}", row.id, e)))?;
        Ok(Ticket {
            id: row.id,
            order_id: row.order_id,
            user_id: row.user_id,
            event_id: row.event_id,
            ticket_type_id: row.ticket_type_id,
            ticket_number: row.ticket_number,
            code_ref: row.code_ref,
            status,
            used_at: row.used_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const EVENT_COLUMNS: &str = "id, organizer_id, title, venue, starts_at, created_at";
const TICKET_TYPE_COLUMNS: &str =
    "id, event_id, name, description, price_cents, quantity, quantity_sold, sale_start, sale_end, created_at";
const ORDER_COLUMNS: &str = "id, user_id, event_id, order_number, total_cents, payment_status, payment_method, transaction_ref, created_at, updated_at";
const TICKET_COLUMNS: &str = "id, order_id, user_id, event_id, ticket_type_id, ticket_number, code_ref, status, used_at, created_at, updated_at";

const RESERVE_SQL: &str = r#"
    UPDATE ticket_types
    SET quantity_sold = quantity_sold + $2
    WHERE id = $1 AND quantity_sold + $2 <= quantity
    RETURNING quantity_sold
"#;

fn reservation_from(row: Option<(i32,)>) -> Reservation {
    match row {
        Some((quantity_sold,)) => Reservation::Reserved { quantity_sold },
        None => Reservation::Insufficient,
    }
}

fn tickets_from(rows: Vec<TicketRow>) -> StoreResult<Vec<Ticket>> {
    rows.into_iter().map(Ticket::try_from).collect()
}

pub struct PgTicketStore {
    pool: PgPool,
}

impl PgTicketStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        let row = sqlx::query_as::<_, TicketRow>(&format!("SELECT {} FROM tickets WHERE id = $1", TICKET_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Ticket::try_from).transpose()
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    async fn begin(&self) -> StoreResult<Box<dyn PurchaseTx>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(PgPurchaseTx { tx }))
    }

    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO events (id, organizer_id, title, venue, starts_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(event.organizer_id)
        .bind(&event.title)
        .bind(&event.venue)
        .bind(event.starts_at)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        let row = sqlx::query_as::<_, EventRow>(&format!("SELECT {} FROM events WHERE id = $1", EVENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(Event::from))
    }

    async fn insert_ticket_type(&self, ticket_type: &TicketType) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ticket_types (id, event_id, name, description, price_cents, quantity, quantity_sold, sale_start, sale_end, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(ticket_type.id)
        .bind(ticket_type.event_id)
        .bind(&ticket_type.name)
        .bind(&ticket_type.description)
        .bind(ticket_type.price_cents)
        .bind(ticket_type.quantity)
        .bind(ticket_type.quantity_sold)
        .bind(ticket_type.sale_start)
        .bind(ticket_type.sale_end)
        .bind(ticket_type.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_ticket_type(&self, id: Uuid) -> StoreResult<Option<TicketType>> {
        let row = sqlx::query_as::<_, TicketTypeRow>(&format!(
            "SELECT {} FROM ticket_types WHERE id = $1",
            TICKET_TYPE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(TicketType::from))
    }

    async fn list_ticket_types(&self, event_id: Uuid) -> StoreResult<Vec<TicketType>> {
        let rows = sqlx::query_as::<_, TicketTypeRow>(&format!(
            "SELECT {} FROM ticket_types WHERE event_id = $1 ORDER BY price_cents ASC, name ASC",
            TICKET_TYPE_COLUMNS
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(TicketType::from).collect())
    }

    async fn delete_ticket_type(&self, id: Uuid) -> StoreResult<TicketTypeRemoval> {
        let deleted = sqlx::query("DELETE FROM ticket_types WHERE id = $1 AND quantity_sold = 0")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if deleted.rows_affected() > 0 {
            return Ok(TicketTypeRemoval::Removed);
        }

        let sold: Option<(i32,)> = sqlx::query_as("SELECT quantity_sold FROM ticket_types WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(match sold {
            Some((quantity_sold,)) => TicketTypeRemoval::HasSales { quantity_sold },
            None => TicketTypeRemoval::Missing,
        })
    }

    async fn reserve(&self, ticket_type_id: Uuid, quantity: i32) -> StoreResult<Reservation> {
        let row: Option<(i32,)> = sqlx::query_as(RESERVE_SQL)
            .bind(ticket_type_id)
            .bind(quantity)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(reservation_from(row))
    }

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Order::try_from).transpose()
    }

    async fn list_orders_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE user_id = $1 ORDER BY created_at DESC",
            ORDER_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        self.fetch_ticket(id).await
    }

    async fn find_ticket_by_number(&self, ticket_number: &str) -> StoreResult<Option<Ticket>> {
        // Matches the expression index tickets_ticket_number_key.
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {} FROM tickets WHERE UPPER(BTRIM(ticket_number)) = $1 LIMIT 1",
            TICKET_COLUMNS
        ))
        .bind(normalize_ticket_number(ticket_number))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(Ticket::try_from).transpose()
    }

    async fn list_tickets_for_order(&self, order_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {} FROM tickets WHERE order_id = $1 ORDER BY created_at ASC, ticket_number ASC",
            TICKET_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        tickets_from(rows)
    }

    async fn list_tickets_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {} FROM tickets WHERE user_id = $1 ORDER BY created_at DESC",
            TICKET_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        tickets_from(rows)
    }

    async fn transition_ticket(
        &self,
        id: Uuid,
        from: TicketStatus,
        to: TicketStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<StatusTransition> {
        // Single conditional update: of N concurrent callers exactly one sees a row back.
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            UPDATE tickets
            SET status = $3,
                used_at = CASE WHEN $3 = 'used' THEN $4 ELSE used_at END,
                updated_at = $4
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            TICKET_COLUMNS
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        if let Some(row) = row {
            return Ok(StatusTransition::Applied(Ticket::try_from(row)?));
        }

        Ok(match self.fetch_ticket(id).await? {
            Some(current) => StatusTransition::Rejected(current),
            None => StatusTransition::Missing,
        })
    }

    async fn set_code_ref(&self, ticket_id: Uuid, code_ref: &str) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE tickets SET code_ref = $2, updated_at = NOW() WHERE id = $1")
            .bind(ticket_id)
            .bind(code_ref)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_pending_codes(&self, after: Option<PendingCursor>, limit: i64) -> StoreResult<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {} FROM tickets \
             WHERE status = 'valid' AND (code_ref IS NULL OR code_ref = '') \
               AND ($1::timestamptz IS NULL OR (created_at, id) > ($1, $2::uuid)) \
             ORDER BY created_at ASC, id ASC LIMIT $3",
            TICKET_COLUMNS
        ))
        .bind(after.map(|c| c.created_at))
        .bind(after.map(|c| c.id))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        tickets_from(rows)
    }
}

/// Purchase unit of work over one Postgres transaction.
///
/// sqlx rolls the transaction back when it is dropped uncommitted, which is what makes a
/// timed-out purchase safe to abandon.
pub struct PgPurchaseTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl PurchaseTx for PgPurchaseTx {
    async fn reserve(&mut self, ticket_type_id: Uuid, quantity: i32) -> StoreResult<Reservation> {
        let row: Option<(i32,)> = sqlx::query_as(RESERVE_SQL)
            .bind(ticket_type_id)
            .bind(quantity)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(reservation_from(row))
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, event_id, order_number, total_cents, payment_status, payment_method, transaction_ref, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (order_number) DO NOTHING
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.event_id)
        .bind(&order.order_number)
        .bind(order.total_cents)
        .bind(order.payment_status.as_str())
        .bind(&order.payment_method)
        .bind(&order.transaction_ref)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        Ok(if result.rows_affected() == 0 {
            InsertOutcome::DuplicateNumber
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> StoreResult<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO tickets (id, order_id, user_id, event_id, ticket_type_id, ticket_number, code_ref, status, used_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT ((UPPER(BTRIM(ticket_number)))) DO NOTHING
            "#,
        )
        .bind(ticket.id)
        .bind(ticket.order_id)
        .bind(ticket.user_id)
        .bind(ticket.event_id)
        .bind(ticket.ticket_type_id)
        .bind(normalize_ticket_number(&ticket.ticket_number))
        .bind(&ticket.code_ref)
        .bind(ticket.status.as_str())
        .bind(ticket.used_at)
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        Ok(if result.rows_affected() == 0 {
            InsertOutcome::DuplicateNumber
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(db_err)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await.map_err(db_err)
    }
}
