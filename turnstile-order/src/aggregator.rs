use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;
use turnstile_catalog::{InventoryLedger, PriceTally, SaleWindow};
use turnstile_core::identity::{Principal, Role};
use turnstile_core::repository::{InsertOutcome, PurchaseTx, Reservation, StoreError, TicketStore};
use turnstile_core::{TicketingError, TicketingResult};
use turnstile_shared::models::events::{TicketingEvent, TicketsPurchasedEvent};
use turnstile_shared::{Event, Order, PaymentStatus, Ticket};

use crate::codes::CodeDispatcher;
use crate::issuer::{TicketIssuer, MAX_NUMBER_ATTEMPTS};
use crate::models::{PurchaseReceipt, PurchaseRequest};
use crate::numbers::{NumberSource, RandomNumbers};

#[derive(Debug, Clone)]
pub struct PurchaseRules {
    pub max_tickets_per_order: i32,
    /// Deadline for the transactional part of a purchase.
    pub timeout: Duration,
    pub default_payment_method: String,
}

impl Default for PurchaseRules {
    fn default() -> Self {
        Self {
            max_tickets_per_order: 20,
            timeout: Duration::from_secs(5),
            default_payment_method: "simulated".to_string(),
        }
    }
}

/// Turns a purchase request into one committed order with its tickets.
///
/// Reservation, order insert and ticket issuance share one transaction: either all of
/// it is committed or none of it is. Code generation happens after commit.
pub struct OrderAggregator {
    store: Arc<dyn TicketStore>,
    ledger: InventoryLedger,
    issuer: TicketIssuer,
    numbers: Arc<dyn NumberSource>,
    dispatcher: CodeDispatcher,
    rules: PurchaseRules,
    events: Option<broadcast::Sender<TicketingEvent>>,
}

impl OrderAggregator {
    pub fn new(store: Arc<dyn TicketStore>, dispatcher: CodeDispatcher, rules: PurchaseRules) -> Self {
        let numbers: Arc<dyn NumberSource> = Arc::new(RandomNumbers);
        Self {
            ledger: InventoryLedger::new(store.clone()),
            issuer: TicketIssuer::new(numbers.clone()),
            store,
            numbers,
            dispatcher,
            rules,
            events: None,
        }
    }

    pub fn with_numbers(mut self, numbers: Arc<dyn NumberSource>) -> Self {
        self.issuer = TicketIssuer::new(numbers.clone());
        self.numbers = numbers;
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<TicketingEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn purchase(&self, principal: &Principal, request: PurchaseRequest) -> TicketingResult<PurchaseReceipt> {
        // 1. Request shape
        let event_id = request.validate(self.rules.max_tickets_per_order)?;

        // 2. Role
        principal.require(Role::Attendee, "purchase tickets")?;

        // 3. Event
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or(TicketingError::NotFound("Event"))?;

        // 4. Transactional part. The deadline covers the writes, never the commit.
        let deadline = Instant::now() + self.rules.timeout;
        let (order, mut tickets) = self
            .purchase_in_tx(principal, &event, &request, deadline)
            .await
            .inspect_err(|e| match e {
                TicketingError::Timeout => warn!(
                    user_id = %principal.user_id,
                    %event_id,
                    timeout_ms = self.rules.timeout.as_millis() as u64,
                    "Purchase timed out, rolled back"
                ),
                e if e.is_fault() => error!(user_id = %principal.user_id, %event_id, error = ?e, "Purchase failed"),
                _ => {}
            })?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            tickets = tickets.len(),
            total_cents = order.total_cents,
            buyer = %principal.email,
            "Tickets purchased"
        );

        // 5. Codes, isolated per ticket
        let pending_codes = self.dispatcher.dispatch(&mut tickets).await;
        if pending_codes > 0 {
            warn!(order_id = %order.id, pending_codes, "Some ticket codes are pending regeneration");
        }

        if let Some(events) = &self.events {
            // No subscribers is fine
            let _ = events.send(TicketingEvent::TicketsPurchased(TicketsPurchasedEvent {
                order_id: order.id,
                order_number: order.order_number.clone(),
                event_id: order.event_id,
                user_id: order.user_id,
                ticket_count: tickets.len(),
                total_cents: order.total_cents,
                timestamp: Utc::now().timestamp(),
            }));
        }

        Ok(PurchaseReceipt {
            order,
            tickets,
            pending_codes,
        })
    }

    async fn purchase_in_tx(
        &self,
        principal: &Principal,
        event: &Event,
        request: &PurchaseRequest,
        deadline: Instant,
    ) -> TicketingResult<(Order, Vec<Ticket>)> {
        let mut tx = timeout_at(deadline, self.store.begin())
            .await
            .map_err(|_| TicketingError::Timeout)??;

        let filled = timeout_at(deadline, self.fill(tx.as_mut(), principal, event, request))
            .await
            .unwrap_or(Err(TicketingError::Timeout));

        match filled {
            // Never cut short: the outcome must match what was persisted
            Ok(created) => {
                tx.commit().await?;
                Ok(created)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn fill(
        &self,
        tx: &mut dyn PurchaseTx,
        principal: &Principal,
        event: &Event,
        request: &PurchaseRequest,
    ) -> TicketingResult<(Order, Vec<Ticket>)> {
        let now = Utc::now();
        let mut tally = PriceTally::new();
        let mut units: Vec<Uuid> = Vec::with_capacity(request.total_units());

        for line in &request.tickets {
            // A type of another event is indistinguishable from a missing one
            let ticket_type = self
                .store
                .get_ticket_type(line.ticket_type_id)
                .await?
                .filter(|tt| tt.event_id == event.id)
                .ok_or(TicketingError::NotFound("Ticket type"))?;

            SaleWindow::ensure_open(&ticket_type, now)?;

            match self.ledger.reserve_in(tx, ticket_type.id, line.quantity).await? {
                Reservation::Reserved { .. } => {}
                Reservation::Insufficient => {
                    return Err(TicketingError::InsufficientInventory {
                        ticket_type: ticket_type.name,
                        requested: line.quantity,
                    });
                }
            }

            tally.add_line(ticket_type.price_cents, line.quantity)?;
            units.extend(std::iter::repeat(ticket_type.id).take(line.quantity as usize));
        }

        let payment_method = request
            .payment_method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.rules.default_payment_method.as_str())
            .to_string();
        let order = self
            .insert_order(tx, principal.user_id, event.id, tally.total_cents(), payment_method)
            .await?;

        let mut tickets = Vec::with_capacity(units.len());
        for ticket_type_id in units {
            tickets.push(self.issuer.issue(tx, &order, ticket_type_id).await?);
        }

        Ok((order, tickets))
    }

    async fn insert_order(
        &self,
        tx: &mut dyn PurchaseTx,
        user_id: Uuid,
        event_id: Uuid,
        total_cents: i64,
        payment_method: String,
    ) -> TicketingResult<Order> {
        for attempt in 1..=MAX_NUMBER_ATTEMPTS {
            let now = Utc::now();
            // Payment is simulated and always succeeds
            let order = Order {
                id: Uuid::new_v4(),
                user_id,
                event_id,
                order_number: self.numbers.order_number(now),
                total_cents,
                payment_status: PaymentStatus::Completed,
                payment_method: payment_method.clone(),
                transaction_ref: self.numbers.transaction_ref(now),
                created_at: now,
                updated_at: now,
            };

            match tx.insert_order(&order).await? {
                InsertOutcome::Inserted => return Ok(order),
                InsertOutcome::DuplicateNumber => {
                    warn!(order_number = %order.order_number, attempt, "Order number collision, regenerating");
                }
            }
        }

        Err(TicketingError::Storage(StoreError::Database(format!(
            "no unique order number after {} attempts",
            MAX_NUMBER_ATTEMPTS
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use turnstile_core::codes::CodeEncoder;
    use turnstile_shared::{TicketStatus, TicketType};
    use turnstile_store::MemoryStore;

    use crate::codes::tests::{FlakyEncoder, InlineEncoder};
    use crate::models::PurchaseLine;

    struct Fixture {
        store: Arc<MemoryStore>,
        event: Event,
        general: TicketType,
        vip: TicketType,
    }

    async fn fixture(store: MemoryStore) -> Fixture {
        let store = Arc::new(store);
        let event = Event::new(Uuid::new_v4(), "Festival".into(), Some("Park".into()), Utc::now());
        store.insert_event(&event).await.unwrap();
        let general = ticket_type(event.id, "General", 2_500, 10);
        let vip = ticket_type(event.id, "VIP", 10_000, 2);
        store.insert_ticket_type(&general).await.unwrap();
        store.insert_ticket_type(&vip).await.unwrap();
        Fixture { store, event, general, vip }
    }

    fn ticket_type(event_id: Uuid, name: &str, price_cents: i64, quantity: i32) -> TicketType {
        TicketType {
            id: Uuid::new_v4(),
            event_id,
            name: name.into(),
            description: None,
            price_cents,
            quantity,
            quantity_sold: 0,
            sale_start: None,
            sale_end: None,
            created_at: Utc::now(),
        }
    }

    fn aggregator(store: Arc<MemoryStore>, encoder: Arc<dyn CodeEncoder>, rules: PurchaseRules) -> OrderAggregator {
        let dispatcher = CodeDispatcher::new(store.clone(), encoder);
        OrderAggregator::new(store, dispatcher, rules)
    }

    fn attendee() -> Principal {
        Principal::new(Uuid::new_v4(), Role::Attendee, "fan@example.com")
    }

    fn line(tt: &TicketType, quantity: i32) -> PurchaseLine {
        PurchaseLine { ticket_type_id: tt.id, quantity }
    }

    async fn sold(store: &MemoryStore, tt: &TicketType) -> i32 {
        store.get_ticket_type(tt.id).await.unwrap().unwrap().quantity_sold
    }

    #[tokio::test]
    async fn test_ticket_count_matches_request() {
        let f = fixture(MemoryStore::new()).await;
        let agg = aggregator(f.store.clone(), Arc::new(InlineEncoder), PurchaseRules::default());

        let request = PurchaseRequest::new(f.event.id, vec![line(&f.general, 3), line(&f.vip, 2)]);
        let receipt = agg.purchase(&attendee(), request).await.unwrap();

        assert_eq!(receipt.tickets.len(), 5);
        assert_eq!(receipt.pending_codes, 0);
        assert_eq!(receipt.order.total_cents, 3 * 2_500 + 2 * 10_000);
        assert_eq!(receipt.order.payment_status, PaymentStatus::Completed);
        assert_eq!(receipt.order.payment_method, "simulated");
        assert!(receipt.order.order_number.starts_with("ORD"));
        assert!(receipt.order.transaction_ref.starts_with("TXN"));

        let numbers: HashSet<_> = receipt.tickets.iter().map(|t| t.ticket_number.clone()).collect();
        assert_eq!(numbers.len(), 5);
        assert!(receipt.tickets.iter().all(|t| t.order_id == receipt.order.id));
        assert!(receipt.tickets.iter().all(|t| t.status == TicketStatus::Valid && t.has_code()));
        assert_eq!(receipt.tickets.iter().filter(|t| t.ticket_type_id == f.vip.id).count(), 2);

        assert_eq!(sold(&f.store, &f.general).await, 3);
        assert_eq!(sold(&f.store, &f.vip).await, 2);
    }

    #[tokio::test]
    async fn test_insufficient_line_rolls_back_everything() {
        let f = fixture(MemoryStore::new()).await;
        let agg = aggregator(f.store.clone(), Arc::new(InlineEncoder), PurchaseRules::default());

        // General succeeds first, VIP has only 2
        let request = PurchaseRequest::new(f.event.id, vec![line(&f.general, 4), line(&f.vip, 3)]);
        let err = agg.purchase(&attendee(), request).await.unwrap_err();

        assert_eq!(err.category(), "insufficient_inventory");
        assert_eq!(err.to_string(), "Not enough tickets available for VIP");
        assert_eq!(f.store.order_count(), 0);
        assert_eq!(f.store.ticket_count(), 0);
        assert_eq!(sold(&f.store, &f.general).await, 0);
        assert_eq!(sold(&f.store, &f.vip).await, 0);
    }

    #[tokio::test]
    async fn test_ticket_type_of_other_event_is_not_found() {
        let f = fixture(MemoryStore::new()).await;
        let other = Event::new(Uuid::new_v4(), "Other".into(), None, Utc::now());
        f.store.insert_event(&other).await.unwrap();
        let agg = aggregator(f.store.clone(), Arc::new(InlineEncoder), PurchaseRules::default());

        let request = PurchaseRequest::new(other.id, vec![line(&f.general, 1)]);
        let err = agg.purchase(&attendee(), request).await.unwrap_err();

        assert_eq!(err.category(), "not_found");
        assert_eq!(sold(&f.store, &f.general).await, 0);
    }

    #[tokio::test]
    async fn test_only_attendees_purchase() {
        let f = fixture(MemoryStore::new()).await;
        let agg = aggregator(f.store.clone(), Arc::new(InlineEncoder), PurchaseRules::default());
        let organizer = Principal::new(Uuid::new_v4(), Role::Organizer, "org@example.com");

        let request = PurchaseRequest::new(f.event.id, vec![line(&f.general, 1)]);
        let err = agg.purchase(&organizer, request).await.unwrap_err();
        assert_eq!(err.to_string(), "Only attendees can purchase tickets");
    }

    #[tokio::test]
    async fn test_sale_window_is_enforced() {
        let f = fixture(MemoryStore::new()).await;
        let mut later = ticket_type(f.event.id, "Late release", 1_000, 5);
        later.sale_start = Some(Utc::now() + chrono::Duration::days(7));
        f.store.insert_ticket_type(&later).await.unwrap();
        let agg = aggregator(f.store.clone(), Arc::new(InlineEncoder), PurchaseRules::default());

        let request = PurchaseRequest::new(f.event.id, vec![line(&later, 1)]);
        let err = agg.purchase(&attendee(), request).await.unwrap_err();
        assert_eq!(err.category(), "validation");
        assert_eq!(sold(&f.store, &later).await, 0);
    }

    #[tokio::test]
    async fn test_timeout_rolls_back() {
        let f = fixture(MemoryStore::new().with_latency(Duration::from_millis(50))).await;
        let rules = PurchaseRules {
            timeout: Duration::from_millis(20),
            ..PurchaseRules::default()
        };
        let agg = aggregator(f.store.clone(), Arc::new(InlineEncoder), rules);

        let request = PurchaseRequest::new(f.event.id, vec![line(&f.general, 2), line(&f.vip, 1)]);
        let err = agg.purchase(&attendee(), request).await.unwrap_err();

        assert_eq!(err.category(), "purchase_timeout");
        assert_eq!(f.store.order_count(), 0);
        assert_eq!(f.store.ticket_count(), 0);
        assert_eq!(sold(&f.store, &f.general).await, 0);
        assert_eq!(sold(&f.store, &f.vip).await, 0);
    }

    #[tokio::test]
    async fn test_slow_commit_ack_is_not_reported_as_timeout() {
        let f = fixture(MemoryStore::new().with_commit_ack_latency(Duration::from_millis(200))).await;
        let rules = PurchaseRules {
            timeout: Duration::from_millis(50),
            ..PurchaseRules::default()
        };
        let agg = aggregator(f.store.clone(), Arc::new(InlineEncoder), rules);

        let request = PurchaseRequest::new(f.event.id, vec![line(&f.general, 2)]);
        let receipt = agg.purchase(&attendee(), request).await.unwrap();

        // What was committed is what the buyer is told about, codes included
        assert_eq!(receipt.tickets.len(), 2);
        assert_eq!(receipt.pending_codes, 0);
        assert_eq!(f.store.order_count(), 1);
        assert_eq!(f.store.ticket_count(), 2);
        assert_eq!(sold(&f.store, &f.general).await, 2);
        let stored = f.store.list_tickets_for_order(receipt.order.id).await.unwrap();
        assert!(stored.iter().all(|t| t.has_code()));
    }

    #[tokio::test]
    async fn test_encoding_failure_is_isolated() {
        let f = fixture(MemoryStore::new()).await;
        let agg = aggregator(f.store.clone(), Arc::new(FlakyEncoder::failing_on(1)), PurchaseRules::default());

        let request = PurchaseRequest::new(f.event.id, vec![line(&f.general, 3)]);
        let receipt = agg.purchase(&attendee(), request).await.unwrap();

        assert_eq!(receipt.tickets.len(), 3);
        assert_eq!(receipt.pending_codes, 1);

        let stored = f.store.list_tickets_for_order(receipt.order.id).await.unwrap();
        assert_eq!(stored.iter().filter(|t| t.has_code()).count(), 2);
        let pending: Vec<_> = stored.iter().filter(|t| !t.has_code()).collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, TicketStatus::Valid);

        // The regeneration pass picks it up
        let dispatcher = CodeDispatcher::new(f.store.clone(), Arc::new(InlineEncoder));
        let report = dispatcher.regenerate_pending(10).await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.encoded, 1);
        assert!(f.store.get_ticket(pending[0].id).await.unwrap().unwrap().has_code());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_purchases_never_oversell() {
        let f = fixture(MemoryStore::new()).await;
        let agg = Arc::new(aggregator(f.store.clone(), Arc::new(InlineEncoder), PurchaseRules::default()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let agg = agg.clone();
            let request = PurchaseRequest::new(f.event.id, vec![line(&f.vip, 1)]);
            handles.push(tokio::spawn(async move { agg.purchase(&attendee(), request).await }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(e) => assert_eq!(e.category(), "insufficient_inventory"),
            }
        }

        assert_eq!(succeeded, 2);
        assert_eq!(sold(&f.store, &f.vip).await, 2);
        assert_eq!(f.store.ticket_count(), 2);
    }

    #[tokio::test]
    async fn test_purchase_is_broadcast() {
        let f = fixture(MemoryStore::new()).await;
        let (events, mut rx) = broadcast::channel(8);
        let agg = aggregator(f.store.clone(), Arc::new(InlineEncoder), PurchaseRules::default()).with_events(events);

        let request = PurchaseRequest::new(f.event.id, vec![line(&f.general, 2)]);
        let receipt = agg.purchase(&attendee(), request).await.unwrap();

        match rx.recv().await.unwrap() {
            TicketingEvent::TicketsPurchased(e) => {
                assert_eq!(e.order_id, receipt.order.id);
                assert_eq!(e.ticket_count, 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
