use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;
use turnstile_core::repository::{InsertOutcome, PurchaseTx, StoreError};
use turnstile_core::{TicketingError, TicketingResult};
use turnstile_shared::{Order, Ticket, TicketStatus};

use crate::numbers::NumberSource;

/// Attempts per generated number before the purchase is given up as a fault.
pub const MAX_NUMBER_ATTEMPTS: usize = 5;

/// Creates ticket rows, one per purchased unit.
#[derive(Clone)]
pub struct TicketIssuer {
    numbers: Arc<dyn NumberSource>,
}

impl TicketIssuer {
    pub fn new(numbers: Arc<dyn NumberSource>) -> Self {
        Self { numbers }
    }

    /// Inserts a `valid` ticket with a pending code inside `tx`.
    ///
    /// A number collision leaves the transaction usable, so the issuer simply draws again.
    pub async fn issue(
        &self,
        tx: &mut dyn PurchaseTx,
        order: &Order,
        ticket_type_id: Uuid,
    ) -> TicketingResult<Ticket> {
        for attempt in 1..=MAX_NUMBER_ATTEMPTS {
            let now = Utc::now();
            let ticket = Ticket {
                id: Uuid::new_v4(),
                order_id: order.id,
                user_id: order.user_id,
                event_id: order.event_id,
                ticket_type_id,
                ticket_number: self.numbers.ticket_number(now),
                code_ref: None,
                status: TicketStatus::Valid,
                used_at: None,
                created_at: now,
                updated_at: now,
            };

            match tx.insert_ticket(&ticket).await? {
                InsertOutcome::Inserted => return Ok(ticket),
                InsertOutcome::DuplicateNumber => {
                    warn!(ticket_number = %ticket.ticket_number, attempt, "Ticket number collision, regenerating");
                }
            }
        }

        Err(TicketingError::Storage(StoreError::Database(format!(
            "no unique ticket number after {} attempts",
            MAX_NUMBER_ATTEMPTS
        ))))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use chrono::DateTime;
    use turnstile_core::repository::TicketStore;
    use turnstile_shared::{Event, PaymentStatus, TicketType};
    use turnstile_store::MemoryStore;

    use crate::numbers::RandomNumbers;

    /// Hands out scripted ticket numbers first, then falls back to random ones.
    pub(crate) struct ScriptedNumbers {
        queue: Mutex<VecDeque<String>>,
    }

    impl ScriptedNumbers {
        pub(crate) fn new(numbers: &[&str]) -> Self {
            Self {
                queue: Mutex::new(numbers.iter().map(|n| n.to_string()).collect()),
            }
        }
    }

    impl NumberSource for ScriptedNumbers {
        fn ticket_number(&self, now: DateTime<Utc>) -> String {
            let next = self.queue.lock().unwrap().pop_front();
            next.unwrap_or_else(|| RandomNumbers.ticket_number(now))
        }

        fn order_number(&self, now: DateTime<Utc>) -> String {
            RandomNumbers.order_number(now)
        }

        fn transaction_ref(&self, now: DateTime<Utc>) -> String {
            RandomNumbers.transaction_ref(now)
        }
    }

    async fn open_order(store: &MemoryStore) -> (Box<dyn PurchaseTx>, Order, Uuid) {
        let event = Event::new(Uuid::new_v4(), "Gig".into(), None, Utc::now());
        store.insert_event(&event).await.unwrap();
        let tt = TicketType {
            id: Uuid::new_v4(),
            event_id: event.id,
            name: "General".into(),
            description: None,
            price_cents: 1_000,
            quantity: 10,
            quantity_sold: 0,
            sale_start: None,
            sale_end: None,
            created_at: Utc::now(),
        };
        store.insert_ticket_type(&tt).await.unwrap();

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            event_id: event.id,
            order_number: RandomNumbers.order_number(now),
            total_cents: 0,
            payment_status: PaymentStatus::Completed,
            payment_method: "simulated".into(),
            transaction_ref: RandomNumbers.transaction_ref(now),
            created_at: now,
            updated_at: now,
        };
        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&order).await.unwrap();
        (tx, order, tt.id)
    }

    #[tokio::test]
    async fn test_issue_creates_valid_pending_ticket() {
        let store = MemoryStore::new();
        let (mut tx, order, tt_id) = open_order(&store).await;
        let issuer = TicketIssuer::new(Arc::new(RandomNumbers));

        let ticket = issuer.issue(tx.as_mut(), &order, tt_id).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Valid);
        assert!(ticket.code_ref.is_none());
        assert_eq!(ticket.order_id, order.id);
        assert!(ticket.ticket_number.starts_with("TKT"));
    }

    #[tokio::test]
    async fn test_collision_is_retried() {
        let store = MemoryStore::new();
        let (mut tx, order, tt_id) = open_order(&store).await;
        let issuer = TicketIssuer::new(Arc::new(ScriptedNumbers::new(&[
            "TKT20260101AAAAAAAAAA",
            "TKT20260101AAAAAAAAAA",
            "tkt20260101aaaaaaaaaa ",
            "TKT20260101BBBBBBBBBB",
        ])));

        let first = issuer.issue(tx.as_mut(), &order, tt_id).await.unwrap();
        let second = issuer.issue(tx.as_mut(), &order, tt_id).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(first.ticket_number, "TKT20260101AAAAAAAAAA");
        assert_eq!(second.ticket_number, "TKT20260101BBBBBBBBBB");
        assert_eq!(store.ticket_count(), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_bounded_attempts() {
        let store = MemoryStore::new();
        let (mut tx, order, tt_id) = open_order(&store).await;
        let same = ["TKT20260101CCCCCCCCCC"; MAX_NUMBER_ATTEMPTS + 1];
        let issuer = TicketIssuer::new(Arc::new(ScriptedNumbers::new(&same)));

        issuer.issue(tx.as_mut(), &order, tt_id).await.unwrap();
        let err = issuer.issue(tx.as_mut(), &order, tt_id).await.unwrap_err();
        assert_eq!(err.category(), "purchase_failed");
    }
}
