use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{info, warn};
use uuid::Uuid;
use turnstile_core::codes::{CodeEncoder, CodeError};
use turnstile_core::repository::{PendingCursor, StoreResult, TicketStore};
use turnstile_shared::Ticket;

// ============================================================================
// SVG encoder
// ============================================================================

const MATRIX: usize = 21;
const MODULE_PX: usize = 8;
const QUIET_ZONE: usize = 4;

/// Writes a deterministic SVG matrix per ticket identifier.
pub struct SvgCodeEncoder {
    output_dir: PathBuf,
    public_prefix: String,
}

impl SvgCodeEncoder {
    pub fn new(output_dir: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            public_prefix: public_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    fn file_name(ticket_id: Uuid) -> String {
        format!("{}.svg", ticket_id)
    }
}

#[async_trait]
impl CodeEncoder for SvgCodeEncoder {
    fn render(&self, ticket_id: Uuid) -> Result<Vec<u8>, CodeError> {
        Ok(render_matrix_svg(ticket_id).into_bytes())
    }

    async fn encode(&self, ticket_id: Uuid) -> Result<String, CodeError> {
        let bytes = self.render(ticket_id)?;
        tokio::fs::create_dir_all(&self.output_dir).await?;
        tokio::fs::write(self.output_dir.join(Self::file_name(ticket_id)), bytes).await?;
        Ok(format!("{}/{}", self.public_prefix, Self::file_name(ticket_id)))
    }
}

fn is_finder(row: usize, col: usize) -> Option<bool> {
    // Three 7x7 corner markers, as on a QR symbol
    for (r0, c0) in [(0, 0), (0, MATRIX - 7), (MATRIX - 7, 0)] {
        if (r0..r0 + 7).contains(&row) && (c0..c0 + 7).contains(&col) {
            let (r, c) = (row - r0, col - c0);
            let ring = r.min(c).min(6 - r).min(6 - c);
            return Some(ring != 1);
        }
    }
    None
}

fn render_matrix_svg(ticket_id: Uuid) -> String {
    let bytes = ticket_id.as_bytes();
    let mut state = u64::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]])
        ^ u64::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15]])
        | 1;

    let side = (MATRIX + 2 * QUIET_ZONE) * MODULE_PX;
    let mut svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{side}" height="{side}" viewBox="0 0 {side} {side}" shape-rendering="crispEdges"><rect width="100%" height="100%" fill="#fff"/>"##,
        side = side
    );

    for row in 0..MATRIX {
        for col in 0..MATRIX {
            let dark = match is_finder(row, col) {
                Some(dark) => dark,
                None => {
                    // xorshift64
                    state ^= state << 13;
                    state ^= state >> 7;
                    state ^= state << 17;
                    state & 1 == 1
                }
            };
            if dark {
                let x = (col + QUIET_ZONE) * MODULE_PX;
                let y = (row + QUIET_ZONE) * MODULE_PX;
                svg.push_str(&format!(
                    r##"<rect x="{x}" y="{y}" width="{m}" height="{m}" fill="#000"/>"##,
                    x = x,
                    y = y,
                    m = MODULE_PX
                ));
            }
        }
    }

    svg.push_str(&format!("<desc>{}</desc></svg>", ticket_id));
    svg
}

// ============================================================================
// Dispatch
// ============================================================================

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegenerationReport {
    pub attempted: usize,
    pub encoded: usize,
}

/// Runs the encoder for freshly committed tickets and retries pending ones later.
///
/// Each ticket is encoded independently. A failure only leaves that ticket's code pending.
/// Regeneration walks the pending queue in batches and wraps around at its end, so tickets
/// that keep failing cannot starve newer ones.
#[derive(Clone)]
pub struct CodeDispatcher {
    store: Arc<dyn TicketStore>,
    encoder: Arc<dyn CodeEncoder>,
    cursor: Arc<Mutex<Option<PendingCursor>>>,
}

impl CodeDispatcher {
    pub fn new(store: Arc<dyn TicketStore>, encoder: Arc<dyn CodeEncoder>) -> Self {
        Self {
            store,
            encoder,
            cursor: Arc::new(Mutex::new(None)),
        }
    }

    /// Encodes all tickets concurrently and records each reference that was produced.
    /// Returns how many tickets are still pending.
    pub async fn dispatch(&self, tickets: &mut [Ticket]) -> usize {
        let results = join_all(tickets.iter().map(|t| self.encode_one(t.id))).await;

        let mut pending = 0;
        for (ticket, result) in tickets.iter_mut().zip(results) {
            match result {
                Some(code_ref) => ticket.code_ref = Some(code_ref),
                None => pending += 1,
            }
        }
        pending
    }

    /// Re-runs encoding for up to `limit` valid tickets that still have no code.
    pub async fn regenerate_pending(&self, limit: i64) -> StoreResult<RegenerationReport> {
        let after = self.cursor();
        let mut tickets = self.store.list_pending_codes(after, limit).await?;
        if tickets.is_empty() && after.is_some() {
            // Past the newest pending ticket, start over from the oldest
            tickets = self.store.list_pending_codes(None, limit).await?;
        }

        // A short batch means the queue was exhausted
        let next = if (tickets.len() as i64) < limit {
            None
        } else {
            tickets.last().map(PendingCursor::from)
        };
        self.set_cursor(next);

        if tickets.is_empty() {
            return Ok(RegenerationReport::default());
        }

        let attempted = tickets.len();
        let pending = self.dispatch(&mut tickets).await;
        let report = RegenerationReport {
            attempted,
            encoded: attempted - pending,
        };
        info!(attempted = report.attempted, encoded = report.encoded, "Regenerated pending ticket codes");
        Ok(report)
    }

    fn cursor(&self) -> Option<PendingCursor> {
        self.cursor.lock().map(|c| *c).unwrap_or(None)
    }

    fn set_cursor(&self, next: Option<PendingCursor>) {
        if let Ok(mut cursor) = self.cursor.lock() {
            *cursor = next;
        }
    }

    /// On-the-fly rendering for tickets whose stored artifact is pending.
    pub fn render(&self, ticket_id: Uuid) -> Result<Vec<u8>, CodeError> {
        self.encoder.render(ticket_id)
    }

    async fn encode_one(&self, ticket_id: Uuid) -> Option<String> {
        let code_ref = match self.encoder.encode(ticket_id).await {
            Ok(code_ref) => code_ref,
            Err(e) => {
                warn!(%ticket_id, error = %e, "Ticket code generation failed, left pending");
                return None;
            }
        };

        match self.store.set_code_ref(ticket_id, &code_ref).await {
            Ok(true) => Some(code_ref),
            Ok(false) => {
                warn!(%ticket_id, "Ticket vanished before its code could be recorded");
                None
            }
            Err(e) => {
                warn!(%ticket_id, error = %e, "Failed to record ticket code");
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use chrono::Utc;
    use turnstile_shared::{Event, Order, PaymentStatus, TicketStatus};
    use turnstile_store::MemoryStore;

    /// Fails exactly one call (the `fail_on`-th, zero based).
    pub(crate) struct FlakyEncoder {
        calls: AtomicUsize,
        fail_on: usize,
    }

    impl FlakyEncoder {
        pub(crate) fn failing_on(fail_on: usize) -> Self {
            Self { calls: AtomicUsize::new(0), fail_on }
        }
    }

    #[async_trait]
    impl CodeEncoder for FlakyEncoder {
        fn render(&self, ticket_id: Uuid) -> Result<Vec<u8>, CodeError> {
            Ok(ticket_id.as_bytes().to_vec())
        }

        async fn encode(&self, ticket_id: Uuid) -> Result<String, CodeError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_on {
                return Err(CodeError::Render("encoder unavailable".into()));
            }
            Ok(format!("codes/{}.svg", ticket_id))
        }
    }

    /// Encoder that never touches the filesystem.
    pub(crate) struct InlineEncoder;

    #[async_trait]
    impl CodeEncoder for InlineEncoder {
        fn render(&self, ticket_id: Uuid) -> Result<Vec<u8>, CodeError> {
            Ok(render_matrix_svg(ticket_id).into_bytes())
        }

        async fn encode(&self, ticket_id: Uuid) -> Result<String, CodeError> {
            Ok(format!("codes/{}.svg", ticket_id))
        }
    }

    #[test]
    fn test_render_is_deterministic() {
        let id = Uuid::new_v4();
        let encoder = SvgCodeEncoder::new(std::env::temp_dir(), "codes");
        let a = encoder.render(id).unwrap();
        let b = encoder.render(id).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, encoder.render(Uuid::new_v4()).unwrap());

        let svg = String::from_utf8(a).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains(&id.to_string()));
    }

    #[tokio::test]
    async fn test_encode_writes_artifact() {
        let dir = std::env::temp_dir().join(format!("turnstile-codes-{}", Uuid::new_v4()));
        let encoder = SvgCodeEncoder::new(&dir, "codes/");
        let id = Uuid::new_v4();

        let code_ref = encoder.encode(id).await.unwrap();
        assert_eq!(code_ref, format!("codes/{}.svg", id));

        let written = tokio::fs::read(dir.join(format!("{}.svg", id))).await.unwrap();
        assert_eq!(written, encoder.render(id).unwrap());
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    /// Fails every encode for the given tickets.
    struct RejectingEncoder(HashSet<Uuid>);

    #[async_trait]
    impl CodeEncoder for RejectingEncoder {
        fn render(&self, ticket_id: Uuid) -> Result<Vec<u8>, CodeError> {
            Ok(ticket_id.as_bytes().to_vec())
        }

        async fn encode(&self, ticket_id: Uuid) -> Result<String, CodeError> {
            if self.0.contains(&ticket_id) {
                return Err(CodeError::Render("unrenderable".into()));
            }
            Ok(format!("codes/{}.svg", ticket_id))
        }
    }

    /// Commits one order with `count` code-pending tickets, oldest first.
    async fn pending_tickets(store: &MemoryStore, count: usize) -> Vec<Ticket> {
        let event = Event::new(Uuid::new_v4(), "Matinee".into(), None, Utc::now());
        store.insert_event(&event).await.unwrap();
        let created = Utc::now() - chrono::Duration::minutes(10);
        let order = Order {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            event_id: event.id,
            order_number: format!("ORD{}", Uuid::new_v4().simple()),
            total_cents: 0,
            payment_status: PaymentStatus::Completed,
            payment_method: "simulated".into(),
            transaction_ref: "TXN1".into(),
            created_at: created,
            updated_at: created,
        };

        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&order).await.unwrap();
        let mut tickets = Vec::new();
        for i in 0..count {
            let at = created + chrono::Duration::seconds(i as i64);
            let ticket = Ticket {
                id: Uuid::new_v4(),
                order_id: order.id,
                user_id: order.user_id,
                event_id: event.id,
                ticket_type_id: Uuid::new_v4(),
                ticket_number: format!("TKT{}", Uuid::new_v4().simple()),
                code_ref: None,
                status: TicketStatus::Valid,
                used_at: None,
                created_at: at,
                updated_at: at,
            };
            tx.insert_ticket(&ticket).await.unwrap();
            tickets.push(ticket);
        }
        tx.commit().await.unwrap();
        tickets
    }

    #[tokio::test]
    async fn test_failing_tickets_do_not_starve_newer_ones() {
        let store = Arc::new(MemoryStore::new());
        let tickets = pending_tickets(&store, 3).await;
        let stuck: HashSet<Uuid> = tickets[..2].iter().map(|t| t.id).collect();
        let dispatcher = CodeDispatcher::new(store.clone(), Arc::new(RejectingEncoder(stuck)));

        // The two oldest fail for good
        let first = dispatcher.regenerate_pending(2).await.unwrap();
        assert_eq!(first, RegenerationReport { attempted: 2, encoded: 0 });

        // The next pass moves past them
        let second = dispatcher.regenerate_pending(2).await.unwrap();
        assert_eq!(second, RegenerationReport { attempted: 1, encoded: 1 });
        assert!(store.get_ticket(tickets[2].id).await.unwrap().unwrap().has_code());

        // Then wraps around to the oldest again
        let third = dispatcher.regenerate_pending(2).await.unwrap();
        assert_eq!(third, RegenerationReport { attempted: 2, encoded: 0 });
        assert!(!store.get_ticket(tickets[0].id).await.unwrap().unwrap().has_code());
    }
}
