use serde::Serialize;
use uuid::Uuid;
use turnstile_shared::{Event, TicketType};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TicketTypeSales {
    pub ticket_type_id: Uuid,
    pub name: String,
    pub price_cents: i64,
    pub total_available: i32,
    pub quantity_sold: i32,
    pub remaining: i32,
    pub revenue_cents: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SalesSummary {
    pub total_revenue_cents: i64,
    pub total_sold: i64,
    pub total_available: i64,
    pub remaining: i64,
}

/// Organizer-facing sales figures, derived from the ticket type counters.
#[derive(Debug, Clone, Serialize)]
pub struct SalesReport {
    pub event: Event,
    pub ticket_stats: Vec<TicketTypeSales>,
    pub summary: SalesSummary,
}

impl SalesReport {
    pub fn build(event: Event, mut ticket_types: Vec<TicketType>) -> Self {
        // Most expensive first
        ticket_types.sort_by(|a, b| b.price_cents.cmp(&a.price_cents).then_with(|| a.name.cmp(&b.name)));

        let ticket_stats: Vec<TicketTypeSales> = ticket_types
            .iter()
            .map(|tt| TicketTypeSales {
                ticket_type_id: tt.id,
                name: tt.name.clone(),
                price_cents: tt.price_cents,
                total_available: tt.quantity,
                quantity_sold: tt.quantity_sold,
                remaining: tt.remaining(),
                revenue_cents: tt.revenue_cents(),
            })
            .collect();

        let total_revenue_cents = ticket_stats.iter().map(|s| s.revenue_cents).sum();
        let total_sold: i64 = ticket_stats.iter().map(|s| i64::from(s.quantity_sold)).sum();
        let total_available: i64 = ticket_stats.iter().map(|s| i64::from(s.total_available)).sum();

        Self {
            event,
            ticket_stats,
            summary: SalesSummary {
                total_revenue_cents,
                total_sold,
                total_available,
                remaining: total_available - total_sold,
            },
        }
    }
}
