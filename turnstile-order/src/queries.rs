use std::sync::Arc;

use uuid::Uuid;
use turnstile_core::identity::Principal;
use turnstile_core::repository::TicketStore;
use turnstile_core::{TicketingError, TicketingResult};
use turnstile_shared::{Order, Ticket};

use crate::models::OrderWithTickets;

/// Owner-scoped reads of orders and tickets.
#[derive(Clone)]
pub struct TicketQueries {
    store: Arc<dyn TicketStore>,
}

impl TicketQueries {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    pub async fn my_tickets(&self, principal: &Principal) -> TicketingResult<Vec<Ticket>> {
        Ok(self.store.list_tickets_for_user(principal.user_id).await?)
    }

    pub async fn ticket(&self, principal: &Principal, ticket_id: Uuid) -> TicketingResult<Ticket> {
        let ticket = self
            .store
            .get_ticket(ticket_id)
            .await?
            .ok_or(TicketingError::NotFound("Ticket"))?;
        if ticket.user_id != principal.user_id && !principal.is_admin() {
            return Err(TicketingError::Forbidden("You can only view your own tickets".into()));
        }
        Ok(ticket)
    }

    pub async fn my_orders(&self, principal: &Principal) -> TicketingResult<Vec<Order>> {
        Ok(self.store.list_orders_for_user(principal.user_id).await?)
    }

    pub async fn order(&self, principal: &Principal, order_id: Uuid) -> TicketingResult<OrderWithTickets> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(TicketingError::NotFound("Order"))?;
        if order.user_id != principal.user_id && !principal.is_admin() {
            return Err(TicketingError::Forbidden("You can only view your own orders".into()));
        }
        let tickets = self.store.list_tickets_for_order(order.id).await?;
        Ok(OrderWithTickets { order, tickets })
    }
}
