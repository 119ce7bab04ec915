use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;
use turnstile_core::repository::{PurchaseTx, Reservation, StoreError, TicketStore};
use turnstile_core::TicketingError;

/// Owns every mutation of `ticket_types.quantity_sold`.
///
/// A reservation is one conditional increment in storage; there is no read-then-write
/// window, so concurrent buyers of the last units can never oversell.
#[derive(Clone)]
pub struct InventoryLedger {
    store: Arc<dyn TicketStore>,
}

impl InventoryLedger {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    /// Reserve inside an open purchase transaction. Rolled back with it.
    pub async fn reserve_in(
        &self,
        tx: &mut dyn PurchaseTx,
        ticket_type_id: Uuid,
        quantity: i32,
    ) -> Result<Reservation, InventoryError> {
        check_quantity(quantity)?;
        let outcome = tx.reserve(ticket_type_id, quantity).await?;
        debug!(%ticket_type_id, quantity, ?outcome, "reserve in transaction");
        Ok(outcome)
    }

    /// Auto-committed reservation.
    pub async fn reserve(&self, ticket_type_id: Uuid, quantity: i32) -> Result<Reservation, InventoryError> {
        check_quantity(quantity)?;
        let outcome = self.store.reserve(ticket_type_id, quantity).await?;
        debug!(%ticket_type_id, quantity, ?outcome, "reserve");
        Ok(outcome)
    }

    /// Advisory only: the answer can be stale by the time a purchase runs.
    pub async fn check_availability(&self, ticket_type_id: Uuid, quantity: i32) -> Result<bool, InventoryError> {
        let ticket_type = self
            .store
            .get_ticket_type(ticket_type_id)
            .await?
            .ok_or(InventoryError::NotFound(ticket_type_id))?;
        Ok(quantity > 0 && ticket_type.remaining() >= quantity)
    }
}

fn check_quantity(quantity: i32) -> Result<(), InventoryError> {
    if quantity <= 0 {
        return Err(InventoryError::InvalidQuantity(quantity));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Ticket type not found: {0}")]
    NotFound(Uuid),

    #[error("Quantity must be positive, got {0}")]
    InvalidQuantity(i32),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<InventoryError> for TicketingError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::NotFound(_) => TicketingError::NotFound("Ticket type"),
            InventoryError::InvalidQuantity(q) => {
                TicketingError::Validation(format!("Quantity must be at least 1 (got {})", q))
            }
            InventoryError::Store(e) => TicketingError::Storage(e),
        }
    }
}
