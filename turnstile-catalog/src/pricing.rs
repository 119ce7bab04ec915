use turnstile_core::{TicketingError, TicketingResult};

/// Running order total in cents. Every step is overflow-checked.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PriceTally {
    total_cents: i64,
    units: i32,
}

impl PriceTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_line(&mut self, price_cents: i64, quantity: i32) -> TicketingResult<i64> {
        let line = line_total(price_cents, quantity)?;
        self.total_cents = self.total_cents.checked_add(line).ok_or_else(overflow)?;
        self.units = self.units.checked_add(quantity).ok_or_else(overflow)?;
        Ok(line)
    }

    pub fn total_cents(&self) -> i64 {
        self.total_cents
    }

    pub fn units(&self) -> i32 {
        self.units
    }
}

pub fn line_total(price_cents: i64, quantity: i32) -> TicketingResult<i64> {
    price_cents.checked_mul(i64::from(quantity)).ok_or_else(overflow)
}

fn overflow() -> TicketingError {
    TicketingError::Validation("Order total is out of range".into())
}
