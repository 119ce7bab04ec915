use chrono::{DateTime, Utc};
use rand::Rng;

/// Generates human-readable identifiers. Uniqueness is enforced by storage, not here.
pub trait NumberSource: Send + Sync {
    /// `TKT` + `YYYYMMDD` + 10 uppercase hex digits.
    fn ticket_number(&self, now: DateTime<Utc>) -> String;

    /// `ORD` + `YYYYMMDD` + 8 uppercase hex digits.
    fn order_number(&self, now: DateTime<Utc>) -> String;

    /// `TXN` + unix seconds + 4 random digits.
    fn transaction_ref(&self, now: DateTime<Utc>) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomNumbers;

impl NumberSource for RandomNumbers {
    fn ticket_number(&self, now: DateTime<Utc>) -> String {
        let suffix: u64 = rand::thread_rng().gen_range(0..1u64 << 40);
        format!("TKT{}{:010X}", now.format("%Y%m%d"), suffix)
    }

    fn order_number(&self, now: DateTime<Utc>) -> String {
        let suffix: u32 = rand::thread_rng().gen();
        format!("ORD{}{:08X}", now.format("%Y%m%d"), suffix)
    }

    fn transaction_ref(&self, now: DateTime<Utc>) -> String {
        let digits: u16 = rand::thread_rng().gen_range(1000..10000);
        format!("TXN{}{}", now.timestamp(), digits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn is_upper_hex(s: &str) -> bool {
        s.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
    }

    #[test]
    fn test_number_formats() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let numbers = RandomNumbers;

        let ticket = numbers.ticket_number(now);
        assert!(ticket.starts_with("TKT20260314"));
        assert_eq!(ticket.len(), 3 + 8 + 10);
        assert!(is_upper_hex(&ticket[11..]));

        let order = numbers.order_number(now);
        assert!(order.starts_with("ORD20260314"));
        assert_eq!(order.len(), 3 + 8 + 8);
        assert!(is_upper_hex(&order[11..]));

        let txn = numbers.transaction_ref(now);
        assert!(txn.starts_with(&format!("TXN{}", now.timestamp())));
        assert_eq!(txn.len(), 3 + now.timestamp().to_string().len() + 4);
    }
}
