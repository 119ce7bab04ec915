pub mod inventory;
pub mod ticket_type;
pub mod pricing;
pub mod stats;
pub mod service;

pub use inventory::{InventoryError, InventoryLedger};
pub use ticket_type::{EventDraft, SaleWindow, TicketTypeDraft};
pub use pricing::PriceTally;
pub use stats::{SalesReport, TicketTypeSales};
pub use service::{CatalogService, TicketTypeListing};
