pub mod models;
pub mod numbers;
pub mod issuer;
pub mod aggregator;
pub mod gate;
pub mod codes;
pub mod queries;

pub use aggregator::{OrderAggregator, PurchaseRules};
pub use codes::{CodeDispatcher, RegenerationReport, SvgCodeEncoder};
pub use gate::ValidationGate;
pub use issuer::TicketIssuer;
pub use models::{
    Admission, OrderWithTickets, PurchaseLine, PurchaseReceipt, PurchaseRequest, TicketLookup,
    ValidateRequest, ValidationOutcome,
};
pub use numbers::{NumberSource, RandomNumbers};
pub use queries::TicketQueries;
