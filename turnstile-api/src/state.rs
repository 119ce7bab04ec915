use std::sync::Arc;
use tokio::sync::broadcast;
use turnstile_catalog::CatalogService;
use turnstile_core::codes::CodeEncoder;
use turnstile_core::identity::Authenticator;
use turnstile_core::repository::TicketStore;
use turnstile_order::{CodeDispatcher, OrderAggregator, PurchaseRules, TicketQueries, ValidationGate};
use turnstile_shared::models::events::TicketingEvent;
use turnstile_store::RedisClient;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct RateLimit {
    pub redis: Arc<RedisClient>,
    pub per_minute: i64,
}

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<OrderAggregator>,
    pub gate: ValidationGate,
    pub catalog: CatalogService,
    pub queries: TicketQueries,
    pub dispatcher: CodeDispatcher,
    pub authenticator: Arc<dyn Authenticator>,
    pub events_tx: broadcast::Sender<TicketingEvent>,
    pub rate_limit: Option<RateLimit>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn TicketStore>,
        encoder: Arc<dyn CodeEncoder>,
        authenticator: Arc<dyn Authenticator>,
        rules: PurchaseRules,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let dispatcher = CodeDispatcher::new(store.clone(), encoder);

        Self {
            aggregator: Arc::new(
                OrderAggregator::new(store.clone(), dispatcher.clone(), rules).with_events(events_tx.clone()),
            ),
            gate: ValidationGate::new(store.clone()).with_events(events_tx.clone()),
            catalog: CatalogService::new(store.clone()),
            queries: TicketQueries::new(store),
            dispatcher,
            authenticator,
            events_tx,
            rate_limit: None,
        }
    }

    pub fn with_rate_limit(mut self, redis: Arc<RedisClient>, per_minute: i64) -> Self {
        self.rate_limit = Some(RateLimit { redis, per_minute });
        self
    }
}
