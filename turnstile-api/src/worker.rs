use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};
use turnstile_order::CodeDispatcher;

/// Periodically retries code generation for tickets left pending after purchase.
pub async fn start_code_regeneration_worker(dispatcher: CodeDispatcher, every: Duration, batch_size: i64) {
    info!(interval_secs = every.as_secs(), batch_size, "Code regeneration worker started");

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match dispatcher.regenerate_pending(batch_size).await {
            Ok(report) if report.attempted == 0 => debug!("No pending ticket codes"),
            Ok(report) => info!(attempted = report.attempted, encoded = report.encoded, "Regeneration pass complete"),
            Err(e) => error!("Failed to load pending ticket codes: {}", e),
        }
    }
}
