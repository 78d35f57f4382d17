//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Log one structured line per finished request
//!
//! # Design Decisions
//! - `RUST_LOG` overrides the configured level
//! - Record fields are logged as structured fields, not preformatted text

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::traffic::TrafficSummary;

/// Default filter directive for a configured level.
pub fn default_directive(config: &ObservabilityConfig) -> String {
    let level = config.log_level.to_ascii_lowercase();
    format!("http_traffic={level},traffic_demo={level},tower_http=info")
}

/// Install the global subscriber. Calling it twice is a no-op.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive(config).into());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Observer logging a finished request.
pub fn log_summary(summary: &TrafficSummary) {
    let record = &summary.record;
    tracing::info!(
        request_id = summary.request_id.as_deref().unwrap_or("-"),
        method = %summary.method,
        target = %summary.target,
        status = summary.status.as_u16(),
        recv_payload = record.recv_payload,
        recv_raw = record.recv_raw,
        sent_payload = record.sent_payload,
        sent_raw = record.sent_raw,
        start_ms = record.start_millis(),
        finish_ms = record.finish_millis(),
        duration_ms = record.time_duration_ms,
        "recv={}/{} sent={}/{} duration={}ms",
        record.recv_payload,
        record.recv_raw,
        record.sent_payload,
        record.sent_raw,
        record.time_duration_ms,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_uses_configured_level() {
        let config = ObservabilityConfig {
            log_level: "DEBUG".into(),
            log_records: true,
        };
        assert_eq!(
            default_directive(&config),
            "http_traffic=debug,traffic_demo=debug,tower_http=info"
        );
    }
}
