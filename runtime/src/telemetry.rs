//! Tracing subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when `RUST_LOG` is not set and no level is configured.
pub const DEFAULT_FILTER: &str = "info,eventloom=debug,sqlx=warn,rdkafka=warn";

/// Install the global subscriber: `EnvFilter` plus a fmt layer.
///
/// `RUST_LOG` wins; otherwise `log_level` (e.g. `LOG_LEVEL` from the
/// configuration) is used as the base level with the adapter crates quieted.
/// Calling this twice is harmless; the second call is ignored.
pub fn init_tracing(log_level: Option<&str>) {
    let fallback = log_level.map_or_else(
        || DEFAULT_FILTER.to_string(),
        |level| format!("{level},sqlx=warn,rdkafka=warn"),
    );

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
