use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use thiserror::Error;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Debug, Error)]
#[error("telemetry initialization failed: {0}")]
pub struct TelemetryError(String);

/// Install a global tracing subscriber using the provided logging settings.
///
/// Applications that already own a subscriber should call
/// [`describe_metrics`] instead.
pub fn init(logging: &LoggingSettings) -> Result<(), TelemetryError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| TelemetryError(format!("failed to install tracing subscriber: {err}")))
}

/// Register descriptions for every metric this crate emits. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "record_cache_hit_total",
            Unit::Count,
            "Total number of record cache reads served by the primary store."
        );
        describe_counter!(
            "record_cache_miss_total",
            Unit::Count,
            "Total number of record cache reads missing the primary store."
        );
        describe_counter!(
            "record_cache_backup_hit_total",
            Unit::Count,
            "Total number of primary misses served from the backup store."
        );
        describe_counter!(
            "record_cache_evict_total",
            Unit::Count,
            "Total number of in-memory store evictions due to capacity."
        );
        describe_counter!(
            "record_cache_invalidation_total",
            Unit::Count,
            "Total number of tag set invalidations, labelled by mutation kind."
        );
        describe_histogram!(
            "record_cache_invalidate_ms",
            Unit::Milliseconds,
            "Tag set resolution plus invalidation latency in milliseconds."
        );
    });
}
