use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
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
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "voltgate_cache_memory_hit_total",
            Unit::Count,
            "Total number of memory-layer cache hits."
        );
        describe_counter!(
            "voltgate_cache_memory_miss_total",
            Unit::Count,
            "Total number of memory-layer cache misses."
        );
        describe_counter!(
            "voltgate_cache_memory_evict_total",
            Unit::Count,
            "Total number of memory-layer evictions due to capacity."
        );
        describe_counter!(
            "voltgate_cache_store_hit_total",
            Unit::Count,
            "Total number of external-store cache hits."
        );
        describe_counter!(
            "voltgate_cache_store_miss_total",
            Unit::Count,
            "Total number of external-store cache misses."
        );
        describe_counter!(
            "voltgate_cache_store_error_total",
            Unit::Count,
            "Total number of external-store failures degraded to misses."
        );
        describe_counter!(
            "voltgate_cache_set_total",
            Unit::Count,
            "Total number of cache writes."
        );
        describe_gauge!(
            "voltgate_cache_revalidation_queue_len",
            Unit::Count,
            "Current number of pending background revalidation tasks."
        );
        describe_counter!(
            "voltgate_cache_revalidation_dropped_total",
            Unit::Count,
            "Total number of revalidation tasks dropped due to queue overflow."
        );
        describe_counter!(
            "voltgate_cache_revalidation_error_total",
            Unit::Count,
            "Total number of failed background revalidations."
        );
        describe_counter!(
            "voltgate_breaker_open_total",
            Unit::Count,
            "Total number of circuit-breaker open transitions."
        );
        describe_counter!(
            "voltgate_breaker_rejected_total",
            Unit::Count,
            "Total number of calls rejected while a breaker was open."
        );
        describe_counter!(
            "voltgate_retry_attempt_total",
            Unit::Count,
            "Total number of attempts made by the retry executor."
        );
    });
}
