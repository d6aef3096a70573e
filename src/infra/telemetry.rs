use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_GC_PASS_MS, METRIC_GC_REMOVED, METRIC_PRELOAD_RENDERED, METRIC_STORE_HIT,
    METRIC_STORE_MISS,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Operator output goes to stdout, so log lines are written to stderr.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_STORE_HIT,
            Unit::Count,
            "Total number of entry store reads served from a fresh entry."
        );
        describe_counter!(
            METRIC_STORE_MISS,
            Unit::Count,
            "Total number of entry store reads that found no fresh entry."
        );
        describe_counter!(
            METRIC_GC_REMOVED,
            Unit::Count,
            "Total number of expired entries removed by garbage collection."
        );
        describe_counter!(
            METRIC_PRELOAD_RENDERED,
            Unit::Count,
            "Total number of static entries rendered by the preloader."
        );
        describe_histogram!(
            METRIC_GC_PASS_MS,
            Unit::Milliseconds,
            "Garbage collection pass latency in milliseconds."
        );
    });
}
