use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    cache::metric_names::{
        METRIC_DISK_READ, METRIC_ENTRIES, METRIC_EVICT, METRIC_FAST_HIT, METRIC_PROMOTE,
    },
    config::{LogFormat, LoggingSettings},
    users::METRIC_SNAPSHOT,
};

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
            METRIC_FAST_HIT,
            Unit::Count,
            "File requests answered from memory or as a fast 304 without disk access."
        );
        describe_counter!(
            METRIC_DISK_READ,
            Unit::Count,
            "File loads that reached the filesystem."
        );
        describe_counter!(
            METRIC_PROMOTE,
            Unit::Count,
            "File bodies pulled into memory during a request burst."
        );
        describe_counter!(
            METRIC_EVICT,
            Unit::Count,
            "File bodies dropped from memory after a burst ended."
        );
        describe_gauge!(
            METRIC_ENTRIES,
            Unit::Count,
            "Distinct file paths known to the file cache."
        );
        describe_counter!(
            METRIC_SNAPSHOT,
            Unit::Count,
            "Full users-file snapshots handed to the writer."
        );
    });
}
