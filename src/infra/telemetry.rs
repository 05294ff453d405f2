use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing::Subscriber;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Overrides `logging.level` with full directive syntax, e.g. `evidentia=debug,sqlx=warn`.
pub const LOG_FILTER_ENV: &str = "EVIDENTIA_LOG";

/// Install the global subscriber and register metric descriptions.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .with_env_var(LOG_FILTER_ENV)
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(output_layer(logging.format))
        .try_init()
        .map_err(|err| InfraError::telemetry(err.to_string()))
}

fn output_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    }
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "evidentia_capture_total",
            Unit::Count,
            "Captures that reached a terminal state, labelled by outcome and failure kind."
        );
        describe_histogram!(
            "evidentia_capture_duration_ms",
            Unit::Milliseconds,
            "Wall time from first render attempt to the terminal write."
        );
        describe_counter!(
            "evidentia_capture_retries_total",
            Unit::Count,
            "Retried pipeline steps, labelled by step."
        );
        describe_counter!(
            "evidentia_capture_store_conflicts_total",
            Unit::Count,
            "Store writes refused because the key held different bytes."
        );
        describe_counter!(
            "evidentia_verify_total",
            Unit::Count,
            "Verification runs, labelled by outcome."
        );
        describe_counter!(
            "evidentia_verify_mismatch_total",
            Unit::Count,
            "Verification runs whose recomputed digest differed from the ledger."
        );
    });
}
