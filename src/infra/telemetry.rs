use std::{io, sync::Once};

use metrics::{Unit, describe_counter, describe_histogram};
use tracing::debug;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global subscriber.
///
/// Logs go to stderr so command output on stdout (`visitor health`) stays parseable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let output = match logging.format {
        LogFormat::Json => fmt::layer()
            .with_writer(io::stderr)
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(io::stderr)
            .compact()
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default())
        .with(output)
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("subscriber already installed: {err}")))?;

    debug!(
        target = "visitor::telemetry",
        level = %logging.level,
        json = matches!(logging.format, LogFormat::Json),
        "telemetry ready"
    );
    Ok(())
}

/// Register metric descriptions with the installed recorder. Safe to call repeatedly.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "visitor_cache_data_hit_total",
            Unit::Count,
            "Total number of visit data cache hits."
        );
        describe_counter!(
            "visitor_cache_data_miss_total",
            Unit::Count,
            "Total number of visit data cache misses."
        );
        describe_counter!(
            "visitor_cache_rendered_hit_total",
            Unit::Count,
            "Total number of rendered HTML cache hits."
        );
        describe_counter!(
            "visitor_cache_rendered_miss_total",
            Unit::Count,
            "Total number of rendered HTML cache misses."
        );
        describe_counter!(
            "visitor_gateway_render_total",
            Unit::Count,
            "Total number of render gateway calls."
        );
        describe_counter!(
            "visitor_gateway_render_failed_total",
            Unit::Count,
            "Total number of failed render gateway calls."
        );
        describe_histogram!(
            "visitor_gateway_render_ms",
            Unit::Milliseconds,
            "Render gateway round-trip latency in milliseconds."
        );
    });
}
