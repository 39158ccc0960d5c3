//! Process-wide tracing subscriber and metric descriptions.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing::Subscriber;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    filter::LevelFilter,
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

struct MetricDescription {
    kind: MetricKind,
    name: &'static str,
    unit: Unit,
    help: &'static str,
}

const CACHE_METRICS: &[MetricDescription] = &[
    MetricDescription {
        kind: MetricKind::Counter,
        name: "shiftcache_store_hit_total",
        unit: Unit::Count,
        help: "Cache reads served from a stored entry.",
    },
    MetricDescription {
        kind: MetricKind::Counter,
        name: "shiftcache_store_miss_total",
        unit: Unit::Count,
        help: "Cache reads with no stored entry.",
    },
    MetricDescription {
        kind: MetricKind::Counter,
        name: "shiftcache_store_evict_total",
        unit: Unit::Count,
        help: "Entries evicted to stay within max_entries.",
    },
    MetricDescription {
        kind: MetricKind::Counter,
        name: "shiftcache_fetch_discarded_total",
        unit: Unit::Count,
        help: "Fetch results dropped because the key moved on before they landed.",
    },
    MetricDescription {
        kind: MetricKind::Counter,
        name: "shiftcache_mutation_committed_total",
        unit: Unit::Count,
        help: "Mutations the server accepted, by mutation kind.",
    },
    MetricDescription {
        kind: MetricKind::Counter,
        name: "shiftcache_mutation_rolled_back_total",
        unit: Unit::Count,
        help: "Mutations rolled back after a failure, by mutation kind.",
    },
    MetricDescription {
        kind: MetricKind::Gauge,
        name: "shiftcache_refetch_pending",
        unit: Unit::Count,
        help: "Background refetches scheduled and not yet settled.",
    },
    MetricDescription {
        kind: MetricKind::Histogram,
        name: "shiftcache_mutation_ms",
        unit: Unit::Milliseconds,
        help: "Time from optimistic write to terminal mutation state.",
    },
    MetricDescription {
        kind: MetricKind::Histogram,
        name: "shiftcache_refetch_ms",
        unit: Unit::Milliseconds,
        help: "Fetch latency, labelled full, page or background.",
    },
];

/// Install the global subscriber for `logging`. Fails if one is already set.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    METRIC_DESCRIPTIONS.call_once(describe_cache_metrics);

    tracing_subscriber::registry()
        .with(env_filter(logging.level))
        .with(ErrorLayer::default())
        .with(output_layer(logging.format))
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// `RUST_LOG` wins over the configured level when set.
fn env_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

fn output_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    }
}

fn describe_cache_metrics() {
    for metric in CACHE_METRICS {
        match metric.kind {
            MetricKind::Counter => describe_counter!(metric.name, metric.unit, metric.help),
            MetricKind::Gauge => describe_gauge!(metric.name, metric.unit, metric.help),
            MetricKind::Histogram => describe_histogram!(metric.name, metric.unit, metric.help),
        }
    }
}
