//! Observability: metrics events, the sink boundary and counters.
//! Logging goes straight through `tracing` at the call sites.

pub(crate) mod metrics;
pub(crate) mod sink;

// re-exports
pub use metrics::{EntityCounters, EntitySummary, EventOps, EventReport, EventState};
pub use sink::{
    GlobalMetricsSink, MetricsEvent, MetricsSink, OpKind, metrics_report, metrics_reset_all,
    with_metrics_sink,
};
