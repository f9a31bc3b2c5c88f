//! Metrics sink boundary.
//!
//! Engine logic MUST NOT touch the metrics state directly. Every
//! instrumentation point emits a `MetricsEvent` through `record`.

use crate::{obs::metrics, policy::Operation};
use std::{cell::RefCell, sync::Arc};

thread_local! {
    static SINK_OVERRIDE: RefCell<Option<Arc<dyn MetricsSink + Send + Sync>>> =
        const { RefCell::new(None) };
}

///
/// OpKind
/// Caller-facing operation class used for counters and spans.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpKind {
    Create,
    Read,
    Update,
    Delete,
    Check,
}

///
/// MetricsEvent
///

#[derive(Clone, Copy, Debug)]
pub enum MetricsEvent<'a> {
    OpStart {
        kind: OpKind,
        entity: &'a str,
    },
    OpFinish {
        kind: OpKind,
        entity: &'a str,
        rows: u64,
    },
    GuardCompiled {
        entity: &'a str,
    },
    GuardCacheHit {
        entity: &'a str,
    },
    PolicyDenied {
        entity: &'a str,
        operation: Operation,
    },
    ValidationFailed {
        entity: &'a str,
        issues: u64,
    },
    FieldsRedacted {
        entity: &'a str,
        fields: u64,
    },
    /// Rows fetched but dropped by in-memory guard evaluation.
    RowsFiltered {
        entity: &'a str,
        rows: u64,
    },
    Rollback {
        entity: &'a str,
    },
}

///
/// MetricsSink
///

pub trait MetricsSink {
    fn record(&self, event: MetricsEvent<'_>);
}

///
/// GlobalMetricsSink
/// Default sink: accumulates into the thread-local metrics state.
///

pub struct GlobalMetricsSink;

impl MetricsSink for GlobalMetricsSink {
    fn record(&self, event: MetricsEvent<'_>) {
        match event {
            MetricsEvent::OpStart { kind, entity } => metrics::with_state_mut(|m| {
                let ops = &mut m.ops;
                match kind {
                    OpKind::Create => ops.create_calls = ops.create_calls.saturating_add(1),
                    OpKind::Read => ops.read_calls = ops.read_calls.saturating_add(1),
                    OpKind::Update => ops.update_calls = ops.update_calls.saturating_add(1),
                    OpKind::Delete => ops.delete_calls = ops.delete_calls.saturating_add(1),
                    OpKind::Check => ops.check_calls = ops.check_calls.saturating_add(1),
                }

                let entry = m.entities.entry(entity.to_string()).or_default();
                match kind {
                    OpKind::Create => entry.create_calls = entry.create_calls.saturating_add(1),
                    OpKind::Read => entry.read_calls = entry.read_calls.saturating_add(1),
                    OpKind::Update => entry.update_calls = entry.update_calls.saturating_add(1),
                    OpKind::Delete => entry.delete_calls = entry.delete_calls.saturating_add(1),
                    OpKind::Check => entry.check_calls = entry.check_calls.saturating_add(1),
                }
            }),

            MetricsEvent::OpFinish { kind, entity, rows } => metrics::with_state_mut(|m| {
                let entry = m.entities.entry(entity.to_string()).or_default();
                match kind {
                    OpKind::Read => {
                        m.ops.rows_read = m.ops.rows_read.saturating_add(rows);
                        entry.rows_read = entry.rows_read.saturating_add(rows);
                    }
                    OpKind::Create | OpKind::Update | OpKind::Delete => {
                        m.ops.rows_written = m.ops.rows_written.saturating_add(rows);
                        entry.rows_written = entry.rows_written.saturating_add(rows);
                    }
                    OpKind::Check => {}
                }
            }),

            MetricsEvent::GuardCompiled { entity } => metrics::with_state_mut(|m| {
                m.ops.guards_compiled = m.ops.guards_compiled.saturating_add(1);
                let entry = m.entities.entry(entity.to_string()).or_default();
                entry.guards_compiled = entry.guards_compiled.saturating_add(1);
            }),

            MetricsEvent::GuardCacheHit { .. } => metrics::with_state_mut(|m| {
                m.ops.guard_cache_hits = m.ops.guard_cache_hits.saturating_add(1);
            }),

            MetricsEvent::PolicyDenied { entity, .. } => metrics::with_state_mut(|m| {
                m.ops.denials = m.ops.denials.saturating_add(1);
                let entry = m.entities.entry(entity.to_string()).or_default();
                entry.denials = entry.denials.saturating_add(1);
            }),

            MetricsEvent::ValidationFailed { entity, issues } => metrics::with_state_mut(|m| {
                m.ops.validation_failures = m.ops.validation_failures.saturating_add(1);
                m.ops.validation_issues = m.ops.validation_issues.saturating_add(issues);
                let entry = m.entities.entry(entity.to_string()).or_default();
                entry.validation_failures = entry.validation_failures.saturating_add(1);
            }),

            MetricsEvent::FieldsRedacted { entity, fields } => metrics::with_state_mut(|m| {
                m.ops.fields_redacted = m.ops.fields_redacted.saturating_add(fields);
                let entry = m.entities.entry(entity.to_string()).or_default();
                entry.fields_redacted = entry.fields_redacted.saturating_add(fields);
            }),

            MetricsEvent::RowsFiltered { entity, rows } => metrics::with_state_mut(|m| {
                m.ops.rows_filtered = m.ops.rows_filtered.saturating_add(rows);
                let entry = m.entities.entry(entity.to_string()).or_default();
                entry.rows_filtered = entry.rows_filtered.saturating_add(rows);
            }),

            MetricsEvent::Rollback { .. } => metrics::with_state_mut(|m| {
                m.ops.rollbacks = m.ops.rollbacks.saturating_add(1);
            }),
        }
    }
}

pub const GLOBAL_METRICS_SINK: GlobalMetricsSink = GlobalMetricsSink;

/// Route an event to the scoped override if one is installed, else to the
/// global sink.
pub(crate) fn record(event: MetricsEvent<'_>) {
    let custom = SINK_OVERRIDE.with(|cell| cell.borrow().clone());

    match custom {
        Some(sink) => sink.record(event),
        None => GLOBAL_METRICS_SINK.record(event),
    }
}

/// Snapshot the current metrics state.
#[must_use]
pub fn metrics_report() -> metrics::EventReport {
    metrics::report()
}

/// Reset all metrics state for this thread.
pub fn metrics_reset_all() {
    metrics::reset_all();
}

/// Run `f` with `sink` installed as this thread's metrics sink. The previous
/// sink is restored on exit, including on unwind.
pub fn with_metrics_sink<T>(sink: Arc<dyn MetricsSink + Send + Sync>, f: impl FnOnce() -> T) -> T {
    struct Guard(Option<Arc<dyn MetricsSink + Send + Sync>>);

    impl Drop for Guard {
        fn drop(&mut self) {
            let previous = self.0.take();
            SINK_OVERRIDE.with(|cell| {
                *cell.borrow_mut() = previous;
            });
        }
    }

    let previous = SINK_OVERRIDE.with(|cell| cell.borrow_mut().replace(sink));
    let _guard = Guard(previous);

    f()
}

///
/// Span
/// RAII operation span: emits `OpStart` now and `OpFinish` on drop.
///

pub(crate) struct Span<'a> {
    kind: OpKind,
    entity: &'a str,
    rows: u64,
    finished: bool,
}

impl<'a> Span<'a> {
    #[must_use]
    pub(crate) fn new(kind: OpKind, entity: &'a str) -> Self {
        record(MetricsEvent::OpStart { kind, entity });

        Self {
            kind,
            entity,
            rows: 0,
            finished: false,
        }
    }

    pub(crate) const fn set_rows(&mut self, rows: u64) {
        self.rows = rows;
    }

    fn finish_inner(&mut self) {
        if !self.finished {
            record(MetricsEvent::OpFinish {
                kind: self.kind,
                entity: self.entity,
                rows: self.rows,
            });
            self.finished = true;
        }
    }
}

impl Drop for Span<'_> {
    fn drop(&mut self) {
        self.finish_inner();
    }
}

///
/// TESTS
///
