//! Runtime metrics are update-only by contract.
//! Query-side instrumentation carries no semantic meaning; the engine
//! never reads these counters to make a decision.

use serde::Serialize;
use std::{
    cell::RefCell,
    cmp::Ordering,
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

///
/// EventState
/// Ephemeral, in-memory counters since `since_ms`.
///

#[derive(Clone, Debug, Default, Serialize)]
pub struct EventState {
    pub ops: EventOps,
    pub entities: BTreeMap<String, EntityCounters>,
    pub since_ms: u64,
}

///
/// EventOps
///

#[derive(Clone, Debug, Default, Serialize)]
pub struct EventOps {
    // caller operations
    pub create_calls: u64,
    pub read_calls: u64,
    pub update_calls: u64,
    pub delete_calls: u64,
    pub check_calls: u64,

    // rows
    pub rows_read: u64,
    pub rows_written: u64,
    pub rows_filtered: u64,

    // guards
    pub guards_compiled: u64,
    pub guard_cache_hits: u64,

    // outcomes
    pub denials: u64,
    pub validation_failures: u64,
    pub validation_issues: u64,
    pub fields_redacted: u64,
    pub rollbacks: u64,
}

///
/// EntityCounters
///

#[derive(Clone, Debug, Default, Serialize)]
pub struct EntityCounters {
    pub create_calls: u64,
    pub read_calls: u64,
    pub update_calls: u64,
    pub delete_calls: u64,
    pub check_calls: u64,
    pub rows_read: u64,
    pub rows_written: u64,
    pub rows_filtered: u64,
    pub guards_compiled: u64,
    pub denials: u64,
    pub validation_failures: u64,
    pub fields_redacted: u64,
}

thread_local! {
    static EVENT_STATE: RefCell<EventState> = RefCell::new(EventState {
        since_ms: now_millis(),
        ..Default::default()
    });
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Borrow metrics immutably.
pub(crate) fn with_state<R>(f: impl FnOnce(&EventState) -> R) -> R {
    EVENT_STATE.with(|m| f(&m.borrow()))
}

/// Borrow metrics mutably.
pub(crate) fn with_state_mut<R>(f: impl FnOnce(&mut EventState) -> R) -> R {
    EVENT_STATE.with(|m| f(&mut m.borrow_mut()))
}

/// Reset all counters and restart the window.
pub(crate) fn reset_all() {
    with_state_mut(|m| {
        *m = EventState {
            since_ms: now_millis(),
            ..Default::default()
        };
    });
}

///
/// EventReport
///

#[derive(Clone, Debug, Default, Serialize)]
pub struct EventReport {
    /// Ephemeral runtime counters since `since_ms`.
    pub counters: Option<EventState>,
    /// Per-entity counters, busiest first.
    pub entity_counters: Vec<EntitySummary>,
}

///
/// EntitySummary
///

#[derive(Clone, Debug, Default, Serialize)]
pub struct EntitySummary {
    pub entity: String,
    pub read_calls: u64,
    pub write_calls: u64,
    pub rows_read: u64,
    pub rows_written: u64,
    pub rows_filtered: u64,
    pub denials: u64,
    pub fields_redacted: u64,
    pub avg_rows_per_read: f64,
    pub denial_rate: f64,
}

/// Build a metrics report from the in-memory counters.
#[must_use]
#[expect(clippy::cast_precision_loss)]
pub fn report() -> EventReport {
    let snap = with_state(Clone::clone);

    let mut entity_counters: Vec<EntitySummary> = snap
        .entities
        .iter()
        .map(|(entity, c)| {
            let write_calls = c
                .create_calls
                .saturating_add(c.update_calls)
                .saturating_add(c.delete_calls);
            let calls = c.read_calls.saturating_add(write_calls);

            EntitySummary {
                entity: entity.clone(),
                read_calls: c.read_calls,
                write_calls,
                rows_read: c.rows_read,
                rows_written: c.rows_written,
                rows_filtered: c.rows_filtered,
                denials: c.denials,
                fields_redacted: c.fields_redacted,
                avg_rows_per_read: if c.read_calls > 0 {
                    c.rows_read as f64 / c.read_calls as f64
                } else {
                    0.0
                },
                denial_rate: if calls > 0 {
                    c.denials as f64 / calls as f64
                } else {
                    0.0
                },
            }
        })
        .collect();

    entity_counters.sort_by(|a, b| {
        let calls = |s: &EntitySummary| s.read_calls.saturating_add(s.write_calls);
        match calls(b).cmp(&calls(a)) {
            Ordering::Equal => a.entity.cmp(&b.entity),
            other => other,
        }
    });

    EventReport {
        counters: Some(snap),
        entity_counters,
    }
}

///
/// TESTS
///
