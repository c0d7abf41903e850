//! Metrics sink boundary.
//!
//! Engine logic MUST NOT depend on `obs::metrics` directly. All
//! instrumentation flows through `MetricsEvent` and `MetricsSink`; this
//! module is the only bridge between execution logic and the counter
//! state.

use crate::obs::metrics;
use std::cell::RefCell;
use std::rc::Rc;

thread_local! {
    static SINK_OVERRIDE: RefCell<Option<Rc<dyn MetricsSink>>> = const { RefCell::new(None) };
}

///
/// MetricsEvent
///

#[derive(Clone, Copy, Debug)]
pub enum MetricsEvent {
    QueryStart,
    QueryFinish { rows_scanned: u64, matches: u64 },
    RowsScanned { rows: u64 },
    IndexLookup { hits: u64 },
    NodeRescheduled,
    ViewSynced,
}

///
/// MetricsSink
///

pub trait MetricsSink {
    fn record(&self, event: MetricsEvent);
}

///
/// GlobalMetricsSink
/// Default process-local sink that writes into the counter state.
/// Acts as the concrete sink when no scoped override is installed.
///

pub(crate) struct GlobalMetricsSink;

impl MetricsSink for GlobalMetricsSink {
    fn record(&self, event: MetricsEvent) {
        metrics::with_state_mut(|m| match event {
            MetricsEvent::QueryStart => {
                m.queries_executed = m.queries_executed.saturating_add(1);
            }
            MetricsEvent::QueryFinish {
                rows_scanned,
                matches,
            } => {
                m.rows_scanned = m.rows_scanned.saturating_add(rows_scanned);
                m.rows_matched = m.rows_matched.saturating_add(matches);
            }
            MetricsEvent::RowsScanned { rows } => {
                m.rows_scanned = m.rows_scanned.saturating_add(rows);
            }
            MetricsEvent::IndexLookup { .. } => {
                m.index_lookups = m.index_lookups.saturating_add(1);
            }
            MetricsEvent::NodeRescheduled => {
                m.node_reschedules = m.node_reschedules.saturating_add(1);
            }
            MetricsEvent::ViewSynced => {
                m.views_synced = m.views_synced.saturating_add(1);
            }
        });
    }
}

/// Record one event through the scoped sink, or the global one.
pub(crate) fn record(event: MetricsEvent) {
    let scoped = SINK_OVERRIDE.with(|slot| slot.borrow().clone());
    match scoped {
        Some(sink) => sink.record(event),
        None => GlobalMetricsSink.record(event),
    }
}

/// Run `f` with every metrics event routed to `sink`.
pub fn with_sink<R>(sink: Rc<dyn MetricsSink>, f: impl FnOnce() -> R) -> R {
    struct Reset(Option<Rc<dyn MetricsSink>>);
    impl Drop for Reset {
        fn drop(&mut self) {
            SINK_OVERRIDE.with(|slot| *slot.borrow_mut() = self.0.take());
        }
    }

    let previous = SINK_OVERRIDE.with(|slot| slot.borrow_mut().replace(sink));
    let _reset = Reset(previous);
    f()
}

/// Point-in-time snapshot of the counter state.
#[must_use]
pub fn metrics_report() -> metrics::MetricsState {
    metrics::snapshot()
}

/// Reset all counters, primarily for tests.
pub fn metrics_reset_all() {
    metrics::reset();
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::{metrics_report, metrics_reset_all, record, with_sink, MetricsEvent, MetricsSink};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn global_sink_accumulates_counters() {
        metrics_reset_all();
        record(MetricsEvent::QueryStart);
        record(MetricsEvent::RowsScanned { rows: 5 });

        let report = metrics_report();
        assert_eq!(report.queries_executed, 1);
        assert_eq!(report.rows_scanned, 5);
    }

    #[test]
    fn scoped_sink_intercepts_events() {
        struct Capture(Cell<u64>);
        impl MetricsSink for Capture {
            fn record(&self, event: MetricsEvent) {
                if let MetricsEvent::RowsScanned { rows } = event {
                    self.0.set(self.0.get() + rows);
                }
            }
        }

        metrics_reset_all();
        let capture = Rc::new(Capture(Cell::new(0)));
        with_sink(capture.clone(), || {
            record(MetricsEvent::RowsScanned { rows: 3 });
        });

        assert_eq!(capture.0.get(), 3);
        assert_eq!(metrics_report().rows_scanned, 0);
    }
}
