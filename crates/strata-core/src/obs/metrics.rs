use serde::Serialize;
use std::cell::RefCell;

thread_local! {
    static STATE: RefCell<MetricsState> = RefCell::new(MetricsState::default());
}

///
/// MetricsState
///
/// Process-local query execution counters. Only `sink` writes here.
///

#[derive(Clone, Debug, Default, Serialize)]
pub struct MetricsState {
    pub queries_executed: u64,
    pub rows_scanned: u64,
    pub rows_matched: u64,
    pub index_lookups: u64,
    pub node_reschedules: u64,
    pub views_synced: u64,
}

pub(crate) fn with_state_mut<R>(f: impl FnOnce(&mut MetricsState) -> R) -> R {
    STATE.with(|state| f(&mut state.borrow_mut()))
}

pub(crate) fn snapshot() -> MetricsState {
    STATE.with(|state| state.borrow().clone())
}

pub(crate) fn reset() {
    STATE.with(|state| *state.borrow_mut() = MetricsState::default());
}
