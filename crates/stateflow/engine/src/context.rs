//! Execution context: the request-scoped duplicate-execution guard
//!
//! The surrounding entity-save lifecycle can run the same transition
//! more than once in a single request. The guard remembers the outcome
//! per (entity, field, state-pair) key so the second run returns the
//! first run's result instead of writing a second history record.
//!
//! The context's lifetime is caller-controlled: one per HTTP request or
//! per scheduler run, never shared across independent runs.

use stateflow_types::StateId;
use std::collections::HashMap;

/// One execution context: create it at the start of a request or batch
/// run, drop it at the end.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    outcomes: HashMap<String, StateId>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The outcome already recorded for `key` in this context, if any
    pub fn prior_outcome(&self, key: &str) -> Option<&StateId> {
        self.outcomes.get(key)
    }

    /// Record (or update) the outcome for `key`.
    ///
    /// The executor first seeds the from-state as a provisional value so
    /// reentrant calls during the same execution see a marker, then
    /// overwrites it with the final state.
    pub fn record(&mut self, key: String, outcome: StateId) {
        self.outcomes.insert(key, outcome);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}
