use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEBUG_TRACE_CAPACITY: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugEntry {
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub state: serde_json::Value,
}

/// Most recent state snapshots, oldest first.
#[derive(Debug, Clone)]
pub struct DebugTrace {
    entries: VecDeque<DebugEntry>,
    capacity: usize,
}

impl DebugTrace {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, component: impl Into<String>, state: &impl Serialize) {
        if self.capacity == 0 {
            return;
        }
        let state = serde_json::to_value(state)
            .unwrap_or_else(|err| serde_json::json!({ "unserializable": err.to_string() }));
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(DebugEntry {
            timestamp: Utc::now(),
            component: component.into(),
            state,
        });
    }

    pub fn entries(&self) -> Vec<DebugEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for DebugTrace {
    fn default() -> Self {
        Self::new(DEBUG_TRACE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_most_recent_entries() {
        let mut trace = DebugTrace::new(3);
        for step in 0..5 {
            trace.record("controller", &serde_json::json!({ "step": step }));
        }

        let steps: Vec<_> = trace
            .entries()
            .into_iter()
            .map(|entry| entry.state["step"].as_i64().expect("step"))
            .collect();
        assert_eq!(steps, vec![2, 3, 4]);
    }

    #[test]
    fn clear_empties_the_trace() {
        let mut trace = DebugTrace::default();
        trace.record("controller", &serde_json::json!({}));
        trace.clear();
        assert!(trace.is_empty());
    }
}
