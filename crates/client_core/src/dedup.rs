use std::collections::HashSet;

use shared::domain::{FactId, ThreadId};
use tracing::debug;

/// Remembers one-shot fact ids for the active conversation thread. Ids are
/// only unique within a thread, so the set is dropped on every thread change.
#[derive(Debug, Default)]
pub struct FactDeduplicationTracker {
    processed: HashSet<FactId>,
    thread: Option<ThreadId>,
}

impl FactDeduplicationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_process(&self, id: &FactId) -> bool {
        !id.is_empty() && !self.processed.contains(id)
    }

    pub fn record_processed(&mut self, id: FactId) {
        if !id.is_empty() {
            self.processed.insert(id);
        }
    }

    /// Checks and records in one step; `true` means the side effect should fire.
    pub fn accept(&mut self, id: &FactId) -> bool {
        if !self.should_process(id) {
            debug!(fact_id = %id, "dedup: fact already handled or empty");
            return false;
        }
        self.record_processed(id.clone());
        true
    }

    pub fn on_thread_change(&mut self, thread: Option<ThreadId>) {
        debug!(
            previous = ?self.thread,
            next = ?thread,
            cleared = self.processed.len(),
            "dedup: thread changed"
        );
        self.thread = thread;
        self.processed.clear();
    }

    pub fn clear(&mut self) {
        self.processed.clear();
        self.thread = None;
    }

    pub fn active_thread(&self) -> Option<&ThreadId> {
        self.thread.as_ref()
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }
}
