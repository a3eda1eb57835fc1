use std::collections::HashMap;

use parking_lot::Mutex;

use crate::results::RunOutcome;

/// Remembers procedures that turned out too complex, so they are not
/// analyzed again until their stamp (typically a modification counter)
/// changes. Successful runs are cheap to redo and not stored.
#[derive(Debug, Default)]
pub struct RunCache {
    entries: Mutex<HashMap<String, (u64, RunOutcome)>>,
}

impl RunCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The remembered outcome for `key`, if it was recorded with `stamp`.
    pub fn known_outcome(&self, key: &str, stamp: u64) -> Option<RunOutcome> {
        let entries = self.entries.lock();
        match entries.get(key) {
            Some(&(recorded, outcome)) if recorded == stamp => Some(outcome),
            _ => None,
        }
    }

    pub fn remember(&self, key: &str, stamp: u64, outcome: RunOutcome) {
        let mut entries = self.entries.lock();
        if outcome == RunOutcome::TooComplex {
            entries.insert(key.to_owned(), (stamp, outcome));
        } else {
            entries.remove(key);
        }
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
