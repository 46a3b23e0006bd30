use std::collections::HashMap;

use super::state::RunState;

/// In-memory map of live runs keyed by run id.
///
/// Owned by the tracker; callers only ever see clones.
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: HashMap<String, RunState>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh, all-unset state for `id`, replacing any prior one.
    pub fn insert(&mut self, id: &str) {
        self.runs.insert(id.to_string(), RunState::default());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.runs.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&RunState> {
        self.runs.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut RunState> {
        self.runs.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<RunState> {
        self.runs.remove(id)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
