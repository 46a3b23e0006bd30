//! Run registry and long-poll progress tracking.
//!
//! Each job kind gets its own [`ProgressTracker`], so identical run ids of
//! different kinds never collide.

pub mod registry;
pub mod state;
pub mod tracker;

pub use registry::RunRegistry;
pub use state::RunState;
pub use tracker::{ProgressTracker, RunHandle, TrackerConfig};

use crate::job::JobKind;

/// One tracker per job kind.
#[derive(Debug, Clone)]
pub struct Trackers {
    create_map: ProgressTracker,
    map_preview: ProgressTracker,
    map_reambulation: ProgressTracker,
}

impl Trackers {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            create_map: ProgressTracker::new(JobKind::CreateMap.as_str(), config),
            map_preview: ProgressTracker::new(JobKind::MapPreview.as_str(), config),
            map_reambulation: ProgressTracker::new(JobKind::MapReambulation.as_str(), config),
        }
    }

    pub fn get(&self, kind: JobKind) -> &ProgressTracker {
        match kind {
            JobKind::CreateMap => &self.create_map,
            JobKind::MapPreview => &self.map_preview,
            JobKind::MapReambulation => &self.map_reambulation,
        }
    }

    /// Live runs across all kinds.
    pub fn run_count(&self) -> usize {
        JobKind::ALL.iter().map(|k| self.get(*k).run_count()).sum()
    }
}

impl Default for Trackers {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}
