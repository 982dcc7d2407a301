use std::sync::Arc;
use std::time::Duration;

pub mod credit;
mod settings;

pub use settings::SchedulingConfig;

use crate::tag::{Tag, TagDirection};

/// One scheduling decision: which tag of which device to service, and how.
#[derive(Debug, Clone)]
pub struct TagSchedule {
    pub device_id: String,
    pub tag: Arc<Tag>,
    pub direction: TagDirection,
}

impl TagSchedule {
    pub fn is_write(&self) -> bool {
        self.direction == TagDirection::Write
    }
}

/// Nothing is eligible right now; retry after the given duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWait(pub Duration);

impl std::fmt::Display for ScheduleWait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "nothing to schedule for {:?}", self.0)
    }
}
