//! Merge rules applied when adjacent events sit in an aggregating queue.

use super::{GatewayEvent, TagData, TagEvent};
use crate::tag::diff;

/// Adjacent items that can be folded into one.
pub trait Coalesce: Sized {
    /// Whether `next` (queued right after `self`) may be folded into `self`
    fn can_merge(&self, next: &Self) -> bool;

    /// Folds `next` into `self`. Only called when `can_merge` returned true.
    fn merge(self, next: Self) -> Self;
}

impl Coalesce for GatewayEvent {
    fn can_merge(&self, next: &Self) -> bool {
        match (self, next) {
            (Self::DeviceStatus(a), Self::DeviceStatus(b)) => a.device_id == b.device_id,
            (Self::TagRead(a), Self::TagRead(b)) | (Self::TagWrite(a), Self::TagWrite(b)) => {
                a.same_tag(b) && a.data.is_some() == b.data.is_some()
            }
            _ => false,
        }
    }

    fn merge(self, next: Self) -> Self {
        match (self, next) {
            (Self::TagRead(a), Self::TagRead(b)) => Self::TagRead(a.merge(b)),
            (Self::TagWrite(a), Self::TagWrite(b)) => Self::TagWrite(a.merge(b)),
            (_, later) => later,
        }
    }
}

impl TagEvent {
    /// Later event wins; byte ranges are unioned over the later snapshot,
    /// which already contains every earlier change.
    fn merge(self, next: TagEvent) -> TagEvent {
        let data = match (self.data, next.data) {
            (Some(earlier), Some(later)) => {
                let range = diff::union(&earlier.range, &later.range);
                let full = range == (0..later.snapshot.len());
                Some(TagData {
                    snapshot: later.snapshot,
                    range,
                    full,
                })
            }
            (_, later) => later,
        };

        TagEvent {
            data,
            status_changed: self.status_changed || next.status_changed,
            ..next
        }
    }
}
