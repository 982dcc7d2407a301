use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use chrono::Utc;
use tokio::time::Instant;

use super::{TagConfig, TagDirection};
use crate::driver::DriverStatus;
use crate::event::{TagData, TagEvent};

/// Runtime state of a tag, guarded by the tag's own lock.
#[derive(Debug, Clone)]
pub struct TagState {
    /// Working buffer: freshly read bytes for read tags, pending bytes for write tags
    pub current: Vec<u8>,
    /// Last published (read) or last written (write) snapshot
    pub published: Vec<u8>,
    pub initialized: bool,
    pub error: DriverStatus,
    pub error_count: u32,
    pub last_sync: Option<Instant>,
    pub last_error: Option<Instant>,
    pub write_pending: bool,
    pub write_requested_at: Option<Instant>,
    /// Tag-relative offset of the next partial read chunk
    pub read_cursor: usize,
    /// Accumulated scheduling credit
    pub points: u64,
}

impl TagState {
    fn new(size: usize) -> Self {
        Self {
            current: vec![0; size],
            published: vec![0; size],
            initialized: false,
            error: DriverStatus::ok(),
            error_count: 0,
            last_sync: None,
            last_error: None,
            write_pending: false,
            write_requested_at: None,
            read_cursor: 0,
            points: 0,
        }
    }

    pub fn in_error(&self) -> bool {
        !self.error.is_ok()
    }

    /// Clears the error state after a successful transfer.
    /// Returns true when the reported status changed.
    pub fn record_success(&mut self, now: Instant) -> bool {
        let changed = self.in_error();
        self.error = DriverStatus::ok();
        self.error_count = 0;
        self.last_sync = Some(now);
        changed
    }

    /// Returns true when the reported status changed.
    pub fn record_failure(&mut self, status: DriverStatus, now: Instant) -> bool {
        let changed = self.error != status;
        self.error = status;
        self.error_count = self.error_count.saturating_add(1);
        self.last_error = Some(now);
        changed
    }
}

/// A contiguous byte region of a device.
///
/// The tag lock is taken both by the scheduling engine and by the external
/// write-request path; both mutate `current`, so they contend here and
/// nowhere else.
#[derive(Debug)]
pub struct Tag {
    config: TagConfig,
    state: Mutex<TagState>,
}

impl Tag {
    pub fn new(config: TagConfig) -> Self {
        let state = TagState::new(config.size);
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &TagConfig {
        &self.config
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn direction(&self) -> TagDirection {
        self.config.direction
    }

    pub fn lock(&self) -> MutexGuard<'_, TagState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merges externally requested bytes into the pending write buffer.
    ///
    /// `absolute_offset` is device-relative. Bytes outside the tag are
    /// clipped. Returns true if at least one pending byte changed, in which
    /// case the tag is marked dirty.
    pub fn merge_write(&self, absolute_offset: usize, bytes: &[u8], now: Instant) -> bool {
        let start = absolute_offset.max(self.config.byte_offset);
        let end = absolute_offset
            .saturating_add(bytes.len())
            .min(self.config.end());
        if start >= end {
            return false;
        }

        let src = &bytes[start - absolute_offset..end - absolute_offset];
        let mut state = self.lock();
        let dst = &mut state.current[start - self.config.byte_offset..end - self.config.byte_offset];
        if dst == src {
            return false;
        }
        dst.copy_from_slice(src);

        if !state.write_pending {
            state.write_pending = true;
            state.write_requested_at = Some(now);
        }
        true
    }

    /// Full-tag event built from the last published snapshot.
    pub fn snapshot_event(&self, device_id: &str) -> TagEvent {
        let state = self.lock();
        TagEvent {
            device_id: device_id.to_string(),
            tag_id: self.config.id.clone(),
            byte_offset: self.config.byte_offset,
            data: Some(TagData {
                snapshot: Bytes::copy_from_slice(&state.published),
                range: 0..self.config.size,
                full: true,
            }),
            status: state.error.clone(),
            status_changed: false,
            timestamp: Utc::now(),
        }
    }
}
