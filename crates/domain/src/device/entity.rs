use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::time::Instant;

use super::{DeviceConfig, DeviceStatus};
use crate::driver::{DriverStatus, TransferLimits};
use crate::error::{DomainError, Result};
use crate::event::DeviceStatusEvent;
use crate::tag::{Tag, TagConfig};

/// Mutable device bookkeeping, guarded by the device lock.
/// Status changes only through the engine's restart routine.
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    pub status: DeviceStatus,
    pub error: DriverStatus,
    pub error_count: u32,
    pub limits: TransferLimits,
    pub restarted_once: bool,
    pub last_restart: Option<Instant>,
}

/// Runtime representation of a device and the tags it owns.
///
/// `config().tags` is the list the device was created with; `tags()` is the
/// live list, which changes through `add_tag`/`remove_tag`.
#[derive(Debug)]
pub struct Device {
    config: DeviceConfig,
    state: Mutex<DeviceState>,
    tags: Mutex<Vec<Arc<Tag>>>,
}

impl Device {
    pub fn new(config: DeviceConfig) -> Result<Self> {
        config.validate()?;

        let status = if config.enabled {
            DeviceStatus::Uninitialized
        } else {
            DeviceStatus::Disabled
        };
        let tags = config
            .tags
            .iter()
            .cloned()
            .map(|tag| Arc::new(Tag::new(tag)))
            .collect();

        Ok(Self {
            config,
            state: Mutex::new(DeviceState {
                status,
                ..DeviceState::default()
            }),
            tags: Mutex::new(tags),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> DeviceStatus {
        self.state().status
    }

    fn tag_list(&self) -> MutexGuard<'_, Vec<Arc<Tag>>> {
        self.tags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the live tag list
    pub fn tags(&self) -> Vec<Arc<Tag>> {
        self.tag_list().clone()
    }

    pub fn find_tag(&self, tag_id: &str) -> Option<Arc<Tag>> {
        self.tag_list().iter().find(|t| t.id() == tag_id).cloned()
    }

    /// Adds a tag at runtime. The tag starts uninitialized, so the next
    /// restart check picks it up.
    pub fn add_tag(&self, config: TagConfig) -> Result<Arc<Tag>> {
        config.validate()?;
        let mut tags = self.tag_list();
        if tags.iter().any(|t| t.id() == config.id) {
            return Err(DomainError::InvalidConfiguration(format!(
                "Duplicate tag {} on device {}",
                config.id, self.config.id
            )));
        }
        let tag = Arc::new(Tag::new(config));
        tags.push(tag.clone());
        Ok(tag)
    }

    pub fn remove_tag(&self, tag_id: &str) -> Option<Arc<Tag>> {
        let mut tags = self.tag_list();
        let index = tags.iter().position(|t| t.id() == tag_id)?;
        Some(tags.remove(index))
    }

    pub fn status_event(&self) -> DeviceStatusEvent {
        let state = self.state();
        DeviceStatusEvent {
            device_id: self.config.id.clone(),
            status: state.status,
            error: state.error.clone(),
            error_count: state.error_count,
            timestamp: Utc::now(),
        }
    }
}
