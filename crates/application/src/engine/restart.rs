//! Device recovery: `UNINITIALIZED -> OK | ERROR`, then `ERROR -> OK | ERROR`
//! on every further attempt. `DISABLED` is only reachable by configuration.

use std::sync::Arc;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use domain::driver::DriverStatus;
use domain::event::{GatewayEvent, TagData};
use domain::{DeviceStatus, Tag};

use super::ScheduleEngine;

impl ScheduleEngine {
    pub fn is_restart_needed(&self) -> bool {
        {
            let state = self.device.state();
            if !state.restarted_once {
                return true;
            }
            if state.status == DeviceStatus::Disabled {
                return false;
            }

            let interval_elapsed = state
                .last_restart
                .is_none_or(|at| at.elapsed() >= self.settings.restart_interval());
            if !interval_elapsed {
                return false;
            }
            if state.error_count >= self.settings.device_error_threshold
                || state.status.needs_recovery()
            {
                return true;
            }
        }

        self.device.tags().iter().any(|tag| {
            let state = tag.lock();
            !state.initialized || state.error_count >= self.settings.tag_error_threshold
        })
    }

    /// Reconnects the device and re-seeds every read tag (and every write tag
    /// not yet initialized) with a full read.
    pub async fn restart(&self) {
        let first = {
            let mut state = self.device.state();
            let first = !state.restarted_once;
            state.restarted_once = true;
            state.last_restart = Some(Instant::now());
            if state.status != DeviceStatus::Disabled && !first {
                state.status = DeviceStatus::Uninitialized;
            }
            first
        };

        if self.device.status() == DeviceStatus::Disabled {
            info!(device_id = %self.device.id(), "Device disabled by configuration");
            self.raise(GatewayEvent::DeviceStatus(self.device.status_event()))
                .await;
            return;
        }

        info!(device_id = %self.device.id(), first, "Restarting device");
        let config = self.device.config();

        if !first {
            if let Err(status) = self.guarded(self.driver.disconnect(config)).await {
                debug!(device_id = %self.device.id(), error = %status, "Disconnect before restart failed");
            }
            if let Err(status) = self.guarded(self.driver.stop_interface()).await {
                debug!(device_id = %self.device.id(), error = %status, "Stop interface before restart failed");
            }
        }

        if let Err(status) = self.guarded(self.driver.start_interface()).await {
            return self.restart_failed(status).await;
        }
        if let Err(status) = self.guarded(self.driver.connect(config)).await {
            return self.restart_failed(status).await;
        }

        let limits = self.driver.transfer_limits(config);
        {
            let mut state = self.device.state();
            state.status = DeviceStatus::Ok;
            state.error = DriverStatus::ok();
            state.error_count = 0;
            state.limits = limits;
        }
        info!(
            device_id = %self.device.id(),
            read_budget = limits.read,
            write_budget = limits.write,
            "Device online"
        );
        self.raise(GatewayEvent::DeviceStatus(self.device.status_event()))
            .await;

        for tag in self.device.tags() {
            let needs_seed = tag.config().is_read() || !tag.lock().initialized;
            if needs_seed {
                self.seed_tag(&tag).await;
            }
        }
    }

    /// Disconnects after the work loop has drained.
    pub async fn shutdown(&self) {
        let connected = {
            let state = self.device.state();
            state.restarted_once && state.status == DeviceStatus::Ok
        };
        if !connected {
            return;
        }

        let config = self.device.config();
        if let Err(status) = self.guarded(self.driver.disconnect(config)).await {
            warn!(device_id = %self.device.id(), error = %status, "Disconnect failed");
        }
        if let Err(status) = self.guarded(self.driver.stop_interface()).await {
            warn!(device_id = %self.device.id(), error = %status, "Stop interface failed");
        }
        info!(device_id = %self.device.id(), "Device released");
    }

    async fn restart_failed(&self, status: DriverStatus) {
        {
            let mut state = self.device.state();
            state.status = DeviceStatus::Error;
            state.error = status.clone();
            state.error_count = state.error_count.saturating_add(1);
        }
        warn!(device_id = %self.device.id(), error = %status, "Restart failed");
        self.raise(GatewayEvent::DeviceStatus(self.device.status_event()))
            .await;
    }

    /// Full read of one tag, in chunks of the read budget when one is set.
    async fn seed_tag(&self, tag: &Arc<Tag>) {
        let config = tag.config();
        let budget = self.device.state().limits.read;
        let chunk = if budget > 0 { budget } else { config.size };

        let mut buffer = vec![0u8; config.size];
        let mut pos = 0;
        while pos < config.size {
            let len = chunk.min(config.size - pos);
            if let Err(status) = self
                .call_read(config, &mut buffer, config.byte_offset + pos, len)
                .await
            {
                self.fail_transfer(tag, status).await;
                return;
            }
            pos += len;
        }

        let event = {
            let mut state = tag.lock();
            let status_changed = state.record_success(Instant::now());
            if config.is_write() {
                // Keep bytes requested before initialization; adopt the
                // device's bytes everywhere else.
                let requested: Vec<u8> = state
                    .current
                    .iter()
                    .zip(&state.published)
                    .zip(&buffer)
                    .map(|((pending, old), device)| if pending != old { *pending } else { *device })
                    .collect();
                state.current = requested;
                state.published.copy_from_slice(&buffer);
                state.write_pending = state.current != state.published;
                if !state.write_pending {
                    state.write_requested_at = None;
                }
            } else {
                state.current.copy_from_slice(&buffer);
                state.published.copy_from_slice(&buffer);
            }
            state.initialized = true;
            state.read_cursor = 0;

            self.tag_event(
                tag,
                Some(TagData {
                    snapshot: Bytes::copy_from_slice(&state.published),
                    range: 0..config.size,
                    full: true,
                }),
                DriverStatus::ok(),
                status_changed,
            )
        };
        self.raise(GatewayEvent::TagRead(event)).await;
    }
}
