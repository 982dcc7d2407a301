//! Single-device scheduling engine.
//!
//! Decides which tag to service next, performs the read or write through the
//! injected driver, diffs the result and raises events. Device restarts live
//! in `restart.rs`.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use domain::driver::{DriverFault, DriverResult, DriverStatus, TagDriver};
use domain::event::{EventPublisher, GatewayEvent, TagData, TagEvent};
use domain::schedule::credit;
use domain::tag::diff;
use domain::{Device, ScheduleWait, SchedulingConfig, Tag, TagConfig, TagDirection, TagSchedule};

mod restart;

pub struct ScheduleEngine {
    device: Arc<Device>,
    driver: Arc<dyn TagDriver>,
    publisher: Arc<dyn EventPublisher>,
    settings: SchedulingConfig,
}

impl ScheduleEngine {
    pub fn new(
        device: Arc<Device>,
        driver: Arc<dyn TagDriver>,
        publisher: Arc<dyn EventPublisher>,
        settings: SchedulingConfig,
    ) -> Self {
        Self {
            device,
            driver,
            publisher,
            settings,
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn settings(&self) -> &SchedulingConfig {
        &self.settings
    }

    /// Picks the next tag and services it.
    ///
    /// With `writes_only` set, only write tags with a pending request are
    /// considered; this is how pending writes are flushed during shutdown.
    pub async fn schedule_next(&self, writes_only: bool) -> Result<TagSchedule, ScheduleWait> {
        let schedule = self.pick_next(writes_only, Instant::now())?;
        trace!(
            device_id = %schedule.device_id,
            tag_id = %schedule.tag.id(),
            direction = schedule.direction.as_str(),
            "Scheduled tag"
        );

        match schedule.direction {
            TagDirection::Read => self.execute_read(&schedule.tag).await,
            TagDirection::Write => self.execute_write(&schedule.tag).await,
        }
        Ok(schedule)
    }

    /// Scheduling decision without side effects.
    pub fn pick_next(&self, writes_only: bool, now: Instant) -> Result<TagSchedule, ScheduleWait> {
        let mut wait = self.settings.max_idle_wait();
        if !self.device.status().is_schedulable() {
            return Err(ScheduleWait(wait));
        }

        let mut best_write: Option<(Instant, Arc<Tag>)> = None;
        let mut best_read: Option<(u64, Arc<Tag>)> = None;

        for tag in self.device.tags() {
            let state = tag.lock();
            if !state.initialized {
                continue;
            }
            let pending = tag.config().is_write() && state.write_pending;
            if !pending && (writes_only || tag.config().is_write()) {
                continue;
            }

            let ready_at = if state.in_error() {
                state.last_error.map(|at| at + self.settings.error_backoff())
            } else if pending {
                state.last_sync.map(|at| at + self.settings.min_write_interval())
            } else {
                state.last_sync.map(|at| at + self.settings.min_read_interval())
            };
            if let Some(ready_at) = ready_at {
                if ready_at > now {
                    wait = wait.min(ready_at - now);
                    continue;
                }
            }

            if pending {
                let requested = state.write_requested_at.unwrap_or(now);
                if best_write.as_ref().is_none_or(|(oldest, _)| requested < *oldest) {
                    best_write = Some((requested, tag.clone()));
                }
            } else if best_read.as_ref().is_none_or(|(points, _)| state.points < *points) {
                best_read = Some((state.points, tag.clone()));
            }
        }

        let (tag, direction) = match (best_write, best_read) {
            (Some((_, tag)), _) => (tag, TagDirection::Write),
            (None, Some((_, tag))) => (tag, TagDirection::Read),
            (None, None) => return Err(ScheduleWait(wait)),
        };
        Ok(TagSchedule {
            device_id: self.device.id().to_string(),
            tag,
            direction,
        })
    }

    async fn execute_read(&self, tag: &Arc<Tag>) {
        // Credited once per pass; resumed partial reads are not charged again
        if tag.lock().read_cursor == 0 {
            self.credit_read(tag);
        }

        let config = tag.config();
        let budget = self.device.state().limits.read;
        let chunk = if self.device.config().partial_reads && budget > 0 {
            budget.min(config.size)
        } else {
            config.size
        };

        let mut buffer = vec![0u8; config.size];
        if chunk == config.size {
            match self.call_read(config, &mut buffer, config.byte_offset, config.size).await {
                Ok(()) => self.complete_read(tag, buffer).await,
                Err(status) => self.fail_transfer(tag, status).await,
            }
            return;
        }

        loop {
            let cursor = tag.lock().read_cursor;
            let len = chunk.min(config.size - cursor);

            if let Err(status) = self
                .call_read(config, &mut buffer, config.byte_offset + cursor, len)
                .await
            {
                tag.lock().read_cursor = 0;
                self.fail_transfer(tag, status).await;
                return;
            }

            let next = cursor + len;
            let wrapped = next >= config.size;
            let assembled = {
                let mut state = tag.lock();
                state.current[cursor..next].copy_from_slice(&buffer[cursor..next]);
                state.read_cursor = if wrapped { 0 } else { next };
                wrapped.then(|| state.current.clone())
            };

            if let Some(assembled) = assembled {
                self.complete_read(tag, assembled).await;
                return;
            }

            if self.pick_next(true, Instant::now()).is_ok() {
                debug!(
                    device_id = %self.device.id(),
                    tag_id = %tag.id(),
                    cursor = next,
                    "Partial read yields to pending write"
                );
                return;
            }
        }
    }

    /// Diffs a complete read against the published snapshot and raises the
    /// resulting event (data span, or an empty range when nothing changed).
    async fn complete_read(&self, tag: &Arc<Tag>, fresh: Vec<u8>) {
        let now = Instant::now();
        let event = {
            let mut state = tag.lock();
            let status_changed = state.record_success(now);
            let span = diff::dirty_span(&state.published, &fresh);
            if let Some(span) = &span {
                state.published[span.clone()].copy_from_slice(&fresh[span.clone()]);
            }
            state.current.copy_from_slice(&fresh);

            self.tag_event(
                tag,
                Some(TagData {
                    snapshot: Bytes::copy_from_slice(&state.published),
                    range: span.unwrap_or(0..0),
                    full: false,
                }),
                DriverStatus::ok(),
                status_changed,
            )
        };
        self.raise(GatewayEvent::TagRead(event)).await;
    }

    async fn execute_write(&self, tag: &Arc<Tag>) {
        let config = tag.config();
        let budget = self.device.state().limits.write;
        let optimize = self.device.config().optimize_writes;

        let (pending, spans) = {
            let state = tag.lock();
            let spans = diff::write_spans(&state.current, &state.published, budget, optimize);
            (state.current.clone(), spans)
        };
        let spans = if spans.is_empty() {
            vec![0..config.size]
        } else {
            spans
        };

        let mut attempted = 0..0;
        let mut written = Vec::with_capacity(spans.len());
        let mut failure = None;
        for span in spans {
            attempted = diff::union(&attempted, &span);
            match self
                .call_write(config, &pending, config.byte_offset + span.start, span.len())
                .await
            {
                Ok(()) => written.push(span),
                Err(status) => {
                    failure = Some(status);
                    break;
                }
            }
        }

        let now = Instant::now();
        let event = {
            let mut state = tag.lock();
            for span in &written {
                state.published[span.clone()].copy_from_slice(&pending[span.clone()]);
            }
            state.write_pending = state.current != state.published;
            if !state.write_pending {
                state.write_requested_at = None;
            }

            match &failure {
                None => {
                    let status_changed = state.record_success(now);
                    let full = attempted == (0..config.size);
                    self.tag_event(
                        tag,
                        Some(TagData {
                            snapshot: Bytes::copy_from_slice(&state.published),
                            range: attempted,
                            full,
                        }),
                        DriverStatus::ok(),
                        status_changed,
                    )
                }
                Some(status) => {
                    let status_changed = state.record_failure(status.clone(), now);
                    self.tag_event(
                        tag,
                        Some(TagData {
                            snapshot: Bytes::copy_from_slice(&state.published),
                            range: attempted,
                            full: false,
                        }),
                        status.clone(),
                        status_changed,
                    )
                }
            }
        };

        if let Some(status) = &failure {
            self.count_device_error();
            warn!(
                device_id = %self.device.id(),
                tag_id = %tag.id(),
                error = %status,
                "Write failed"
            );
        }
        self.raise(GatewayEvent::TagWrite(event)).await;
    }

    /// Records a failed transfer on the tag and raises a status event.
    async fn fail_transfer(&self, tag: &Arc<Tag>, status: DriverStatus) {
        let event = {
            let mut state = tag.lock();
            let status_changed = state.record_failure(status.clone(), Instant::now());
            self.tag_event(tag, None, status.clone(), status_changed)
        };
        self.count_device_error();
        warn!(
            device_id = %self.device.id(),
            tag_id = %tag.id(),
            error = %status,
            "Transfer failed"
        );

        let event = match tag.direction() {
            TagDirection::Read => GatewayEvent::TagRead(event),
            TagDirection::Write => GatewayEvent::TagWrite(event),
        };
        self.raise(event).await;
    }

    fn count_device_error(&self) {
        let mut state = self.device.state();
        state.error_count = state.error_count.saturating_add(1);
    }

    /// Adds the tag's weight to its points and re-bases the points of all
    /// active read tags.
    fn credit_read(&self, serviced: &Arc<Tag>) {
        let read_tags: Vec<Arc<Tag>> = self
            .device
            .tags()
            .into_iter()
            .filter(|t| t.config().is_read() && t.lock().initialized)
            .collect();

        let mut points = Vec::with_capacity(read_tags.len());
        let mut weights = Vec::with_capacity(read_tags.len());
        for tag in &read_tags {
            let mut state = tag.lock();
            if Arc::ptr_eq(tag, serviced) {
                state.points += u64::from(tag.config().weight);
            }
            points.push(state.points);
            weights.push(tag.config().weight);
        }

        credit::rebase(&mut points, &weights);
        for (tag, points) in read_tags.iter().zip(points) {
            tag.lock().points = points;
        }
    }

    fn tag_event(
        &self,
        tag: &Tag,
        data: Option<TagData>,
        status: DriverStatus,
        status_changed: bool,
    ) -> TagEvent {
        TagEvent {
            device_id: self.device.id().to_string(),
            tag_id: tag.id().to_string(),
            byte_offset: tag.config().byte_offset,
            data,
            status,
            status_changed,
            timestamp: Utc::now(),
        }
    }

    /// Publishes an event. A failing subscriber is reported on the device's
    /// exception channel and never propagates further.
    pub(crate) async fn raise(&self, event: GatewayEvent) {
        let kind = event.event_type().to_string();
        if let Err(e) = self.publisher.publish(event).await {
            warn!(device_id = %self.device.id(), event = %kind, error = %e, "Failed to publish event");
            let exception =
                GatewayEvent::exception(self.device.id(), format!("Failed to publish {kind}: {e}"));
            if let Err(e) = self.publisher.publish(exception).await {
                error!(device_id = %self.device.id(), error = %e, "Failed to publish exception");
            }
        }
    }

    async fn call_read(
        &self,
        tag: &TagConfig,
        buffer: &mut [u8],
        absolute_start: usize,
        len: usize,
    ) -> Result<(), DriverStatus> {
        self.guarded(
            self.driver
                .read_tag(self.device.config(), tag, buffer, absolute_start, len),
        )
        .await
    }

    async fn call_write(
        &self,
        tag: &TagConfig,
        buffer: &[u8],
        absolute_start: usize,
        len: usize,
    ) -> Result<(), DriverStatus> {
        self.guarded(
            self.driver
                .write_tag(self.device.config(), tag, buffer, absolute_start, len),
        )
        .await
    }

    /// Runs a driver call and translates every failure, panics included,
    /// into a `(code, description)` pair.
    pub(crate) async fn guarded<F>(&self, call: F) -> Result<(), DriverStatus>
    where
        F: Future<Output = DriverResult>,
    {
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(DriverFault::Code(0))) => Err(DriverStatus::unexpected(
                "driver reported a failure with code 0",
            )),
            Ok(Err(DriverFault::Code(code))) => {
                Err(DriverStatus::new(code, self.driver.error_message(code)))
            }
            Ok(Err(DriverFault::Native(message))) => Err(DriverStatus::unexpected(message)),
            Err(panic) => Err(DriverStatus::unexpected(panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("driver panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("driver panicked: {message}")
    } else {
        "driver panicked".to_string()
    }
}
