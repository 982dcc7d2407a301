use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use domain::event::EventPublisher;
use domain::{Device, SchedulingConfig, TagDriver};

use crate::engine::ScheduleEngine;
use crate::events::EventFanout;

const MIN_SLEEP: Duration = Duration::from_millis(1);

/// Runs one device: a work task servicing tags and a monitor task
/// restarting the device when needed.
pub struct DeviceScheduler {
    engine: Arc<ScheduleEngine>,
    fanout: Arc<EventFanout>,
    paused: Arc<AtomicBool>,
    cancel_token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl DeviceScheduler {
    pub fn new(
        device: Arc<Device>,
        driver: Arc<dyn TagDriver>,
        settings: SchedulingConfig,
    ) -> Self {
        let fanout = Arc::new(EventFanout::new());
        let engine = Arc::new(ScheduleEngine::new(
            device,
            driver,
            fanout.clone(),
            settings,
        ));

        Self {
            engine,
            fanout,
            paused: Arc::new(AtomicBool::new(false)),
            cancel_token: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        self.engine.device()
    }

    pub fn engine(&self) -> &Arc<ScheduleEngine> {
        &self.engine
    }

    /// Adds an observer for every event this device raises.
    pub fn subscribe(&self, publisher: Arc<dyn EventPublisher>) {
        self.fanout.subscribe(publisher);
    }

    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!(device_id = %self.device().id(), "Device scheduler already started");
            return;
        }
        if self.cancel_token.is_cancelled() {
            warn!(device_id = %self.device().id(), "Device scheduler was stopped, not restarting");
            return;
        }

        info!(device_id = %self.device().id(), "Starting device scheduler");

        let work = tokio::spawn(run_work_loop(
            self.engine.clone(),
            self.paused.clone(),
            self.cancel_token.clone(),
        ));
        let monitor = tokio::spawn(run_monitor_loop(
            self.engine.clone(),
            self.cancel_token.clone(),
        ));

        let mut handles = self.handles.lock().await;
        handles.push(work);
        handles.push(monitor);
    }

    /// Stops both loops. Pending writes are flushed before the device is
    /// disconnected.
    pub async fn stop(&self) {
        let device_id = self.device().id().to_string();
        info!(device_id = %device_id, "Stopping device scheduler");
        self.cancel_token.cancel();

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(device_id = %device_id, error = %e, "Scheduler task ended abnormally");
            }
        }

        self.engine.shutdown().await;
        info!(device_id = %device_id, "Device scheduler stopped");
    }

    pub fn pause(&self) {
        debug!(device_id = %self.device().id(), "Pausing device scheduler");
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        debug!(device_id = %self.device().id(), "Resuming device scheduler");
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.cancel_token.is_cancelled()
    }
}

async fn run_work_loop(
    engine: Arc<ScheduleEngine>,
    paused: Arc<AtomicBool>,
    cancel_token: CancellationToken,
) {
    let settings = engine.settings().clone();

    while !cancel_token.is_cancelled() {
        if paused.load(Ordering::SeqCst) {
            sleep_or_cancel(settings.pause_poll(), &cancel_token).await;
            continue;
        }

        match engine.schedule_next(false).await {
            Ok(_) => tokio::task::yield_now().await,
            Err(wait) => {
                let sleep = wait.0.min(settings.max_idle_wait()).max(MIN_SLEEP);
                sleep_or_cancel(sleep, &cancel_token).await;
            }
        }
    }

    drain_writes(&engine).await;
}

/// Services pending writes until none succeeded for the grace period and
/// the minimum shutdown delay has elapsed. Failed writes do not extend the
/// drain.
async fn drain_writes(engine: &ScheduleEngine) {
    let settings = engine.settings();
    let started = Instant::now();
    let mut last_write = started;
    let mut flushed = 0usize;

    loop {
        let wait = match engine.schedule_next(true).await {
            Ok(schedule) => {
                if schedule.tag.lock().in_error() {
                    Some(MIN_SLEEP)
                } else {
                    flushed += 1;
                    last_write = Instant::now();
                    None
                }
            }
            Err(wait) => Some(wait.0),
        };

        let deadline =
            (last_write + settings.drain_grace()).max(started + settings.min_shutdown_delay());
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        if let Some(wait) = wait {
            tokio::time::sleep(wait.min(deadline - now).max(MIN_SLEEP)).await;
        }
    }

    debug!(
        device_id = %engine.device().id(),
        flushed,
        "Drained pending writes"
    );
}

async fn run_monitor_loop(engine: Arc<ScheduleEngine>, cancel_token: CancellationToken) {
    let interval = engine.settings().monitor_interval();

    while !cancel_token.is_cancelled() {
        if engine.is_restart_needed() {
            engine.restart().await;
        }
        sleep_or_cancel(interval, &cancel_token).await;
    }
}

async fn sleep_or_cancel(duration: Duration, cancel_token: &CancellationToken) {
    tokio::select! {
        _ = cancel_token.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}
