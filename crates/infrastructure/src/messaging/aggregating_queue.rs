use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use domain::error::{DomainError, Result};
use domain::event::Coalesce;

/// FIFO that merges adjacent items on the way out.
///
/// `push` always appends. A pop takes the head and keeps merging it with
/// the following items for as long as they accept, so items are never
/// reordered across a non-mergeable boundary.
pub struct AggregatingQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Notify,
    soft_capacity: Option<NonZeroUsize>,
}

impl<T: Coalesce> Default for AggregatingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Coalesce> AggregatingQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            soft_capacity: None,
        }
    }

    /// Logs a warning whenever the backlog grows past `capacity`.
    /// Nothing is dropped. A capacity of 0 disables the warning.
    pub fn with_soft_capacity(capacity: usize) -> Self {
        Self {
            soft_capacity: NonZeroUsize::new(capacity),
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) {
        let len = {
            let mut items = self.lock();
            items.push_back(item);
            items.len()
        };

        if let Some(capacity) = self.soft_capacity.map(NonZeroUsize::get) {
            if len == capacity + 1 || (len > capacity && len % capacity == 0) {
                warn!(len, capacity, "Aggregating queue backlog above capacity");
            }
        }
        self.available.notify_one();
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<T> {
        let mut items = self.lock();
        let mut head = items.pop_front()?;
        while items.front().is_some_and(|next| head.can_merge(next)) {
            if let Some(next) = items.pop_front() {
                head = head.merge(next);
            }
        }
        Some(head)
    }

    /// Waits for an item. Returns `DomainError::Cancelled` once `cancel` fires.
    pub async fn pop(&self, cancel: &CancellationToken) -> Result<T> {
        loop {
            if cancel.is_cancelled() {
                return Err(DomainError::Cancelled);
            }
            if let Some(item) = self.try_pop() {
                return Ok(item);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(DomainError::Cancelled),
                _ = self.available.notified() => {}
            }
        }
    }

    /// Everything currently queued, merged.
    pub fn drain(&self) -> Vec<T> {
        let mut drained = Vec::new();
        while let Some(item) = self.try_pop() {
            drained.push(item);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
