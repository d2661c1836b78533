use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use super::record::DecisionRecord;
use super::sink::AuditSink;

const RETRY_BACKOFF: Duration = Duration::from_millis(200);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Bounded, non-blocking buffer between the relay and an audit sink.
pub struct AuditPipeline {
    queue: Mutex<VecDeque<DecisionRecord>>,
    capacity: usize,
    recent: Mutex<VecDeque<DecisionRecord>>,
    recent_capacity: usize,
    notify: Notify,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl AuditPipeline {
    pub fn new(capacity: usize, recent_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
            recent: Mutex::new(VecDeque::with_capacity(recent_capacity)),
            recent_capacity,
            notify: Notify::new(),
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Accept a record. Never waits: when the buffer is full the oldest
    /// queued record is dropped and counted.
    pub fn emit(&self, record: DecisionRecord) {
        self.remember(&record);

        // Poisoned mutex means logic bug; count the record as lost instead
        // of taking the relay down.
        let Ok(mut q) = self.queue.lock() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        q.push_back(record);
        let overflow = q.len().saturating_sub(self.capacity);
        for _ in 0..overflow {
            q.pop_front();
        }
        drop(q);

        if overflow > 0 {
            self.dropped.fetch_add(overflow as u64, Ordering::Relaxed);
        }
        self.notify.notify_one();
    }

    /// Records lost to overflow since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Records delivered to the sink since startup.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Records waiting for the sink.
    pub fn pending(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<DecisionRecord> {
        self.recent
            .lock()
            .map(|r| r.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    fn remember(&self, record: &DecisionRecord) {
        if self.recent_capacity == 0 {
            return;
        }
        if let Ok(mut r) = self.recent.lock() {
            if r.len() >= self.recent_capacity {
                r.pop_front();
            }
            r.push_back(record.clone());
        }
    }

    fn pop(&self) -> Option<DecisionRecord> {
        self.queue.lock().ok().and_then(|mut q| q.pop_front())
    }

    /// Put a record the sink refused back at the head of the queue.
    fn requeue(&self, record: DecisionRecord) {
        let Ok(mut q) = self.queue.lock() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        q.push_front(record);
        if q.len() > self.capacity {
            q.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Spawn the task that drains the pipeline into `sink` until shutdown.
    pub fn spawn_drain(
        self: &Arc<Self>,
        sink: Arc<dyn AuditSink>,
        shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.drain(sink, shutdown).await })
    }

    async fn drain(&self, sink: Arc<dyn AuditSink>, mut shutdown: broadcast::Receiver<()>) {
        let mut failing = false;
        loop {
            let Some(record) = self.pop() else {
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = shutdown.recv() => break,
                }
                continue;
            };

            // A stalled sink must not hold shutdown hostage.
            let delivered = tokio::select! {
                r = sink.emit(&record) => r,
                _ = shutdown.recv() => {
                    self.requeue(record);
                    break;
                }
            };

            match delivered {
                Ok(()) => {
                    self.emitted.fetch_add(1, Ordering::Relaxed);
                    if failing {
                        tracing::info!(pending = self.pending(), "audit sink recovered");
                        failing = false;
                    }
                }
                Err(e) => {
                    if !failing {
                        tracing::warn!(error = %e, "audit sink unavailable; buffering");
                        failing = true;
                    }
                    self.requeue(record);
                    tokio::select! {
                        _ = tokio::time::sleep(RETRY_BACKOFF) => {}
                        _ = shutdown.recv() => break,
                    }
                }
            }
        }

        self.flush(sink.as_ref()).await;
    }

    /// Best-effort delivery of whatever is left at shutdown.
    async fn flush(&self, sink: &dyn AuditSink) {
        let mut lost = 0u64;
        while let Some(record) = self.pop() {
            match tokio::time::timeout(FLUSH_TIMEOUT, sink.emit(&record)).await {
                Ok(Ok(())) => {
                    self.emitted.fetch_add(1, Ordering::Relaxed);
                }
                _ => {
                    lost += 1 + self.queue.lock().map(|mut q| q.drain(..).count()).unwrap_or(0) as u64;
                    break;
                }
            }
        }
        if lost > 0 {
            self.dropped.fetch_add(lost, Ordering::Relaxed);
            tracing::warn!(lost, "audit records lost at shutdown");
        }
    }
}
