//! Per-class forwarding lanes
//!
//! Every class label gets one FIFO lane served by a single task, so captures
//! of a class are delivered in the order they were dispatched while classes
//! never wait on each other. Lanes are created on first use and live as long
//! as the dispatcher.

use crate::forwarder::{CaptureJob, CaptureSink, Forwarder};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Running totals of forwarding outcomes
#[derive(Debug, Default)]
pub struct DispatchStats {
    dispatched: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSnapshot {
    pub dispatched: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Fire-and-forget capture dispatcher
pub struct CaptureDispatcher {
    forwarder: Forwarder,
    lanes: DashMap<String, mpsc::UnboundedSender<CaptureJob>>,
    stats: Arc<DispatchStats>,
}

impl CaptureDispatcher {
    pub fn new(sink: Arc<dyn CaptureSink>) -> Self {
        Self {
            forwarder: Forwarder::new(sink),
            lanes: DashMap::new(),
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Queue a capture on its class lane. Never blocks and never fails;
    /// delivery problems are only logged.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, job: CaptureJob) {
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);

        let lane = self
            .lanes
            .entry(job.class_name.clone())
            .or_insert_with(|| self.spawn_lane(&job.class_name));

        if let Err(mpsc::error::SendError(job)) = lane.send(job) {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!("Capture lane for {} is closed, dropping capture", job.class_name);
        }
    }

    pub fn stats(&self) -> DispatchSnapshot {
        self.stats.snapshot()
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    fn spawn_lane(&self, class_name: &str) -> mpsc::UnboundedSender<CaptureJob> {
        let (tx, mut rx) = mpsc::unbounded_channel::<CaptureJob>();
        let forwarder = self.forwarder.clone();
        let stats = self.stats.clone();
        let class_name = class_name.to_string();

        debug!("Opening capture lane for {}", class_name);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match forwarder.forward(&job).await {
                    Ok(ack) => {
                        stats.delivered.fetch_add(1, Ordering::Relaxed);
                        info!("Capture of {} saved ({}): {}", job.class_name, ack.status, ack.body);
                    }
                    Err(e) => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        warn!("Failed to forward capture of {}: {}", job.class_name, e);
                    }
                }
            }
            debug!("Capture lane for {} closed", class_name);
        });

        tx
    }
}
