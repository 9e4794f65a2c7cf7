//! Pending-launch queue between the control loops and the offer engine.
//!
//! Producers never block. Each entry is handed to exactly one consumer.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{mpsc, Mutex};

use crate::task::TaskRecord;

/// Unbounded FIFO of records waiting for an offer.
pub struct LaunchQueue {
    tx: mpsc::UnboundedSender<TaskRecord>,
    rx: Mutex<mpsc::UnboundedReceiver<TaskRecord>>,
    len: AtomicUsize,
}

impl LaunchQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            len: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, record: TaskRecord) {
        // Counted before it becomes visible, so a racing pop never
        // decrements below zero.
        self.len.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(record).is_err() {
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Take the oldest entry without waiting.
    pub async fn try_pop(&self) -> Option<TaskRecord> {
        let record = self.rx.lock().await.try_recv().ok()?;
        self.len.fetch_sub(1, Ordering::SeqCst);
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LaunchQueue {
    fn default() -> Self {
        Self::new()
    }
}
