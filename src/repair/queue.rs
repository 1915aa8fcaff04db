use dashmap::DashSet;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

use crate::error::{DebridDavError, DebridDavResult};

/// Bounded FIFO of torrent ids awaiting repair.
///
/// An id stays in `pending` from push until [`RepairQueue::finish`], so a
/// torrent being repaired cannot be queued a second time.
pub struct RepairQueue {
    tx: mpsc::Sender<String>,
    rx: Mutex<mpsc::Receiver<String>>,
    pending: DashSet<String>,
    capacity: usize,
}

impl RepairQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            pending: DashSet::new(),
            capacity,
        }
    }

    /// Queue `torrent_id`. Returns false if it is already pending.
    pub fn push(&self, torrent_id: &str) -> DebridDavResult<bool> {
        if !self.pending.insert(torrent_id.to_string()) {
            trace!(torrent_id = torrent_id, "Already queued for repair");
            return Ok(false);
        }
        match self.tx.try_send(torrent_id.to_string()) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.pending.remove(torrent_id);
                Err(DebridDavError::QueueFull(format!(
                    "repair queue holds {} entries",
                    self.capacity
                )))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.pending.remove(torrent_id);
                Err(DebridDavError::IoError("repair queue closed".to_string()))
            }
        }
    }

    /// Wait for the next id. Workers share one receiver.
    pub async fn pop(&self) -> Option<String> {
        self.rx.lock().await.recv().await
    }

    /// Mark a popped id as done so it can be queued again.
    pub fn finish(&self, torrent_id: &str) {
        self.pending.remove(torrent_id);
    }

    pub fn is_pending(&self, torrent_id: &str) -> bool {
        self.pending.contains(torrent_id)
    }

    /// Ids queued or being repaired.
    pub fn pending(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pending.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
