//! The observable status an [`UploadController`](crate::controller::UploadController) exposes to
//! callers who want to watch progress without polling.
use crate::transport::PersistedArtifact;

use tokio::sync::watch;

/// The upload's coarse lifecycle state. `Done` is terminal; every other state can still
/// transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    /// Created but never started.
    Idle,
    /// At least one part job is in flight or queued.
    Active,
    /// `pause` was called and every on-duty part has settled or been requeued.
    Paused,
    /// `create` or `finalize` failed, or every part settled with some still unretried.
    Failed,
    /// `finalize` succeeded.
    Done,
}

/// A point-in-time view of an upload: its lifecycle state, its progress, and — once `Done` — the
/// artifact the backend persisted.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    /// Percentage of file bytes uploaded so far, `0..=100`.
    pub progress: u8,
    /// The current lifecycle state.
    pub status: UploadStatus,
    /// The backend's record of the finished upload, present once `status` is `Done`.
    pub artifact: Option<PersistedArtifact>,
}

impl StatusSnapshot {
    pub(crate) fn idle() -> Self {
        Self {
            progress: 0,
            status: UploadStatus::Idle,
            artifact: None,
        }
    }
}

/// Publishing half of the status channel. Held by the controller; never exposed to callers.
#[derive(Debug)]
pub(crate) struct StatusPublisher {
    tx: watch::Sender<StatusSnapshot>,
}

impl StatusPublisher {
    pub(crate) fn new() -> (Self, StatusHandle) {
        let (tx, rx) = watch::channel(StatusSnapshot::idle());
        (Self { tx }, StatusHandle { rx })
    }

    pub(crate) fn publish(&self, snapshot: StatusSnapshot) {
        // A closed receiver (caller dropped every handle) just means nobody's watching; the
        // controller keeps running regardless.
        let _ = self.tx.send(snapshot);
    }

    /// A fresh handle observing this publisher, independent of the one returned by `new`.
    pub(crate) fn subscribe(&self) -> StatusHandle {
        StatusHandle { rx: self.tx.subscribe() }
    }
}

/// A cheaply-cloneable handle callers use to read or await status changes.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    rx: watch::Receiver<StatusSnapshot>,
}

impl StatusHandle {
    /// The most recent snapshot, without waiting for a new one.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.rx.borrow().clone()
    }

    /// Wait for the next snapshot to be published, then return it.
    pub async fn changed(&mut self) -> StatusSnapshot {
        // A publisher is only ever dropped along with the controller itself, at which point
        // there is nothing further to observe; returning the last known snapshot is the only
        // sensible behavior for a caller still holding a handle.
        if self.rx.changed().await.is_err() {
            return self.snapshot();
        }
        self.snapshot()
    }
}
