//! The state machine that drives one file through the upload protocol.
use crate::error::{Error, Result};
use crate::job_queue::JobQueue;
use crate::part::Part;
use crate::part_store::PartStore;
use crate::source::FileSource;
use crate::status::{StatusHandle, StatusPublisher, StatusSnapshot};
use crate::transport::{PersistedArtifact, TransportAdapter, TransportError, UploadId};

pub use crate::status::UploadStatus;

use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

struct ControllerState {
    status: UploadStatus,
    upload_id: Option<UploadId>,
    /// The parent of every part's own `child_token()`. Cancelling it (via `pause`/`abort`) trips
    /// every outstanding part's token at once; a part's own token can also be tripped
    /// independently (e.g. a per-part deadline) without affecting its siblings.
    token: CancellationToken,
    /// Set the moment a finalize attempt is dispatched and never cleared inside the settle path,
    /// only reset at the top of `start`. Guarantees exactly one finalize attempt per quiescence
    /// episode even if several part jobs observe completion concurrently.
    finalizing: bool,
    /// Once set, `start` refuses to resume this upload. `abort`'s internal bookkeeping is
    /// otherwise identical to `pause` (parts are requeued to `to_send`, preserving the invariant
    /// that every part lives in exactly one bucket) — this flag is what actually makes an abort
    /// permanent.
    aborted: bool,
    artifact: Option<PersistedArtifact>,
}

struct ControllerShared<T: TransportAdapter> {
    source: FileSource,
    part_size: u64,
    store: PartStore,
    queue: Arc<JobQueue>,
    transport: Arc<T>,
    state: Mutex<ControllerState>,
    publisher: StatusPublisher,
}

/// Drives one file through create / upload-parts / finalize against a [`TransportAdapter`],
/// tracking progress and surviving pause/resume.
///
/// Cloning an `UploadController` is cheap and shares the same underlying state — every clone
/// observes and drives the same upload.
pub struct UploadController<T: TransportAdapter> {
    shared: Arc<ControllerShared<T>>,
}

impl<T: TransportAdapter> Clone for UploadController<T> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T: TransportAdapter + 'static> UploadController<T> {
    /// Start building a controller for `source`, uploaded through `transport` in `part_size`-byte
    /// chunks, scheduled on `queue`.
    pub fn builder(transport: T, source: FileSource, queue: Arc<JobQueue>) -> UploadControllerBuilder<T> {
        UploadControllerBuilder {
            transport,
            source,
            queue,
            part_size: 8 * 1024 * 1024,
        }
    }

    /// A cloneable handle to this upload's status, readable without polling.
    pub fn status(&self) -> StatusHandle {
        self.shared.status_handle()
    }

    /// The most recent status snapshot.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.shared.status_handle().snapshot()
    }

    /// Begin or resume uploading. Creates the upload on the backend on first call; on later
    /// calls, resumes dispatching whatever parts are currently queued (after a `pause` or a
    /// `retry`). A no-op once the upload has reached `Done`.
    ///
    /// A failed `create` call is absorbed into `status == Failed` rather than returned here —
    /// this only returns `Err` for misuse, such as calling `start` on an `abort`ed controller.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        if state.aborted {
            return Err(Error::invariant("cannot start an aborted upload"));
        }
        if state.status == UploadStatus::Done {
            return Ok(());
        }
        state.finalizing = false;
        state.token = CancellationToken::new();
        let token = state.token.clone();

        if state.upload_id.is_none() {
            drop(state);
            self.shared
                .store
                .init(self.shared.source.file_size(), self.shared.part_size)
                .await;
            let created = self
                .shared
                .transport
                .create(&self.shared.source.file_name(), self.shared.source.file_size())
                .await;
            state = self.shared.state.lock().await;
            match created {
                Ok(upload_id) => state.upload_id = Some(upload_id),
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_err, "create failed");
                    state.status = UploadStatus::Failed;
                    drop(state);
                    self.shared.publish_current().await;
                    return Ok(());
                }
            };
        }
        state.status = UploadStatus::Active;
        drop(state);
        #[cfg(feature = "tracing")]
        tracing::debug!("upload active");
        self.shared.publish_current().await;

        while let Some(part) = self.shared.store.next_part().await {
            #[cfg(feature = "tracing")]
            tracing::debug!(part = part.index(), "part enqueued");
            let shared = Arc::clone(&self.shared);
            let part_token = token.child_token();
            self.shared.queue.enqueue(run_part(shared, part, part_token));
        }
        Ok(())
    }

    /// Stop dispatching new work and cancel every part currently in flight. Parts in flight are
    /// requeued, not discarded, so a later `start` resumes them. Idempotent.
    pub async fn pause(&self) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        if state.aborted {
            return Err(Error::invariant("cannot pause an aborted upload"));
        }
        if state.status == UploadStatus::Done {
            return Ok(());
        }
        state.token.cancel();
        state.status = UploadStatus::Paused;
        drop(state);
        #[cfg(feature = "tracing")]
        tracing::debug!("upload paused");
        self.shared.store.pause().await;
        self.shared.publish_current().await;
        Ok(())
    }

    /// Recover a `Failed` upload. If any part never passed, moves every failed part back onto
    /// the send queue and resumes dispatching exactly as `start` would; otherwise every part
    /// already passed and only the trailing `finalize` call needs to be retried.
    pub async fn retry(&self) -> Result<()> {
        let state = self.shared.state.lock().await;
        if state.aborted {
            return Err(Error::invariant("cannot retry an aborted upload"));
        }
        if state.status == UploadStatus::Done {
            return Ok(());
        }
        drop(state);

        let done_bytes = self.shared.store.done_bytes().await;
        let file_size = self.shared.store.file_size().await;
        if done_bytes < file_size {
            self.shared.store.retry().await;
            return self.start().await;
        }

        {
            let mut state = self.shared.state.lock().await;
            state.status = UploadStatus::Active;
            state.finalizing = false;
        }
        self.shared.publish_current().await;
        check_completion(Arc::clone(&self.shared)).await;
        Ok(())
    }

    /// Permanently stop this upload: cancel in-flight parts and ask the backend to discard
    /// whatever it has received. After this call, `start` always fails — a controller that has
    /// been aborted has no resume path, unlike one that was merely `pause`d.
    ///
    /// The `cancel` call is entirely fire-and-forget: its outcome never changes the controller's
    /// status (which lands on `Paused` regardless) and is never surfaced to the caller, even as
    /// an error — only logged.
    pub async fn abort(&self) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        if state.status == UploadStatus::Done {
            return Ok(());
        }
        state.token.cancel();
        state.aborted = true;
        state.status = UploadStatus::Paused;
        let upload_id = state.upload_id.clone();
        drop(state);
        self.shared.store.pause().await;
        self.shared.publish_current().await;

        if let Some(upload_id) = upload_id {
            if let Err(_err) = self.shared.transport.cancel(&upload_id).await {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_err, "cancel failed");
            }
        }
        Ok(())
    }
}

impl<T: TransportAdapter> ControllerShared<T> {
    fn status_handle(&self) -> StatusHandle {
        // The publisher only ever hands out the receiver half through the constructor, so the
        // controller re-derives a handle by subscribing to its own sender.
        self.publisher.subscribe()
    }

    /// Publish a snapshot reflecting the current persisted state plus fresh progress. Always
    /// reads `status`/`artifact` from `state` rather than taking them as arguments, so a caller
    /// can never publish a status snapshot that's stale by the time the lock is released.
    async fn publish_current(&self) {
        let (status, artifact) = {
            let state = self.state.lock().await;
            (state.status, state.artifact.clone())
        };
        let done_bytes = self.store.done_bytes().await;
        let file_size = self.source.file_size().max(1);
        let progress = ((done_bytes.min(file_size) * 100) / file_size) as u8;
        self.publisher.publish(StatusSnapshot { progress, status, artifact });
    }
}

/// Upload a single part, then react to the outcome and check whether the upload as a whole has
/// completed or stalled.
async fn run_part<T: TransportAdapter + 'static>(shared: Arc<ControllerShared<T>>, part: Part, token: CancellationToken) {
    let upload_id = {
        let state = shared.state.lock().await;
        state.upload_id.clone()
    };
    let Some(upload_id) = upload_id else {
        return;
    };

    if token.is_cancelled() {
        return;
    }

    match shared.transport.upload_part(part, &upload_id, token).await {
        Ok(outcome) if outcome.ok => {
            #[cfg(feature = "tracing")]
            tracing::debug!(part = part.index(), "part passed");
            shared.store.pass_part(part).await;
        }
        Ok(_) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(part = part.index(), "part rejected");
            shared.store.fail_part(part).await;
        }
        // A part cancelled mid-flight was already requeued by `pause` or discarded by `abort`;
        // touching the store or publishing a snapshot here would race those calls for nothing.
        Err(TransportError::Aborted) => return,
        Err(TransportError::NetworkFailure(msg)) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(part = part.index(), error = %msg, "part upload failed");
            shared.store.fail_part(part).await;
        }
    }

    shared.publish_current().await;
    check_completion(shared).await;
}

/// Decide what a settled part means for the upload as a whole: every byte accounted for means
/// it's time to finalize; nothing left to dispatch and at least one part sitting unretried in
/// `failed` means the upload has genuinely stalled and needs a caller-driven `retry`. Anything
/// else (including the transient gap where `on_duty` empties between two `next_part` calls while
/// `start`'s drain loop is still queueing the rest of `to_send`) is left alone — it isn't done
/// settling yet.
async fn check_completion<T: TransportAdapter + 'static>(shared: Arc<ControllerShared<T>>) {
    if shared.store.is_complete().await {
        try_finalize(shared).await;
        return;
    }
    if !shared.store.is_stalled().await {
        return;
    }
    let mut state = shared.state.lock().await;
    if !state.aborted && state.status == UploadStatus::Active {
        state.status = UploadStatus::Failed;
        #[cfg(feature = "tracing")]
        tracing::warn!("upload stalled: nothing left to dispatch with unretried parts");
    }
    drop(state);
    shared.publish_current().await;
}

/// Attempt exactly one finalize call. Called once the store is known to be complete, whether
/// that was just discovered by a settling part job or by a caller-driven `retry` on an upload
/// whose every part already passed but whose previous finalize attempt failed.
async fn try_finalize<T: TransportAdapter + 'static>(shared: Arc<ControllerShared<T>>) {
    if !shared.store.is_complete().await {
        return;
    }

    let (upload_id, should_finalize) = {
        let mut state = shared.state.lock().await;
        if state.aborted || state.finalizing || state.status != UploadStatus::Active {
            (None, false)
        } else {
            state.finalizing = true;
            (state.upload_id.clone(), true)
        }
    };
    if !should_finalize {
        return;
    }
    let upload_id = upload_id.expect("finalize reached only after create assigns an upload id");

    #[cfg(feature = "tracing")]
    tracing::debug!("finalize attempted");
    match shared.transport.finalize(&shared.source.file_name(), &upload_id).await {
        Ok(artifact) => {
            let mut state = shared.state.lock().await;
            state.status = UploadStatus::Done;
            state.artifact = Some(artifact);
            drop(state);
            #[cfg(feature = "tracing")]
            tracing::debug!("upload done");
            shared.publish_current().await;
        }
        Err(err) => {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "finalize failed");
            let mut state = shared.state.lock().await;
            state.status = UploadStatus::Failed;
            drop(state);
            shared.publish_current().await;
        }
    }
}

/// Builds an [`UploadController`], defaulting the part size to 8 MiB.
pub struct UploadControllerBuilder<T: TransportAdapter> {
    transport: T,
    source: FileSource,
    queue: Arc<JobQueue>,
    part_size: u64,
}

impl<T: TransportAdapter + 'static> UploadControllerBuilder<T> {
    /// Override the default 8 MiB part size.
    pub fn part_size(mut self, bytes: u64) -> Self {
        self.part_size = bytes;
        self
    }

    /// Build the controller. The upload is idle until [`UploadController::start`] is called.
    pub fn build(self) -> UploadController<T> {
        let (publisher, _handle) = StatusPublisher::new();
        UploadController {
            shared: Arc::new(ControllerShared {
                source: self.source,
                part_size: self.part_size,
                store: PartStore::new(),
                queue: self.queue,
                transport: Arc::new(self.transport),
                state: Mutex::new(ControllerState {
                    status: UploadStatus::Idle,
                    upload_id: None,
                    token: CancellationToken::new(),
                    finalizing: false,
                    aborted: false,
                    artifact: None,
                }),
                publisher,
            }),
        }
    }
}

/// Convenience constructor for a single-controller job queue at the given concurrency.
pub fn single_controller_queue(concurrency: NonZeroUsize) -> Arc<JobQueue> {
    JobQueue::new(concurrency)
}
