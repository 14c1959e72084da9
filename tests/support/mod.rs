//! An in-memory [`TransportAdapter`] for driving the controller through deterministic scenarios,
//! with per-call failure injection.
#![allow(dead_code)]
use resumable_multipart_upload::transport::{
    CancelOutcome, PartOutcome, PersistedArtifact, TransportAdapter, TransportError, UploadId,
};
use resumable_multipart_upload::Part;

use chrono::Utc;
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Inner {
    create_fails_remaining: usize,
    finalize_fails_remaining: usize,
    not_ok_parts: HashSet<u32>,
    error_parts: HashSet<u32>,
    received: HashMap<u32, u64>,
    create_calls: usize,
    finalize_calls: usize,
    cancel_calls: usize,
    cancelled_upload_ids: Vec<UploadId>,
    next_upload_id: u64,
    part_delay: Duration,
}

/// A `HashMap`-backed stand-in for a real backend: `upload_part` records byte counts instead of
/// making a network call, and every failure mode is injectable. Every handle returned by
/// [`MockTransport::new`] (and every clone of it) shares the same state, so a test can pass one
/// clone into the controller and keep another for assertions.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` `create` calls fail with a network error.
    pub fn fail_create_times(&self, n: usize) {
        self.inner.lock().unwrap().create_fails_remaining = n;
    }

    /// Make the next `n` `finalize` calls fail with a network error.
    pub fn fail_finalize_times(&self, n: usize) {
        self.inner.lock().unwrap().finalize_fails_remaining = n;
    }

    /// Every future `upload_part` call for this index returns `{ ok: false }` until cleared.
    pub fn mark_part_not_ok(&self, index: u32) {
        self.inner.lock().unwrap().not_ok_parts.insert(index);
    }

    /// Every future `upload_part` call for this index fails with a network error until cleared.
    pub fn mark_part_errors(&self, index: u32) {
        self.inner.lock().unwrap().error_parts.insert(index);
    }

    /// Stop injecting any failure for `index`, so the next attempt succeeds.
    pub fn clear_part_failure(&self, index: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.not_ok_parts.remove(&index);
        inner.error_parts.remove(&index);
    }

    /// Make every future `upload_part` call take at least `delay` before responding, wide enough
    /// for a test to call `pause` or `abort` while it's in flight.
    pub fn set_part_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().part_delay = delay;
    }

    pub fn create_call_count(&self) -> usize {
        self.inner.lock().unwrap().create_calls
    }

    pub fn finalize_call_count(&self) -> usize {
        self.inner.lock().unwrap().finalize_calls
    }

    pub fn cancel_call_count(&self) -> usize {
        self.inner.lock().unwrap().cancel_calls
    }

    /// Total bytes recorded across every part accepted so far.
    pub fn received_bytes(&self) -> u64 {
        self.inner.lock().unwrap().received.values().sum()
    }

    pub fn received_part_count(&self) -> usize {
        self.inner.lock().unwrap().received.len()
    }
}

impl TransportAdapter for MockTransport {
    fn create<'a>(&'a self, _file_name: &'a str, _file_size: u64) -> BoxFuture<'a, Result<UploadId, TransportError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.create_calls += 1;
            if inner.create_fails_remaining > 0 {
                inner.create_fails_remaining -= 1;
                return Err(TransportError::NetworkFailure("mock create failure".into()));
            }
            inner.next_upload_id += 1;
            Ok(format!("mock-upload-{}", inner.next_upload_id))
        })
    }

    fn upload_part<'a>(
        &'a self,
        part: Part,
        _upload_id: &'a UploadId,
        token: CancellationToken,
    ) -> BoxFuture<'a, Result<PartOutcome, TransportError>> {
        Box::pin(async move {
            let delay = self.inner.lock().unwrap().part_delay;
            if !delay.is_zero() {
                tokio::select! {
                    _ = token.cancelled() => return Err(TransportError::Aborted),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if token.is_cancelled() {
                return Err(TransportError::Aborted);
            }
            let mut inner = self.inner.lock().unwrap();
            if inner.error_parts.contains(&part.index()) {
                return Err(TransportError::NetworkFailure(format!("mock failure on part {}", part.index())));
            }
            if inner.not_ok_parts.contains(&part.index()) {
                return Ok(PartOutcome { ok: false });
            }
            inner.received.insert(part.index(), part.len());
            Ok(PartOutcome { ok: true })
        })
    }

    fn finalize<'a>(
        &'a self,
        file_name: &'a str,
        _upload_id: &'a UploadId,
    ) -> BoxFuture<'a, Result<PersistedArtifact, TransportError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.finalize_calls += 1;
            if inner.finalize_fails_remaining > 0 {
                inner.finalize_fails_remaining -= 1;
                return Err(TransportError::NetworkFailure("mock finalize failure".into()));
            }
            let now = Utc::now();
            Ok(PersistedArtifact {
                uid: format!("artifact-{}", inner.finalize_calls),
                file_name: file_name.to_owned(),
                mime_type: "application/octet-stream".into(),
                created_at: now,
                valid_thru: now,
            })
        })
    }

    fn cancel<'a>(&'a self, upload_id: &'a UploadId) -> BoxFuture<'a, Result<CancelOutcome, TransportError>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.cancel_calls += 1;
            inner.cancelled_upload_ids.push(upload_id.clone());
            Ok(CancelOutcome { ok: true })
        })
    }
}
