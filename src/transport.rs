//! The contract boundary to the four backend endpoints, and a concrete HTTP implementation of
//! it.
//!
//! [`TransportAdapter`] is the seam the engine calls through; [`HttpTransport`] speaks the wire
//! protocol described in the crate's design document (multipart-form `create`/`upload_part`,
//! form-encoded `finalize`, query-string `cancel`). A second implementation, a fully in-memory
//! mock, lives under `#[cfg(test)]` in `tests/support` and is used by the end-to-end scenarios.
use crate::part::Part;
use crate::source::FileSource;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use reqwest::multipart::{Form, Part as MultipartPart};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// The opaque handle returned by `create`, required by `upload_part`, `finalize`, and `cancel`.
pub type UploadId = String;

/// The two failure kinds a [`TransportAdapter`] call may raise. Every other outcome — including
/// a per-part "not ok" response — is a normal `Ok` value, since it is the engine, not the
/// transport, that decides whether a non-ok part is retryable.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The call's cancellation token was tripped before or during the request.
    #[error("request aborted")]
    Aborted,
    /// Anything else: connection failure, timeout, or a non-2xx response where the call has no
    /// partial-success shape of its own (`create`, `finalize`).
    #[error("transport failure: {0}")]
    NetworkFailure(String),
}

/// Result of one `upload_part` call.
#[derive(Debug, Clone, Copy)]
pub struct PartOutcome {
    /// Whether the backend accepted this part.
    pub ok: bool,
}

/// Result of one `cancel` call. The controller treats this as fire-and-forget — its value never
/// changes controller state — but it's still reported for logging.
#[derive(Debug, Clone, Copy)]
pub struct CancelOutcome {
    /// Whether the backend accepted the cancellation.
    pub ok: bool,
}

/// The server-side descriptor returned by `finalize`. Opaque to the scheduling/controller logic;
/// only the caller interprets its fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedArtifact {
    /// Backend-assigned identifier for the finished artifact.
    pub uid: String,
    /// The file name it was uploaded under.
    #[serde(rename = "fileName")]
    pub file_name: String,
    /// The content type the backend recorded for it.
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// When the artifact was persisted.
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// When the artifact expires, if the backend enforces retention.
    #[serde(rename = "validThru")]
    pub valid_thru: DateTime<Utc>,
}

/// The four-call multipart protocol the engine drives a file through.
///
/// Implementations must be `Send + Sync` and cheaply cloneable-by-reference (the engine holds
/// one instance behind an `Arc` and calls it from many concurrently-running part jobs).
pub trait TransportAdapter: Send + Sync {
    /// Create a new upload for `file_name`/`file_size`, returning the id required by every other
    /// call. Implementations may reject files below a minimum size.
    fn create<'a>(&'a self, file_name: &'a str, file_size: u64) -> BoxFuture<'a, Result<UploadId, TransportError>>;

    /// Upload one part's bytes. `token` is tripped exactly when the owning controller pauses or
    /// aborts the part's upload.
    fn upload_part<'a>(
        &'a self,
        part: Part,
        upload_id: &'a UploadId,
        token: CancellationToken,
    ) -> BoxFuture<'a, Result<PartOutcome, TransportError>>;

    /// Complete the upload, returning the persisted artifact.
    fn finalize<'a>(
        &'a self,
        file_name: &'a str,
        upload_id: &'a UploadId,
    ) -> BoxFuture<'a, Result<PersistedArtifact, TransportError>>;

    /// Cancel an in-progress upload. Fire-and-forget from the controller's perspective.
    fn cancel<'a>(&'a self, upload_id: &'a UploadId) -> BoxFuture<'a, Result<CancelOutcome, TransportError>>;
}

/// Base URL and tuning knobs for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Scheme and host the four endpoints are rooted at, e.g. `https://uploads.example.com`.
    pub base_url: String,
    /// Files smaller than this are rejected by `create`. The spec leaves this as an
    /// implementation choice; 4096 bytes matches the reference deployment.
    pub min_file_size: u64,
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            min_file_size: 4096,
        }
    }

    /// Read `UPLOAD_API_BASE_URL` from the environment, falling back to a local placeholder.
    /// The core engine itself never reads environment variables (per the design document); this
    /// is a convenience for embedders who prefer environment-driven wiring of the transport.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("UPLOAD_API_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_owned());
        Self::new(base_url)
    }

    pub fn min_file_size(mut self, bytes: u64) -> Self {
        self.min_file_size = bytes;
        self
    }
}

/// The reqwest-backed implementation of [`TransportAdapter`], speaking the wire protocol:
///
/// | call | method & path |
/// |---|---|
/// | create | `POST {base}/blob/upload` |
/// | upload_part | `PATCH {base}/blob/upload/{index}` |
/// | finalize | `PUT {base}/blob/upload` |
/// | cancel | `DELETE {base}/blob/upload?upload_id=...` |
///
/// Credentials (cookies, auth headers) are the embedder's responsibility: pass a
/// [`reqwest::Client`] preconfigured however the deployment requires.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: reqwest::Url,
    min_file_size: u64,
    source: FileSource,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, config: TransportConfig, source: FileSource) -> Result<Self, crate::error::Error> {
        let base_url = reqwest::Url::parse(&config.base_url)
            .map_err(|err| crate::error::Error::config(format!("invalid base_url {:?}: {err}", config.base_url)))?;
        Ok(Self {
            client,
            base_url,
            min_file_size: config.min_file_size,
            source,
        })
    }

    fn blob_url(&self) -> reqwest::Url {
        self.base_url
            .join("/blob/upload")
            .expect("static path always parses")
    }

    fn network_failure(err: impl std::fmt::Display) -> TransportError {
        TransportError::NetworkFailure(err.to_string())
    }
}

impl TransportAdapter for HttpTransport {
    fn create<'a>(&'a self, file_name: &'a str, file_size: u64) -> BoxFuture<'a, Result<UploadId, TransportError>> {
        Box::pin(async move {
            if file_size < self.min_file_size {
                return Err(TransportError::NetworkFailure(format!(
                    "file too small: {file_size} bytes, minimum is {}",
                    self.min_file_size
                )));
            }
            let bytes = self.source.read_all().await.map_err(Self::network_failure)?;
            let form = Form::new().part("file", MultipartPart::bytes(bytes.to_vec()).file_name(file_name.to_owned()));

            let resp = self
                .client
                .post(self.blob_url())
                .multipart(form)
                .send()
                .await
                .map_err(Self::network_failure)?;

            if !resp.status().is_success() {
                return Err(Self::network_failure(format!("create failed: {}", resp.status())));
            }
            resp.text().await.map_err(Self::network_failure)
        })
    }

    fn upload_part<'a>(
        &'a self,
        part: Part,
        upload_id: &'a UploadId,
        token: CancellationToken,
    ) -> BoxFuture<'a, Result<PartOutcome, TransportError>> {
        Box::pin(async move {
            let bytes = self
                .source
                .read_range(part.range())
                .await
                .map_err(Self::network_failure)?;
            let form = Form::new()
                .part("file", MultipartPart::bytes(bytes.to_vec()))
                .text("upload_id", upload_id.clone());

            let url = self
                .blob_url()
                .join(&format!("/blob/upload/{}", part.index()))
                .expect("index formats to a valid path segment");

            let request = self.client.patch(url).multipart(form).send();
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(TransportError::Aborted),
                res = request => {
                    let resp = res.map_err(Self::network_failure)?;
                    Ok(PartOutcome { ok: resp.status().is_success() })
                }
            }
        })
    }

    fn finalize<'a>(
        &'a self,
        file_name: &'a str,
        upload_id: &'a UploadId,
    ) -> BoxFuture<'a, Result<PersistedArtifact, TransportError>> {
        Box::pin(async move {
            let form = [("file_name", file_name), ("upload_id", upload_id.as_str())];
            let resp = self
                .client
                .put(self.blob_url())
                .form(&form)
                .send()
                .await
                .map_err(Self::network_failure)?;

            if !resp.status().is_success() {
                return Err(Self::network_failure(format!("finalize failed: {}", resp.status())));
            }
            resp.json().await.map_err(Self::network_failure)
        })
    }

    fn cancel<'a>(&'a self, upload_id: &'a UploadId) -> BoxFuture<'a, Result<CancelOutcome, TransportError>> {
        Box::pin(async move {
            let mut url = self.blob_url();
            url.query_pairs_mut().append_pair("upload_id", upload_id);
            let resp = self
                .client
                .delete(url)
                .send()
                .await
                .map_err(Self::network_failure)?;
            Ok(CancelOutcome { ok: resp.status().is_success() })
        })
    }
}
