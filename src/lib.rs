#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

//! # Description
//!
//! A resumable, bounded-concurrency multipart upload engine.
//!
//! A file is split into fixed-size parts, each uploaded independently through a
//! [`TransportAdapter`], with concurrently-running part uploads bounded by a shared
//! [`JobQueue`]. The upload can be paused (in-flight parts are requeued, not lost), resumed,
//! retried after a failure, or aborted outright. Progress and lifecycle state are observable
//! through a [`StatusHandle`] without polling.
//!
//! # Examples
//!
//! ```no_run
//! # async fn f() -> resumable_multipart_upload::error::Result<()> {
//! use resumable_multipart_upload::{FileSource, HttpTransport, TransportConfig, UploadController};
//! use std::num::NonZeroUsize;
//!
//! let source = FileSource::open("report.csv").await?;
//! let transport = HttpTransport::new(
//!     reqwest::Client::new(),
//!     TransportConfig::from_env(),
//!     source.clone(),
//! )?;
//! let queue = resumable_multipart_upload::controller::single_controller_queue(
//!     NonZeroUsize::new(4).unwrap(),
//! );
//!
//! let upload = UploadController::builder(transport, source, queue)
//!     .part_size(8 * 1024 * 1024)
//!     .build();
//!
//! upload.start().await?;
//! # Ok(())
//! # }
//! ```
pub mod controller;
pub mod error;
mod job_queue;
mod part;
mod part_store;
mod source;
pub mod status;
pub mod transport;

pub use controller::{UploadController, UploadControllerBuilder};
pub use error::{Error, ErrorKind, Result};
pub use job_queue::JobQueue;
pub use part::Part;
pub use source::FileSource;
pub use status::{StatusHandle, StatusSnapshot, UploadStatus};
pub use transport::{HttpTransport, PersistedArtifact, TransportAdapter, TransportConfig, TransportError};
