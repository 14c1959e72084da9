//! Read access to the local file being uploaded.
use crate::error::{Error, Result};

use bytes::Bytes;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// A local file opened for reading, sized up front so the part scheduler can enumerate byte
/// ranges without touching the filesystem again until a part is actually read.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: Arc<PathBuf>,
    file_size: u64,
}

impl FileSource {
    /// Stat `path` and capture its size. Does not keep the file open between reads: each
    /// [`FileSource::read_range`] call opens, seeks, and reads independently, which keeps the
    /// type `Clone` and safe to share between concurrently-running part jobs.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|err| Error::config(format!("cannot stat {}: {err}", path.display())))?;
        Ok(Self {
            path: Arc::new(path.to_path_buf()),
            file_size: metadata.len(),
        })
    }

    /// Size of the file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// File name as it should be reported to the backend (the final path component).
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Read exactly the bytes covered by `range`.
    pub async fn read_range(&self, range: Range<u64>) -> Result<Bytes> {
        let mut file = File::open(&*self.path)
            .await
            .map_err(|err| Error::config(format!("cannot open {}: {err}", self.path.display())))?;
        file.seek(SeekFrom::Start(range.start))
            .await
            .map_err(|err| Error::config(format!("cannot seek {}: {err}", self.path.display())))?;
        let len = usize::try_from(range.end - range.start).unwrap_or(usize::MAX);
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)
            .await
            .map_err(|err| Error::config(format!("cannot read {}: {err}", self.path.display())))?;
        Ok(Bytes::from(buf))
    }

    /// Read the entire file. Used by [`crate::transport::HttpTransport::create`], which sends
    /// the raw file as part of the create call per the backend protocol.
    pub async fn read_all(&self) -> Result<Bytes> {
        self.read_range(0..self.file_size).await
    }
}
