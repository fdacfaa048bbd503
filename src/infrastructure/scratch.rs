//! Filesystem side channel between workers and their agent.
//!
//! A worker that runs out of memory drops an empty `<worker_id>.oome` marker.
//! An uncaught test error is written to `<worker_id>.<tag>.exception` as JSON.
//! The agent's supervisor polls the directory.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const OOME_EXTENSION: &str = "oome";
const EXCEPTION_EXTENSION: &str = "exception";

static EXCEPTION_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Contents of an `.exception` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionPayload {
    pub message: String,

    #[serde(default)]
    pub cause: Option<String>,

    #[serde(default)]
    pub test_id: Option<String>,
}

/// An exception file that has been read and removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionReport {
    /// `None` when the file name carries no worker id.
    pub worker_id: Option<String>,
    pub path: PathBuf,
    pub payload: ExceptionPayload,
}

/// Worker id encoded in a scratch file name: everything before the first `.`.
pub fn worker_id_from_file_name(file_name: &str) -> Option<&str> {
    let id = file_name.split('.').next()?;
    (!id.is_empty()).then_some(id)
}

/// Decode an exception payload; undecodable contents become the cause,
/// lossily converted when they are not UTF-8.
pub fn decode_exception(raw: &[u8]) -> ExceptionPayload {
    serde_json::from_slice(raw).unwrap_or_else(|_| ExceptionPayload {
        message: "worker reported an exception".to_string(),
        cause: Some(String::from_utf8_lossy(raw).into_owned()),
        test_id: None,
    })
}

#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn oome_marker_path(&self, worker_id: &str) -> PathBuf {
        self.root.join(format!("{worker_id}.{OOME_EXTENSION}"))
    }

    pub async fn has_oome_marker(&self, worker_id: &str) -> io::Result<bool> {
        tokio::fs::try_exists(self.oome_marker_path(worker_id)).await
    }

    /// Remove the worker's OOM marker. Returns whether one was present.
    ///
    /// Worker ids repeat across runs, so a handled or stale marker must not
    /// outlive the worker it was written for.
    pub async fn clear_oome_marker(&self, worker_id: &str) -> io::Result<bool> {
        match tokio::fs::remove_file(self.oome_marker_path(worker_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Exception files currently present, sorted by name. A missing scratch
    /// directory has none.
    pub async fn exception_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == EXCEPTION_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Read an exception file and delete it, then decode it.
    ///
    /// Only a failed read is an error. A failed delete is logged and
    /// otherwise ignored; the file may be seen again on a later scan.
    pub async fn take_exception(&self, path: &Path) -> io::Result<ExceptionReport> {
        let raw = tokio::fs::read(path).await?;
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "failed to delete exception file");
        }

        let worker_id = path
            .file_name()
            .map(|name| name.to_string_lossy())
            .and_then(|name| worker_id_from_file_name(&name).map(ToString::to_string));

        Ok(ExceptionReport {
            worker_id,
            path: path.to_path_buf(),
            payload: decode_exception(&raw),
        })
    }

    /// Worker side: drop the out-of-memory marker.
    pub async fn write_oome_marker(&self, worker_id: &str) -> io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.oome_marker_path(worker_id);
        tokio::fs::write(&path, b"").await?;
        debug!(worker_id, path = %path.display(), "oome marker written");
        Ok(path)
    }

    /// Worker side: publish an exception report.
    ///
    /// The file is written under a temporary name and renamed, so a scan never
    /// sees a partial payload.
    pub async fn write_exception(
        &self,
        worker_id: &str,
        payload: &ExceptionPayload,
    ) -> io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;
        let tag = format!(
            "{}-{}",
            Utc::now().format("%Y%m%d%H%M%S%6f"),
            EXCEPTION_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        );
        let path = self
            .root
            .join(format!("{worker_id}.{tag}.{EXCEPTION_EXTENSION}"));
        let tmp = path.with_extension("tmp");

        let json = serde_json::to_string_pretty(payload).map_err(io::Error::other)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(worker_id, path = %path.display(), "exception written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_worker_id_from_file_name() {
        assert_eq!(worker_id_from_file_name("7.trace.exception"), Some("7"));
        assert_eq!(worker_id_from_file_name("C_A1_W2.oome"), Some("C_A1_W2"));
        assert_eq!(worker_id_from_file_name(".exception"), None);
    }

    #[test]
    fn test_decode_exception_falls_back_to_raw_text() {
        let payload = decode_exception(b"java.lang.IllegalStateException: boom");
        assert_eq!(
            payload.cause.as_deref(),
            Some("java.lang.IllegalStateException: boom")
        );
        assert_eq!(payload.test_id, None);

        let payload = decode_exception(br#"{"message":"boom","test_id":"MapTest"}"#);
        assert_eq!(payload.message, "boom");
        assert_eq!(payload.test_id.as_deref(), Some("MapTest"));
    }

    #[tokio::test]
    async fn test_oome_marker() {
        let dir = TempDir::new().unwrap();
        let scratch = ScratchDir::new(dir.path());

        assert!(!scratch.has_oome_marker("w1").await.unwrap());
        scratch.write_oome_marker("w1").await.unwrap();
        assert!(scratch.has_oome_marker("w1").await.unwrap());
        assert!(!scratch.has_oome_marker("w2").await.unwrap());

        assert!(scratch.clear_oome_marker("w1").await.unwrap());
        assert!(!scratch.has_oome_marker("w1").await.unwrap());
        assert!(!scratch.clear_oome_marker("w1").await.unwrap());
    }

    #[tokio::test]
    async fn test_take_exception_reads_and_deletes() {
        let dir = TempDir::new().unwrap();
        let scratch = ScratchDir::new(dir.path());
        let payload = ExceptionPayload {
            message: "assertion failed".into(),
            cause: Some("stack".into()),
            test_id: Some("MapTest".into()),
        };

        let path = scratch.write_exception("w3", &payload).await.unwrap();
        let files = scratch.exception_files().await.unwrap();
        assert_eq!(files, vec![path.clone()]);

        let report = scratch.take_exception(&path).await.unwrap();
        assert_eq!(report.worker_id.as_deref(), Some("w3"));
        assert_eq!(report.payload, payload);
        assert!(!path.exists());
        assert!(scratch.exception_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_take_exception_with_binary_payload() {
        let dir = TempDir::new().unwrap();
        let scratch = ScratchDir::new(dir.path());
        let path = dir.path().join("7.trace.exception");
        std::fs::write(&path, [0xac, 0xed, 0x00, 0x05, 0xff, 0xfe]).unwrap();

        let report = scratch.take_exception(&path).await.unwrap();

        assert!(!path.exists());
        assert_eq!(report.worker_id.as_deref(), Some("7"));
        assert_eq!(report.payload.message, "worker reported an exception");
        assert!(report.payload.cause.unwrap().contains('\u{fffd}'));
    }

    #[tokio::test]
    async fn test_take_exception_without_worker_id() {
        let dir = TempDir::new().unwrap();
        let scratch = ScratchDir::new(dir.path());
        let path = dir.path().join(".trace.exception");
        std::fs::write(&path, "boom").unwrap();

        let report = scratch.take_exception(&path).await.unwrap();

        assert!(!path.exists());
        assert_eq!(report.worker_id, None);
        assert_eq!(report.payload.cause.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_exception_files_ignores_other_files() {
        let dir = TempDir::new().unwrap();
        let scratch = ScratchDir::new(dir.path());
        std::fs::write(dir.path().join("w1.oome"), "").unwrap();
        std::fs::write(dir.path().join("w1.log"), "").unwrap();
        std::fs::write(dir.path().join("w1.x.exception.tmp"), "").unwrap();

        assert!(scratch.exception_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_scratch_dir_has_no_exceptions() {
        let dir = TempDir::new().unwrap();
        let scratch = ScratchDir::new(dir.path().join("missing"));
        assert!(scratch.exception_files().await.unwrap().is_empty());
    }
}
