use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::domain::errors::FleetResult;
use crate::domain::models::Failure;

const FAILURE_FILE_EXTENSION: &str = "json";

/// Name prefix of the per-run subdirectories under an output directory.
pub const RUN_DIR_PREFIX: &str = "run-";

/// Writes each failure as its own pretty-printed JSON file.
///
/// File names start with a zero-padded sequence number so a directory listing
/// sorts in recording order, and two failures never share a name even when
/// their timestamps collide.
#[derive(Debug, Clone)]
pub struct FailureStore {
    dir: PathBuf,
}

impl FailureStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create a fresh run directory under `output_dir` and open a store on it.
    ///
    /// Runs are named `run-<UTC timestamp>`, with a numeric suffix when two
    /// runs start in the same millisecond, so names sort by start time and a
    /// new run never sees an earlier run's files.
    pub async fn create_run(output_dir: &Path) -> FleetResult<Self> {
        tokio::fs::create_dir_all(output_dir).await?;
        let stamp = format!(
            "{RUN_DIR_PREFIX}{}",
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
        );

        let mut attempt = 0_u32;
        loop {
            let name = if attempt == 0 {
                stamp.clone()
            } else {
                format!("{stamp}-{attempt}")
            };
            let dir = output_dir.join(name);
            match tokio::fs::create_dir(&dir).await {
                Ok(()) => {
                    info!(dir = %dir.display(), "failure run directory created");
                    return Ok(Self::new(dir));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// The most recent run under `output_dir`, if any.
    pub async fn latest_run(output_dir: &Path) -> FleetResult<Option<Self>> {
        let mut entries = match tokio::fs::read_dir(output_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut latest: Option<PathBuf> = None;
        while let Some(entry) = entries.next_entry().await? {
            let is_run = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(RUN_DIR_PREFIX));
            if is_run && entry.file_type().await?.is_dir() {
                let path = entry.path();
                if latest.as_ref().is_none_or(|l| path > *l) {
                    latest = Some(path);
                }
            }
        }
        Ok(latest.map(Self::new))
    }

    /// File name for the `sequence`-th failure.
    pub fn file_name(sequence: u64, failure: &Failure) -> String {
        format!(
            "{sequence:06}-{}-{}-{}.{FAILURE_FILE_EXTENSION}",
            failure.timestamp.format("%Y%m%dT%H%M%S%.3fZ"),
            failure.source.to_string().replace('*', "all"),
            failure.failure_type
        )
    }

    /// Persist one failure, creating the directory on first use.
    ///
    /// An existing file is never overwritten; a name collision is an error.
    pub async fn persist(&self, sequence: u64, failure: &Failure) -> FleetResult<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(Self::file_name(sequence, failure));
        let json = serde_json::to_string_pretty(failure)?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;

        debug!(path = %path.display(), "failure persisted");
        Ok(path)
    }

    /// Load every persisted failure in recording order.
    ///
    /// A missing directory means nothing was recorded. Files that do not
    /// decode are skipped with a warning.
    pub async fn load_all(&self) -> FleetResult<Vec<Failure>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == FAILURE_FILE_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut failures = Vec::with_capacity(paths.len());
        for path in paths {
            let raw = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<Failure>(&raw) {
                Ok(failure) => failures.push(failure),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable failure file"),
            }
        }
        Ok(failures)
    }
}
