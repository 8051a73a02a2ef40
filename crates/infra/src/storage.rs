//! On-disk layout for a job's artifacts and its archive.
//!
//! ```text
//! <root>/<job_id>/            rendered artifacts while the job runs
//! <root>/<job_id>.zip.partial archive being written
//! <root>/<job_id>.zip         finished archive
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::jobs::JobId;

/// Upper bound on `_N` suffixes tried for one artifact name.
const MAX_NAME_SUFFIX: usize = 10_000;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no free artifact name for {0}")]
    NameExhausted(String),
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn job_dir(&self, job: JobId) -> PathBuf {
        self.root.join(job.to_string())
    }

    pub fn archive_path(&self, job: JobId) -> PathBuf {
        self.root.join(format!("{job}.zip"))
    }

    pub fn partial_archive_path(&self, job: JobId) -> PathBuf {
        self.root.join(format!("{job}.zip.partial"))
    }

    /// Create the job's artifact directory.
    pub async fn prepare(&self, job: JobId) -> Result<PathBuf, StorageError> {
        let dir = self.job_dir(job);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))?;
        Ok(dir)
    }

    /// Persist one artifact and return the file name it was stored under.
    ///
    /// Never overwrites: a taken name gets `_2`, `_3`, ... before the extension.
    pub async fn write_artifact(
        &self,
        job: JobId,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        let dir = self.job_dir(job);
        for attempt in 1..=MAX_NAME_SUFFIX {
            let candidate = suffixed(file_name, attempt);
            let path = dir.join(&candidate);
            let opened = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            let file = match opened {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StorageError::io(&path, e)),
            };
            persist(&path, file, bytes).await?;
            return Ok(candidate);
        }
        Err(StorageError::NameExhausted(file_name.to_string()))
    }

    /// Artifact file names currently stored for a job, sorted.
    pub async fn list_artifacts(&self, job: JobId) -> Result<Vec<String>, StorageError> {
        let dir = self.job_dir(job);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&dir, e)),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&dir, e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map_err(|e| StorageError::io(&entry.path(), e))?
                .is_file();
            if is_file {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn read_archive(&self, job: JobId) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.archive_path(job);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    pub async fn remove_job_dir(&self, job: JobId) -> Result<(), StorageError> {
        let dir = self.job_dir(job);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&dir, e)),
        }
    }
}

/// Write `bytes` to a freshly created file. On failure the file is removed,
/// so a truncated artifact never reaches the archive.
async fn persist<W>(path: &Path, mut out: W, bytes: &[u8]) -> Result<(), StorageError>
where
    W: AsyncWrite + Unpin,
{
    let written: std::io::Result<()> = async {
        out.write_all(bytes).await?;
        out.flush().await
    }
    .await;
    drop(out);

    if let Err(source) = written {
        if let Err(e) = fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "failed to remove partial artifact");
        }
        return Err(StorageError::io(path, source));
    }
    Ok(())
}

fn suffixed(file_name: &str, attempt: usize) -> String {
    if attempt == 1 {
        return file_name.to_string();
    }
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{attempt}.{ext}"),
        _ => format!("{file_name}_{attempt}"),
    }
}
