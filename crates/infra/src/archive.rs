//! Archive finalizer: zip a job's artifacts into one file.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::jobs::JobId;
use crate::storage::{ArtifactStore, StorageError};

const COMPRESSION_LEVEL: i64 = 9;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("archive task failed: {0}")]
    Task(String),
}

/// Zip every artifact of `job` and publish the archive.
///
/// The archive is written next to its final location and renamed into place
/// only once complete, so a reader never sees a partial file. The artifact
/// directory is removed afterwards; failing to remove it is logged, not
/// returned.
pub async fn finalize(store: &ArtifactStore, job: JobId) -> Result<PathBuf, ArchiveError> {
    let names = store.list_artifacts(job).await?;
    let source_dir = store.job_dir(job);
    let partial = store.partial_archive_path(job);
    let target = store.archive_path(job);
    let entries = names.len();

    let written = {
        let partial = partial.clone();
        let target = target.clone();
        tokio::task::spawn_blocking(move || write_zip(&source_dir, &names, &partial, &target))
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))?
    };
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }
    debug!(job_id = %job, entries, path = %target.display(), "archive written");

    if let Err(e) = store.remove_job_dir(job).await {
        warn!(job_id = %job, error = %e, "failed to remove artifact directory");
    }
    Ok(target)
}

fn write_zip(
    source_dir: &Path,
    names: &[String],
    partial: &Path,
    target: &Path,
) -> Result<(), ArchiveError> {
    let file = File::create(partial).map_err(io_err(partial))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL));

    for name in names {
        let path = source_dir.join(name);
        let mut artifact = File::open(&path).map_err(io_err(&path))?;
        zip.start_file(name.as_str(), options)?;
        io::copy(&mut artifact, &mut zip).map_err(io_err(&path))?;
    }

    let mut out = zip.finish()?;
    io::Write::flush(&mut out).map_err(io_err(partial))?;
    drop(out);
    std::fs::rename(partial, target).map_err(io_err(target))?;
    Ok(())
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + use<> {
    let path = path.to_path_buf();
    move |source| ArchiveError::Io { path, source }
}
