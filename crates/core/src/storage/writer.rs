use crate::domain::prediction::{PredictionRecord, RecordError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("invalid prediction record: {0}")]
    Invalid(#[from] RecordError),
    #[error("failed to serialize prediction record")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to write prediction file {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Writes one JSON file per (ticker, prediction_date, horizon) key.
///
/// Every write goes to a temporary file in the target directory, is fsynced,
/// then renamed onto the canonical name. Readers see either the previous file
/// or the new one, never a partial write.
#[derive(Debug, Clone)]
pub struct PredictionWriter {
    dir: PathBuf,
}

impl PredictionWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, record: &PredictionRecord) -> PathBuf {
        self.dir.join(record.file_name())
    }

    /// Creates or fully replaces the record's file. Same key, same file.
    pub fn write(&self, record: &PredictionRecord) -> Result<PathBuf, WriteError> {
        self.write_with(record, |_| Ok(()))
    }

    /// `before_commit` runs after the temporary file is durable and before it
    /// is renamed into place.
    fn write_with<F>(&self, record: &PredictionRecord, before_commit: F) -> Result<PathBuf, WriteError>
    where
        F: FnOnce(&Path) -> io::Result<()>,
    {
        record.validate()?;
        let bytes = serde_json::to_vec_pretty(record).map_err(WriteError::Serialize)?;

        let target = self.path_for(record);
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| WriteError::Io { path, source }
        };

        std::fs::create_dir_all(&self.dir).map_err(io_err(self.dir.as_path()))?;

        // The temp file deletes itself on drop, so every early return below
        // leaves nothing behind.
        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(io_err(self.dir.as_path()))?;

        tmp.write_all(&bytes).map_err(io_err(tmp.path()))?;
        tmp.as_file().sync_all().map_err(io_err(tmp.path()))?;
        before_commit(tmp.path()).map_err(io_err(tmp.path()))?;

        tmp.persist(&target).map_err(|e| WriteError::Io {
            path: target.clone(),
            source: e.error,
        })?;

        sync_dir(&self.dir);

        tracing::info!(
            ticker = %record.ticker,
            prediction_date = %record.prediction_date,
            horizon_days = record.horizon_days,
            scored = record.scored,
            path = %target.display(),
            "prediction logged"
        );

        Ok(target)
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(err) = std::fs::File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!(dir = %dir.display(), error = %err, "directory fsync failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
