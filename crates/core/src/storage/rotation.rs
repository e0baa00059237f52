use crate::storage::store::{decode_file, Entry, PredictionStore};
use anyhow::Context;
use chrono::{Days, NaiveDate};
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_RETENTION_DAYS: u32 = 365;
pub const DEFAULT_ARCHIVE_DIR_NAME: &str = "archive";

/// Moves records whose `prediction_date` is older than `today - retention_days`
/// into `archive_dir`. File contents are never touched.
#[derive(Debug, Clone)]
pub struct Rotator {
    store: PredictionStore,
}

impl Rotator {
    pub fn new(store: PredictionStore) -> Self {
        Self { store }
    }

    pub fn default_archive_dir(&self) -> PathBuf {
        self.store.dir().join(DEFAULT_ARCHIVE_DIR_NAME)
    }

    /// Returns how many files were moved.
    pub fn rotate(
        &self,
        retention_days: u32,
        archive_dir: &Path,
        today: NaiveDate,
    ) -> anyhow::Result<usize> {
        let cutoff = today
            .checked_sub_days(Days::new(u64::from(retention_days)))
            .context("retention window reaches before the start of the calendar")?;

        // Snapshot the listing first; moving files changes the directory.
        let paths = self.store.record_paths()?;

        let mut moved = 0;
        for path in paths {
            let prediction_date = match decode_file(&path) {
                Entry::Loaded(stored) => stored.record.prediction_date,
                Entry::Skipped { path, reason } => {
                    tracing::debug!(path = %path.display(), %reason, "not rotating unreadable file");
                    continue;
                }
            };

            if prediction_date >= cutoff {
                continue;
            }

            let Some(file_name) = path.file_name() else {
                continue;
            };

            std::fs::create_dir_all(archive_dir).with_context(|| {
                format!("failed to create archive dir {}", archive_dir.display())
            })?;
            let dest = archive_dir.join(file_name);

            if move_file(&path, &dest)? {
                moved += 1;
                tracing::info!(
                    file = %file_name.to_string_lossy(),
                    %prediction_date,
                    dest = %dest.display(),
                    "prediction archived"
                );
            } else {
                tracing::debug!(path = %path.display(), "prediction file vanished before archiving");
            }
        }

        Ok(moved)
    }
}

/// `Ok(false)` when the source is already gone.
fn move_file(src: &Path, dest: &Path) -> anyhow::Result<bool> {
    match std::fs::rename(src, dest) {
        Ok(()) => return Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound && !src.exists() => return Ok(false),
        Err(err) => {
            tracing::debug!(
                src = %src.display(),
                error = %err,
                "rename failed; falling back to copy and remove"
            );
        }
    }

    match copy_into_place(src, dest) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound && !src.exists() => return Ok(false),
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to copy {} to {}", src.display(), dest.display())
            })
        }
    }

    match std::fs::remove_file(src) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", src.display())),
    }
}

/// Copies through a temporary file next to `dest`, so `dest` only ever
/// appears complete.
fn copy_into_place(src: &Path, dest: &Path) -> io::Result<()> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut input = std::fs::File::open(src)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    io::copy(&mut input, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}
