use crate::domain::prediction::{is_record_file_name, PredictionRecord};
use anyhow::Context;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredPrediction {
    pub path: PathBuf,
    pub record: PredictionRecord,
}

/// Outcome of decoding one candidate file.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Loaded(StoredPrediction),
    Skipped { path: PathBuf, reason: String },
}

/// Read side of the prediction directory.
///
/// The directory is shared with out-of-band tooling, so damaged or foreign
/// files are skipped rather than failing the whole listing.
#[derive(Debug, Clone)]
pub struct PredictionStore {
    dir: PathBuf,
}

impl PredictionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Records in file-name order, optionally narrowed to one ticker
    /// (case-insensitive).
    pub fn list(&self, ticker: Option<&str>) -> anyhow::Result<Vec<PredictionRecord>> {
        Ok(self
            .load(ticker)?
            .into_iter()
            .map(|stored| stored.record)
            .collect())
    }

    /// Like [`list`](Self::list) but keeps the file path of every record.
    pub fn load(&self, ticker: Option<&str>) -> anyhow::Result<Vec<StoredPrediction>> {
        let mut out = Vec::new();
        for entry in self.scan(ticker)? {
            match entry {
                Entry::Loaded(stored) => out.push(stored),
                Entry::Skipped { path, reason } => {
                    tracing::warn!(
                        path = %path.display(),
                        %reason,
                        "skipping unreadable prediction file"
                    );
                }
            }
        }
        Ok(out)
    }

    /// Decodes every candidate file, reporting failures as [`Entry::Skipped`].
    /// Skipped entries are not filtered by ticker since their ticker is unknown.
    pub fn scan(&self, ticker: Option<&str>) -> anyhow::Result<Vec<Entry>> {
        let ticker = ticker.map(str::trim).filter(|t| !t.is_empty());

        let mut out = Vec::new();
        for path in self.record_paths()? {
            let entry = decode_file(&path);
            if let (Some(want), Entry::Loaded(stored)) = (ticker, &entry) {
                if !stored.record.ticker.eq_ignore_ascii_case(want) {
                    continue;
                }
            }
            out.push(entry);
        }
        Ok(out)
    }

    /// Candidate record files, sorted by file name. A missing directory is
    /// an empty store.
    pub fn record_paths(&self) -> anyhow::Result<Vec<PathBuf>> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read predictions dir {}", self.dir.display())
                })
            }
        };

        let mut paths = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry.with_context(|| {
                format!("failed to read entry in {}", self.dir.display())
            })?;

            let is_file = dir_entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            let name = dir_entry.file_name();
            if is_file && name.to_str().is_some_and(is_record_file_name) {
                paths.push(dir_entry.path());
            }
        }

        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(paths)
    }
}

/// Fallible per-file decode. A file that vanished, is not valid JSON, or
/// breaks a record invariant becomes a skip.
pub fn decode_file(path: &Path) -> Entry {
    let skipped = |reason: String| Entry::Skipped {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(err) => return skipped(format!("read failed: {err}")),
    };

    let record = match serde_json::from_slice::<PredictionRecord>(&bytes) {
        Ok(r) => r,
        Err(err) => return skipped(format!("invalid JSON: {err}")),
    };

    if let Err(err) = record.validate() {
        return skipped(format!("invalid record: {err}"));
    }

    // Only the canonical file may carry a key, otherwise a rewrite would
    // leave two files for it.
    let expected = record.file_name();
    if path.file_name().and_then(|n| n.to_str()) != Some(expected.as_str()) {
        return skipped(format!("non-canonical file name, expected {expected}"));
    }

    Entry::Loaded(StoredPrediction {
        path: path.to_path_buf(),
        record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::prediction::fixtures::{record, scored};
    use crate::storage::writer::PredictionWriter;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn missing_directory_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PredictionStore::new(tmp.path().join("does-not-exist"));
        assert!(store.list(None).unwrap().is_empty());
    }

    #[test]
    fn write_then_list_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = PredictionWriter::new(tmp.path());
        let store = PredictionStore::new(tmp.path());

        let unscored = record("AAPL", date(2025, 1, 15), 30, 190.0, 200.0);
        let done = scored(record("MSFT", date(2025, 1, 15), 7, 400.0, 420.0), 410.5);
        writer.write(&unscored).unwrap();
        writer.write(&done).unwrap();

        let listed = store.list(None).unwrap();
        assert_eq!(listed, vec![unscored, done]);
    }

    #[test]
    fn floats_survive_write_then_list_exactly() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = PredictionWriter::new(tmp.path());

        let r = record("XYZ", date(2025, 1, 15), 5, 0.1 + 0.2, 11.0 * 1.1);
        assert_ne!(r.current_price, 0.3);
        writer.write(&r).unwrap();

        let listed = PredictionStore::new(tmp.path()).list(None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].current_price.to_bits(), r.current_price.to_bits());
        assert_eq!(
            listed[0].predicted_range.mid.to_bits(),
            r.predicted_range.mid.to_bits()
        );
        assert_eq!(listed, vec![r]);
    }

    #[test]
    fn records_under_foreign_names_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let r = record("AAPL", date(2025, 1, 15), 30, 190.0, 200.0);
        std::fs::write(
            tmp.path().join("aapl-forecast.json"),
            serde_json::to_vec_pretty(&r).unwrap(),
        )
        .unwrap();

        let store = PredictionStore::new(tmp.path());
        assert!(store.list(None).unwrap().is_empty());
        let scan = store.scan(None).unwrap();
        assert!(matches!(&scan[0], Entry::Skipped { reason, .. } if reason.starts_with("non-canonical file name")));
    }

    #[test]
    fn lists_in_file_name_order() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = PredictionWriter::new(tmp.path());

        writer
            .write(&record("MSFT", date(2025, 1, 1), 30, 400.0, 410.0))
            .unwrap();
        writer
            .write(&record("AAPL", date(2025, 2, 1), 30, 190.0, 200.0))
            .unwrap();
        writer
            .write(&record("AAPL", date(2025, 1, 1), 30, 190.0, 200.0))
            .unwrap();

        let keys: Vec<(String, NaiveDate)> = PredictionStore::new(tmp.path())
            .list(None)
            .unwrap()
            .into_iter()
            .map(|r| (r.ticker, r.prediction_date))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("AAPL".to_string(), date(2025, 1, 1)),
                ("AAPL".to_string(), date(2025, 2, 1)),
                ("MSFT".to_string(), date(2025, 1, 1)),
            ]
        );
    }

    #[test]
    fn ticker_filter_is_case_insensitive() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = PredictionWriter::new(tmp.path());
        writer
            .write(&record("AAPL", date(2025, 1, 15), 30, 190.0, 200.0))
            .unwrap();
        writer
            .write(&record("MSFT", date(2025, 1, 15), 30, 400.0, 410.0))
            .unwrap();

        let listed = PredictionStore::new(tmp.path()).list(Some("aapl")).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].ticker, "AAPL");
    }

    #[test]
    fn corrupt_and_foreign_files_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = PredictionWriter::new(tmp.path());
        let good = record("AAPL", date(2025, 1, 15), 30, 190.0, 200.0);
        let good_path = writer.write(&good).unwrap();

        let text = std::fs::read_to_string(&good_path).unwrap();
        std::fs::write(
            tmp.path().join("MSFT_2025-01-15_30d.json"),
            &text[..text.len() / 2],
        )
        .unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"hello").unwrap();
        std::fs::write(tmp.path().join(".pending.json"), b"{}").unwrap();
        std::fs::create_dir(tmp.path().join("archive")).unwrap();

        let store = PredictionStore::new(tmp.path());
        assert_eq!(store.list(None).unwrap(), vec![good]);

        let scan = store.scan(None).unwrap();
        assert_eq!(scan.len(), 2);
        assert!(matches!(&scan[1], Entry::Skipped { reason, .. } if reason.starts_with("invalid JSON")));
    }

    #[test]
    fn invariant_violations_on_disk_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let mut bad = record("AAPL", date(2025, 1, 15), 30, 190.0, 200.0);
        bad.scored = true;
        std::fs::write(
            tmp.path().join(bad.file_name()),
            serde_json::to_vec_pretty(&bad).unwrap(),
        )
        .unwrap();

        let scan = PredictionStore::new(tmp.path()).scan(None).unwrap();
        assert!(matches!(&scan[0], Entry::Skipped { reason, .. } if reason.starts_with("invalid record")));
    }
}
