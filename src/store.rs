//! The persisted snapshot of insights.
//!
//! A snapshot is one JSON array of [`Record`]s, newest first, replaced as a
//! whole on every write. Each run is a single cycle:
//!
//! 1. [`SnapshotStore::load`]: read the current snapshot, degrading to empty
//! 2. [`merge`]: admit candidates that are new by both id and canonical URL
//! 3. [`SnapshotStore::persist`]: sort, cap and atomically replace the file
//!
//! # Atomic writes
//!
//! The new snapshot is written to a hidden sibling file, flushed to disk and
//! renamed over the target, so readers see either the old or the new
//! snapshot and never a partial one.

use crate::models::Record;
use crate::utils::canonical_url;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Default maximum number of records kept in the snapshot.
pub const DEFAULT_CAP: usize = 1000;

/// Errors raised while writing a snapshot. Reads never fail.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("serializing snapshot for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("creating directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("writing {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("replacing {path}: {source}")]
    Rename {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The records of a snapshot, in file order, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    by_id: HashMap<String, usize>,
    records: Vec<Record>,
}

impl Snapshot {
    /// Index `records`, keeping only the first record for each id.
    pub fn new(records: Vec<Record>) -> Self {
        let mut by_id = HashMap::with_capacity(records.len());
        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            if by_id.contains_key(&record.id) {
                warn!(id = %record.id, url = %record.source_url, "Dropping repeated id from snapshot");
                continue;
            }
            by_id.insert(record.id.clone(), kept.len());
            kept.push(record);
        }
        Self { by_id, records: kept }
    }

    /// The record with `id`, if any.
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.by_id.get(id).map(|&pos| &self.records[pos])
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// Dedup keys seen so far in one merge: record ids and canonical URLs.
#[derive(Debug, Clone, Default)]
pub struct SeenKeys {
    ids: HashSet<String>,
    urls: HashSet<String>,
}

impl SeenKeys {
    /// Keys of every record in `records`.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let mut seen = Self::default();
        for record in records {
            seen.insert(record);
        }
        seen
    }

    fn url_key(record: &Record) -> Option<String> {
        Some(canonical_url(&record.source_url)).filter(|url| !url.is_empty())
    }

    /// Whether `record` shares its id or canonical URL with a seen record.
    pub fn contains(&self, record: &Record) -> bool {
        self.ids.contains(&record.id)
            || Self::url_key(record).is_some_and(|url| self.urls.contains(&url))
    }

    pub fn insert(&mut self, record: &Record) {
        self.ids.insert(record.id.clone());
        if let Some(url) = Self::url_key(record) {
            self.urls.insert(url);
        }
    }

    /// Record `record`'s keys and return `true` if none had been seen.
    pub fn admit(&mut self, record: &Record) -> bool {
        if self.contains(record) {
            return false;
        }
        self.insert(record);
        true
    }
}

/// Result of [`merge`].
#[derive(Debug, Clone)]
pub struct Merged {
    /// Existing records, unchanged and in order, then admitted candidates.
    pub records: Vec<Record>,
    pub admitted: usize,
    pub rejected: usize,
}

/// Append candidates that are new by both id and canonical URL.
///
/// Candidates are consumed lazily, in order; the first occurrence of a key
/// wins, whether it comes from `existing` or from an earlier candidate.
///
/// # Arguments
///
/// * `existing` - Records already in the snapshot, kept unchanged and in order
/// * `candidates` - Newly collected records, in collection order
///
/// # Returns
///
/// The combined records along with how many candidates were admitted and
/// how many were rejected as duplicates.
pub fn merge(existing: Vec<Record>, candidates: impl IntoIterator<Item = Record>) -> Merged {
    let mut seen = SeenKeys::from_records(&existing);
    let mut records = existing;
    let mut admitted = 0;
    let mut rejected = 0;

    for candidate in candidates {
        if seen.admit(&candidate) {
            admitted += 1;
            records.push(candidate);
        } else {
            debug!(id = %candidate.id, url = %candidate.source_url, "Dropping duplicate");
            rejected += 1;
        }
    }

    Merged {
        records,
        admitted,
        rejected,
    }
}

/// Sort newest first, keeping the relative order of equal dates, and keep at most `cap`.
pub fn retain_newest(records: &mut Vec<Record>, cap: usize) {
    records.sort_by(|a, b| b.date.cmp(&a.date));
    records.truncate(cap);
}

/// Counts reported by one [`SnapshotStore::ingest`] cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    /// Records in the snapshot before the run.
    pub existing: usize,
    /// Candidates admitted as new.
    pub added: usize,
    /// Candidates dropped as duplicates.
    pub rejected: usize,
    /// Records in the snapshot after the run.
    pub written: usize,
}

/// A snapshot file on disk.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".to_string());
        self.path.with_file_name(format!(".{name}.tmp"))
    }

    /// Read the snapshot. Missing, unreadable or malformed files yield an empty one.
    ///
    /// # Returns
    ///
    /// The records in file order. Later records repeating an earlier id are
    /// dropped with a warning.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub fn load(&self) -> Snapshot {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No snapshot yet; starting empty");
                return Snapshot::default();
            }
            Err(e) => {
                warn!(error = %e, "Snapshot unreadable; starting empty");
                return Snapshot::default();
            }
        };

        match serde_json::from_str::<Vec<Record>>(&text) {
            Ok(records) => {
                info!(count = records.len(), "Loaded snapshot");
                Snapshot::new(records)
            }
            Err(e) => {
                warn!(error = %e, "Snapshot malformed; starting empty");
                Snapshot::default()
            }
        }
    }

    /// Sort, cap and atomically replace the snapshot.
    ///
    /// # Arguments
    ///
    /// * `records` - The full collection to write
    /// * `cap` - Maximum number of records kept, newest first
    ///
    /// # Returns
    ///
    /// The number of records written.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the records cannot be serialized, the
    /// parent directory cannot be created, or the temporary file cannot be
    /// written or renamed over the snapshot. The previous snapshot is left
    /// in place in every case.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display(), cap = cap))]
    pub fn persist(&self, mut records: Vec<Record>, cap: usize) -> Result<usize, StoreError> {
        retain_newest(&mut records, cap);

        let mut json = serde_json::to_string_pretty(&records).map_err(|source| StoreError::Serialize {
            path: self.path.clone(),
            source,
        })?;
        json.push('\n');

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let tmp = self.tmp_path();
        if let Err(source) = write_synced(&tmp, json.as_bytes()) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::Write { path: tmp, source });
        }
        if let Err(source) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::Rename {
                path: self.path.clone(),
                source,
            });
        }

        info!(count = records.len(), "Wrote snapshot");
        Ok(records.len())
    }

    fn merge_loaded(&self, candidates: impl IntoIterator<Item = Record>) -> (usize, Merged) {
        let snapshot = self.load();
        let existing = snapshot.len();
        (existing, merge(snapshot.into_records(), candidates))
    }

    /// One load, merge and persist cycle.
    ///
    /// # Arguments
    ///
    /// * `candidates` - Newly collected records, in collection order
    /// * `cap` - Maximum number of records kept, newest first
    ///
    /// # Returns
    ///
    /// An [`IngestReport`] with the counts of the cycle.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the snapshot cannot be written; see
    /// [`SnapshotStore::persist`].
    pub fn ingest(
        &self,
        candidates: impl IntoIterator<Item = Record>,
        cap: usize,
    ) -> Result<IngestReport, StoreError> {
        let (existing, merged) = self.merge_loaded(candidates);
        let written = self.persist(merged.records, cap)?;
        Ok(IngestReport {
            existing,
            added: merged.admitted,
            rejected: merged.rejected,
            written,
        })
    }

    /// Same counts as [`ingest`](Self::ingest) without touching the file.
    pub fn preview(&self, candidates: impl IntoIterator<Item = Record>, cap: usize) -> IngestReport {
        let (existing, merged) = self.merge_loaded(candidates);
        IngestReport {
            existing,
            added: merged.admitted,
            rejected: merged.rejected,
            written: merged.records.len().min(cap),
        }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
