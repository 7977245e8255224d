//! Load stage: chunk files into the store
//!
//! Rows are filtered on region, typed, de-duplicated by natural key (last
//! row wins) and upserted. Loading the same chunk twice leaves the store as
//! loading it once.

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::chunk::{list_chunks, read_chunk};
use crate::error::{IngestError, IngestResult};
use crate::models::{dedup_last_wins, EntityKind, FlatRecord, TypedRecord};
use crate::store::RecordStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub files: usize,
    pub skipped_files: Vec<PathBuf>,
    /// Rows read from chunk files
    pub read: u64,
    /// Rows dropped because their region is not allowed
    pub filtered: u64,
    /// Rows that could not be typed
    pub rejected: u64,
    pub upserted: u64,
}

impl LoadReport {
    fn absorb(&mut self, other: LoadReport) {
        self.files += other.files;
        self.skipped_files.extend(other.skipped_files);
        self.read += other.read;
        self.filtered += other.filtered;
        self.rejected += other.rejected;
        self.upserted += other.upserted;
    }
}

/// Keep records whose region key is in `allowed`. Kinds without a region
/// column pass through untouched. Returns the kept records and the number
/// dropped.
pub fn filter_by_region(records: Vec<FlatRecord>, allowed: &HashSet<String>) -> (Vec<FlatRecord>, u64) {
    let Some(idx) = records.first().and_then(|r| r.kind.region_column()) else {
        return (records, 0);
    };

    let before = records.len();
    let kept: Vec<FlatRecord> = records
        .into_iter()
        .filter(|r| {
            r.values
                .get(idx)
                .and_then(|v| v.as_deref())
                .is_some_and(|key| allowed.contains(key))
        })
        .collect();
    let dropped = (before - kept.len()) as u64;

    (kept, dropped)
}

/// Type every record, counting the ones that fail
pub fn type_records(records: &[FlatRecord]) -> (Vec<TypedRecord>, u64) {
    let mut typed = Vec::with_capacity(records.len());
    let mut rejected = 0;

    for record in records {
        match record.to_typed() {
            Ok(t) => typed.push(t),
            Err(e) => {
                debug!(kind = %record.kind, error = %e, "Rejected row");
                rejected += 1;
            },
        }
    }

    (typed, rejected)
}

/// Filter, type, de-duplicate and upsert one batch of records
pub async fn load_records(
    store: &dyn RecordStore,
    kind: EntityKind,
    records: Vec<FlatRecord>,
    allowed: Option<&HashSet<String>>,
) -> IngestResult<LoadReport> {
    let read = records.len() as u64;
    let (records, filtered) = match allowed {
        Some(allowed) => filter_by_region(records, allowed),
        None => (records, 0),
    };

    let (typed, rejected) = type_records(&records);
    if rejected > 0 {
        warn!(kind = %kind, rejected, "Rows could not be typed and were skipped");
    }

    let typed = dedup_last_wins(typed);
    let upserted = store.upsert(kind, &typed).await?;

    Ok(LoadReport {
        files: 0,
        skipped_files: Vec::new(),
        read,
        filtered,
        rejected,
        upserted,
    })
}

async fn read_chunk_blocking(path: &Path, kind: EntityKind) -> IngestResult<Vec<FlatRecord>> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || read_chunk(&path, kind))
        .await
        .map_err(|e| IngestError::Io(std::io::Error::other(format!("chunk reader task failed: {e}"))))?
}

/// Load a single chunk file
pub async fn load_chunk(
    store: &dyn RecordStore,
    path: &Path,
    kind: EntityKind,
    allowed: Option<&HashSet<String>>,
) -> IngestResult<LoadReport> {
    let records = read_chunk_blocking(path, kind).await?;
    let mut report = load_records(store, kind, records, allowed).await?;
    report.files = 1;

    debug!(
        path = %path.display(),
        read = report.read,
        filtered = report.filtered,
        upserted = report.upserted,
        "Loaded chunk"
    );
    Ok(report)
}

/// Load every chunk file of `kind` under `data_dir` in offset order.
/// Without an explicit region set, fact rows are checked against the
/// store's region table. Unreadable files are skipped; store errors abort.
pub async fn load_dir(
    store: &dyn RecordStore,
    data_dir: &Path,
    kind: EntityKind,
    allowed: Option<HashSet<String>>,
) -> IngestResult<LoadReport> {
    let allowed = match allowed {
        Some(set) => Some(set),
        None if kind.is_fact() => Some(store.region_keys().await?),
        None => None,
    };

    let paths = list_chunks(data_dir, kind)?;
    info!(kind = %kind, files = paths.len(), "Loading chunk files");

    let mut report = LoadReport::default();
    for path in paths {
        let records = match read_chunk_blocking(&path, kind).await {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable chunk file");
                report.skipped_files.push(path);
                continue;
            },
        };

        let mut chunk = load_records(store, kind, records, allowed.as_ref()).await?;
        chunk.files = 1;
        report.absorb(chunk);
    }

    info!(
        kind = %kind,
        files = report.files,
        skipped = report.skipped_files.len(),
        read = report.read,
        filtered = report.filtered,
        rejected = report.rejected,
        upserted = report.upserted,
        "Load complete"
    );
    Ok(report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn land_use(id: &str, region: Option<&str>) -> FlatRecord {
        let mut values = vec![None; EntityKind::LandUse.columns().len()];
        values[0] = Some(id.to_string());
        values[1] = region.map(str::to_string);
        FlatRecord {
            kind: EntityKind::LandUse,
            values,
        }
    }

    #[test]
    fn test_filter_drops_unknown_and_missing_regions() {
        let allowed: HashSet<String> = ["GM0363".to_string()].into_iter().collect();
        let (kept, dropped) = filter_by_region(
            vec![land_use("1", Some("GM0363")), land_use("2", Some("GM9999")), land_use("3", None)],
            &allowed,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(dropped, 2);
    }

    #[test]
    fn test_filter_is_exact_on_trailing_spaces() {
        let allowed: HashSet<String> = ["NL01  ".to_string()].into_iter().collect();
        let (kept, _) = filter_by_region(vec![land_use("1", Some("NL01")), land_use("2", Some("NL01  "))], &allowed);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].values[0].as_deref(), Some("2"));
    }

    #[test]
    fn test_metadata_is_not_filtered() {
        let record = FlatRecord {
            kind: EntityKind::Gender,
            values: vec![Some("T001038".into()), Some("Totaal mannen en vrouwen".into()), None],
        };
        let (kept, dropped) = filter_by_region(vec![record], &HashSet::new());
        assert_eq!((kept.len(), dropped), (1, 0));
    }

    #[test]
    fn test_type_records_counts_rejects() {
        let (typed, rejected) = type_records(&[land_use("1", Some("GM0363")), land_use("x", Some("GM0363"))]);
        assert_eq!(typed.len(), 1);
        assert_eq!(rejected, 1);
    }
}
