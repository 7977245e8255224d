//! Parquet chunk files
//!
//! Every fetched page is buffered on disk as
//! `{data_dir}/{table}/{Table}_{cumulative_offset}.parquet` with one nullable
//! UTF-8 column per mapped column. Files are written to a `.tmp` sibling
//! and renamed into place.

use arrow::array::{Array, ArrayRef, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{IngestError, IngestResult};
use crate::models::{EntityKind, FlatRecord};

const EXTENSION: &str = "parquet";

/// Where a finished page lands
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn write_chunk(
        &self,
        kind: EntityKind,
        cumulative_offset: u64,
        records: Vec<FlatRecord>,
    ) -> IngestResult<PathBuf>;
}

/// Directory holding the chunk files of one entity kind
pub fn chunk_dir(data_dir: &Path, kind: EntityKind) -> PathBuf {
    data_dir.join(kind.table())
}

pub fn chunk_path(data_dir: &Path, kind: EntityKind, cumulative_offset: u64) -> PathBuf {
    chunk_dir(data_dir, kind).join(format!("{}_{cumulative_offset}.{EXTENSION}", kind.file_stem()))
}

pub fn chunk_schema(kind: EntityKind) -> Arc<Schema> {
    Arc::new(Schema::new(
        kind.columns()
            .iter()
            .map(|c| Field::new(c.name, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ))
}

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_created_by(concat!("cbs-ingest ", env!("CARGO_PKG_VERSION")).to_string())
        .build()
}

/// Write `records` to `path` via a temporary file
pub fn write_chunk_file(path: &Path, kind: EntityKind, records: &[FlatRecord]) -> IngestResult<()> {
    if let Some(other) = records.iter().find(|r| r.kind != kind) {
        return Err(IngestError::invalid_value(
            kind.table(),
            format!("chunk for {kind} received a {} record", other.kind),
        ));
    }

    let schema = chunk_schema(kind);
    let arrays: Vec<ArrayRef> = (0..kind.columns().len())
        .map(|i| {
            let column: StringArray = records
                .iter()
                .map(|r| r.values.get(i).and_then(|v| v.as_deref()))
                .collect();
            Arc::new(column) as ArrayRef
        })
        .collect();
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
    let file = File::create(&tmp)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(writer_properties()))?;
    writer.write(&batch)?;
    writer.close()?;
    fs::rename(&tmp, path)?;

    debug!(path = %path.display(), rows = records.len(), "Wrote chunk file");
    Ok(())
}

/// Read a chunk file back as flat records of `kind`. Columns are cast to
/// text; a mapped column the file lacks reads as null.
pub fn read_chunk(path: &Path, kind: EntityKind) -> IngestResult<Vec<FlatRecord>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut records = Vec::new();

    for batch in reader {
        let batch = batch?;
        let schema = batch.schema();

        let columns = kind
            .columns()
            .iter()
            .map(|c| match schema.index_of(c.name) {
                Ok(idx) => cast(batch.column(idx), &DataType::Utf8).map(Some),
                Err(_) => Ok(None),
            })
            .collect::<Result<Vec<Option<ArrayRef>>, _>>()?;

        let strings: Vec<Option<&StringArray>> = columns
            .iter()
            .map(|c| c.as_ref().and_then(|a| a.as_any().downcast_ref::<StringArray>()))
            .collect();

        for row in 0..batch.num_rows() {
            records.push(FlatRecord {
                kind,
                values: strings
                    .iter()
                    .map(|&col| col.filter(|a| !a.is_null(row)).map(|a| a.value(row).to_string()))
                    .collect(),
            });
        }
    }

    Ok(records)
}

fn chunk_offset(path: &Path) -> Option<u64> {
    path.file_stem()?.to_str()?.rsplit_once('_')?.1.parse().ok()
}

/// Finished chunk files of `kind`, ordered by offset. A missing directory
/// yields an empty list.
pub fn list_chunks(data_dir: &Path, kind: EntityKind) -> IngestResult<Vec<PathBuf>> {
    let dir = chunk_dir(data_dir, kind);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == EXTENSION) {
            paths.push(path);
        }
    }

    paths.sort_by(|a, b| chunk_offset(a).cmp(&chunk_offset(b)).then_with(|| a.cmp(b)));
    Ok(paths)
}

/// Writes chunk files under a data directory on the blocking pool
#[derive(Debug, Clone)]
pub struct ParquetChunkWriter {
    data_dir: PathBuf,
}

impl ParquetChunkWriter {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }
}

#[async_trait]
impl ChunkSink for ParquetChunkWriter {
    async fn write_chunk(
        &self,
        kind: EntityKind,
        cumulative_offset: u64,
        records: Vec<FlatRecord>,
    ) -> IngestResult<PathBuf> {
        let path = chunk_path(&self.data_dir, kind, cumulative_offset);
        let target = path.clone();

        tokio::task::spawn_blocking(move || write_chunk_file(&target, kind, &records))
            .await
            .map_err(|e| IngestError::Io(std::io::Error::other(format!("chunk writer task failed: {e}"))))??;

        Ok(path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn region(key: &str, name: Option<&str>) -> FlatRecord {
        FlatRecord {
            kind: EntityKind::LandUse,
            values: EntityKind::LandUse
                .columns()
                .iter()
                .map(|c| match c.name {
                    "id" => Some("1".to_string()),
                    "regio_key" => Some(key.to_string()),
                    "datum_key" => name.map(str::to_string),
                    _ => None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_chunk_path_layout() {
        let path = chunk_path(Path::new("data/parquet"), EntityKind::Population, 20_000);
        assert_eq!(path, PathBuf::from("data/parquet/bevolking/Bevolking_20000.parquet"));
    }

    #[test]
    fn test_write_then_read_preserves_nulls_and_spaces() {
        let dir = TempDir::new().unwrap();
        let path = chunk_path(dir.path(), EntityKind::LandUse, 10);
        let records = vec![region("NL01  ", Some("2015JJ00")), region("GM0363", None)];

        write_chunk_file(&path, EntityKind::LandUse, &records).unwrap();
        assert_eq!(read_chunk(&path, EntityKind::LandUse).unwrap(), records);
        assert!(!path.with_extension("parquet.tmp").exists());
    }

    #[test]
    fn test_missing_column_reads_as_null() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Regios_1.parquet");
        let schema = Arc::new(Schema::new(vec![Field::new("regio_key", DataType::Utf8, true)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(StringArray::from(vec![Some("GM0014")])) as ArrayRef],
        )
        .unwrap();
        let mut writer = ArrowWriter::try_new(File::create(&path).unwrap(), schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let records = read_chunk(&path, EntityKind::Region).unwrap();
        assert_eq!(records[0].values, vec![Some("GM0014".to_string()), None, None]);
    }

    #[test]
    fn test_truncated_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = chunk_path(dir.path(), EntityKind::LandUse, 10);
        write_chunk_file(&path, EntityKind::LandUse, &[region("GM0363", None)]).unwrap();

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(read_chunk(&path, EntityKind::LandUse).is_err());
    }

    #[test]
    fn test_list_chunks_numeric_order_ignores_tmp() {
        let dir = TempDir::new().unwrap();
        for offset in [100_000, 20_000, 10_000] {
            write_chunk_file(&chunk_path(dir.path(), EntityKind::LandUse, offset), EntityKind::LandUse, &[])
                .unwrap();
        }
        fs::write(chunk_dir(dir.path(), EntityKind::LandUse).join("Bodemgebruik_30000.parquet.tmp"), b"x").unwrap();

        let names: Vec<_> = list_chunks(dir.path(), EntityKind::LandUse)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["Bodemgebruik_10000.parquet", "Bodemgebruik_20000.parquet", "Bodemgebruik_100000.parquet"]
        );
        assert!(list_chunks(dir.path(), EntityKind::Population).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_mixed_kinds() {
        let dir = TempDir::new().unwrap();
        let mut record = region("GM0363", None);
        record.kind = EntityKind::Population;
        let err = write_chunk_file(&dir.path().join("x.parquet"), EntityKind::LandUse, &[record]);
        assert!(err.is_err());
    }
}
