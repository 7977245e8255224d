//! Shared helpers for cbs-ingest integration tests
//!
//! - [`MemoryStore`]: a [`RecordStore`] backed by a map, upserting by key
//! - [`CollectingSink`]: a [`ChunkSink`] that keeps pages in memory
//! - [`SyntheticSource`]: a [`PageSource`] over `R` generated rows
//! - Atom feed fixtures

#![allow(dead_code, clippy::unwrap_used)]

use async_trait::async_trait;
use cbs_ingest::chunk::ChunkSink;
use cbs_ingest::client::PageSource;
use cbs_ingest::models::{EntityKind, FieldValue, FlatRecord, TypedRecord};
use cbs_ingest::{IngestError, IngestResult, RecordStore};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

// ============================================================================
// Store
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<(EntityKind, FieldValue), TypedRecord>>,
    upsert_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose region table already holds `keys`
    pub async fn with_regions(keys: &[&str]) -> Self {
        let store = Self::new();
        let regions: Vec<TypedRecord> = keys
            .iter()
            .map(|k| TypedRecord {
                kind: EntityKind::Region,
                values: vec![FieldValue::Text(k.to_string()), FieldValue::Null, FieldValue::Null],
            })
            .collect();
        store.upsert(EntityKind::Region, &regions).await.unwrap();
        store
    }

    pub async fn count(&self, kind: EntityKind) -> usize {
        self.rows.lock().await.keys().filter(|(k, _)| *k == kind).count()
    }

    pub async fn get(&self, kind: EntityKind, key: FieldValue) -> Option<TypedRecord> {
        self.rows.lock().await.get(&(kind, key)).cloned()
    }

    /// Sorted snapshot of one kind, for comparing store states
    pub async fn snapshot(&self, kind: EntityKind) -> Vec<TypedRecord> {
        let rows = self.rows.lock().await;
        let mut out: Vec<TypedRecord> = rows
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, r)| r.clone())
            .collect();
        out.sort_by_key(|r| format!("{:?}", r.key()));
        out
    }

    pub async fn region_keys_sorted(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.region_keys().await.unwrap().into_iter().collect();
        keys.sort();
        keys
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert(&self, kind: EntityKind, records: &[TypedRecord]) -> IngestResult<u64> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().await;
        for record in records {
            assert_eq!(record.kind, kind);
            rows.insert((kind, record.key().clone()), record.clone());
        }
        Ok(records.len() as u64)
    }

    async fn region_keys(&self) -> IngestResult<HashSet<String>> {
        Ok(self
            .rows
            .lock()
            .await
            .keys()
            .filter(|(k, _)| *k == EntityKind::Region)
            .filter_map(|(_, key)| key.as_text().map(str::to_string))
            .collect())
    }
}

// ============================================================================
// Sink
// ============================================================================

#[derive(Default)]
pub struct CollectingSink {
    pub chunks: Mutex<Vec<(u64, Vec<FlatRecord>)>>,
}

impl CollectingSink {
    pub async fn all_records(&self) -> Vec<FlatRecord> {
        self.chunks
            .lock()
            .await
            .iter()
            .flat_map(|(_, records)| records.clone())
            .collect()
    }
}

#[async_trait]
impl ChunkSink for CollectingSink {
    async fn write_chunk(
        &self,
        kind: EntityKind,
        cumulative_offset: u64,
        records: Vec<FlatRecord>,
    ) -> IngestResult<PathBuf> {
        self.chunks.lock().await.push((cumulative_offset, records));
        Ok(PathBuf::from(format!("{}_{cumulative_offset}", kind.file_stem())))
    }
}

// ============================================================================
// Source
// ============================================================================

/// Serves `total` land use rows with ids `0..total`; optionally fails every
/// request at `fail_at`, and optionally never returns more than `cap` rows
/// per page the way the CBS feed caps `$top`
pub struct SyntheticSource {
    pub total: u64,
    pub fail_at: Option<u64>,
    pub cap: Option<u64>,
    pub requests: AtomicUsize,
}

impl SyntheticSource {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            fail_at: None,
            cap: None,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn capped(total: u64, cap: u64) -> Self {
        Self {
            cap: Some(cap),
            ..Self::new(total)
        }
    }

    pub fn failing_at(total: u64, offset: u64) -> Self {
        Self {
            fail_at: Some(offset),
            ..Self::new(total)
        }
    }
}

pub fn land_use_record(id: u64, region: &str) -> FlatRecord {
    let mut values = vec![None; EntityKind::LandUse.columns().len()];
    values[0] = Some(id.to_string());
    values[1] = Some(region.to_string());
    values[2] = Some("2015JJ00".to_string());
    values[3] = Some((1000 + id).to_string());
    FlatRecord {
        kind: EntityKind::LandUse,
        values,
    }
}

#[async_trait]
impl PageSource for SyntheticSource {
    async fn fetch_page(&self, kind: EntityKind, offset: u64, limit: u64) -> IngestResult<Vec<FlatRecord>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(offset) {
            return Err(IngestError::RetriesExhausted {
                url: format!("synthetic?$skip={offset}"),
                attempts: 3,
                last_error: "HTTP 503".to_string(),
            });
        }
        // Let other workers interleave.
        tokio::task::yield_now().await;

        let limit = self.cap.map_or(limit, |cap| limit.min(cap));
        let end = (offset + limit).min(self.total);
        Ok((offset..end)
            .map(|id| {
                let mut record = land_use_record(id, "GM0363");
                record.kind = kind;
                record
            })
            .collect())
    }
}

// ============================================================================
// Feed fixtures
// ============================================================================

/// An Atom feed whose entries carry the given `d:` properties
pub fn feed_xml(entries: &[Vec<(&str, Option<&str>)>]) -> String {
    let mut body = String::new();
    for properties in entries {
        body.push_str("<entry><content type=\"application/xml\"><m:properties>");
        for (name, value) in properties {
            match value {
                Some(v) => body.push_str(&format!("<d:{name}>{v}</d:{name}>")),
                None => body.push_str(&format!("<d:{name} m:null=\"true\" />")),
            }
        }
        body.push_str("</m:properties></content></entry>");
    }

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:d="http://schemas.microsoft.com/ado/2007/08/dataservices" xmlns:m="http://schemas.microsoft.com/ado/2007/08/dataservices/metadata"><title type="text">TypedDataSet</title>{body}</feed>"#
    )
}

/// Land use TypedDataSet page with ids `from..to`
pub fn land_use_page(from: u64, to: u64) -> String {
    let ids: Vec<String> = (from..to).map(|i| i.to_string()).collect();
    let entries: Vec<Vec<(&str, Option<&str>)>> = ids
        .iter()
        .map(|id| {
            vec![
                ("ID", Some(id.as_str())),
                ("RegioS", Some("GM0363")),
                ("Perioden", Some("2015JJ00")),
                ("TotaleOppervlakte_1", Some("21948")),
            ]
        })
        .collect();
    feed_xml(&entries)
}
