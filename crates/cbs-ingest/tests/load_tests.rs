//! Load stage over real chunk files

mod common;

use cbs_ingest::chunk::{chunk_dir, chunk_path, write_chunk_file};
use cbs_ingest::load::{load_chunk, load_dir, load_records};
use cbs_ingest::models::{EntityKind, FieldValue};
use common::{land_use_record, MemoryStore};
use std::collections::HashSet;
use std::fs;
use tempfile::TempDir;

fn write_chunk(dir: &TempDir, offset: u64, ids: std::ops::Range<u64>, region: &str) {
    let records: Vec<_> = ids.map(|id| land_use_record(id, region)).collect();
    let path = chunk_path(dir.path(), EntityKind::LandUse, offset);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    write_chunk_file(&path, EntityKind::LandUse, &records).unwrap();
}

#[tokio::test]
async fn test_loading_twice_leaves_store_unchanged() {
    let dir = TempDir::new().unwrap();
    write_chunk(&dir, 10, 0..10, "GM0363");
    write_chunk(&dir, 20, 10..15, "GM0363");

    let store = MemoryStore::with_regions(&["GM0363"]).await;
    let first = load_dir(&store, dir.path(), EntityKind::LandUse, None).await.unwrap();
    let once = store.snapshot(EntityKind::LandUse).await;

    let second = load_dir(&store, dir.path(), EntityKind::LandUse, None).await.unwrap();
    let twice = store.snapshot(EntityKind::LandUse).await;

    assert_eq!(once.len(), 15);
    assert_eq!(once, twice);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_rows_outside_known_regions_never_reach_store() {
    let dir = TempDir::new().unwrap();
    write_chunk(&dir, 10, 0..10, "GM0363");
    write_chunk(&dir, 20, 10..20, "WK036300");
    write_chunk(&dir, 30, 20..25, "NL01");

    let store = MemoryStore::with_regions(&["GM0363", "NL01  "]).await;
    let report = load_dir(&store, dir.path(), EntityKind::LandUse, None).await.unwrap();

    assert_eq!(report.files, 3);
    assert_eq!(report.read, 25);
    assert_eq!(report.filtered, 15);
    assert_eq!(report.upserted, 10);
    for record in store.snapshot(EntityKind::LandUse).await {
        assert_eq!(record.get("regio_key"), Some(&FieldValue::Text("GM0363".into())));
    }
}

#[tokio::test]
async fn test_explicit_region_set_overrides_store() {
    let dir = TempDir::new().unwrap();
    write_chunk(&dir, 10, 0..4, "GM0363");
    write_chunk(&dir, 20, 4..8, "GM0599");

    let store = MemoryStore::with_regions(&["GM0363"]).await;
    let allowed: HashSet<String> = ["GM0599".to_string()].into_iter().collect();
    let report = load_dir(&store, dir.path(), EntityKind::LandUse, Some(allowed)).await.unwrap();

    assert_eq!(report.upserted, 4);
    assert!(store
        .get(EntityKind::LandUse, FieldValue::Integer(5))
        .await
        .is_some());
    assert!(store
        .get(EntityKind::LandUse, FieldValue::Integer(1))
        .await
        .is_none());
}

#[tokio::test]
async fn test_truncated_chunk_is_skipped() {
    let dir = TempDir::new().unwrap();
    write_chunk(&dir, 10, 0..5, "GM0363");
    write_chunk(&dir, 20, 5..10, "GM0363");

    let broken = chunk_path(dir.path(), EntityKind::LandUse, 20);
    let bytes = fs::read(&broken).unwrap();
    fs::write(&broken, &bytes[..bytes.len() / 2]).unwrap();

    let store = MemoryStore::with_regions(&["GM0363"]).await;
    let report = load_dir(&store, dir.path(), EntityKind::LandUse, None).await.unwrap();

    assert_eq!(report.files, 1);
    assert_eq!(report.skipped_files, vec![broken]);
    assert_eq!(store.count(EntityKind::LandUse).await, 5);
}

#[tokio::test]
async fn test_single_chunk_load() {
    let dir = TempDir::new().unwrap();
    write_chunk(&dir, 10, 0..3, "GM0363");

    let store = MemoryStore::new();
    let path = chunk_path(dir.path(), EntityKind::LandUse, 10);
    let report = load_chunk(&store, &path, EntityKind::LandUse, None).await.unwrap();

    assert_eq!(report.files, 1);
    assert_eq!(report.upserted, 3);
}

#[tokio::test]
async fn test_missing_directory_loads_nothing() {
    let dir = TempDir::new().unwrap();
    assert!(!chunk_dir(dir.path(), EntityKind::Population).exists());

    let store = MemoryStore::new();
    let report = load_dir(&store, dir.path(), EntityKind::Population, Some(HashSet::new()))
        .await
        .unwrap();
    assert_eq!(report.files, 0);
    assert_eq!(report.upserted, 0);
}

#[tokio::test]
async fn test_last_row_wins_within_batch() {
    let mut newer = land_use_record(7, "GM0363");
    newer.values[3] = Some("2024".to_string());

    let store = MemoryStore::new();
    let report = load_records(
        &store,
        EntityKind::LandUse,
        vec![land_use_record(7, "GM0363"), land_use_record(8, "GM0363"), newer],
        None,
    )
    .await
    .unwrap();

    assert_eq!(report.read, 3);
    assert_eq!(report.upserted, 2);
    let stored = store
        .get(EntityKind::LandUse, FieldValue::Integer(7))
        .await
        .unwrap();
    assert_eq!(stored.values[3], FieldValue::Integer(2024));
    assert_eq!(store.upsert_calls(), 1);
}
