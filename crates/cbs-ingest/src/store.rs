//! Storage seam between the pipeline and the database

use async_trait::async_trait;
use std::collections::HashSet;

use crate::error::IngestResult;
use crate::models::{EntityKind, TypedRecord};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert-or-update `records` by natural key. Records must be of `kind`
    /// and free of duplicate keys. Returns the number of rows written.
    async fn upsert(&self, kind: EntityKind, records: &[TypedRecord]) -> IngestResult<u64>;

    /// Every region key currently in the region table
    async fn region_keys(&self) -> IngestResult<HashSet<String>>;
}
