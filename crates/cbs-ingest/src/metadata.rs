//! Metadata sync: the six small dimension collections

use serde::Serialize;
use tracing::{info, warn};

use crate::client::CbsClient;
use crate::error::IngestResult;
use crate::load::type_records;
use crate::models::{dedup_last_wins, EntityKind};
use crate::store::RecordStore;

#[derive(Debug, Clone, Serialize)]
pub struct MetadataCount {
    pub kind: EntityKind,
    pub fetched: u64,
    pub rejected: u64,
    pub upserted: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetadataReport {
    pub kinds: Vec<MetadataCount>,
}

impl MetadataReport {
    pub fn upserted(&self, kind: EntityKind) -> Option<u64> {
        self.kinds.iter().find(|c| c.kind == kind).map(|c| c.upserted)
    }
}

/// Fetch every metadata collection in turn and upsert it. Stops at the first
/// failure; kinds already upserted stay written.
pub async fn sync_metadata(client: &CbsClient, store: &dyn RecordStore) -> IngestResult<MetadataReport> {
    let mut report = MetadataReport::default();

    for kind in EntityKind::METADATA {
        info!(kind = %kind, "Fetching metadata");
        let records = client.fetch_collection(kind).await?;

        let (typed, rejected) = type_records(&records);
        if rejected > 0 {
            warn!(kind = %kind, rejected, "Metadata rows could not be typed and were skipped");
        }

        let upserted = store.upsert(kind, &dedup_last_wins(typed)).await?;
        info!(kind = %kind, upserted, "Upserted metadata");

        report.kinds.push(MetadataCount {
            kind,
            fetched: records.len() as u64,
            rejected,
            upserted,
        });
    }

    Ok(report)
}
