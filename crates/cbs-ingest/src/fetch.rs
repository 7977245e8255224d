//! Paginated bulk fetch of fact datasets
//!
//! N workers share one [`IngestCursor`]. Each claims the next offset with a
//! single fetch-and-add, requests that page, writes it as a chunk file and
//! loops until it sees an empty page. Offsets are unique and increasing, so
//! no page is fetched twice and none is skipped; a few wasted empty requests
//! at the end are expected. A short page is topped up from the same range
//! before the chunk is written, so a server-side page cap cannot open gaps.

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::chunk::ChunkSink;
use crate::client::PageSource;
use crate::error::{IngestError, IngestResult};
use crate::models::{EntityKind, FlatRecord};

/// Shared row offset for one dataset
#[derive(Debug)]
pub struct IngestCursor {
    next: AtomicU64,
    step: u64,
}

impl IngestCursor {
    pub fn new(step: u64) -> Self {
        Self {
            next: AtomicU64::new(0),
            step,
        }
    }

    /// Take ownership of the next `step` rows, returning their first offset
    pub fn claim(&self) -> u64 {
        self.next.fetch_add(self.step, Ordering::SeqCst)
    }

    /// Offset the next claim will return
    pub fn position(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

/// A worker that stopped on an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerFailure {
    pub worker: usize,
    /// Offset of the page the worker could not finish
    pub offset: u64,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchReport {
    pub kind: EntityKind,
    pub rows: u64,
    pub pages: u64,
    /// Chunk files written, ordered by offset
    pub chunks: Vec<PathBuf>,
    pub failed: Vec<WorkerFailure>,
}

impl FetchReport {
    fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            rows: 0,
            pages: 0,
            chunks: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// True when every worker ended on an empty page
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

struct WorkerOutcome {
    rows: u64,
    chunks: Vec<(u64, PathBuf)>,
    failure: Option<WorkerFailure>,
}

#[derive(Clone)]
struct Worker {
    id: usize,
    kind: EntityKind,
    chunk_size: u64,
    cursor: Arc<IngestCursor>,
    source: Arc<dyn PageSource>,
    sink: Arc<dyn ChunkSink>,
    progress: ProgressBar,
}

impl Worker {
    async fn run(self) -> WorkerOutcome {
        let mut outcome = WorkerOutcome {
            rows: 0,
            chunks: Vec::new(),
            failure: None,
        };

        loop {
            let offset = self.cursor.claim();

            let records = match self.fetch_range(offset).await {
                Ok(records) => records,
                Err(e) => {
                    outcome.failure = Some(self.failed(offset, &e));
                    break;
                },
            };

            if records.is_empty() {
                debug!(worker = self.id, kind = %self.kind, offset, "Empty page, worker done");
                break;
            }

            let count = records.len() as u64;
            let cumulative = offset + self.chunk_size;
            match self.sink.write_chunk(self.kind, cumulative, records).await {
                Ok(path) => {
                    debug!(worker = self.id, kind = %self.kind, offset, rows = count, "Chunk written");
                    outcome.rows += count;
                    outcome.chunks.push((offset, path));
                    self.progress.inc(count);
                },
                Err(e) => {
                    outcome.failure = Some(self.failed(offset, &e));
                    break;
                },
            }
        }

        outcome
    }

    /// Rows `offset..offset + chunk_size`. A source that caps pages below the
    /// chunk size answers with a short page; the rest of the range is
    /// requested until it is full or the data ends.
    async fn fetch_range(&self, offset: u64) -> IngestResult<Vec<FlatRecord>> {
        let mut records = self.source.fetch_page(self.kind, offset, self.chunk_size).await?;

        while !records.is_empty() && (records.len() as u64) < self.chunk_size {
            let got = records.len() as u64;
            let rest = self
                .source
                .fetch_page(self.kind, offset + got, self.chunk_size - got)
                .await?;
            if rest.is_empty() {
                break;
            }
            debug!(worker = self.id, kind = %self.kind, offset, got, more = rest.len(), "Short page");
            records.extend(rest);
        }

        Ok(records)
    }

    fn failed(&self, offset: u64, error: &IngestError) -> WorkerFailure {
        warn!(worker = self.id, kind = %self.kind, offset, error = %error, "Fetch worker failed");
        WorkerFailure {
            worker: self.id,
            offset,
            error: error.to_string(),
        }
    }
}

pub struct BulkFetcher {
    source: Arc<dyn PageSource>,
    sink: Arc<dyn ChunkSink>,
    workers: usize,
    chunk_size: u64,
    show_progress: bool,
}

impl BulkFetcher {
    pub fn new(source: Arc<dyn PageSource>, sink: Arc<dyn ChunkSink>, workers: usize, chunk_size: u64) -> Self {
        Self {
            source,
            sink,
            workers,
            chunk_size,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn progress_bar(&self, kind: EntityKind) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} {pos} rows [{elapsed_precise}]") {
            pb.set_style(style);
        }
        pb.set_message(format!("Fetching {kind}"));
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Fetch every row of `kind` into chunk files
    pub async fn run(&self, kind: EntityKind) -> IngestResult<FetchReport> {
        if self.workers == 0 || self.chunk_size == 0 {
            return Err(IngestError::Config(
                "bulk fetch needs at least one worker and a non-zero chunk size".to_string(),
            ));
        }

        info!(kind = %kind, workers = self.workers, chunk_size = self.chunk_size, "Starting bulk fetch");

        let progress = self.progress_bar(kind);
        let cursor = Arc::new(IngestCursor::new(self.chunk_size));
        let mut set = JoinSet::new();

        for id in 0..self.workers {
            let worker = Worker {
                id,
                kind,
                chunk_size: self.chunk_size,
                cursor: Arc::clone(&cursor),
                source: Arc::clone(&self.source),
                sink: Arc::clone(&self.sink),
                progress: progress.clone(),
            };
            set.spawn(worker.run());
        }

        let mut report = FetchReport::new(kind);
        let mut chunks = Vec::new();

        while let Some(joined) = set.join_next().await {
            let outcome = joined
                .map_err(|e| IngestError::Io(std::io::Error::other(format!("fetch worker panicked: {e}"))))?;
            report.rows += outcome.rows;
            report.pages += outcome.chunks.len() as u64;
            chunks.extend(outcome.chunks);
            report.failed.extend(outcome.failure);
        }

        progress.finish_and_clear();
        chunks.sort_by_key(|(offset, _)| *offset);
        report.chunks = chunks.into_iter().map(|(_, path)| path).collect();
        report.failed.sort_by_key(|f| f.offset);

        if report.is_complete() {
            info!(kind = %kind, rows = report.rows, pages = report.pages, "Bulk fetch complete");
        } else {
            warn!(
                kind = %kind,
                rows = report.rows,
                failed_workers = report.failed.len(),
                "Bulk fetch finished with failed workers"
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_claims_are_unique_and_strided() {
        let cursor = IngestCursor::new(10);
        assert_eq!(cursor.claim(), 0);
        assert_eq!(cursor.claim(), 10);
        assert_eq!(cursor.position(), 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_never_collide() {
        let cursor = Arc::new(IngestCursor::new(7));
        let mut set = JoinSet::new();
        for _ in 0..8 {
            let cursor = Arc::clone(&cursor);
            set.spawn(async move { (0..250).map(|_| cursor.claim()).collect::<Vec<_>>() });
        }

        let mut seen = HashSet::new();
        while let Some(claims) = set.join_next().await {
            for offset in claims.unwrap() {
                assert!(seen.insert(offset), "offset {offset} claimed twice");
            }
        }
        assert_eq!(seen.len(), 2000);
        assert!(seen.iter().all(|o| o % 7 == 0));
        assert_eq!(cursor.position(), 2000 * 7);
    }
}
