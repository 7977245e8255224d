//! CBS Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pulls Dutch municipal statistics from the CBS (Statistics Netherlands)
//! OData Atom feeds into PostgreSQL.
//!
//! # Stages
//!
//! - **Metadata**: the six dimension collections (regions, periods, ages,
//!   genders, marital statuses, age category groups), one request each
//! - **Bulk fetch**: population and land use facts, paged by concurrent
//!   workers into parquet chunk files
//! - **Load**: chunk files filtered on known regions and upserted by
//!   natural key
//!
//! # Example
//!
//! ```no_run
//! use cbs_ingest::{
//!     chunk::ParquetChunkWriter, client::CbsClient, config::IngestConfig, fetch::BulkFetcher,
//!     load::load_dir, models::EntityKind, PgStore,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::load()?;
//!     let client = Arc::new(CbsClient::new(config.feed.clone(), config.fetch.retry_policy())?);
//!     let sink = Arc::new(ParquetChunkWriter::new(&config.data_dir));
//!
//!     let fetcher = BulkFetcher::new(client, sink, config.fetch.workers, config.fetch.chunk_size);
//!     fetcher.run(EntityKind::Population).await?;
//!
//!     let store = PgStore::connect(&config.database).await?;
//!     load_dir(&store, &config.data_dir, EntityKind::Population, None).await?;
//!     Ok(())
//! }
//! ```

pub mod chunk;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod feed;
pub mod fetch;
pub mod load;
pub mod metadata;
pub mod models;
pub mod store;

pub use db::PgStore;
pub use error::{IngestError, IngestResult};
pub use store::RecordStore;
