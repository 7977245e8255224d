//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::client::RetryPolicy;
use crate::error::{IngestError, IngestResult};
use crate::models::EntityKind;

// ============================================================================
// Feed Configuration Constants
// ============================================================================

/// Root of the CBS OData Atom feeds.
pub const DEFAULT_FEED_BASE_URL: &str = "https://opendata.cbs.nl/ODataFeed/odata";

/// Population by gender, age and marital status; also hosts the metadata
/// collections.
pub const DEFAULT_POPULATION_DATASET: &str = "03759ned";

/// Land use by hectare.
pub const DEFAULT_LAND_USE_DATASET: &str = "70262ned";

/// Default HTTP request timeout in seconds. Pages of 10 000 entries are slow.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

// ============================================================================
// Fetch Configuration Constants
// ============================================================================

/// Default number of concurrent page workers per dataset.
pub const DEFAULT_FETCH_WORKERS: usize = 4;

/// Default number of rows requested per page.
pub const DEFAULT_CHUNK_SIZE: u64 = 10_000;

/// Largest page the CBS feed serves; `$top` above this is capped server-side.
pub const MAX_CHUNK_SIZE: u64 = 10_000;

/// Default number of attempts per request, including the first.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default delay before the first retry, in milliseconds. Doubles per attempt.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;

// ============================================================================
// Storage Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/cbs";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default directory for parquet chunk files.
pub const DEFAULT_DATA_DIR: &str = "data/parquet";

/// Ingest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub feed: FeedConfig,
    pub fetch: FetchConfig,
    pub database: DatabaseConfig,
    pub data_dir: PathBuf,
}

/// Where the CBS feeds live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub base_url: String,
    pub population_dataset: String,
    pub land_use_dataset: String,
    pub timeout_secs: u64,
}

/// Bulk fetch tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub workers: usize,
    pub chunk_size: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

impl FeedConfig {
    /// CBS dataset id holding the given entity
    pub fn dataset_for(&self, kind: EntityKind) -> &str {
        match kind {
            EntityKind::LandUse => &self.land_use_dataset,
            _ => &self.population_dataset,
        }
    }

    /// Collection URL, e.g. `.../03759ned/RegioS` or `.../70262ned/TypedDataSet`
    pub fn collection_url(&self, kind: EntityKind) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.dataset_for(kind),
            kind.endpoint()
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl FetchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl IngestConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> IngestResult<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Build from an arbitrary key lookup; unparsable values fall back to
    /// their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            feed: FeedConfig {
                base_url: lookup("CBS_FEED_BASE_URL").unwrap_or(defaults.feed.base_url),
                population_dataset: lookup("CBS_POPULATION_DATASET")
                    .unwrap_or(defaults.feed.population_dataset),
                land_use_dataset: lookup("CBS_LAND_USE_DATASET").unwrap_or(defaults.feed.land_use_dataset),
                timeout_secs: parsed(&lookup, "CBS_REQUEST_TIMEOUT", DEFAULT_REQUEST_TIMEOUT_SECS),
            },
            fetch: FetchConfig {
                workers: parsed(&lookup, "CBS_FETCH_WORKERS", DEFAULT_FETCH_WORKERS),
                chunk_size: parsed(&lookup, "CBS_CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
                retry_attempts: parsed(&lookup, "CBS_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS),
                retry_delay_ms: parsed(&lookup, "CBS_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS),
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: parsed(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: parsed(&lookup, "DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: parsed(
                    &lookup,
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
            },
            data_dir: lookup("CBS_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> IngestResult<()> {
        if self.feed.base_url.is_empty() {
            return Err(IngestError::Config("Feed base URL cannot be empty".to_string()));
        }

        if self.fetch.workers == 0 {
            return Err(IngestError::Config("Fetch workers must be greater than 0".to_string()));
        }

        if self.fetch.chunk_size == 0 {
            return Err(IngestError::Config("Chunk size must be greater than 0".to_string()));
        }

        if self.fetch.chunk_size > MAX_CHUNK_SIZE {
            return Err(IngestError::Config(format!(
                "Chunk size {} exceeds the feed page limit of {MAX_CHUNK_SIZE}",
                self.fetch.chunk_size
            )));
        }

        if self.fetch.retry_attempts == 0 {
            return Err(IngestError::Config("Retry attempts must be at least 1".to_string()));
        }

        if self.database.url.is_empty() {
            return Err(IngestError::Config("Database URL cannot be empty".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(IngestError::Config(
                "Database max_connections must be greater than 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(IngestError::Config(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        Ok(())
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig {
                base_url: DEFAULT_FEED_BASE_URL.to_string(),
                population_dataset: DEFAULT_POPULATION_DATASET.to_string(),
                land_use_dataset: DEFAULT_LAND_USE_DATASET.to_string(),
                timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            },
            fetch: FetchConfig {
                workers: DEFAULT_FETCH_WORKERS,
                chunk_size: DEFAULT_CHUNK_SIZE,
                retry_attempts: DEFAULT_RETRY_ATTEMPTS,
                retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}
