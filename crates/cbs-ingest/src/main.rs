//! CBS Ingest - pulls CBS municipal statistics into PostgreSQL

use anyhow::{Context, Result};
use cbs_analysis::features::{FeatureSet, DEFAULT_TARGET};
use cbs_analysis::growth::growth_by_period;
use cbs_analysis::ranking::{active_regions, top_growth, GrowthMetric};
use cbs_analysis::shares::{divide_by_measure, land_use_distribution, CategoryLevel};
use cbs_common::logging::{init_logging, LogConfig, LogLevel};
use cbs_ingest::chunk::ParquetChunkWriter;
use cbs_ingest::client::CbsClient;
use cbs_ingest::config::IngestConfig;
use cbs_ingest::db::{PanelQuery, RegionScope, TOTAL_AREA};
use cbs_ingest::export::write_features_csv;
use cbs_ingest::fetch::{BulkFetcher, FetchReport};
use cbs_ingest::load::{load_chunk, load_dir};
use cbs_ingest::metadata::sync_metadata;
use cbs_ingest::models::EntityKind;
use cbs_ingest::{PgStore, RecordStore};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs::{self, File};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "cbs-ingest")]
#[command(author, version, about = "CBS municipal statistics ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print stage reports as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Directory for parquet chunk files
    #[arg(long, env = "CBS_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply database migrations
    Migrate,

    /// Fetch and upsert the metadata collections
    Metadata,

    /// Page a fact dataset into chunk files
    Fetch {
        dataset: Dataset,

        /// Concurrent page workers
        #[arg(short, long, env = "CBS_FETCH_WORKERS")]
        workers: Option<usize>,

        /// Rows per page
        #[arg(short, long, env = "CBS_CHUNK_SIZE")]
        chunk_size: Option<u64>,
    },

    /// Upsert chunk files of a fact dataset
    Load {
        dataset: Dataset,

        /// Load a single chunk file instead of the whole directory
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Migrate, sync metadata, then fetch and load both fact datasets
    Run,

    /// Export municipal growth features for regression
    Features {
        /// Output directory for features.csv, train.csv and test.csv
        #[arg(short, long, default_value = "data/features")]
        output: PathBuf,

        /// Share of rows held out for testing
        #[arg(long, default_value_t = 0.2)]
        test_fraction: f64,

        /// Shuffle seed for the train/test split
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// Log the municipalities with the highest population growth
    Ranking {
        /// Number of municipalities to show
        #[arg(short = 'n', long, default_value_t = 5)]
        top: usize,

        /// Periods between the compared values
        #[arg(long, default_value_t = 5)]
        lag: usize,

        /// Rank on relative or absolute growth
        #[arg(long, value_enum, default_value_t = Metric::Relative)]
        metric: Metric,
    },

    /// Land use per category as a share of total area, latest period
    Shares {
        /// Municipalities or the Netherlands as a whole
        #[arg(long, value_enum, default_value_t = Scope::National)]
        scope: Scope,

        /// Top-level categories or their sub-categories
        #[arg(long, value_enum, default_value_t = Level::Totals)]
        level: Level,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Dataset {
    Bevolking,
    Bodemgebruik,
}

impl From<Dataset> for EntityKind {
    fn from(dataset: Dataset) -> Self {
        match dataset {
            Dataset::Bevolking => EntityKind::Population,
            Dataset::Bodemgebruik => EntityKind::LandUse,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Metric {
    Relative,
    Absolute,
}

impl From<Metric> for GrowthMetric {
    fn from(metric: Metric) -> Self {
        match metric {
            Metric::Relative => GrowthMetric::Relative,
            Metric::Absolute => GrowthMetric::Absolute,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Scope {
    Municipalities,
    National,
}

impl From<Scope> for RegionScope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Municipalities => RegionScope::Municipalities,
            Scope::National => RegionScope::National,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Level {
    Totals,
    Sub,
}

impl From<Level> for CategoryLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Totals => CategoryLevel::Totals,
            Level::Sub => CategoryLevel::SubCategories,
        }
    }
}

fn client(config: &IngestConfig) -> Result<Arc<CbsClient>> {
    let client = CbsClient::new(config.feed.clone(), config.fetch.retry_policy())
        .context("Failed to build CBS client")?;
    Ok(Arc::new(client))
}

async fn store(config: &IngestConfig) -> Result<PgStore> {
    let store = PgStore::connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    store.health_check().await.context("Database health check failed")?;
    Ok(store)
}

fn emit<T: Serialize>(json: bool, report: &T) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    }
    Ok(())
}

async fn fetch(config: &IngestConfig, kind: EntityKind) -> Result<FetchReport> {
    let fetcher = BulkFetcher::new(
        client(config)?,
        Arc::new(ParquetChunkWriter::new(&config.data_dir)),
        config.fetch.workers,
        config.fetch.chunk_size,
    )
    .with_progress(std::io::stderr().is_terminal());

    let report = fetcher
        .run(kind)
        .await
        .with_context(|| format!("Failed to fetch {kind}"))?;

    for failure in &report.failed {
        warn!(
            kind = %kind,
            worker = failure.worker,
            offset = failure.offset,
            error = %failure.error,
            "Worker did not finish; rows from this offset on may be missing"
        );
    }
    if !report.is_complete() {
        anyhow::bail!("Fetch of {kind} incomplete: {} worker(s) failed", report.failed.len());
    }

    info!(kind = %kind, rows = report.rows, chunks = report.chunks.len(), "Fetch complete");
    Ok(report)
}

async fn features(store: &PgStore, output: PathBuf, test_fraction: f64, seed: u64) -> Result<()> {
    let panel = store
        .panel(PanelQuery {
            scope: RegionScope::Municipalities,
            land_use: true,
        })
        .await
        .context("Failed to load municipal panel")?
        .fill_missing(0.0)
        .drop_empty_measures();

    let growth = growth_by_period(&panel, 1)?.normalized();
    let set = FeatureSet::from_growth(&growth, DEFAULT_TARGET)?;
    let (train, test) = set.train_test_split(test_fraction, seed)?;

    fs::create_dir_all(&output).with_context(|| format!("Failed to create {}", output.display()))?;
    for (name, part) in [("features.csv", &set), ("train.csv", &train), ("test.csv", &test)] {
        let path = output.join(name);
        let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
        write_features_csv(part, file)?;
    }

    info!(
        rows = set.len(),
        features = set.feature_names.len(),
        train = train.len(),
        test = test.len(),
        output = %output.display(),
        "Exported growth features"
    );
    Ok(())
}

async fn ranking(store: &PgStore, top: usize, lag: usize, metric: GrowthMetric) -> Result<()> {
    let panel = store
        .panel(PanelQuery {
            scope: RegionScope::Municipalities,
            land_use: false,
        })
        .await
        .context("Failed to load municipal panel")?;

    let active = active_regions(&panel, DEFAULT_TARGET)?;
    let growth = growth_by_period(&panel.retain_regions(&active), lag)?;

    for (rank, region) in top_growth(&growth, DEFAULT_TARGET, metric, top)?.iter().enumerate() {
        info!(
            rank = rank + 1,
            region = %region.region,
            period = %region.period,
            population = region.value,
            previous = region.previous,
            growth_pct = region.growth * 100.0,
            change = region.change,
            "Population growth"
        );
    }
    Ok(())
}

async fn shares(store: &PgStore, scope: RegionScope, level: CategoryLevel, json: bool) -> Result<()> {
    let panel = store
        .panel(PanelQuery { scope, land_use: true })
        .await
        .context("Failed to load land use panel")?;

    let Some(period) = panel.latest_period().map(str::to_string) else {
        warn!(scope = ?scope, "No land use data loaded");
        return Ok(());
    };

    let relative = divide_by_measure(&panel, TOTAL_AREA, &[DEFAULT_TARGET])?;
    let entries = land_use_distribution(&relative, &period, level);
    for entry in &entries {
        info!(
            region = %entry.region,
            period = %period,
            category = %entry.category,
            share_pct = entry.share * 100.0,
            "Land use share"
        );
    }
    emit(json, &entries)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { LogLevel::Debug } else { LogLevel::Info };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("cbs-ingest")
        .build()
        .with_env_overrides()?;
    let _guard = init_logging(&log_config)?;

    let mut config = IngestConfig::load()?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }

    match cli.command {
        Command::Migrate => {
            store(&config).await?.migrate().await?;
        },
        Command::Metadata => {
            let store = store(&config).await?;
            let report = sync_metadata(client(&config)?.as_ref(), &store)
                .await
                .context("Metadata sync failed")?;
            emit(cli.json, &report)?;
        },
        Command::Fetch {
            dataset,
            workers,
            chunk_size,
        } => {
            if let Some(workers) = workers {
                config.fetch.workers = workers;
            }
            if let Some(chunk_size) = chunk_size {
                config.fetch.chunk_size = chunk_size;
            }
            config.validate()?;
            emit(cli.json, &fetch(&config, dataset.into()).await?)?;
        },
        Command::Load { dataset, file } => {
            let store = store(&config).await?;
            let kind = EntityKind::from(dataset);
            let report = match file {
                Some(path) => {
                    let allowed = store.region_keys().await?;
                    load_chunk(&store, &path, kind, Some(&allowed)).await?
                },
                None => load_dir(&store, &config.data_dir, kind, None).await?,
            };
            emit(cli.json, &report)?;
        },
        Command::Run => {
            let store = store(&config).await?;
            store.migrate().await?;
            let metadata = sync_metadata(client(&config)?.as_ref(), &store)
                .await
                .context("Metadata sync failed")?;
            emit(cli.json, &metadata)?;
            for kind in EntityKind::FACTS {
                emit(cli.json, &fetch(&config, kind).await?)?;
                emit(cli.json, &load_dir(&store, &config.data_dir, kind, None).await?)?;
            }
        },
        Command::Features {
            output,
            test_fraction,
            seed,
        } => {
            features(&store(&config).await?, output, test_fraction, seed).await?;
        },
        Command::Ranking { top, lag, metric } => {
            ranking(&store(&config).await?, top, lag, metric.into()).await?;
        },
        Command::Shares { scope, level } => {
            shares(&store(&config).await?, scope.into(), level.into(), cli.json).await?;
        },
    }

    info!("Done");
    Ok(())
}
