//! Postgres store
//!
//! Upserts are multi-row `INSERT ... ON CONFLICT (key) DO UPDATE` statements
//! built with [`QueryBuilder::push_values`], split so no statement exceeds
//! the Postgres bind parameter limit, and run in one transaction per call.

use async_trait::async_trait;
use cbs_analysis::Panel;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Row};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::{IngestError, IngestResult};
use crate::models::{ColumnType, EntityKind, FieldValue, TypedRecord};
use crate::store::RecordStore;

/// Postgres accepts at most this many bind parameters per statement
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Region key prefix of municipalities (gemeentes)
pub const MUNICIPALITY_PREFIX: &str = "GM";
/// Region key of the Netherlands as a whole, trailing spaces included
pub const NATIONAL_REGION_KEY: &str = "NL01  ";

/// Land use measure every other category is a share of
pub const TOTAL_AREA: &str = "totale_oppervlakte";

const TOTAL_GENDER: &str = "Totaal mannen en vrouwen";
const TOTAL_CATEGORY_GROUP: &str = "Totaal";
const TOTAL_MARITAL_STATUS: &str = "Totaal burgerlijke staat";

pub async fn create_pool(config: &DatabaseConfig) -> IngestResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await?;

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// `INSERT INTO {table} ({columns}) `
pub fn insert_prefix(kind: EntityKind) -> String {
    let columns: Vec<&str> = kind.columns().iter().map(|c| c.name).collect();
    format!("INSERT INTO {} ({}) ", kind.table(), columns.join(", "))
}

/// ` ON CONFLICT ({key}) DO UPDATE SET col = EXCLUDED.col, ...`
pub fn conflict_clause(kind: EntityKind) -> String {
    let updates: Vec<String> = kind.columns()[1..]
        .iter()
        .map(|c| format!("{0} = EXCLUDED.{0}", c.name))
        .collect();

    if updates.is_empty() {
        format!(" ON CONFLICT ({}) DO NOTHING", kind.key_column().name)
    } else {
        format!(" ON CONFLICT ({}) DO UPDATE SET {}", kind.key_column().name, updates.join(", "))
    }
}

pub fn rows_per_statement(kind: EntityKind) -> usize {
    (MAX_BIND_PARAMS / kind.columns().len()).max(1)
}

/// Which regions a panel covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionScope {
    /// Every `GM*` region
    Municipalities,
    /// Only `NL01  `
    National,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelQuery {
    pub scope: RegionScope,
    /// Join land use on (region, period); keeps only periods with land use data
    pub land_use: bool,
}

impl PanelQuery {
    pub fn measures(&self) -> Vec<&'static str> {
        let mut measures = vec!["bevolking_1_januari"];
        if self.land_use {
            measures.extend(
                EntityKind::LandUse
                    .columns()
                    .iter()
                    .filter(|c| c.column_type == ColumnType::Integer && c.name != "id")
                    .map(|c| c.name),
            );
        }
        measures
    }

    /// SQL for the panel; binds are region filter, gender, category group,
    /// marital status
    pub fn sql(&self) -> String {
        let mut select = vec!["r.regio".to_string(), "p.jaar".to_string(), "b.bevolking_1_januari".to_string()];
        if self.land_use {
            select.extend(self.measures()[1..].iter().map(|m| format!("g.{m}")));
        }

        let land_use_join = if self.land_use {
            "JOIN bodemgebruik g ON b.regio_key = g.regio_key AND b.datum_key = g.datum_key\n"
        } else {
            ""
        };

        let region_filter = match self.scope {
            RegionScope::Municipalities => "r.regio_key LIKE $1",
            RegionScope::National => "r.regio_key = $1",
        };

        format!(
            "SELECT {}\n\
             FROM bevolking b\n\
             JOIN geslacht gs ON b.geslacht_key = gs.geslacht_key\n\
             JOIN perioden p ON b.datum_key = p.datum_key\n\
             JOIN regios r ON b.regio_key = r.regio_key\n\
             JOIN leeftijd l ON b.leeftijd_key = l.leeftijd_key\n\
             JOIN categorygroup c ON l.categorygroupid = c.catgroup_key\n\
             JOIN burgerlijkestaat bs ON b.burgst_key = bs.burgst_key\n\
             {land_use_join}\
             WHERE {region_filter}\n  \
               AND gs.geslacht = $2\n  \
               AND c.catgroup = $3\n  \
               AND bs.burgerlijkestaat = $4\n\
             ORDER BY r.regio, p.jaar",
            select.join(", ")
        )
    }

    fn region_bind(&self) -> String {
        match self.scope {
            RegionScope::Municipalities => format!("{MUNICIPALITY_PREFIX}%"),
            RegionScope::National => NATIONAL_REGION_KEY.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> IngestResult<Self> {
        Ok(Self::new(create_pool(config).await?))
    }

    pub async fn migrate(&self) -> IngestResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    pub async fn health_check(&self) -> IngestResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(IngestError::from)
    }

    /// Population (and optionally land use) per region name and year, for
    /// the "total" gender, age group and marital status
    pub async fn panel(&self, query: PanelQuery) -> IngestResult<Panel> {
        let measures = query.measures();
        let sql = query.sql();

        let rows = sqlx::query(&sql)
            .bind(query.region_bind())
            .bind(TOTAL_GENDER)
            .bind(TOTAL_CATEGORY_GROUP)
            .bind(TOTAL_MARITAL_STATUS)
            .fetch_all(&self.pool)
            .await?;

        let mut panel = Panel::new(measures.iter().map(|m| m.to_string()).collect());
        for row in rows {
            let region: Option<String> = row.try_get(0)?;
            let period: Option<String> = row.try_get(1)?;
            let (Some(region), Some(period)) = (region, period) else {
                continue;
            };

            let values = (0..measures.len())
                .map(|i| row.try_get::<Option<i64>, _>(i + 2).map(|v| v.map(|v| v as f64)))
                .collect::<Result<Vec<_>, _>>()?;
            panel.push(region, period, values)?;
        }

        debug!(rows = panel.len(), scope = ?query.scope, "Loaded panel");
        Ok(panel)
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn upsert(&self, kind: EntityKind, records: &[TypedRecord]) -> IngestResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let columns = kind.columns();
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for batch in records.chunks(rows_per_statement(kind)) {
            let mut query_builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(insert_prefix(kind));

            query_builder.push_values(batch, |mut b, record| {
                for (column, value) in columns.iter().zip(&record.values) {
                    match (value, column.column_type) {
                        (FieldValue::Text(s), _) => b.push_bind(s.clone()),
                        (FieldValue::Integer(v), _) => b.push_bind(*v),
                        (FieldValue::Null, ColumnType::Text) => b.push_bind(None::<String>),
                        (FieldValue::Null, ColumnType::Integer) => b.push_bind(None::<i64>),
                    };
                }
            });
            query_builder.push(conflict_clause(kind));

            let result = query_builder.build().execute(&mut *tx).await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        debug!(kind = %kind, rows = written, "Upserted records");
        Ok(written)
    }

    async fn region_keys(&self) -> IngestResult<HashSet<String>> {
        let keys: Vec<String> = sqlx::query_scalar("SELECT regio_key FROM regios")
            .fetch_all(&self.pool)
            .await?;
        Ok(keys.into_iter().collect())
    }
}
