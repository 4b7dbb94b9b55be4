//! Table storage using SQLite
//!
//! The warehouse stands in for the managed analytics store the pipeline runs
//! against. It holds:
//! - Raw inputs (forms, chats, emails) and the product catalog
//! - Derived tables (call objects, call transcripts, tickets)
//! - Pipeline bookkeeping (runs, single-flight locks, object table refreshes)

mod columns;
mod schema;
mod vector;

pub use columns::*;
pub use schema::*;
pub use vector::*;

use crate::config::{Config, TablesConfig};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Pipeline run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(Error::Config(format!("Unknown run status: {}", s))),
        }
    }
}

/// A pipeline run record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub pipeline: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: String,
    pub stats_json: Option<String>,
    pub error: Option<String>,
}

impl PipelineRun {
    pub fn new(pipeline: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            pipeline: pipeline.to_string(),
            started_at: Utc::now().to_rfc3339(),
            completed_at: None,
            status: RunStatus::Running.to_string(),
            stats_json: None,
            error: None,
        }
    }
}

/// Last scan of an object metadata table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ObjectTableEntry {
    pub table_name: String,
    pub location: String,
    pub refreshed_at: String,
    pub object_count: i64,
}

impl ObjectTableEntry {
    /// Age of the snapshot, `None` when the timestamp cannot be parsed
    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        DateTime::parse_from_rfc3339(&self.refreshed_at)
            .ok()
            .map(|at| now - at.with_timezone(&Utc))
    }
}

/// Warehouse handle
#[derive(Clone)]
pub struct Warehouse {
    pool: SqlitePool,
}

impl Warehouse {
    /// Connect to the warehouse configured for this deployment
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(&config.paths.db_file).await
    }

    /// Open (and create if missing) a warehouse at a specific path
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite warehouse at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Create bookkeeping tables plus the raw source and product tables
    pub async fn init_schema(&self, tables: &TablesConfig) -> Result<()> {
        info!("Initializing warehouse schema");
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        let sources = source_tables_sql(tables);
        sqlx::raw_sql(&sources).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if the bookkeeping schema exists
    pub async fn is_initialized(&self) -> Result<bool> {
        self.table_exists("pipeline_runs").await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ===== Tables =====

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        validate_identifier(table)?;
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// Count rows where `column` is NULL. A column that does not exist yet
    /// counts every row as missing.
    pub async fn count_missing(&self, table: &str, column: &str) -> Result<i64> {
        validate_identifier(table)?;
        validate_identifier(column)?;
        if self.column_type(table, column).await?.is_none() {
            return self.count_rows(table).await;
        }
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {} IS NULL", table, column);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    pub async fn drop_table(&self, table: &str) -> Result<()> {
        validate_identifier(table)?;
        let sql = format!("DROP TABLE IF EXISTS {}", table);
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Name of the staging table used while rebuilding `table`
    pub fn staging_name(table: &str) -> String {
        format!("{}__staging", table)
    }

    /// Replace `target` with `staging` in one transaction
    ///
    /// Readers see either the previous table or the finished one, never an
    /// empty or half-written table.
    pub async fn swap_in(&self, staging: &str, target: &str) -> Result<()> {
        validate_identifier(staging)?;
        validate_identifier(target)?;

        let drop_sql = format!("DROP TABLE IF EXISTS {}", target);
        let rename_sql = format!("ALTER TABLE {} RENAME TO {}", staging, target);

        let mut tx = self.pool.begin().await?;
        sqlx::query(&drop_sql).execute(&mut *tx).await?;
        sqlx::query(&rename_sql).execute(&mut *tx).await?;
        tx.commit().await?;

        debug!(staging = %staging, target = %target, "Swapped staging table into place");
        Ok(())
    }

    // ===== Pipeline Runs =====

    /// Start a new pipeline run
    pub async fn start_run(&self, pipeline: &str) -> Result<PipelineRun> {
        let run = PipelineRun::new(pipeline);
        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (id, pipeline, started_at, status)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.pipeline)
        .bind(&run.started_at)
        .bind(&run.status)
        .execute(&self.pool)
        .await?;
        Ok(run)
    }

    /// Complete a pipeline run
    pub async fn complete_run(
        &self,
        id: &str,
        status: RunStatus,
        stats_json: Option<String>,
        error: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE pipeline_runs SET
                completed_at = ?,
                status = ?,
                stats_json = ?,
                error = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(status.to_string())
        .bind(stats_json)
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent runs, newest first
    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<PipelineRun>> {
        let runs = sqlx::query_as::<_, PipelineRun>(
            "SELECT * FROM pipeline_runs ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }

    /// Latest run of one pipeline
    pub async fn latest_run(&self, pipeline: &str) -> Result<Option<PipelineRun>> {
        let run = sqlx::query_as::<_, PipelineRun>(
            "SELECT * FROM pipeline_runs WHERE pipeline = ? ORDER BY started_at DESC LIMIT 1",
        )
        .bind(pipeline)
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    // ===== Single-flight Locks =====

    /// Try to take the rebuild lock for `pipeline`; false if someone holds it
    pub async fn try_acquire_lock(&self, pipeline: &str, holder: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO pipeline_locks (pipeline, holder, acquired_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(pipeline)
        .bind(holder)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Release a lock previously taken by `holder`
    pub async fn release_lock(&self, pipeline: &str, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM pipeline_locks WHERE pipeline = ? AND holder = ?")
            .bind(pipeline)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop a lock regardless of holder (stale lock after a crash)
    pub async fn force_release_lock(&self, pipeline: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pipeline_locks WHERE pipeline = ?")
            .bind(pipeline)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Pipelines currently holding a lock
    pub async fn held_locks(&self) -> Result<Vec<(String, String)>> {
        let locks: Vec<(String, String)> =
            sqlx::query_as("SELECT pipeline, acquired_at FROM pipeline_locks ORDER BY pipeline")
                .fetch_all(&self.pool)
                .await?;
        Ok(locks)
    }

    // ===== Object Tables =====

    pub async fn object_table_entry(&self, table: &str) -> Result<Option<ObjectTableEntry>> {
        let entry = sqlx::query_as::<_, ObjectTableEntry>(
            "SELECT * FROM object_tables WHERE table_name = ?",
        )
        .bind(table)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    pub async fn record_object_table(
        &self,
        table: &str,
        location: &str,
        object_count: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO object_tables (table_name, location, refreshed_at, object_count)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(table_name) DO UPDATE SET
                location = excluded.location,
                refreshed_at = excluded.refreshed_at,
                object_count = excluded.object_count
            "#,
        )
        .bind(table)
        .bind(location)
        .bind(Utc::now().to_rfc3339())
        .bind(object_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
