//! Status command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::pipeline::{
    PRODUCT_IMAGE_EMBEDDING_COLUMN, PRODUCT_TEXT_EMBEDDING_COLUMN, PRODUCT_URI_COLUMN,
    TICKET_EMBEDDING_COLUMN,
};
use crate::warehouse::{PipelineRun, Warehouse};
use serde::{Deserialize, Serialize};
use tracing::info;

const RECENT_RUNS: i64 = 5;

/// Row counts of one table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStatus {
    pub name: String,
    pub exists: bool,
    pub rows: i64,
    /// Derived columns and how many rows still lack a value
    pub missing: Vec<(String, i64)>,
}

/// A rebuild lock currently held
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockStatus {
    pub pipeline: String,
    pub acquired_at: String,
}

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub objects_root: String,
    pub extraction_model: String,
    pub embedding_model: String,
    pub image_embedding_model: String,
    pub transcription_model: String,
    pub tables: Vec<TableStatus>,
    pub locks: Vec<LockStatus>,
    pub recent_runs: Vec<PipelineRun>,
}

async fn table_status(wh: &Warehouse, name: &str, derived: &[&str]) -> Result<TableStatus> {
    if !wh.table_exists(name).await? {
        return Ok(TableStatus {
            name: name.to_string(),
            exists: false,
            rows: 0,
            missing: Vec::new(),
        });
    }

    let mut missing = Vec::with_capacity(derived.len());
    for column in derived {
        missing.push((column.to_string(), wh.count_missing(name, column).await?));
    }

    Ok(TableStatus {
        name: name.to_string(),
        exists: true,
        rows: wh.count_rows(name).await?,
        missing,
    })
}

/// Get warehouse status
pub async fn cmd_status(config: &Config, wh: &Warehouse) -> Result<StatusInfo> {
    info!("Getting status");

    if !wh.is_initialized().await? {
        return Err(Error::NotInitialized);
    }

    let t = &config.tables;
    let watched: [(&str, &[&str]); 7] = [
        (&t.forms, &[]),
        (&t.chats, &[]),
        (&t.emails, &[]),
        (&t.call_objects, &[]),
        (&t.call_transcripts, &["transcripts"]),
        (&t.tickets, &[TICKET_EMBEDDING_COLUMN]),
        (
            &t.products,
            &[
                PRODUCT_TEXT_EMBEDDING_COLUMN,
                PRODUCT_URI_COLUMN,
                PRODUCT_IMAGE_EMBEDDING_COLUMN,
            ],
        ),
    ];
    let mut tables = Vec::with_capacity(watched.len());
    for (name, derived) in watched {
        tables.push(table_status(wh, name, derived).await?);
    }

    let locks = wh
        .held_locks()
        .await?
        .into_iter()
        .map(|(pipeline, acquired_at)| LockStatus {
            pipeline,
            acquired_at,
        })
        .collect();

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        objects_root: config
            .storage
            .resolved_root(&config.paths)
            .display()
            .to_string(),
        extraction_model: config.extraction.model.clone(),
        embedding_model: config.embedding.model.clone(),
        image_embedding_model: config.image_embedding.model.clone(),
        transcription_model: config.transcription.model.clone(),
        tables,
        locks,
        recent_runs: wh.recent_runs(RECENT_RUNS).await?,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 deskpipe Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Warehouse: {}", status.db_path);
    println!("Objects: {}", status.objects_root);

    println!("\nModels:");
    println!("  Extraction: {}", status.extraction_model);
    println!("  Text embedding: {}", status.embedding_model);
    println!("  Image embedding: {}", status.image_embedding_model);
    println!("  Transcription: {}", status.transcription_model);

    println!("\nTables:");
    for table in &status.tables {
        if !table.exists {
            println!("  {:<22} (not built)", table.name);
            continue;
        }
        println!("  {:<22} {} rows", table.name, table.rows);
        for (column, missing) in &table.missing {
            if *missing > 0 {
                println!("    ⚠ {} missing {}", missing, column);
            }
        }
    }

    if !status.locks.is_empty() {
        println!("\nRebuilds in progress:");
        for lock in &status.locks {
            println!("  • {} (since {})", lock.pipeline, lock.acquired_at);
        }
    }

    println!("\nRecent runs:");
    if status.recent_runs.is_empty() {
        println!("  None yet. Use 'deskpipe rebuild tickets' to start one.");
    }
    for run in &status.recent_runs {
        println!(
            "  {} {:<9} {:<9} {}",
            run.started_at,
            run.pipeline,
            run.status,
            run.error.as_deref().unwrap_or("")
        );
    }
}
