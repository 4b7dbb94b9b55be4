//! Rebuild command implementation

use crate::capability::Capabilities;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pipeline::{
    run_products_pipeline, run_tickets_pipeline, PipelineReport, PRODUCTS_PIPELINE,
    TICKETS_PIPELINE,
};
use crate::warehouse::Warehouse;
use clap::ValueEnum;
use tracing::{info, warn};

/// Which pipeline a rebuild runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RebuildTarget {
    /// Transcribe calls, rebuild the tickets table, embed tickets
    Tickets,
    /// Embed product text, fill image URIs, embed product images
    Products,
}

impl RebuildTarget {
    pub fn pipeline_name(&self) -> &'static str {
        match self {
            RebuildTarget::Tickets => TICKETS_PIPELINE,
            RebuildTarget::Products => PRODUCTS_PIPELINE,
        }
    }
}

/// Options for a rebuild trigger
#[derive(Debug, Clone, Copy)]
pub struct RebuildOptions {
    pub target: RebuildTarget,
    /// Drop a lock left behind by a crashed run before starting
    pub force_unlock: bool,
}

/// Run one pipeline against the configured capabilities
pub async fn cmd_rebuild(
    config: &Config,
    wh: &Warehouse,
    options: RebuildOptions,
) -> Result<PipelineReport> {
    let caps = Capabilities::from_config(config)?;
    rebuild_with(config, wh, &caps, options).await
}

/// Run one pipeline with explicitly supplied capabilities
pub async fn rebuild_with(
    config: &Config,
    wh: &Warehouse,
    caps: &Capabilities,
    options: RebuildOptions,
) -> Result<PipelineReport> {
    if !wh.is_initialized().await? {
        return Err(Error::NotInitialized);
    }

    let pipeline = options.target.pipeline_name();
    if options.force_unlock && wh.force_release_lock(pipeline).await? {
        warn!(pipeline = %pipeline, "Removed existing rebuild lock");
    }

    info!(pipeline = %pipeline, "Rebuild triggered");
    match options.target {
        RebuildTarget::Tickets => run_tickets_pipeline(config, wh, caps).await,
        RebuildTarget::Products => run_products_pipeline(config, wh, caps).await,
    }
}

/// Print a rebuild report to console
pub fn print_report(report: &PipelineReport) {
    println!("\n🔄 Rebuild '{}' {}\n", report.pipeline, report.status);
    println!("Run: {}", report.run_id);

    println!("\nStages:");
    for stage in &report.stages {
        let mark = if stage.error.is_some() { "✗" } else { "✓" };
        println!(
            "  {} {} ({} ms, {} attempt{})",
            mark,
            stage.name,
            stage.elapsed_ms,
            stage.attempts,
            if stage.attempts == 1 { "" } else { "s" }
        );
    }

    if let Some(registration) = &report.registration {
        println!(
            "\nCall objects: {} in {} ({})",
            registration.objects,
            registration.table,
            if registration.refreshed { "rescanned" } else { "reused" }
        );
    }
    if let Some(transcription) = &report.transcription {
        println!(
            "Transcripts: {} ok, {} failed",
            transcription.transcribed, transcription.failed
        );
    }
    if let Some(union) = &report.union {
        println!("\nTickets: {}", union.total);
        for source in &union.sources {
            println!(
                "  {:<6} {} kept, {} rejected",
                source.source.as_str(),
                source.kept,
                source.rejected
            );
        }
        if union.off_label_type > 0 || union.off_label_priority > 0 {
            println!(
                "  ⚠ {} off-label types, {} off-label priorities",
                union.off_label_type, union.off_label_priority
            );
        }
    }
    if let Some(filled) = report.uris_filled {
        println!("\nImage URIs filled: {}", filled);
    }
    if !report.backfills.is_empty() {
        println!("\nBackfills:");
        for backfill in &report.backfills {
            println!(
                "  {}.{}: {} filled of {} pending, {} skipped",
                backfill.table, backfill.column, backfill.filled, backfill.pending, backfill.skipped
            );
        }
    }
}
