use super::{begin_run, end_run, run_stage, PipelineReport, RetryPolicy};
use crate::audio::{register_objects, transcribe_calls};
use crate::backfill::{backfill_embeddings, BackfillSpec};
use crate::capability::Capabilities;
use crate::config::Config;
use crate::error::Result;
use crate::unify::build_tickets_table;
use crate::warehouse::Warehouse;
use std::time::Duration;

pub const TICKETS_PIPELINE: &str = "tickets";

pub const TICKET_ID_COLUMN: &str = "ticket_id";
pub const TICKET_TEXT_COLUMNS: [&str; 2] = ["subject", "body"];
pub const TICKET_EMBEDDING_COLUMN: &str = "text_embedding";

/// Register call recordings, transcribe them, rebuild the tickets table and
/// backfill ticket embeddings
pub async fn run_tickets_pipeline(
    config: &Config,
    wh: &Warehouse,
    caps: &Capabilities,
) -> Result<PipelineReport> {
    let (guard, mut report) = begin_run(wh, TICKETS_PIPELINE).await?;
    let result = tickets_stages(config, wh, caps, &mut report).await;
    end_run(wh, guard, report, result).await
}

async fn tickets_stages(
    config: &Config,
    wh: &Warehouse,
    caps: &Capabilities,
    report: &mut PipelineReport,
) -> Result<()> {
    let policy = RetryPolicy::from_config(&config.pipeline.retry);
    let tables = &config.tables;
    let storage = &config.storage;
    let objects = caps.objects.as_ref();
    let max_staleness = Duration::from_secs(storage.max_staleness_secs);

    let registration = run_stage(
        "register_call_objects",
        &policy,
        &mut report.stages,
        move || {
            register_objects(
                wh,
                objects,
                &tables.call_objects,
                &storage.calls_location,
                max_staleness,
            )
        },
    )
    .await?;
    report.registration = Some(registration);

    let transcriber = caps.transcriber.as_ref();
    let transcription_batch = config.transcription.batch_size;
    let transcription = run_stage(
        "transcribe_calls",
        &policy,
        &mut report.stages,
        move || {
            transcribe_calls(
                wh,
                objects,
                transcriber,
                &tables.call_objects,
                &tables.call_transcripts,
                transcription_batch,
            )
        },
    )
    .await?;
    report.transcription = Some(transcription);

    let extractor = caps.extractor.as_ref();
    let extraction_batch = config.extraction.batch_size;
    let union = run_stage(
        "build_tickets",
        &policy,
        &mut report.stages,
        move || build_tickets_table(wh, extractor, tables, extraction_batch),
    )
    .await?;
    report.union = Some(union);

    let spec = BackfillSpec {
        table: &tables.tickets,
        id_column: TICKET_ID_COLUMN,
        text_columns: &TICKET_TEXT_COLUMNS,
        embedding_column: TICKET_EMBEDDING_COLUMN,
    };
    let spec = &spec;
    let embedder = caps.text_embedder.as_ref();
    let embedding_batch = config.embedding.batch_size;
    let backfill = run_stage(
        "backfill_ticket_embeddings",
        &policy,
        &mut report.stages,
        move || backfill_embeddings(wh, embedder, spec, embedding_batch),
    )
    .await?;
    report.backfills.push(backfill);

    Ok(())
}
