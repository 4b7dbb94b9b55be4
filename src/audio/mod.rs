//! Call recording ingestion
//!
//! Registers the recordings under a storage location as an object table, then
//! transcribes every registered object into a transcripts table that the
//! tickets union reads like any other raw source.

use crate::capability::{ObjectCatalog, ObjectRef, Transcriber, Transcription};
use crate::error::{Error, Result};
use crate::progress::{advance, finish, start_progress_bar};
use crate::warehouse::{object_table_sql, transcripts_table_sql, validate_identifier, Warehouse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of an object registration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrationStats {
    pub table: String,
    pub objects: usize,
    /// False when a fresh enough snapshot was reused
    pub refreshed: bool,
}

/// Result of a transcription pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionStats {
    pub table: String,
    pub objects: usize,
    pub transcribed: usize,
    pub failed: usize,
}

/// Register the objects matching `location` as `table`
///
/// A snapshot of the same location younger than `max_staleness` is reused
/// as is. Otherwise the location is listed again and the table replaced.
pub async fn register_objects(
    wh: &Warehouse,
    catalog: &dyn ObjectCatalog,
    table: &str,
    location: &str,
    max_staleness: Duration,
) -> Result<RegistrationStats> {
    validate_identifier(table)?;

    if let Some(entry) = wh.object_table_entry(table).await? {
        let fresh = entry.location == location
            && entry.age(Utc::now()).is_some_and(|age| {
                age >= chrono::Duration::zero()
                    && age.to_std().is_ok_and(|age| age < max_staleness)
            });
        if fresh && wh.table_exists(table).await? {
            debug!(table = %table, age = ?entry.age(Utc::now()), "Reusing object table");
            return Ok(RegistrationStats {
                table: table.to_string(),
                objects: usize::try_from(entry.object_count).unwrap_or(0),
                refreshed: false,
            });
        }
    }

    let objects = catalog.list(location).await?;

    let staging = Warehouse::staging_name(table);
    wh.drop_table(&staging).await?;
    sqlx::query(&object_table_sql(&staging))
        .execute(wh.pool())
        .await?;

    let insert = format!(
        "INSERT INTO {} (uri, content_type, size_bytes, updated_at) VALUES (?, ?, ?, ?)",
        staging
    );
    let mut tx = wh.pool().begin().await?;
    for object in &objects {
        sqlx::query(&insert)
            .bind(&object.uri)
            .bind(&object.content_type)
            .bind(object.size_bytes)
            .bind(&object.updated_at)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    wh.swap_in(&staging, table).await?;
    wh.record_object_table(table, location, objects.len() as i64)
        .await?;

    info!(table = %table, location = %location, objects = objects.len(), "Registered objects");
    Ok(RegistrationStats {
        table: table.to_string(),
        objects: objects.len(),
        refreshed: true,
    })
}

/// Transcribe every object in `source_table` into `goal_table`
///
/// The goal table is replaced with one row per object. Recordings that could
/// not be transcribed keep a row with null `transcripts` and a status.
pub async fn transcribe_calls(
    wh: &Warehouse,
    catalog: &dyn ObjectCatalog,
    transcriber: &dyn Transcriber,
    source_table: &str,
    goal_table: &str,
    batch_size: usize,
) -> Result<TranscriptionStats> {
    validate_identifier(source_table)?;
    validate_identifier(goal_table)?;

    let sql = format!("SELECT uri FROM {} ORDER BY uri", source_table);
    let uris: Vec<String> = sqlx::query_scalar(&sql).fetch_all(wh.pool()).await?;

    // Objects we cannot resolve get a failed row without a transcriber call
    let mut results: Vec<Option<Transcription>> = Vec::with_capacity(uris.len());
    let mut pending: Vec<(usize, ObjectRef)> = Vec::new();
    for (idx, uri) in uris.iter().enumerate() {
        match catalog.access_url(uri)? {
            Some(url) => {
                pending.push((
                    idx,
                    ObjectRef {
                        uri: uri.clone(),
                        url,
                    },
                ));
                results.push(None);
            }
            None => results.push(Some(Transcription::failed("object not found"))),
        }
    }

    info!(
        source = %source_table,
        objects = uris.len(),
        model = transcriber.model_name(),
        "Transcribing calls"
    );

    let pb = start_progress_bar(pending.len(), "Transcribing calls");
    for batch in pending.chunks(batch_size.max(1)) {
        let objects: Vec<ObjectRef> = batch.iter().map(|(_, o)| o.clone()).collect();
        let transcribed = match transcriber.transcribe(objects).await {
            Ok(t) => t,
            Err(e) => {
                finish(pb);
                return Err(e);
            }
        };
        if transcribed.len() != batch.len() {
            finish(pb);
            return Err(Error::Transcription(format!(
                "Transcriber returned {} results for {} recordings",
                transcribed.len(),
                batch.len()
            )));
        }
        for ((idx, _), transcription) in batch.iter().zip(transcribed) {
            results[*idx] = Some(transcription);
        }
        advance(&pb, batch.len());
    }
    finish(pb);

    let staging = Warehouse::staging_name(goal_table);
    wh.drop_table(&staging).await?;
    sqlx::query(&transcripts_table_sql(&staging))
        .execute(wh.pool())
        .await?;

    let insert = format!(
        "INSERT INTO {} (uri, transcripts, status) VALUES (?, ?, ?)",
        staging
    );
    let mut stats = TranscriptionStats {
        table: goal_table.to_string(),
        objects: uris.len(),
        ..Default::default()
    };
    let mut tx = wh.pool().begin().await?;
    for (uri, result) in uris.iter().zip(results) {
        let transcription =
            result.unwrap_or_else(|| Transcription::failed("no transcription returned"));
        let has_text = transcription
            .transcripts
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty());
        if has_text {
            stats.transcribed += 1;
        } else {
            stats.failed += 1;
            warn!(
                uri = %uri,
                status = transcription.status.as_deref().unwrap_or(""),
                "Transcription failed"
            );
        }
        sqlx::query(&insert)
            .bind(uri)
            .bind(&transcription.transcripts)
            .bind(&transcription.status)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    wh.swap_in(&staging, goal_table).await?;

    info!(
        table = %goal_table,
        transcribed = stats.transcribed,
        failed = stats.failed,
        "Transcribed calls"
    );
    Ok(stats)
}
