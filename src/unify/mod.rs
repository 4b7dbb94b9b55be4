//! The unified tickets table
//!
//! Concatenates normalized forms, chats, emails and calls (in that order),
//! keeps only records that passed the completeness gate, and numbers them
//! 1..n. The table is built under a staging name and swapped into place, so
//! readers never see a partial rebuild.

use crate::capability::Extractor;
use crate::config::TablesConfig;
use crate::error::Result;
use crate::normalize::{
    normalize_forms, normalize_unstructured, ExtractionResult, SourceKind, TicketRecord,
};
use crate::warehouse::{tickets_table_sql, validate_identifier, Warehouse};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::{info, warn};

/// Per-source counts for one rebuild
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStats {
    pub source: SourceKind,
    pub input_rows: usize,
    pub kept: usize,
    pub rejected: usize,
}

/// Counts for one tickets rebuild
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnionStats {
    pub sources: Vec<SourceStats>,
    pub total: usize,
    /// Kept tickets whose `type` is outside the advertised labels
    pub off_label_type: usize,
    /// Kept tickets whose `priority` is outside the advertised labels
    pub off_label_priority: usize,
}

impl UnionStats {
    pub fn kept(&self, source: SourceKind) -> usize {
        self.sources
            .iter()
            .find(|s| s.source == source)
            .map(|s| s.kept)
            .unwrap_or(0)
    }

    pub fn rejected(&self) -> usize {
        self.sources.iter().map(|s| s.rejected).sum()
    }
}

/// A row of the tickets table
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: i64,
    pub source: String,
    pub subject: String,
    pub body: String,
    pub answer: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub ticket_type: Option<String>,
    pub priority: Option<String>,
}

/// Normalized stream for one source kind
async fn normalize_source(
    wh: &Warehouse,
    extractor: &dyn Extractor,
    tables: &TablesConfig,
    kind: SourceKind,
    batch_size: usize,
) -> Result<Vec<ExtractionResult>> {
    match kind {
        SourceKind::Form => normalize_forms(wh, &tables.forms).await,
        SourceKind::Chat => {
            normalize_unstructured(wh, extractor, kind, &tables.chats, "chat", batch_size).await
        }
        SourceKind::Email => {
            normalize_unstructured(wh, extractor, kind, &tables.emails, "email", batch_size).await
        }
        SourceKind::Call => {
            normalize_unstructured(
                wh,
                extractor,
                kind,
                &tables.call_transcripts,
                "transcripts",
                batch_size,
            )
            .await
        }
    }
}

/// Rebuild the tickets table from every source
pub async fn build_tickets_table(
    wh: &Warehouse,
    extractor: &dyn Extractor,
    tables: &TablesConfig,
    batch_size: usize,
) -> Result<UnionStats> {
    let mut stats = UnionStats::default();
    let mut kept: Vec<(SourceKind, TicketRecord)> = Vec::new();

    for kind in SourceKind::ALL {
        let results = normalize_source(wh, extractor, tables, kind, batch_size).await?;
        let input_rows = results.len();
        let before = kept.len();
        kept.extend(
            results
                .into_iter()
                .filter_map(ExtractionResult::into_complete)
                .map(|record| (kind, record)),
        );
        let source_stats = SourceStats {
            source: kind,
            input_rows,
            kept: kept.len() - before,
            rejected: input_rows - (kept.len() - before),
        };
        if source_stats.rejected > 0 {
            warn!(
                source = %kind,
                rejected = source_stats.rejected,
                "Dropped incomplete records"
            );
        }
        stats.sources.push(source_stats);
    }

    stats.total = kept.len();
    stats.off_label_type = kept.iter().filter(|(_, r)| !r.has_known_type()).count();
    stats.off_label_priority = kept.iter().filter(|(_, r)| !r.has_known_priority()).count();
    if stats.off_label_type > 0 || stats.off_label_priority > 0 {
        warn!(
            off_label_type = stats.off_label_type,
            off_label_priority = stats.off_label_priority,
            "Tickets with labels outside the advertised sets"
        );
    }

    write_tickets(wh, &tables.tickets, &kept).await?;

    info!(
        table = %tables.tickets,
        tickets = stats.total,
        rejected = stats.rejected(),
        "Rebuilt tickets table"
    );
    Ok(stats)
}

async fn write_tickets(
    wh: &Warehouse,
    table: &str,
    tickets: &[(SourceKind, TicketRecord)],
) -> Result<()> {
    validate_identifier(table)?;

    let staging = Warehouse::staging_name(table);
    wh.drop_table(&staging).await?;
    sqlx::query(&tickets_table_sql(&staging))
        .execute(wh.pool())
        .await?;

    let insert = format!(
        "INSERT INTO {} (ticket_id, source, subject, body, answer, type, priority) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        staging
    );
    let mut tx = wh.pool().begin().await?;
    for (idx, (kind, record)) in tickets.iter().enumerate() {
        sqlx::query(&insert)
            .bind(idx as i64 + 1)
            .bind(kind.as_str())
            .bind(&record.subject)
            .bind(&record.body)
            .bind(&record.answer)
            .bind(&record.ticket_type)
            .bind(&record.priority)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    wh.swap_in(&staging, table).await
}

impl Warehouse {
    /// All tickets ordered by id
    pub async fn list_tickets(&self, table: &str) -> Result<Vec<Ticket>> {
        validate_identifier(table)?;
        let sql = format!(
            "SELECT ticket_id, source, subject, body, answer, type, priority \
             FROM {} ORDER BY ticket_id",
            table
        );
        let tickets = sqlx::query_as::<_, Ticket>(&sql)
            .fetch_all(self.pool())
            .await?;
        Ok(tickets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::fakes::FakeExtractor;
    use crate::error::Error;
    use crate::warehouse::tests::setup_test_warehouse;
    use crate::warehouse::transcripts_table_sql;

    async fn seed(wh: &Warehouse, statements: &[&str]) {
        for sql in statements {
            sqlx::query(sql).execute(wh.pool()).await.unwrap();
        }
    }

    async fn with_transcripts(wh: &Warehouse) {
        sqlx::query(&transcripts_table_sql("call_transcriptions"))
            .execute(wh.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_union_tags_and_numbers_tickets() {
        let (wh, _tmp) = setup_test_warehouse().await;
        with_transcripts(&wh).await;
        seed(
            &wh,
            &[
                "INSERT INTO forms VALUES ('Login', 'Cannot log in', 'Reset it', 'Account & Access', 'high')",
                "INSERT INTO forms VALUES ('Broken', 'Arrived broken', NULL, 'Shipping & Returns', 'low')",
                "INSERT INTO chats VALUES ('my card was charged twice')",
                "INSERT INTO emails VALUES ('where is my parcel')",
                "INSERT INTO emails VALUES ('NO_ANSWER please help')",
                "INSERT INTO call_transcriptions VALUES ('gs://b/calls/1.wav', 'caller wants a refund', '')",
                "INSERT INTO call_transcriptions VALUES ('gs://b/calls/2.wav', NULL, 'decode failed')",
            ],
        )
        .await;

        let extractor = FakeExtractor::complete();
        let stats = build_tickets_table(&wh, &extractor, &TablesConfig::default(), 8)
            .await
            .unwrap();

        assert_eq!(stats.total, 4);
        assert_eq!(stats.kept(SourceKind::Form), 1);
        assert_eq!(stats.kept(SourceKind::Chat), 1);
        assert_eq!(stats.kept(SourceKind::Email), 1);
        assert_eq!(stats.kept(SourceKind::Call), 1);
        // Incomplete form, email without answer, failed transcription
        assert_eq!(stats.rejected(), 3);

        let tickets = wh.list_tickets("tickets").await.unwrap();
        let ids: Vec<i64> = tickets.iter().map(|t| t.ticket_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        let sources: Vec<&str> = tickets.iter().map(|t| t.source.as_str()).collect();
        assert_eq!(sources, vec!["form", "chat", "email", "call"]);
        assert!(tickets.iter().all(|t| !t.answer.is_empty()));

        // The failed transcription never reached the extractor
        assert_eq!(extractor.prompts().len(), 4);
    }

    #[tokio::test]
    async fn test_form_count_passes_through() {
        let (wh, _tmp) = setup_test_warehouse().await;
        with_transcripts(&wh).await;
        seed(
            &wh,
            &[
                "INSERT INTO forms VALUES ('a', 'b', 'c', 'Other', 'low')",
                "INSERT INTO forms VALUES ('d', 'e', 'f', 'Refunds', 'urgent')",
                "INSERT INTO forms VALUES ('g', 'h', 'i', NULL, NULL)",
            ],
        )
        .await;

        let stats =
            build_tickets_table(&wh, &FakeExtractor::complete(), &TablesConfig::default(), 8)
                .await
                .unwrap();

        let forms = wh.count_rows("forms").await.unwrap() as usize;
        assert_eq!(stats.kept(SourceKind::Form), forms);
        assert_eq!(stats.off_label_type, 2);
        assert_eq!(stats.off_label_priority, 2);

        let tickets = wh.list_tickets("tickets").await.unwrap();
        assert_eq!(tickets[1].ticket_type.as_deref(), Some("Refunds"));
    }

    #[tokio::test]
    async fn test_rebuild_replaces_previous_table() {
        let (wh, _tmp) = setup_test_warehouse().await;
        with_transcripts(&wh).await;
        seed(&wh, &["INSERT INTO forms VALUES ('a', 'b', 'c', 'Other', 'low')"]).await;

        let extractor = FakeExtractor::complete();
        build_tickets_table(&wh, &extractor, &TablesConfig::default(), 8)
            .await
            .unwrap();
        seed(&wh, &["INSERT INTO chats VALUES ('printer on fire')"]).await;
        build_tickets_table(&wh, &extractor, &TablesConfig::default(), 8)
            .await
            .unwrap();

        let tickets = wh.list_tickets("tickets").await.unwrap();
        assert_eq!(tickets.len(), 2);
        assert!(!wh
            .table_exists(&Warehouse::staging_name("tickets"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_failed_extraction_keeps_old_table() {
        let (wh, _tmp) = setup_test_warehouse().await;
        with_transcripts(&wh).await;
        seed(&wh, &["INSERT INTO forms VALUES ('a', 'b', 'c', 'Other', 'low')"]).await;
        build_tickets_table(&wh, &FakeExtractor::complete(), &TablesConfig::default(), 8)
            .await
            .unwrap();

        seed(&wh, &["INSERT INTO chats VALUES ('hello')"]).await;
        let err = build_tickets_table(&wh, &FakeExtractor::failing(), &TablesConfig::default(), 8)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
        assert_eq!(wh.count_rows("tickets").await.unwrap(), 1);
    }
}
