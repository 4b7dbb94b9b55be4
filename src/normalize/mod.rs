//! Normalization of heterogeneous support interactions into ticket records
//!
//! Forms are already structured and pass through unchanged. Chats, emails and
//! call transcripts go through the extraction capability with a fixed
//! instruction per source kind. Every result then meets the same
//! completeness gate: subject, body and answer must all be non-empty.

mod prompts;

pub use prompts::*;

use crate::capability::Extractor;
use crate::error::{Error, Result};
use crate::progress::{advance, finish, start_progress_bar};
use crate::warehouse::{validate_identifier, Warehouse};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info};

/// Where a ticket came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Form,
    Chat,
    Email,
    Call,
}

impl SourceKind {
    /// Union order of the tickets table
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Form,
        SourceKind::Chat,
        SourceKind::Email,
        SourceKind::Call,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Form => "form",
            SourceKind::Chat => "chat",
            SourceKind::Email => "email",
            SourceKind::Call => "call",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "form" => Ok(SourceKind::Form),
            "chat" => Ok(SourceKind::Chat),
            "email" => Ok(SourceKind::Email),
            "call" => Ok(SourceKind::Call),
            _ => Err(Error::Other(format!("Unknown source kind: {}", s))),
        }
    }
}

/// Ticket categories the extractor is asked to choose from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketType {
    BillingAndPayments,
    TechnicalSupport,
    AccountAndAccess,
    ShippingAndReturns,
    ProductInquiry,
    Other,
}

impl TicketType {
    pub const ALL: [TicketType; 6] = [
        TicketType::BillingAndPayments,
        TicketType::TechnicalSupport,
        TicketType::AccountAndAccess,
        TicketType::ShippingAndReturns,
        TicketType::ProductInquiry,
        TicketType::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            TicketType::BillingAndPayments => "Billing and Payments",
            TicketType::TechnicalSupport => "Technical Support",
            TicketType::AccountAndAccess => "Account & Access",
            TicketType::ShippingAndReturns => "Shipping & Returns",
            TicketType::ProductInquiry => "Product Inquiry",
            TicketType::Other => "Other",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.label() == label)
    }
}

/// Ticket priority labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn label(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.label() == label)
    }
}

/// A record that passed the completeness gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub subject: String,
    pub body: String,
    pub answer: String,
    #[serde(rename = "type")]
    pub ticket_type: Option<String>,
    pub priority: Option<String>,
}

impl TicketRecord {
    /// Whether `type` is one of the advertised labels
    pub fn has_known_type(&self) -> bool {
        self.ticket_type
            .as_deref()
            .is_some_and(|t| TicketType::from_label(t).is_some())
    }

    /// Whether `priority` is one of the advertised labels
    pub fn has_known_priority(&self) -> bool {
        self.priority
            .as_deref()
            .is_some_and(|p| Priority::from_label(p).is_some())
    }
}

/// Whatever fields came back, keyed by output field name
pub type PartialRecord = BTreeMap<String, Option<String>>;

/// Outcome of normalizing one raw row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionResult {
    Complete(TicketRecord),
    Partial(PartialRecord),
}

fn non_empty(fields: &PartialRecord, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(|v| v.as_ref())
        .filter(|v| !v.is_empty())
        .cloned()
}

impl ExtractionResult {
    /// Apply the completeness gate to a set of named fields
    pub fn from_fields(fields: PartialRecord) -> Self {
        let subject = non_empty(&fields, "subject");
        let body = non_empty(&fields, "body");
        let answer = non_empty(&fields, "answer");

        match (subject, body, answer) {
            (Some(subject), Some(body), Some(answer)) => {
                ExtractionResult::Complete(TicketRecord {
                    subject,
                    body,
                    answer,
                    ticket_type: fields.get("type").cloned().flatten(),
                    priority: fields.get("priority").cloned().flatten(),
                })
            }
            _ => ExtractionResult::Partial(fields),
        }
    }

    /// Every output field absent
    pub fn empty() -> Self {
        ExtractionResult::Partial(
            OUTPUT_SCHEMA
                .iter()
                .map(|field| (field.to_string(), None))
                .collect(),
        )
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, ExtractionResult::Complete(_))
    }

    pub fn into_complete(self) -> Option<TicketRecord> {
        match self {
            ExtractionResult::Complete(record) => Some(record),
            ExtractionResult::Partial(_) => None,
        }
    }
}

/// Read the structured forms table and gate each row
pub async fn normalize_forms(wh: &Warehouse, table: &str) -> Result<Vec<ExtractionResult>> {
    validate_identifier(table)?;

    let sql = format!(
        "SELECT subject, body, answer, type, priority FROM {} ORDER BY rowid",
        table
    );
    let rows: Vec<(
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
    )> = sqlx::query_as(&sql).fetch_all(wh.pool()).await?;

    let results: Vec<ExtractionResult> = rows
        .into_iter()
        .map(|(subject, body, answer, ticket_type, priority)| {
            let values = [subject, body, answer, ticket_type, priority];
            let fields: PartialRecord = OUTPUT_SCHEMA
                .iter()
                .map(|f| f.to_string())
                .zip(values)
                .collect();
            ExtractionResult::from_fields(fields)
        })
        .collect();

    debug!(table = %table, rows = results.len(), "Read forms");
    Ok(results)
}

/// Read `table.column` and run every non-empty row through the extractor
///
/// Results come back in row order, one per raw row. Null or empty raw text is
/// never sent to the extractor and yields an all-empty partial record.
pub async fn normalize_unstructured(
    wh: &Warehouse,
    extractor: &dyn Extractor,
    kind: SourceKind,
    table: &str,
    column: &str,
    batch_size: usize,
) -> Result<Vec<ExtractionResult>> {
    validate_identifier(table)?;
    validate_identifier(column)?;

    let sql = format!("SELECT {} FROM {} ORDER BY rowid", column, table);
    let raw: Vec<Option<String>> = sqlx::query_scalar(&sql).fetch_all(wh.pool()).await?;

    let mut results: Vec<Option<ExtractionResult>> = Vec::with_capacity(raw.len());
    let mut pending: Vec<(usize, String)> = Vec::new();
    for (idx, text) in raw.iter().enumerate() {
        match text.as_deref().filter(|t| !t.is_empty()) {
            Some(text) => {
                let prompt = build_prompt(kind, text).ok_or_else(|| {
                    Error::Extraction(format!("No extraction instruction for {} rows", kind))
                })?;
                pending.push((idx, prompt));
                results.push(None);
            }
            None => results.push(Some(ExtractionResult::empty())),
        }
    }

    info!(
        source = %kind,
        rows = raw.len(),
        to_extract = pending.len(),
        model = extractor.model_name(),
        "Extracting ticket fields"
    );

    let pb = start_progress_bar(pending.len(), &format!("Extracting {}s", kind));
    for batch in pending.chunks(batch_size.max(1)) {
        let prompts: Vec<String> = batch.iter().map(|(_, p)| p.clone()).collect();
        let extracted = extractor.extract(prompts, &OUTPUT_SCHEMA).await?;
        if extracted.len() != batch.len() {
            finish(pb);
            return Err(Error::Extraction(format!(
                "Extractor returned {} results for {} prompts",
                extracted.len(),
                batch.len()
            )));
        }
        for ((idx, _), result) in batch.iter().zip(extracted) {
            results[*idx] = Some(result);
        }
        advance(&pb, batch.len());
    }
    finish(pb);

    Ok(results
        .into_iter()
        .map(|r| r.unwrap_or_else(ExtractionResult::empty))
        .collect())
}
