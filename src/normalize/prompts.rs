//! Extraction instructions per source kind

use super::{Priority, SourceKind, TicketType};

/// Fields the extractor is asked to produce, in output order
pub const OUTPUT_SCHEMA: [&str; 5] = ["subject", "body", "answer", "type", "priority"];

fn quoted_labels<'a>(labels: impl Iterator<Item = &'a str>) -> String {
    labels
        .map(|l| format!("\"{}\"", l))
        .collect::<Vec<_>>()
        .join(", ")
}

/// What the extractor should pull out of any support interaction
fn field_guidance() -> String {
    format!(
        "- subject: a short title for the customer's issue\n\
         - body: the customer's issue in 1-3 sentences\n\
         - answer: the support resolution in 2-5 sentences\n\
         - type: one of [{}]\n\
         - priority: one of [{}]",
        quoted_labels(TicketType::ALL.iter().map(|t| t.label())),
        quoted_labels(Priority::ALL.iter().map(|p| p.label())),
    )
}

/// Fixed instruction for an unstructured source; `None` for forms, which are
/// already structured.
pub fn instruction_for(kind: SourceKind) -> Option<String> {
    let (what, cleanup) = match kind {
        SourceKind::Form => return None,
        SourceKind::Chat => (
            "customer support chat",
            "Remove PII and ignore greetings/signatures.",
        ),
        SourceKind::Email => (
            "customer support email",
            "Remove PII and ignore signatures/disclaimers/quoted history.",
        ),
        SourceKind::Call => ("customer support call transcript", "Remove PII."),
    };

    Some(format!(
        "From the {} below, extract:\n{}\n{}",
        what,
        field_guidance(),
        cleanup
    ))
}

/// Label placed in front of the raw text
pub fn heading_for(kind: SourceKind) -> Option<&'static str> {
    match kind {
        SourceKind::Form => None,
        SourceKind::Chat => Some("CHAT:"),
        SourceKind::Email => Some("EMAIL:"),
        SourceKind::Call => Some("TRANSCRIPT:"),
    }
}

/// Full prompt: instruction, blank line, heading, raw text
pub fn build_prompt(kind: SourceKind, raw: &str) -> Option<String> {
    let instruction = instruction_for(kind)?;
    let heading = heading_for(kind)?;
    Some(format!("{}\n\n{}\n{}", instruction, heading, raw))
}
