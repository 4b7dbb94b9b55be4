//! SQLite schema definition

use crate::config::TablesConfig;

/// Bookkeeping tables owned by the pipeline itself
pub const SCHEMA_SQL: &str = r#"
-- Rebuild history
CREATE TABLE IF NOT EXISTS pipeline_runs (
    id TEXT PRIMARY KEY,
    pipeline TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL,
    stats_json TEXT,
    error TEXT
);

-- Single-flight guard: one row per pipeline currently rebuilding
CREATE TABLE IF NOT EXISTS pipeline_locks (
    pipeline TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    acquired_at TEXT NOT NULL
);

-- Object metadata tables and when they were last scanned
CREATE TABLE IF NOT EXISTS object_tables (
    table_name TEXT PRIMARY KEY,
    location TEXT NOT NULL,
    refreshed_at TEXT NOT NULL,
    object_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_runs_pipeline ON pipeline_runs(pipeline, started_at);
"#;

/// Raw input tables and the product catalog, named per configuration
pub fn source_tables_sql(tables: &TablesConfig) -> String {
    format!(
        r#"
-- Structured support forms
CREATE TABLE IF NOT EXISTS {forms} (
    subject TEXT,
    body TEXT,
    answer TEXT,
    type TEXT,
    priority TEXT
);

-- Raw chat transcripts
CREATE TABLE IF NOT EXISTS {chats} (
    chat TEXT
);

-- Raw customer emails
CREATE TABLE IF NOT EXISTS {emails} (
    email TEXT
);

-- Product catalog
CREATE TABLE IF NOT EXISTS {products} (
    product_id INTEGER PRIMARY KEY,
    title TEXT,
    description TEXT,
    image TEXT,
    customer_comments TEXT
);
"#,
        forms = tables.forms,
        chats = tables.chats,
        emails = tables.emails,
        products = tables.products,
    )
}

/// Staging table for a tickets rebuild
pub fn tickets_table_sql(table: &str) -> String {
    format!(
        r#"
CREATE TABLE {table} (
    ticket_id INTEGER PRIMARY KEY,
    source TEXT NOT NULL,
    subject TEXT NOT NULL,
    body TEXT NOT NULL,
    answer TEXT NOT NULL,
    type TEXT,
    priority TEXT
)
"#
    )
}

/// Staging table for registered objects
pub fn object_table_sql(table: &str) -> String {
    format!(
        r#"
CREATE TABLE {table} (
    uri TEXT PRIMARY KEY,
    content_type TEXT,
    size_bytes INTEGER NOT NULL,
    updated_at TEXT
)
"#
    )
}

/// Staging table for call transcripts
pub fn transcripts_table_sql(table: &str) -> String {
    format!(
        r#"
CREATE TABLE {table} (
    uri TEXT PRIMARY KEY,
    transcripts TEXT,
    status TEXT
)
"#
    )
}
