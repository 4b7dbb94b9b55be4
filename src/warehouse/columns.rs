//! Additive schema evolution

use super::Warehouse;
use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{debug, info};

/// Declared type of a derived column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    /// Fixed-dimension float vector, stored as a JSON array
    Vector,
}

impl ColumnType {
    /// Declared SQL type. Vectors get their own name so a vector column never
    /// silently matches a plain text column.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Vector => "TEXT_VECTOR",
        }
    }

    fn matches_declared(&self, declared: &str) -> bool {
        declared.eq_ignore_ascii_case(self.sql_type())
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"))
}

/// Table and column names are interpolated into SQL, so only plain
/// identifiers are accepted.
pub fn validate_identifier(name: &str) -> Result<()> {
    if identifier_pattern().is_match(name) {
        Ok(())
    } else {
        Err(Error::Schema(format!("Invalid identifier: '{}'", name)))
    }
}

/// Column name and declared type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
}

impl Warehouse {
    /// Columns of `table` in declaration order (empty if the table is missing)
    pub async fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        validate_identifier(table)?;
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT name, type FROM pragma_table_info(?)")
                .bind(table)
                .fetch_all(self.pool())
                .await?;
        Ok(rows
            .into_iter()
            .map(|(name, declared_type)| ColumnInfo {
                name,
                declared_type,
            })
            .collect())
    }

    /// Declared type of `table.column`, `None` if the column does not exist
    pub async fn column_type(&self, table: &str, column: &str) -> Result<Option<String>> {
        let columns = self.table_columns(table).await?;
        Ok(columns
            .into_iter()
            .find(|c| c.name.eq_ignore_ascii_case(column))
            .map(|c| c.declared_type))
    }

    /// Add `column` to `table` unless it already exists.
    ///
    /// Returns `true` when the column was added. An existing column with a
    /// different declared type is a schema error.
    pub async fn ensure_column(
        &self,
        table: &str,
        column: &str,
        column_type: ColumnType,
    ) -> Result<bool> {
        validate_identifier(table)?;
        validate_identifier(column)?;

        if !self.table_exists(table).await? {
            return Err(Error::Schema(format!("Table '{}' does not exist", table)));
        }

        if let Some(declared) = self.column_type(table, column).await? {
            if column_type.matches_declared(&declared) {
                debug!(table = %table, column = %column, "Column already present");
                return Ok(false);
            }
            return Err(Error::Schema(format!(
                "Column '{}.{}' exists with type '{}', expected '{}'",
                table,
                column,
                declared,
                column_type.sql_type()
            )));
        }

        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            table,
            column,
            column_type.sql_type()
        );
        sqlx::query(&sql)
            .execute(self.pool())
            .await
            .map_err(|e| Error::Schema(format!("Failed to add '{}.{}': {}", table, column, e)))?;

        info!(table = %table, column = %column, sql_type = column_type.sql_type(), "Added column");
        Ok(true)
    }
}
