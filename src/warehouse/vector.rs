//! Vector columns: storage codec, write-back and nearest-neighbour lookup

use super::{validate_identifier, Warehouse};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::cmp::Ordering;
use tracing::debug;

/// Encode a vector for storage in a vector column
pub fn encode_vector(vector: &[f32]) -> Result<String> {
    Ok(serde_json::to_string(vector)?)
}

/// Decode a stored vector
pub fn decode_vector(raw: &str) -> Result<Vec<f32>> {
    Ok(serde_json::from_str(raw)?)
}

/// Cosine distance (1 - cosine similarity). `None` for mismatched lengths or
/// zero vectors.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(1.0 - dot / (norm_a * norm_b))
}

/// One nearest-neighbour hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: String,
    pub distance: f32,
}

impl Warehouse {
    /// Write vectors keyed by `id_column`, only into rows whose vector is
    /// still NULL. Returns the number of rows updated.
    pub async fn write_vectors(
        &self,
        table: &str,
        id_column: &str,
        vector_column: &str,
        rows: &[(String, Vec<f32>)],
    ) -> Result<u64> {
        validate_identifier(table)?;
        validate_identifier(id_column)?;
        validate_identifier(vector_column)?;

        let sql = format!(
            "UPDATE {table} SET {col} = ? WHERE {id} = ? AND {col} IS NULL",
            table = table,
            col = vector_column,
            id = id_column,
        );

        let mut updated = 0u64;
        let mut tx = self.pool().begin().await?;
        for (id, vector) in rows {
            let encoded = encode_vector(vector)?;
            let result = sqlx::query(&sql)
                .bind(encoded)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            updated += result.rows_affected();
        }
        tx.commit().await?;

        debug!(table = %table, column = %vector_column, updated, "Wrote vectors");
        Ok(updated)
    }

    /// Stored vector for one row, `None` when the row or its vector is absent
    pub async fn read_vector(
        &self,
        table: &str,
        id_column: &str,
        vector_column: &str,
        id: &str,
    ) -> Result<Option<Vec<f32>>> {
        validate_identifier(table)?;
        validate_identifier(id_column)?;
        validate_identifier(vector_column)?;

        if self.column_type(table, vector_column).await?.is_none() {
            return Ok(None);
        }

        let sql = format!(
            "SELECT {col} FROM {table} WHERE {id} = ?",
            col = vector_column,
            table = table,
            id = id_column,
        );
        let raw: Option<Option<String>> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        raw.flatten().map(|r| decode_vector(&r)).transpose()
    }

    /// The `k` rows whose vectors are closest to `query`, ascending by cosine
    /// distance. Rows without a vector are skipped.
    pub async fn nearest(
        &self,
        table: &str,
        id_column: &str,
        vector_column: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<Neighbor>> {
        validate_identifier(table)?;
        validate_identifier(id_column)?;
        validate_identifier(vector_column)?;

        if k == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT CAST({id} AS TEXT) AS id, {col} AS vector FROM {table} WHERE {col} IS NOT NULL",
            id = id_column,
            col = vector_column,
            table = table,
        );
        let rows = sqlx::query(&sql).fetch_all(self.pool()).await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let raw: String = row.try_get("vector")?;
            let vector = decode_vector(&raw)?;
            let distance = cosine_distance(query, &vector).ok_or_else(|| {
                Error::Embedding(format!(
                    "Cannot compare query of dimension {} with {}.{} row '{}' of dimension {}",
                    query.len(),
                    table,
                    vector_column,
                    id,
                    vector.len()
                ))
            })?;
            hits.push(Neighbor { id, distance });
        }

        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::tests::setup_test_warehouse;
    use crate::warehouse::ColumnType;

    #[test]
    fn test_cosine_distance() {
        assert_eq!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]), Some(0.0));
        assert_eq!(cosine_distance(&[1.0, 0.0], &[0.0, 1.0]), Some(1.0));
        assert!(cosine_distance(&[1.0], &[1.0, 0.0]).is_none());
        assert!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]).is_none());
    }

    #[tokio::test]
    async fn test_nearest_orders_by_distance() {
        let (wh, _tmp) = setup_test_warehouse().await;

        sqlx::query(
            "INSERT INTO products (product_id, title) VALUES (1, 'a'), (2, 'b'), (3, 'c'), (4, 'd')",
        )
        .execute(wh.pool())
        .await
        .unwrap();
        wh.ensure_column("products", "text_embedding", ColumnType::Vector)
            .await
            .unwrap();

        let rows = vec![
            ("1".to_string(), vec![1.0, 0.0]),
            ("2".to_string(), vec![0.0, 1.0]),
            ("3".to_string(), vec![0.7, 0.7]),
        ];
        let written = wh
            .write_vectors("products", "product_id", "text_embedding", &rows)
            .await
            .unwrap();
        assert_eq!(written, 3);

        let hits = wh
            .nearest("products", "product_id", "text_embedding", &[1.0, 0.1], 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "1");
        assert_eq!(hits[1].id, "3");
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[tokio::test]
    async fn test_write_vectors_never_overwrites() {
        let (wh, _tmp) = setup_test_warehouse().await;

        sqlx::query("INSERT INTO products (product_id, title) VALUES (7, 'x')")
            .execute(wh.pool())
            .await
            .unwrap();
        wh.ensure_column("products", "text_embedding", ColumnType::Vector)
            .await
            .unwrap();

        let first = vec![("7".to_string(), vec![0.5, 0.5])];
        let second = vec![("7".to_string(), vec![9.0, 9.0])];
        assert_eq!(
            wh.write_vectors("products", "product_id", "text_embedding", &first)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            wh.write_vectors("products", "product_id", "text_embedding", &second)
                .await
                .unwrap(),
            0
        );

        let stored = wh
            .read_vector("products", "product_id", "text_embedding", "7")
            .await
            .unwrap();
        assert_eq!(stored, Some(vec![0.5, 0.5]));
    }
}
