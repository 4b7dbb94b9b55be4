//! Incremental derived columns
//!
//! Every backfill here only touches rows whose target column is NULL and
//! never overwrites a value, so a run interrupted halfway is resumed by the
//! next one. Changing the source text of a row that already has an embedding
//! does not trigger recomputation.

use crate::capability::{Embedder, ObjectCatalog};
use crate::error::{Error, Result};
use crate::progress::{advance, finish, start_progress_bar};
use crate::warehouse::{validate_identifier, ColumnType, Warehouse};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::{debug, info, warn};

/// Text embedding backfill target
#[derive(Debug, Clone)]
pub struct BackfillSpec<'a> {
    pub table: &'a str,
    pub id_column: &'a str,
    /// Joined with a single space, NULLs read as empty strings
    pub text_columns: &'a [&'a str],
    pub embedding_column: &'a str,
}

/// Image embedding backfill target
#[derive(Debug, Clone)]
pub struct ImageBackfillSpec<'a> {
    pub table: &'a str,
    pub id_column: &'a str,
    pub uri_column: &'a str,
    pub embedding_column: &'a str,
}

/// URI fill target
#[derive(Debug, Clone)]
pub struct UriFillSpec<'a> {
    pub table: &'a str,
    pub image_column: &'a str,
    pub uri_column: &'a str,
    pub prefix: &'a str,
}

/// Counts for one backfill pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackfillStats {
    pub table: String,
    pub column: String,
    /// Rows that had no value when the pass started
    pub pending: usize,
    /// Rows written by this pass
    pub filled: usize,
    /// Pending rows left untouched (e.g. image not found)
    pub skipped: usize,
}

impl BackfillStats {
    fn new(table: &str, column: &str) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            ..Default::default()
        }
    }
}

/// Prefix with exactly one trailing separator, empty stays empty
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{}/", prefix)
    }
}

/// Text that gets embedded for one row
fn join_text(parts: Vec<Option<String>>) -> String {
    parts
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Embed the concatenated text columns of every row missing an embedding
pub async fn backfill_embeddings(
    wh: &Warehouse,
    embedder: &dyn Embedder,
    spec: &BackfillSpec<'_>,
    batch_size: usize,
) -> Result<BackfillStats> {
    validate_identifier(spec.id_column)?;
    for column in spec.text_columns {
        validate_identifier(column)?;
    }
    if spec.text_columns.is_empty() {
        return Err(Error::Schema(format!(
            "No text columns to embed for {}.{}",
            spec.table, spec.embedding_column
        )));
    }

    wh.ensure_column(spec.table, spec.embedding_column, ColumnType::Vector)
        .await?;

    let sql = format!(
        "SELECT CAST({id} AS TEXT), {cols} FROM {table} WHERE {emb} IS NULL ORDER BY {id}",
        id = spec.id_column,
        cols = spec.text_columns.join(", "),
        table = spec.table,
        emb = spec.embedding_column,
    );
    let rows = sqlx::query(&sql).fetch_all(wh.pool()).await?;

    let mut pending: Vec<(String, String)> = Vec::with_capacity(rows.len());
    for row in rows {
        let id: String = row.try_get(0)?;
        let mut parts = Vec::with_capacity(spec.text_columns.len());
        for idx in 1..=spec.text_columns.len() {
            parts.push(row.try_get::<Option<String>, _>(idx)?);
        }
        pending.push((id, join_text(parts)));
    }

    let mut stats = BackfillStats::new(spec.table, spec.embedding_column);
    stats.pending = pending.len();
    info!(
        table = %spec.table,
        column = %spec.embedding_column,
        pending = stats.pending,
        model = embedder.model_name(),
        "Backfilling text embeddings"
    );

    let pb = start_progress_bar(pending.len(), &format!("Embedding {}", spec.table));
    let result = embed_and_write(
        wh,
        &pending,
        batch_size,
        &pb,
        spec.table,
        spec.id_column,
        spec.embedding_column,
        |texts| embedder.embed(texts),
    )
    .await;
    finish(pb);
    stats.filled = result?;

    info!(
        table = %spec.table,
        column = %spec.embedding_column,
        filled = stats.filled,
        "Text embeddings written"
    );
    Ok(stats)
}

/// Embed batch by batch and write each batch before requesting the next
#[allow(clippy::too_many_arguments)]
async fn embed_and_write<F, Fut>(
    wh: &Warehouse,
    pending: &[(String, String)],
    batch_size: usize,
    pb: &Option<indicatif::ProgressBar>,
    table: &str,
    id_column: &str,
    embedding_column: &str,
    embed: F,
) -> Result<usize>
where
    F: Fn(Vec<String>) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<Vec<f32>>>>,
{
    let mut written = 0usize;
    for batch in pending.chunks(batch_size.max(1)) {
        let inputs: Vec<String> = batch.iter().map(|(_, input)| input.clone()).collect();
        let vectors = embed(inputs).await?;
        if vectors.len() != batch.len() {
            return Err(Error::Embedding(format!(
                "Embedder returned {} vectors for {} rows",
                vectors.len(),
                batch.len()
            )));
        }

        let rows: Vec<(String, Vec<f32>)> = batch
            .iter()
            .map(|(id, _)| id.clone())
            .zip(vectors)
            .collect();
        let updated = wh
            .write_vectors(table, id_column, embedding_column, &rows)
            .await?;
        written += updated as usize;
        advance(pb, batch.len());
        debug!(table = %table, batch = batch.len(), updated, "Wrote embedding batch");
    }
    Ok(written)
}

/// Set `uri_column = prefix || image_column` where it is still NULL
///
/// Rows without an image are left alone. An empty prefix disables the fill.
pub async fn fill_uris(wh: &Warehouse, spec: &UriFillSpec<'_>) -> Result<u64> {
    validate_identifier(spec.table)?;
    validate_identifier(spec.image_column)?;

    wh.ensure_column(spec.table, spec.uri_column, ColumnType::Text)
        .await?;

    let prefix = normalize_prefix(spec.prefix);
    if prefix.is_empty() {
        warn!(table = %spec.table, "No image prefix configured, skipping URI fill");
        return Ok(0);
    }

    let sql = format!(
        "UPDATE {table} SET {uri} = ? || {image} \
         WHERE {uri} IS NULL AND {image} IS NOT NULL AND {image} != ''",
        table = spec.table,
        uri = spec.uri_column,
        image = spec.image_column,
    );
    let result = sqlx::query(&sql).bind(&prefix).execute(wh.pool()).await?;

    info!(
        table = %spec.table,
        column = %spec.uri_column,
        filled = result.rows_affected(),
        "Filled image URIs"
    );
    Ok(result.rows_affected())
}

/// Embed the image behind `uri_column` for every row missing an embedding
///
/// Rows whose object cannot be found stay NULL and are retried next run.
pub async fn backfill_image_embeddings(
    wh: &Warehouse,
    catalog: &dyn ObjectCatalog,
    embedder: &dyn Embedder,
    spec: &ImageBackfillSpec<'_>,
    batch_size: usize,
) -> Result<BackfillStats> {
    validate_identifier(spec.id_column)?;
    validate_identifier(spec.uri_column)?;

    wh.ensure_column(spec.table, spec.embedding_column, ColumnType::Vector)
        .await?;

    let sql = format!(
        "SELECT CAST({id} AS TEXT), {uri} FROM {table} \
         WHERE {emb} IS NULL AND {uri} IS NOT NULL AND {uri} != '' ORDER BY {id}",
        id = spec.id_column,
        uri = spec.uri_column,
        table = spec.table,
        emb = spec.embedding_column,
    );
    let rows: Vec<(String, String)> = sqlx::query_as(&sql).fetch_all(wh.pool()).await?;

    let mut stats = BackfillStats::new(spec.table, spec.embedding_column);
    stats.pending = rows.len();

    let mut pending: Vec<(String, String)> = Vec::with_capacity(rows.len());
    for (id, uri) in rows {
        match catalog.access_url(&uri) {
            Ok(Some(url)) => pending.push((id, url)),
            Ok(None) => {
                stats.skipped += 1;
                warn!(id = %id, uri = %uri, "Image not found, leaving embedding empty");
            }
            Err(Error::Storage(reason)) => {
                stats.skipped += 1;
                warn!(
                    id = %id,
                    uri = %uri,
                    "Image not resolvable, leaving embedding empty: {}",
                    reason
                );
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        table = %spec.table,
        column = %spec.embedding_column,
        pending = pending.len(),
        skipped = stats.skipped,
        model = embedder.model_name(),
        "Backfilling image embeddings"
    );

    let pb = start_progress_bar(pending.len(), &format!("Embedding {} images", spec.table));
    let result = embed_and_write(
        wh,
        &pending,
        batch_size,
        &pb,
        spec.table,
        spec.id_column,
        spec.embedding_column,
        |urls| embedder.embed_images(urls),
    )
    .await;
    finish(pb);
    stats.filled = result?;

    info!(
        table = %spec.table,
        column = %spec.embedding_column,
        filled = stats.filled,
        "Image embeddings written"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::fakes::FakeEmbedder;
    use crate::capability::LocalObjectStore;
    use crate::warehouse::tests::setup_test_warehouse;
    use tempfile::TempDir;

    const PRODUCT_TEXT: BackfillSpec<'static> = BackfillSpec {
        table: "products",
        id_column: "product_id",
        text_columns: &["title", "description"],
        embedding_column: "text_embedding",
    };

    async fn seed_products(wh: &Warehouse) {
        sqlx::query(
            "INSERT INTO products (product_id, title, description, image) VALUES \
             (1, 'Trail shoe', 'Grippy sole', 'shoe.png'), \
             (2, 'Rain jacket', NULL, 'jacket.png'), \
             (3, NULL, NULL, NULL)",
        )
        .execute(wh.pool())
        .await
        .unwrap();
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("gs://b/images"), "gs://b/images/");
        assert_eq!(normalize_prefix("gs://b/images/"), "gs://b/images/");
        assert_eq!(normalize_prefix(""), "");
    }

    #[test]
    fn test_join_text_coalesces_nulls() {
        assert_eq!(
            join_text(vec![Some("Trail shoe".into()), Some("Grippy sole".into())]),
            "Trail shoe Grippy sole"
        );
        assert_eq!(join_text(vec![Some("Rain jacket".into()), None]), "Rain jacket ");
        assert_eq!(join_text(vec![None, None]), " ");
    }

    #[tokio::test]
    async fn test_backfill_embeds_missing_rows() {
        let (wh, _tmp) = setup_test_warehouse().await;
        seed_products(&wh).await;

        let embedder = FakeEmbedder::new(4);
        let stats = backfill_embeddings(&wh, &embedder, &PRODUCT_TEXT, 2)
            .await
            .unwrap();

        assert_eq!(stats.pending, 3);
        assert_eq!(stats.filled, 3);
        assert_eq!(
            embedder.inputs(),
            vec!["Trail shoe Grippy sole", "Rain jacket ", " "]
        );
        assert_eq!(embedder.batch_sizes(), vec![2, 1]);
        assert_eq!(wh.count_missing("products", "text_embedding").await.unwrap(), 0);

        let stored = wh
            .read_vector("products", "product_id", "text_embedding", "1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.len(), 4);
    }

    #[tokio::test]
    async fn test_backfill_is_idempotent_and_ignores_text_changes() {
        let (wh, _tmp) = setup_test_warehouse().await;
        seed_products(&wh).await;

        let embedder = FakeEmbedder::new(4);
        backfill_embeddings(&wh, &embedder, &PRODUCT_TEXT, 8)
            .await
            .unwrap();
        let before = wh
            .read_vector("products", "product_id", "text_embedding", "1")
            .await
            .unwrap();

        sqlx::query("UPDATE products SET title = 'Completely different title' WHERE product_id = 1")
            .execute(wh.pool())
            .await
            .unwrap();

        let second = FakeEmbedder::new(4);
        let stats = backfill_embeddings(&wh, &second, &PRODUCT_TEXT, 8)
            .await
            .unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.filled, 0);
        assert!(second.batch_sizes().is_empty());

        let after = wh
            .read_vector("products", "product_id", "text_embedding", "1")
            .await
            .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_interrupted_backfill_resumes() {
        let (wh, _tmp) = setup_test_warehouse().await;
        seed_products(&wh).await;

        let flaky = FakeEmbedder::failing_after(4, 1);
        let err = backfill_embeddings(&wh, &flaky, &PRODUCT_TEXT, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
        // The first batch stays written
        assert_eq!(wh.count_missing("products", "text_embedding").await.unwrap(), 1);

        let embedder = FakeEmbedder::new(4);
        let stats = backfill_embeddings(&wh, &embedder, &PRODUCT_TEXT, 2)
            .await
            .unwrap();
        assert_eq!(stats.filled, 1);
        assert_eq!(embedder.inputs(), vec![" "]);
    }

    #[tokio::test]
    async fn test_fill_uris_is_write_once() {
        let (wh, _tmp) = setup_test_warehouse().await;
        seed_products(&wh).await;

        wh.ensure_column("products", "uri", ColumnType::Text)
            .await
            .unwrap();
        sqlx::query(
            "UPDATE products SET uri = 'gs://bucket/custom.jpg', image = 'other.jpg' WHERE product_id = 1",
        )
        .execute(wh.pool())
        .await
        .unwrap();

        let spec = UriFillSpec {
            table: "products",
            image_column: "image",
            uri_column: "uri",
            prefix: "gs://bucket/images",
        };
        let filled = fill_uris(&wh, &spec).await.unwrap();
        assert_eq!(filled, 1);

        let uris: Vec<Option<String>> =
            sqlx::query_scalar("SELECT uri FROM products ORDER BY product_id")
                .fetch_all(wh.pool())
                .await
                .unwrap();
        assert_eq!(
            uris,
            vec![
                Some("gs://bucket/custom.jpg".to_string()),
                Some("gs://bucket/images/jacket.png".to_string()),
                None,
            ]
        );

        assert_eq!(fill_uris(&wh, &spec).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fill_uris_skips_without_prefix() {
        let (wh, _tmp) = setup_test_warehouse().await;
        seed_products(&wh).await;

        let spec = UriFillSpec {
            table: "products",
            image_column: "image",
            uri_column: "uri",
            prefix: "",
        };
        assert_eq!(fill_uris(&wh, &spec).await.unwrap(), 0);
        assert_eq!(wh.count_missing("products", "uri").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_image_backfill_skips_missing_objects() {
        let (wh, _tmp) = setup_test_warehouse().await;
        seed_products(&wh).await;

        let objects = TempDir::new().unwrap();
        std::fs::create_dir_all(objects.path().join("images")).unwrap();
        std::fs::write(objects.path().join("images/shoe.png"), b"png").unwrap();
        let store = LocalObjectStore::new("gs://bucket/", objects.path());

        fill_uris(
            &wh,
            &UriFillSpec {
                table: "products",
                image_column: "image",
                uri_column: "uri",
                prefix: "gs://bucket/images/",
            },
        )
        .await
        .unwrap();

        let spec = ImageBackfillSpec {
            table: "products",
            id_column: "product_id",
            uri_column: "uri",
            embedding_column: "image_embedding",
        };
        let embedder = FakeEmbedder::new(3);
        let stats = backfill_image_embeddings(&wh, &store, &embedder, &spec, 4)
            .await
            .unwrap();

        assert_eq!(stats.pending, 2);
        assert_eq!(stats.filled, 1);
        assert_eq!(stats.skipped, 1);
        assert!(embedder.inputs()[0].starts_with("file://"));
        assert!(wh
            .read_vector("products", "product_id", "image_embedding", "1")
            .await
            .unwrap()
            .is_some());
        assert!(wh
            .read_vector("products", "product_id", "image_embedding", "2")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_image_backfill_skips_unresolvable_uris() {
        let (wh, _tmp) = setup_test_warehouse().await;
        let objects = TempDir::new().unwrap();
        std::fs::create_dir_all(objects.path().join("images")).unwrap();
        std::fs::write(objects.path().join("images/shoe.png"), b"png").unwrap();
        let store = LocalObjectStore::new("gs://deskpipe-assets/", objects.path());

        wh.ensure_column("products", "uri", ColumnType::Text)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO products (product_id, title, uri) VALUES \
             (1, 'Trail shoe', 'gs://deskpipe-assets/images/shoe.png'), \
             (2, 'Mug', ''), \
             (3, 'Lamp', 'gs://bucket/custom.jpg')",
        )
        .execute(wh.pool())
        .await
        .unwrap();

        let spec = ImageBackfillSpec {
            table: "products",
            id_column: "product_id",
            uri_column: "uri",
            embedding_column: "img_embedding",
        };
        let embedder = FakeEmbedder::new(3);
        let stats = backfill_image_embeddings(&wh, &store, &embedder, &spec, 4)
            .await
            .unwrap();

        // The empty URI is never selected, the foreign one is skipped
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.filled, 1);
        assert_eq!(stats.skipped, 1);
        assert!(wh
            .read_vector("products", "product_id", "img_embedding", "1")
            .await
            .unwrap()
            .is_some());
        for id in ["2", "3"] {
            assert!(wh
                .read_vector("products", "product_id", "img_embedding", id)
                .await
                .unwrap()
                .is_none());
        }

        // A rerun makes no progress but does not fail either
        let again = backfill_image_embeddings(&wh, &store, &embedder, &spec, 4)
            .await
            .unwrap();
        assert_eq!(again.filled, 0);
        assert_eq!(again.skipped, 1);
    }
}
