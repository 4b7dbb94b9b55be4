use super::{begin_run, end_run, run_stage, PipelineReport, RetryPolicy};
use crate::backfill::{
    backfill_embeddings, backfill_image_embeddings, fill_uris, BackfillSpec, ImageBackfillSpec,
    UriFillSpec,
};
use crate::capability::Capabilities;
use crate::config::Config;
use crate::error::Result;
use crate::warehouse::Warehouse;

pub const PRODUCTS_PIPELINE: &str = "products";

pub const PRODUCT_ID_COLUMN: &str = "product_id";
pub const PRODUCT_TEXT_COLUMNS: [&str; 2] = ["title", "description"];
pub const PRODUCT_TEXT_EMBEDDING_COLUMN: &str = "text_embedding";
pub const PRODUCT_IMAGE_COLUMN: &str = "image";
pub const PRODUCT_URI_COLUMN: &str = "uri";
pub const PRODUCT_IMAGE_EMBEDDING_COLUMN: &str = "img_embedding";

/// Enrich the product catalog: text embeddings, image URIs, image embeddings
pub async fn run_products_pipeline(
    config: &Config,
    wh: &Warehouse,
    caps: &Capabilities,
) -> Result<PipelineReport> {
    let (guard, mut report) = begin_run(wh, PRODUCTS_PIPELINE).await?;
    let result = products_stages(config, wh, caps, &mut report).await;
    end_run(wh, guard, report, result).await
}

async fn products_stages(
    config: &Config,
    wh: &Warehouse,
    caps: &Capabilities,
    report: &mut PipelineReport,
) -> Result<()> {
    let policy = RetryPolicy::from_config(&config.pipeline.retry);
    let table = config.tables.products.as_str();

    let text_spec = BackfillSpec {
        table,
        id_column: PRODUCT_ID_COLUMN,
        text_columns: &PRODUCT_TEXT_COLUMNS,
        embedding_column: PRODUCT_TEXT_EMBEDDING_COLUMN,
    };
    let text_spec = &text_spec;
    let text_embedder = caps.text_embedder.as_ref();
    let text_batch = config.embedding.batch_size;
    let text = run_stage(
        "backfill_product_text_embeddings",
        &policy,
        &mut report.stages,
        move || backfill_embeddings(wh, text_embedder, text_spec, text_batch),
    )
    .await?;
    report.backfills.push(text);

    let uri_spec = UriFillSpec {
        table,
        image_column: PRODUCT_IMAGE_COLUMN,
        uri_column: PRODUCT_URI_COLUMN,
        prefix: &config.storage.images_prefix,
    };
    let uri_spec = &uri_spec;
    let filled = run_stage(
        "fill_product_uris",
        &policy,
        &mut report.stages,
        move || fill_uris(wh, uri_spec),
    )
    .await?;
    report.uris_filled = Some(filled);

    let image_spec = ImageBackfillSpec {
        table,
        id_column: PRODUCT_ID_COLUMN,
        uri_column: PRODUCT_URI_COLUMN,
        embedding_column: PRODUCT_IMAGE_EMBEDDING_COLUMN,
    };
    let image_spec = &image_spec;
    let objects = caps.objects.as_ref();
    let image_embedder = caps.image_embedder.as_ref();
    let image_batch = config.image_embedding.batch_size;
    let images = run_stage(
        "backfill_product_image_embeddings",
        &policy,
        &mut report.stages,
        move || backfill_image_embeddings(wh, objects, image_embedder, image_spec, image_batch),
    )
    .await?;
    report.backfills.push(images);

    Ok(())
}
