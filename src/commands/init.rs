//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::warehouse::Warehouse;
use std::path::PathBuf;
use tracing::info;

/// Write a default config, create the warehouse schema and the object root
pub async fn cmd_init(base_dir: Option<PathBuf>, force: bool) -> Result<Config> {
    let mut config = Config::default();
    config.init_paths(base_dir);

    if config.paths.config_file.exists() && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config.paths.config_file.display()
        )));
    }

    config.validate()?;
    config.save()?;

    let objects_root = config.storage.resolved_root(&config.paths);
    std::fs::create_dir_all(&objects_root)?;
    info!("Object root ready at {:?}", objects_root);

    let wh = Warehouse::connect(&config).await?;
    wh.init_schema(&config.tables).await?;
    info!("Created warehouse at {:?}", config.paths.db_file);

    Ok(config)
}
