use super::{ObjectCatalog, ObjectMeta};
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use url::Url;
use walkdir::WalkDir;

/// Translate a storage wildcard into an anchored regex. `*` matches any run
/// of characters, including `/`.
pub fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body))
        .map_err(|e| Error::Storage(format!("Invalid location pattern '{}': {}", pattern, e)))
}

/// Object storage backed by a local directory
///
/// URIs under `bucket_prefix` map onto paths under `root`, so
/// `gs://bucket/calls/a.wav` lives at `<root>/calls/a.wav`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    bucket_prefix: String,
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(bucket_prefix: &str, root: impl Into<PathBuf>) -> Self {
        let mut bucket_prefix = bucket_prefix.to_string();
        if !bucket_prefix.ends_with('/') {
            bucket_prefix.push('/');
        }
        Self {
            bucket_prefix,
            root: root.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.storage.bucket_prefix,
            config.storage.resolved_root(&config.paths),
        )
    }

    /// Object key (path below the bucket) for a URI
    fn key_for<'a>(&self, uri: &'a str) -> Result<&'a str> {
        uri.strip_prefix(&self.bucket_prefix).ok_or_else(|| {
            Error::Storage(format!(
                "'{}' is outside the configured bucket '{}'",
                uri, self.bucket_prefix
            ))
        })
    }

    fn path_for(&self, uri: &str) -> Result<PathBuf> {
        let key = self.key_for(uri)?;
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::Storage(format!("Invalid object key in '{}'", uri)));
        }
        Ok(self.root.join(relative))
    }
}

fn scan(root: &Path, bucket_prefix: &str, pattern: &Regex) -> Result<Vec<ObjectMeta>> {
    if !root.is_dir() {
        return Err(Error::Storage(format!(
            "Object root {} does not exist",
            root.display()
        )));
    }

    let mut objects = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| Error::Storage(format!("Failed to list objects: {}", e)))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if !pattern.is_match(&key) {
            continue;
        }

        let metadata = entry
            .metadata()
            .map_err(|e| {
                Error::Storage(format!("Failed to stat {}: {}", entry.path().display(), e))
            })?;
        objects.push(ObjectMeta {
            uri: format!("{}{}", bucket_prefix, key),
            content_type: mime_guess::from_path(entry.path())
                .first()
                .map(|m| m.essence_str().to_string()),
            size_bytes: i64::try_from(metadata.len()).unwrap_or(i64::MAX),
            updated_at: metadata
                .modified()
                .ok()
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339()),
        });
    }

    objects.sort_by(|a, b| a.uri.cmp(&b.uri));
    Ok(objects)
}

#[async_trait]
impl ObjectCatalog for LocalObjectStore {
    async fn list(&self, location: &str) -> Result<Vec<ObjectMeta>> {
        let key_pattern = wildcard_regex(self.key_for(location)?)?;
        let root = self.root.clone();
        let prefix = self.bucket_prefix.clone();

        let objects = tokio::task::spawn_blocking(move || scan(&root, &prefix, &key_pattern))
            .await
            .map_err(|e| Error::Storage(format!("Object listing task failed: {}", e)))??;

        debug!(location = %location, objects = objects.len(), "Listed objects");
        Ok(objects)
    }

    fn access_url(&self, uri: &str) -> Result<Option<String>> {
        let path = self.path_for(uri)?;
        if !path.is_file() {
            return Ok(None);
        }
        let absolute = path.canonicalize()?;
        let url = Url::from_file_path(&absolute).map_err(|_| {
            Error::Storage(format!("Cannot build a URL for {}", absolute.display()))
        })?;
        Ok(Some(url.to_string()))
    }
}
