//! Parsed sector polygons keyed by source path.
//!
//! Entries are rebuilt wholesale on reload and swapped in atomically; readers
//! keep the `Arc` they already hold. A failed reload leaves the previous
//! entry in place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::fs;

use contact_core::{GeometryError, PolygonSet};

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("invalid polygon source {path}: {source}")]
    PolygonSource {
        path: PathBuf,
        #[source]
        source: GeometryError,
    },
    #[error("cannot read polygon source {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Default)]
pub struct PolygonCache {
    entries: DashMap<PathBuf, Arc<PolygonSet>>,
}

impl PolygonCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached set for `path`, parsing it on first use.
    pub async fn load(&self, path: &Path) -> Result<Arc<PolygonSet>, ConfigurationError> {
        if let Some(existing) = self.get(path) {
            return Ok(existing);
        }
        self.reload(path).await
    }

    /// Re-read and re-parse `path`, replacing the cached entry on success.
    pub async fn reload(&self, path: &Path) -> Result<Arc<PolygonSet>, ConfigurationError> {
        let set = Arc::new(read_polygon_source(path).await?);
        self.entries.insert(path.to_path_buf(), set.clone());
        tracing::info!(
            "Loaded {} sector polygon(s) from {}",
            set.len(),
            path.display()
        );
        Ok(set)
    }

    pub fn get(&self, path: &Path) -> Option<Arc<PolygonSet>> {
        self.entries.get(path).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, path: impl Into<PathBuf>, set: PolygonSet) -> Arc<PolygonSet> {
        let set = Arc::new(set);
        self.entries.insert(path.into(), set.clone());
        set
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

async fn read_polygon_source(path: &Path) -> Result<PolygonSet, ConfigurationError> {
    let text = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    PolygonSet::from_document(&text).map_err(|source| ConfigurationError::PolygonSource {
        path: path.to_path_buf(),
        source,
    })
}
