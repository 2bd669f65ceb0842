use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{default_extensions, has_allowed_extension, TrackCatalog};
use crate::{
    error::{Error, Result},
    track::TrackRef,
};

/// Regular files directly inside a music directory, sorted by path.
#[derive(Debug, Clone)]
pub struct LocalDirCatalog {
    dir: PathBuf,
    extensions: Vec<String>,
}

impl LocalDirCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extensions: default_extensions(),
        }
    }

    /// Replaces the extension allow-list; an empty list accepts any extension
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) async fn scan(&self) -> Result<Vec<TrackRef>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            Error::catalog(format!("cannot read {}: {}", self.dir.display(), e))
        })?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            // Follows symlinks
            let is_file = tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if is_file && has_allowed_extension(&path, &self.extensions) {
                paths.push(path);
            }
        }
        paths.sort();

        Ok(paths
            .into_iter()
            .map(|p| TrackRef::new(p.to_string_lossy().into_owned()))
            .collect())
    }
}

#[async_trait]
impl TrackCatalog for LocalDirCatalog {
    async fn refresh(&self) -> Result<Vec<TrackRef>> {
        self.scan().await
    }

    fn describe(&self) -> String {
        format!("local directory {}", self.dir.display())
    }
}
