use async_trait::async_trait;

use super::TrackCatalog;
use crate::{error::Result, track::TrackRef};

/// Fixed list of track identifiers (`radio.catalog.tracks`).
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    tracks: Vec<TrackRef>,
}

impl StaticCatalog {
    pub fn new(ids: Vec<String>) -> Self {
        Self {
            tracks: ids
                .into_iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .map(TrackRef::new)
                .collect(),
        }
    }
}

#[async_trait]
impl TrackCatalog for StaticCatalog {
    async fn refresh(&self) -> Result<Vec<TrackRef>> {
        Ok(self.tracks.clone())
    }

    fn describe(&self) -> String {
        format!("static list ({} tracks)", self.tracks.len())
    }
}
