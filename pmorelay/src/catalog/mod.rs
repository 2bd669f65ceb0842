//! Track catalog: providers and the current snapshot
//!
//! A [`TrackCatalog`] lists the playable tracks; the [`CatalogStore`]
//! holds the latest [`CatalogSnapshot`] and publishes it through a `watch`
//! channel. A failed or empty refresh never replaces a non-empty snapshot.

mod http_index;
mod local;
mod mirror;
mod static_list;

pub use http_index::HttpIndexCatalog;
pub use local::LocalDirCatalog;
pub use mirror::{MirrorCatalog, MirrorSettings};
pub use static_list::StaticCatalog;

use std::{collections::HashSet, path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{error::Result, track::TrackRef};

/// Audio extensions accepted when none are configured
pub const DEFAULT_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "oga", "opus", "m4a", "aac", "wav"];

/// A source of playable tracks.
#[async_trait]
pub trait TrackCatalog: Send + Sync {
    /// Lists the tracks currently available, in play order.
    async fn refresh(&self) -> Result<Vec<TrackRef>>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Ordered, deduplicated list of tracks at a given version.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "pmoserver", derive(utoipa::ToSchema))]
pub struct CatalogSnapshot {
    /// Incremented on every installed snapshot
    pub version: u64,
    pub tracks: Vec<TrackRef>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl CatalogSnapshot {
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TrackRef> {
        self.tracks.get(index)
    }
}

/// Outcome of applying a refresh result to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new snapshot was installed
    Installed { version: u64, tracks: usize },
    /// The previous snapshot was kept
    Kept { version: u64 },
}

/// Holder of the current catalog snapshot.
pub struct CatalogStore {
    tx: watch::Sender<Option<Arc<CatalogSnapshot>>>,
}

impl CatalogStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// The current snapshot, `None` before the first refresh completed
    pub fn snapshot(&self) -> Option<Arc<CatalogSnapshot>> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<CatalogSnapshot>>> {
        self.tx.subscribe()
    }

    /// Applies the result of a refresh.
    ///
    /// Duplicates are dropped (first occurrence wins). An error or an empty
    /// list keeps the previous snapshot; if there was none, an empty one is
    /// installed so waiters can observe that the catalog is empty.
    pub fn apply(&self, result: Result<Vec<TrackRef>>) -> RefreshOutcome {
        let tracks = match result {
            Ok(tracks) => dedupe(tracks),
            Err(e) => {
                warn!("Catalog refresh failed: {}", e);
                Vec::new()
            }
        };

        let current = self.snapshot();
        if tracks.is_empty() {
            if let Some(current) = current {
                if !current.is_empty() {
                    warn!(
                        version = current.version,
                        "Catalog refresh yielded no tracks, keeping previous catalog"
                    );
                }
                return RefreshOutcome::Kept {
                    version: current.version,
                };
            }
        }

        let version = current.map(|c| c.version + 1).unwrap_or(1);
        let count = tracks.len();
        self.tx.send_replace(Some(Arc::new(CatalogSnapshot {
            version,
            tracks,
            refreshed_at: Some(Utc::now()),
        })));
        info!(version, tracks = count, "Catalog updated");
        RefreshOutcome::Installed {
            version,
            tracks: count,
        }
    }

    /// Runs one refresh of `catalog` and applies it.
    pub async fn refresh_from(&self, catalog: &dyn TrackCatalog) -> RefreshOutcome {
        debug!(catalog = %catalog.describe(), "Refreshing catalog");
        let result = catalog.refresh().await;
        self.apply(result)
    }
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new()
    }
}

fn dedupe(tracks: Vec<TrackRef>) -> Vec<TrackRef> {
    let mut seen = HashSet::with_capacity(tracks.len());
    tracks
        .into_iter()
        .filter(|t| seen.insert(t.id.clone()))
        .collect()
}

/// Refreshes `catalog` now, then every `interval`, until `cancel` fires.
pub fn spawn_refresher(
    store: Arc<CatalogStore>,
    catalog: Arc<dyn TrackCatalog>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            catalog = %catalog.describe(),
            interval_secs = interval.as_secs(),
            "Catalog refresher started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = store.refresh_from(catalog.as_ref()) => {},
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {},
            }
        }
        debug!("Catalog refresher stopped");
    })
}

/// True if `path` has an extension in `extensions` (case-insensitive).
/// An empty list accepts any extension.
pub(crate) fn has_allowed_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions.is_empty()
        || extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

pub(crate) fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn tracks(ids: &[&str]) -> Vec<TrackRef> {
        ids.iter().map(|id| TrackRef::new(*id)).collect()
    }

    #[test]
    fn test_first_refresh_installs_snapshot() {
        let store = CatalogStore::new();
        assert!(store.snapshot().is_none());

        let outcome = store.apply(Ok(tracks(&["/m/a.mp3", "/m/b.mp3"])));
        assert_eq!(outcome, RefreshOutcome::Installed { version: 1, tracks: 2 });
        assert_eq!(store.snapshot().unwrap().len(), 2);
    }

    #[test]
    fn test_duplicates_first_occurrence_wins() {
        let store = CatalogStore::new();
        store.apply(Ok(tracks(&["/m/b.mp3", "/m/a.mp3", "/m/b.mp3", "/m/c.mp3"])));
        let ids: Vec<_> = store
            .snapshot()
            .unwrap()
            .tracks
            .iter()
            .map(|t| t.id.clone())
            .collect();
        assert_eq!(ids, vec!["/m/b.mp3", "/m/a.mp3", "/m/c.mp3"]);
    }

    #[test]
    fn test_empty_or_failed_refresh_keeps_previous() {
        let store = CatalogStore::new();
        store.apply(Ok(tracks(&["/m/a.mp3"])));

        assert_eq!(store.apply(Ok(Vec::new())), RefreshOutcome::Kept { version: 1 });
        assert_eq!(
            store.apply(Err(Error::catalog("index unreachable"))),
            RefreshOutcome::Kept { version: 1 }
        );
        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.tracks, tracks(&["/m/a.mp3"]));
    }

    #[test]
    fn test_empty_first_refresh_installs_empty_snapshot() {
        let store = CatalogStore::new();
        let outcome = store.apply(Err(Error::catalog("boom")));
        assert_eq!(outcome, RefreshOutcome::Installed { version: 1, tracks: 0 });
        assert!(store.snapshot().unwrap().is_empty());

        // A later non-empty refresh replaces the empty snapshot
        store.apply(Ok(tracks(&["/m/a.mp3"])));
        assert_eq!(store.snapshot().unwrap().version, 2);
    }

    #[test]
    fn test_extension_filter() {
        let exts = vec!["mp3".to_string(), ".FLAC".to_string()];
        assert!(has_allowed_extension(Path::new("a.MP3"), &exts));
        assert!(has_allowed_extension(Path::new("b.flac"), &exts));
        assert!(!has_allowed_extension(Path::new("c.txt"), &exts));
        assert!(!has_allowed_extension(Path::new("noext"), &exts));
        assert!(has_allowed_extension(Path::new("d.xyz"), &[]));
    }

    #[tokio::test]
    async fn test_refresher_runs_immediately_and_stops() {
        let store = Arc::new(CatalogStore::new());
        let catalog: Arc<dyn TrackCatalog> = Arc::new(StaticCatalog::new(vec![
            "/m/a.mp3".to_string(),
        ]));
        let cancel = CancellationToken::new();
        let mut rx = store.subscribe();

        let handle = spawn_refresher(
            store.clone(),
            catalog,
            Duration::from_secs(3600),
            cancel.clone(),
        );
        rx.wait_for(|s| s.is_some()).await.unwrap();
        assert_eq!(store.snapshot().unwrap().len(), 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
