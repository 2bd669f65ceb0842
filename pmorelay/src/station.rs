//! The running radio station
//!
//! [`RadioStation`] wires the catalog store, its refresher, the playback
//! scheduler and the broadcast buffer together, and exposes the read-only
//! views the HTTP layer needs.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    broadcast::{BroadcastBuffer, BufferStats, DEFAULT_RETENTION_BYTES},
    catalog::{spawn_refresher, CatalogSnapshot, CatalogStore, TrackCatalog},
    encoder::Encoder,
    playback::{NowPlaying, PlaybackHandle, PlaybackState},
    scheduler::{PlaybackScheduler, SchedulerSettings},
    session::StreamSession,
};

/// Upper bound for the scheduler to stop its encoder on shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationSettings {
    pub name: String,
    /// Encoder output format, drives the stream content type
    pub format: String,
    pub bitrate_kbps: u32,
    pub retention_bytes: usize,
    pub refresh_interval: Duration,
    pub scheduler: SchedulerSettings,
}

impl Default for StationSettings {
    fn default() -> Self {
        Self {
            name: "PMORadio".to_string(),
            format: "mp3".to_string(),
            bitrate_kbps: 128,
            retention_bytes: DEFAULT_RETENTION_BYTES,
            refresh_interval: Duration::from_secs(24 * 3600),
            scheduler: SchedulerSettings::default(),
        }
    }
}

/// Aggregated view for `/api/radio/status`
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "pmoserver", derive(utoipa::ToSchema))]
pub struct StationStatus {
    pub name: String,
    pub format: String,
    pub bitrate_kbps: u32,
    pub playback: PlaybackState,
    pub buffer: BufferStats,
    pub catalog_version: Option<u64>,
    pub catalog_tracks: usize,
}

struct StationTasks {
    refresher: JoinHandle<()>,
    scheduler: JoinHandle<()>,
}

pub struct RadioStation {
    settings: StationSettings,
    catalog_description: String,
    store: Arc<CatalogStore>,
    buffer: BroadcastBuffer,
    playback: watch::Receiver<PlaybackState>,
    cancel: CancellationToken,
    tasks: Mutex<Option<StationTasks>>,
}

impl RadioStation {
    /// Starts the refresher and the scheduler. Must be called from within
    /// a Tokio runtime.
    pub fn start(
        catalog: Arc<dyn TrackCatalog>,
        encoder: Box<dyn Encoder>,
        settings: StationSettings,
    ) -> Arc<Self> {
        let store = Arc::new(CatalogStore::new());
        let buffer = BroadcastBuffer::new(settings.retention_bytes);
        let (playback, playback_rx) = PlaybackHandle::new();
        let cancel = CancellationToken::new();
        let catalog_description = catalog.describe();

        info!(
            station = %settings.name,
            catalog = %catalog_description,
            format = %settings.format,
            bitrate_kbps = settings.bitrate_kbps,
            "Starting radio station"
        );

        let scheduler = PlaybackScheduler::new(
            encoder,
            store.subscribe(),
            buffer.clone(),
            playback,
            settings.scheduler,
            cancel.child_token(),
        );
        let scheduler = tokio::spawn(scheduler.run());
        let refresher = spawn_refresher(
            store.clone(),
            catalog,
            settings.refresh_interval,
            cancel.child_token(),
        );

        Arc::new(Self {
            settings,
            catalog_description,
            store,
            buffer,
            playback: playback_rx,
            cancel,
            tasks: Mutex::new(Some(StationTasks {
                refresher,
                scheduler,
            })),
        })
    }

    /// Attaches a new listener at the live point.
    pub fn open_session(&self) -> StreamSession {
        StreamSession::attach(self.buffer.clone())
    }

    pub fn now_playing(&self) -> NowPlaying {
        self.playback.borrow().now_playing()
    }

    pub fn playback(&self) -> PlaybackState {
        self.playback.borrow().clone()
    }

    /// Receiver notified on every playback change
    pub fn watch_playback(&self) -> watch::Receiver<PlaybackState> {
        self.playback.clone()
    }

    pub fn catalog_snapshot(&self) -> Option<Arc<CatalogSnapshot>> {
        self.store.snapshot()
    }

    pub fn catalog_description(&self) -> &str {
        &self.catalog_description
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    pub fn listener_count(&self) -> usize {
        self.buffer.listener_count()
    }

    pub fn settings(&self) -> &StationSettings {
        &self.settings
    }

    /// MIME type of the encoded stream
    pub fn content_type(&self) -> &'static str {
        content_type_for(&self.settings.format)
    }

    pub fn status(&self) -> StationStatus {
        let snapshot = self.catalog_snapshot();
        StationStatus {
            name: self.settings.name.clone(),
            format: self.settings.format.clone(),
            bitrate_kbps: self.settings.bitrate_kbps,
            playback: self.playback(),
            buffer: self.buffer_stats(),
            catalog_version: snapshot.as_ref().map(|s| s.version),
            catalog_tracks: snapshot.map(|s| s.len()).unwrap_or(0),
        }
    }

    /// Stops the scheduler (and its encoder) and the refresher, then closes
    /// the buffer so every listener session ends. Safe to call twice.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(mut tasks) = tasks {
            info!(station = %self.settings.name, "Stopping radio station");
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut tasks.scheduler)
                .await
                .is_err()
            {
                warn!("Scheduler did not stop in time, aborting");
                tasks.scheduler.abort();
            }
            if tokio::time::timeout(Duration::from_secs(1), &mut tasks.refresher)
                .await
                .is_err()
            {
                tasks.refresher.abort();
            }
        }

        self.buffer.close();
    }
}

impl Drop for RadioStation {
    fn drop(&mut self) {
        self.cancel.cancel();
        let tasks = self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tasks) = tasks {
            tasks.scheduler.abort();
            tasks.refresher.abort();
        }
        self.buffer.close();
    }
}

/// MIME type for an encoder output format
pub fn content_type_for(format: &str) -> &'static str {
    match format.to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "aac" | "adts" => "audio/aac",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::StaticCatalog, playback::PlaybackStatus, scheduler::tests::ScriptedEncoder,
    };
    use tokio::time::timeout;

    fn station(tracks: &[&str]) -> (Arc<RadioStation>, Arc<tokio::sync::Semaphore>) {
        let encoder = ScriptedEncoder::new(&[]);
        let gate = encoder.gate.clone();
        let catalog = Arc::new(StaticCatalog::new(
            tracks.iter().map(|t| t.to_string()).collect(),
        ));
        let station = RadioStation::start(catalog, Box::new(encoder), StationSettings::default());
        (station, gate)
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("mp3"), "audio/mpeg");
        assert_eq!(content_type_for("OGG"), "audio/ogg");
        assert_eq!(content_type_for("adts"), "audio/aac");
        assert_eq!(content_type_for("flac"), "audio/flac");
        assert_eq!(content_type_for("wav"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_station_plays_and_reports() {
        let (station, gate) = station(&["/m/a.mp3", "/m/b.mp3"]);
        let mut rx = station.watch_playback();
        timeout(
            Duration::from_secs(2),
            rx.wait_for(|s| s.status == PlaybackStatus::Playing),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(station.now_playing().name.as_deref(), Some("a.mp3"));
        let status = station.status();
        assert_eq!(status.catalog_tracks, 2);
        assert_eq!(status.catalog_version, Some(1));

        let mut session = station.open_session();
        assert_eq!(station.listener_count(), 1);
        gate.add_permits(1);
        // a.mp3 may land before or after the listener attached
        loop {
            let chunk = timeout(Duration::from_secs(2), session.next_chunk())
                .await
                .unwrap()
                .unwrap();
            if &chunk.data[..] == b"b.mp3" {
                break;
            }
        }

        station.shutdown().await;
        assert_eq!(station.playback().status, PlaybackStatus::Stopped);
        assert!(station.buffer_stats().closed);
        assert!(session.next_chunk().await.is_err());

        // Idempotent
        station.shutdown().await;
    }
}
