//! Playback scheduler: rotates through the catalog, one encoder at a time
//!
//! ```text
//!            non-empty catalog             track ends / crashes
//!   Idle ─────────────────────► Playing ─────────────────────► Advancing
//!    ▲                             ▲                               │
//!    │        empty catalog        │        next track started     │
//!    └─────────────────────────────┴───────────────────────────────┘
//! ```
//!
//! Cancellation stops the active encoder and leaves the state `Stopped`.

use std::{sync::Arc, time::Duration};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    broadcast::BroadcastBuffer,
    catalog::CatalogSnapshot,
    encoder::{ChunkSource, Encoder},
    error::Error,
    playback::PlaybackHandle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Wait between checks while the catalog is empty
    pub idle_poll: Duration,
    /// Pause after a full pass of failing tracks
    pub failure_backoff: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            idle_poll: Duration::from_secs(30),
            failure_backoff: Duration::from_secs(30),
        }
    }
}

enum TrackEnd {
    Finished { bytes: u64 },
    Crashed { error: Error, bytes: u64 },
    Cancelled,
    BufferClosed,
}

pub struct PlaybackScheduler {
    encoder: Box<dyn Encoder>,
    catalog: watch::Receiver<Option<Arc<CatalogSnapshot>>>,
    buffer: BroadcastBuffer,
    playback: PlaybackHandle,
    settings: SchedulerSettings,
    cancel: CancellationToken,
}

impl PlaybackScheduler {
    pub fn new(
        encoder: Box<dyn Encoder>,
        catalog: watch::Receiver<Option<Arc<CatalogSnapshot>>>,
        buffer: BroadcastBuffer,
        playback: PlaybackHandle,
        settings: SchedulerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            encoder,
            catalog,
            buffer,
            playback,
            settings,
            cancel,
        }
    }

    /// Runs until cancelled or until the broadcast buffer is closed.
    pub async fn run(mut self) {
        let mut position: Option<usize> = None;
        let mut failures = 0usize;

        while !self.cancel.is_cancelled() && !self.buffer.is_closed() {
            let snapshot = self
                .catalog
                .borrow_and_update()
                .clone()
                .filter(|s| !s.is_empty());

            let Some(snapshot) = snapshot else {
                self.playback.idle();
                position = None;
                failures = 0;
                info!("No tracks available, waiting for the catalog");
                if !self.wait_for_catalog().await {
                    break;
                }
                continue;
            };

            let index = position.map(|p| (p + 1) % snapshot.len()).unwrap_or(0);
            position = Some(index);
            let track = snapshot.tracks[index].clone();

            let succeeded = match self.encoder.start(&track).await {
                Ok(source) => {
                    self.playback.playing(
                        track.clone(),
                        index,
                        snapshot.version,
                        self.encoder.current_pid(),
                    );
                    info!(track = %track.name, position = index, "Now playing");

                    let end = self.pump(source).await;
                    let succeeded = match end {
                        TrackEnd::Cancelled | TrackEnd::BufferClosed => break,
                        TrackEnd::Finished { bytes } => {
                            debug!(track = %track.name, bytes, "Track finished");
                            true
                        }
                        TrackEnd::Crashed { error, bytes } => {
                            warn!(track = %track.name, bytes, "{}", error);
                            bytes > 0
                        }
                    };
                    self.playback.advancing();
                    succeeded
                }
                Err(e) => {
                    warn!(track = %track.name, "Skipping track: {}", e);
                    false
                }
            };

            if succeeded {
                failures = 0;
                continue;
            }

            failures += 1;
            if failures >= snapshot.len() {
                failures = 0;
                let err = Error::AllTracksFailing {
                    tracks: snapshot.len(),
                };
                error!(
                    backoff_secs = self.settings.failure_backoff.as_secs_f32(),
                    "{}, backing off",
                    err
                );
                if !pause(&self.cancel, self.settings.failure_backoff).await {
                    break;
                }
            }
        }

        self.encoder.stop().await;
        self.playback.stopped();
        info!("Playback scheduler stopped");
    }

    /// Moves the encoder output into the broadcast buffer until the track ends.
    async fn pump(&mut self, mut source: Box<dyn ChunkSource>) -> TrackEnd {
        let cancel = self.cancel.clone();
        let mut bytes = 0u64;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return TrackEnd::Cancelled,
                next = source.next_chunk() => next,
            };
            match next {
                Ok(Some(chunk)) => {
                    bytes += chunk.len() as u64;
                    if self.buffer.publish(chunk).is_err() {
                        return TrackEnd::BufferClosed;
                    }
                }
                Ok(None) => return TrackEnd::Finished { bytes },
                Err(error) => return TrackEnd::Crashed { error, bytes },
            }
        }
    }

    /// Idle wait: returns on catalog change or after `idle_poll`; false if cancelled.
    async fn wait_for_catalog(&mut self) -> bool {
        let idle_poll = self.settings.idle_poll;
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(idle_poll) => true,
            changed = self.catalog.changed() => {
                if changed.is_err() {
                    // Catalog store gone: fall back to plain polling
                    return pause(&self.cancel, idle_poll).await;
                }
                true
            }
        }
    }

}

/// Sleeps for `duration`; false if cancelled first.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        catalog::CatalogStore,
        encoder::ChunkSource,
        error::Result,
        playback::{PlaybackState, PlaybackStatus},
        track::TrackRef,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tokio::sync::Semaphore;
    use tokio::time::timeout;

    /// Encoder whose tracks emit one chunk named after the track, then end
    /// when the test releases a permit on `gate`.
    pub(crate) struct ScriptedEncoder {
        pub failing: HashSet<String>,
        pub gate: Arc<Semaphore>,
        pub attempts: Arc<Mutex<Vec<String>>>,
        pub stops: Arc<Mutex<usize>>,
    }

    impl ScriptedEncoder {
        pub(crate) fn new(failing: &[&str]) -> Self {
            Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                gate: Arc::new(Semaphore::new(0)),
                attempts: Arc::new(Mutex::new(Vec::new())),
                stops: Arc::new(Mutex::new(0)),
            }
        }
    }

    struct ScriptedSource {
        chunk: Option<Bytes>,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl ChunkSource for ScriptedSource {
        async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
            if let Some(chunk) = self.chunk.take() {
                return Ok(Some(chunk));
            }
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| Error::other("gate closed"))?;
            permit.forget();
            Ok(None)
        }
    }

    #[async_trait]
    impl Encoder for ScriptedEncoder {
        async fn start(&mut self, track: &TrackRef) -> Result<Box<dyn ChunkSource>> {
            self.attempts.lock().unwrap().push(track.name.clone());
            if self.failing.contains(&track.name) {
                return Err(Error::launch(&track.name, "scripted failure"));
            }
            Ok(Box::new(ScriptedSource {
                chunk: Some(Bytes::from(track.name.clone())),
                gate: self.gate.clone(),
            }))
        }

        async fn stop(&mut self) {
            *self.stops.lock().unwrap() += 1;
        }

        fn current_pid(&self) -> Option<u32> {
            Some(4242)
        }
    }

    struct Harness {
        store: CatalogStore,
        buffer: BroadcastBuffer,
        state: watch::Receiver<PlaybackState>,
        gate: Arc<Semaphore>,
        attempts: Arc<Mutex<Vec<String>>>,
        stops: Arc<Mutex<usize>>,
        cancel: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
    }

    fn start(tracks: &[&str], failing: &[&str], settings: SchedulerSettings) -> Harness {
        let store = CatalogStore::new();
        if !tracks.is_empty() {
            store.apply(Ok(tracks.iter().map(|t| TrackRef::new(*t)).collect()));
        }
        let buffer = BroadcastBuffer::new(1 << 16);
        let (playback, state) = PlaybackHandle::new();
        let encoder = ScriptedEncoder::new(failing);
        let gate = encoder.gate.clone();
        let attempts = encoder.attempts.clone();
        let stops = encoder.stops.clone();
        let cancel = CancellationToken::new();

        let scheduler = PlaybackScheduler::new(
            Box::new(encoder),
            store.subscribe(),
            buffer.clone(),
            playback,
            settings,
            cancel.clone(),
        );
        let handle = tokio::spawn(scheduler.run());

        Harness {
            store,
            buffer,
            state,
            gate,
            attempts,
            stops,
            cancel,
            handle,
        }
    }

    async fn wait_playing(state: &mut watch::Receiver<PlaybackState>, name: &str) -> PlaybackState {
        timeout(
            Duration::from_secs(2),
            state.wait_for(|s| {
                s.status == PlaybackStatus::Playing
                    && s.current.as_ref().map(|t| t.name.as_str()) == Some(name)
            }),
        )
        .await
        .unwrap_or_else(|_| panic!("{} never started", name))
        .unwrap()
        .clone()
    }

    fn assert_send<T: Send + 'static>(_: &T) {}

    #[test]
    fn test_run_future_is_spawnable() {
        let store = CatalogStore::new();
        let (playback, _state) = PlaybackHandle::new();
        let scheduler = PlaybackScheduler::new(
            Box::new(ScriptedEncoder::new(&[])),
            store.subscribe(),
            BroadcastBuffer::new(1024),
            playback,
            SchedulerSettings::default(),
            CancellationToken::new(),
        );
        let run = scheduler.run();
        assert_send(&run);
        drop(run);
    }

    #[tokio::test]
    async fn test_rotation_wraps_around() {
        let mut h = start(&["a", "b", "c"], &[], SchedulerSettings::default());

        let first = wait_playing(&mut h.state, "a").await;
        assert_eq!(first.position, Some(0));
        assert_eq!(first.encoder_pid, Some(4242));
        for next in ["b", "c", "a"] {
            h.gate.add_permits(1);
            wait_playing(&mut h.state, next).await;
        }
        let state = h.state.borrow().clone();
        assert_eq!(state.position, Some(0));
        assert_eq!(state.tracks_started, 4);

        h.cancel.cancel();
        h.handle.await.unwrap();
        assert_eq!(h.state.borrow().status, PlaybackStatus::Stopped);
        assert!(*h.stops.lock().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_launch_failure_is_skipped_and_never_reported() {
        let mut h = start(&["a", "b", "c"], &["b"], SchedulerSettings::default());

        wait_playing(&mut h.state, "a").await;
        h.gate.add_permits(1);
        let state = wait_playing(&mut h.state, "c").await;

        // Only a and c ever reached Playing
        assert_eq!(state.tracks_started, 2);
        assert_eq!(state.position, Some(2));
        assert_eq!(*h.attempts.lock().unwrap(), vec!["a", "b", "c"]);

        h.cancel.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_encoder_output_reaches_listeners() {
        let mut h = start(&["a", "b"], &[], SchedulerSettings::default());
        let mut cursor = h.buffer.subscribe();

        // The first chunk may already be published; wait for b's chunk
        wait_playing(&mut h.state, "a").await;
        h.gate.add_permits(1);
        let chunk = loop {
            let chunk = h.buffer.read_next(&mut cursor).await.unwrap();
            if chunk.data == Bytes::from_static(b"b") {
                break chunk;
            }
        };
        assert_eq!(chunk.data, Bytes::from_static(b"b"));

        h.cancel.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_until_catalog_arrives() {
        let settings = SchedulerSettings {
            idle_poll: Duration::from_secs(3600),
            ..SchedulerSettings::default()
        };
        let mut h = start(&[], &[], settings);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.state.borrow().status, PlaybackStatus::Idle);
        assert!(h.attempts.lock().unwrap().is_empty());

        h.store.apply(Ok(vec![TrackRef::new("a")]));
        wait_playing(&mut h.state, "a").await;

        h.cancel.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_all_tracks_failing_backs_off() {
        let settings = SchedulerSettings {
            idle_poll: Duration::from_secs(3600),
            failure_backoff: Duration::from_millis(300),
        };
        let h = start(&["a", "b"], &["a", "b"], settings);

        tokio::time::sleep(Duration::from_millis(100)).await;
        // One full pass, then the backoff
        assert_eq!(h.attempts.lock().unwrap().len(), 2);
        assert_eq!(h.state.borrow().tracks_started, 0);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(h.attempts.lock().unwrap().len() >= 4);

        h.cancel.cancel();
        timeout(Duration::from_secs(1), h.handle)
            .await
            .expect("scheduler must stop during backoff")
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_refresh_keeps_rotation_going() {
        let mut h = start(&["a", "b"], &[], SchedulerSettings::default());
        wait_playing(&mut h.state, "a").await;
        let version = h.state.borrow().catalog_version;

        // A refresh that finds nothing while a plays
        h.store.apply(Ok(vec![]));
        assert_eq!(h.store.snapshot().unwrap().len(), 2);

        h.gate.add_permits(1);
        let state = wait_playing(&mut h.state, "b").await;
        assert_eq!(state.position, Some(1));
        assert_eq!(state.catalog_version, version);

        h.gate.add_permits(1);
        wait_playing(&mut h.state, "a").await;
        assert_eq!(*h.attempts.lock().unwrap(), vec!["a", "b", "a"]);

        h.cancel.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_buffer_close_stops_scheduler() {
        let mut h = start(&["a"], &[], SchedulerSettings::default());
        wait_playing(&mut h.state, "a").await;

        h.buffer.close();
        h.gate.add_permits(1);
        timeout(Duration::from_secs(1), h.handle).await.unwrap().unwrap();
        assert_eq!(h.state.borrow().status, PlaybackStatus::Stopped);
    }
}
