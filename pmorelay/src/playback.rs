//! Playback state shared between the scheduler and the HTTP layer
//!
//! The scheduler owns the only [`PlaybackHandle`]; everybody else reads
//! snapshots through a `watch::Receiver`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::track::TrackRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "pmoserver", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    /// Waiting for a non-empty catalog
    Idle,
    Playing,
    /// Between two tracks
    Advancing,
    /// Scheduler shut down
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "pmoserver", derive(utoipa::ToSchema))]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    /// Track currently on air; only set once its encoder has started
    pub current: Option<TrackRef>,
    /// Index of `current` in the catalog snapshot it was taken from
    pub position: Option<usize>,
    pub catalog_version: Option<u64>,
    pub encoder_pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub tracks_started: u64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            current: None,
            position: None,
            catalog_version: None,
            encoder_pid: None,
            started_at: None,
            tracks_started: 0,
        }
    }
}

/// `/nowplaying` payload: nulls when nothing is on air
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "pmoserver", derive(utoipa::ToSchema))]
pub struct NowPlaying {
    pub name: Option<String>,
    pub id: Option<String>,
}

impl PlaybackState {
    pub fn now_playing(&self) -> NowPlaying {
        match &self.current {
            Some(track) => NowPlaying {
                name: Some(track.name.clone()),
                id: Some(track.id.clone()),
            },
            None => NowPlaying::default(),
        }
    }
}

/// Write side of the playback state.
pub struct PlaybackHandle {
    tx: watch::Sender<PlaybackState>,
}

impl PlaybackHandle {
    pub fn new() -> (Self, watch::Receiver<PlaybackState>) {
        let (tx, rx) = watch::channel(PlaybackState::default());
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> PlaybackState {
        self.tx.borrow().clone()
    }

    pub(crate) fn idle(&self) {
        self.tx.send_modify(|s| {
            s.status = PlaybackStatus::Idle;
            s.current = None;
            s.position = None;
            s.encoder_pid = None;
            s.started_at = None;
        });
    }

    pub(crate) fn advancing(&self) {
        self.tx.send_modify(|s| {
            s.status = PlaybackStatus::Advancing;
            s.encoder_pid = None;
        });
    }

    pub(crate) fn playing(
        &self,
        track: TrackRef,
        position: usize,
        catalog_version: u64,
        encoder_pid: Option<u32>,
    ) {
        self.tx.send_modify(|s| {
            s.status = PlaybackStatus::Playing;
            s.current = Some(track);
            s.position = Some(position);
            s.catalog_version = Some(catalog_version);
            s.encoder_pid = encoder_pid;
            s.started_at = Some(Utc::now());
            s.tracks_started += 1;
        });
    }

    pub(crate) fn stopped(&self) {
        self.tx.send_modify(|s| {
            s.status = PlaybackStatus::Stopped;
            s.current = None;
            s.encoder_pid = None;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_are_visible_to_readers() {
        let (handle, rx) = PlaybackHandle::new();
        assert_eq!(rx.borrow().status, PlaybackStatus::Idle);
        assert_eq!(rx.borrow().now_playing(), NowPlaying::default());

        handle.playing(TrackRef::new("/m/a.mp3"), 0, 3, Some(42));
        let state = rx.borrow().clone();
        assert_eq!(state.status, PlaybackStatus::Playing);
        assert_eq!(state.position, Some(0));
        assert_eq!(state.catalog_version, Some(3));
        assert_eq!(state.tracks_started, 1);
        assert_eq!(state.now_playing().name.as_deref(), Some("a.mp3"));

        handle.advancing();
        // The previous track stays reported until the next one starts
        assert_eq!(rx.borrow().now_playing().name.as_deref(), Some("a.mp3"));
        assert!(rx.borrow().encoder_pid.is_none());

        handle.stopped();
        assert_eq!(rx.borrow().status, PlaybackStatus::Stopped);
        assert!(rx.borrow().current.is_none());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_value(PlaybackState::default()).unwrap();
        assert_eq!(json["status"], "idle");
        assert_eq!(json["current"], serde_json::Value::Null);
    }
}
