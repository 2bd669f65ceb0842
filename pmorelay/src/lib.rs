//! # pmorelay - Live Broadcast Engine
//!
//! `pmorelay` turns a list of audio files into a single continuous live
//! stream: it rotates through a track catalog, runs one external encoder
//! process per track and fans the encoded bytes out to any number of
//! listeners, each joining at the live point.
//!
//! ## Architecture
//!
//! ```text
//!  TrackCatalog ──refresh──► CatalogStore ──watch──► PlaybackScheduler
//!                                                        │
//!                                         Encoder ◄──────┘
//!                                            │ chunks
//!                                            ▼
//!                                     BroadcastBuffer ──► StreamSession ×N
//! ```
//!
//! - [`catalog`]: track providers (local directory, HTTP index page,
//!   mirrored remote folder, static list) and the snapshot store
//! - [`encoder`]: external encoder supervision (spawn, chunked stdout,
//!   SIGTERM then forced kill)
//! - [`broadcast`]: bounded fan-out buffer with per-listener cursors
//! - [`scheduler`]: round-robin playback, failure skipping and backoff
//! - [`session`]: one listener connection
//! - [`station`]: everything wired together
//!
//! ## Quick Start
//!
//! ```no_run
//! use pmorelay::{ProcessEncoder, RadioStation, RelaySettings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = pmoconfig::get_config();
//!     let settings = RelaySettings::from_config(&config)?;
//!
//!     let station = RadioStation::start(
//!         settings.build_catalog()?,
//!         Box::new(ProcessEncoder::new(settings.encoder.clone())),
//!         settings.station.clone(),
//!     );
//!
//!     let mut session = station.open_session();
//!     while let Ok(chunk) = session.next_chunk().await {
//!         println!("chunk #{}: {} bytes", chunk.seq, chunk.data.len());
//!     }
//!
//!     station.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `pmoserver` (default): HTTP routes for `pmoserver::Server`
//!   (`/stream`, `/nowplaying`, `/api/radio/*`)

pub mod broadcast;
pub mod catalog;
pub mod config_ext;
pub mod encoder;
pub mod error;
pub mod playback;
pub mod scheduler;
pub mod session;
pub mod station;
pub mod track;

#[cfg(feature = "pmoserver")]
pub mod pmoserver_ext;

pub use broadcast::{BroadcastBuffer, BufferStats, Chunk, ListenerCursor};
pub use catalog::{
    spawn_refresher, CatalogSnapshot, CatalogStore, HttpIndexCatalog, LocalDirCatalog,
    MirrorCatalog, MirrorSettings, RefreshOutcome, StaticCatalog, TrackCatalog,
};
pub use config_ext::{CatalogKind, CatalogSettings, RelayConfigExt, RelaySettings};
pub use encoder::{ChunkSource, Encoder, EncoderSettings, ProcessEncoder};
pub use error::{Error, Result};
pub use playback::{NowPlaying, PlaybackState, PlaybackStatus};
pub use scheduler::{PlaybackScheduler, SchedulerSettings};
pub use session::StreamSession;
pub use station::{RadioStation, StationSettings, StationStatus};
pub use track::TrackRef;

#[cfg(feature = "pmoserver")]
pub use pmoserver_ext::{
    create_api_router, create_radio_router, RadioApiDoc, RadioServerExt, RadioState,
};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
