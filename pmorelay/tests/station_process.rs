//! End-to-end rotation with a real encoder process (`sh` stands in for ffmpeg)
#![cfg(unix)]

use std::{fs, time::Duration};

use pmorelay::{
    EncoderSettings, LocalDirCatalog, PlaybackStatus, ProcessEncoder, RadioStation,
    SchedulerSettings, StationSettings,
};
use tokio::time::timeout;

fn shell_encoder(script: &str) -> ProcessEncoder {
    ProcessEncoder::new(EncoderSettings {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string(), "{input}".to_string()],
        chunk_size: 64,
        grace_period: Duration::from_millis(200),
        ..EncoderSettings::default()
    })
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn settings() -> StationSettings {
    StationSettings {
        scheduler: SchedulerSettings {
            idle_poll: Duration::from_millis(100),
            failure_backoff: Duration::from_millis(200),
        },
        ..StationSettings::default()
    }
}

#[tokio::test]
async fn test_rotation_through_local_directory() {
    init_tracing();
    let music = tempfile::tempdir().unwrap();
    for name in ["a.mp3", "b.mp3", "c.mp3"] {
        fs::write(music.path().join(name), name).unwrap();
    }
    fs::write(music.path().join("cover.jpg"), b"").unwrap();

    // Emits "<file name>;" then ends the track
    let encoder = shell_encoder(r#"printf '%s;' "$(basename "$0")"; sleep 0.1"#);
    let station = RadioStation::start(
        std::sync::Arc::new(LocalDirCatalog::new(music.path())),
        Box::new(encoder),
        settings(),
    );

    let mut session = station.open_session();
    let mut received = String::new();
    let heard = timeout(Duration::from_secs(10), async {
        while !received.contains("b.mp3;c.mp3;a.mp3;") {
            let chunk = session.next_chunk().await.unwrap();
            received.push_str(&String::from_utf8_lossy(&chunk.data));
        }
    })
    .await;
    assert!(heard.is_ok(), "rotation not observed, got {:?}", received);
    assert!(!received.contains("cover.jpg"));

    let snapshot = station.catalog_snapshot().unwrap();
    assert_eq!(snapshot.len(), 3);

    timeout(Duration::from_secs(5), station.shutdown())
        .await
        .expect("shutdown must be bounded");
    assert_eq!(station.playback().status, PlaybackStatus::Stopped);
    assert!(session.next_chunk().await.is_err());
}

#[tokio::test]
async fn test_failing_track_is_skipped() {
    init_tracing();
    let music = tempfile::tempdir().unwrap();
    for name in ["a.mp3", "b.mp3", "c.mp3"] {
        fs::write(music.path().join(name), name).unwrap();
    }

    // b.mp3 makes the encoder fail before producing anything
    let encoder = shell_encoder(
        r#"n="$(basename "$0")"; [ "$n" = b.mp3 ] && exit 1; printf '%s;' "$n"; sleep 0.1"#,
    );
    let station = RadioStation::start(
        std::sync::Arc::new(LocalDirCatalog::new(music.path())),
        Box::new(encoder),
        settings(),
    );

    let mut session = station.open_session();
    let mut received = String::new();
    let heard = timeout(Duration::from_secs(10), async {
        while !received.contains("c.mp3;a.mp3;c.mp3;") {
            let chunk = session.next_chunk().await.unwrap();
            received.push_str(&String::from_utf8_lossy(&chunk.data));
        }
    })
    .await;
    assert!(heard.is_ok(), "rotation not observed, got {:?}", received);
    assert!(!received.contains("b.mp3"));

    station.shutdown().await;
}

#[tokio::test]
async fn test_empty_directory_stays_idle() {
    init_tracing();
    let music = tempfile::tempdir().unwrap();
    let station = RadioStation::start(
        std::sync::Arc::new(LocalDirCatalog::new(music.path())),
        Box::new(shell_encoder("exit 0")),
        settings(),
    );

    let mut playback = station.watch_playback();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(playback.borrow_and_update().status, PlaybackStatus::Idle);
    assert!(station.now_playing().name.is_none());

    station.shutdown().await;
}
