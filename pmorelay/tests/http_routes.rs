//! HTTP surface mounted on a real pmoserver instance
#![cfg(feature = "pmoserver")]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use pmorelay::{
    ChunkSource, Encoder, RadioServerExt, RadioStation, Result, StaticCatalog, StationSettings,
    TrackRef,
};
use pmoserver::Server;
use tokio::time::timeout;

/// Emits the track name every 20 ms until stopped.
struct LoopEncoder;

struct LoopSource {
    chunk: Bytes,
}

#[async_trait]
impl ChunkSource for LoopSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(Some(self.chunk.clone()))
    }
}

#[async_trait]
impl Encoder for LoopEncoder {
    async fn start(&mut self, track: &TrackRef) -> Result<Box<dyn ChunkSource>> {
        Ok(Box::new(LoopSource {
            chunk: Bytes::from(format!("[{}]", track.name)),
        }))
    }

    async fn stop(&mut self) {}
}

async fn serve(station: Arc<RadioStation>) -> (Server, String) {
    let mut server = Server::new("PMORadio test", "http://127.0.0.1", 0);
    server.init_radio(station).await.unwrap();
    server.start().await.unwrap();
    let port = server.local_addr().unwrap().port();
    (server, format!("http://127.0.0.1:{}", port))
}

fn station() -> Arc<RadioStation> {
    RadioStation::start(
        Arc::new(StaticCatalog::new(vec![
            "https://cdn.example.org/music/First%20Song.mp3".to_string(),
        ])),
        Box::new(LoopEncoder),
        StationSettings {
            name: "Test FM".to_string(),
            ..StationSettings::default()
        },
    )
}

#[tokio::test]
async fn test_stream_and_nowplaying() {
    let station = station();
    let mut playback = station.watch_playback();
    timeout(
        Duration::from_secs(2),
        playback.wait_for(|s| s.current.is_some()),
    )
    .await
    .unwrap()
    .unwrap();

    let (mut server, base) = serve(station.clone()).await;
    let client = reqwest::Client::new();

    let body = client
        .get(format!("{}/nowplaying", base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["name"], "First Song.mp3");
    assert_eq!(
        json["id"],
        "https://cdn.example.org/music/First%20Song.mp3"
    );

    let mut response = client.get(format!("{}/stream", base)).send().await.unwrap();
    assert!(response.status().is_success());
    assert_eq!(response.headers()["content-type"], "audio/mpeg");
    assert_eq!(response.headers()["cache-control"], "no-cache");
    assert_eq!(response.headers()["icy-name"], "Test FM");

    let chunk = timeout(Duration::from_secs(2), response.chunk())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(String::from_utf8_lossy(&chunk).contains("[First Song.mp3]"));
    assert_eq!(station.listener_count(), 1);

    // Client disconnect releases the listener
    drop(response);
    timeout(Duration::from_secs(2), async {
        while station.listener_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("listener not released after disconnect");

    station.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_status_catalog_and_landing_page() {
    let station = station();
    let mut playback = station.watch_playback();
    timeout(
        Duration::from_secs(2),
        playback.wait_for(|s| s.current.is_some()),
    )
    .await
    .unwrap()
    .unwrap();

    let (mut server, base) = serve(station.clone()).await;
    let client = reqwest::Client::new();

    let status: serde_json::Value = serde_json::from_str(
        &client
            .get(format!("{}/api/radio/status", base))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(status["name"], "Test FM");
    assert_eq!(status["playback"]["status"], "playing");
    assert_eq!(status["catalog_tracks"], 1);
    assert_eq!(status["buffer"]["retention_bytes"], 262144);

    let catalog: serde_json::Value = serde_json::from_str(
        &client
            .get(format!("{}/api/radio/catalog", base))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(catalog["version"], 1);
    assert_eq!(catalog["tracks"][0]["name"], "First Song.mp3");

    let page = client
        .get(format!("{}/", base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(page.contains("Test FM"));
    assert!(page.contains("First Song.mp3"));

    station.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_stream_ends_on_shutdown() {
    let station = station();
    let (mut server, base) = serve(station.clone()).await;

    let mut response = reqwest::get(format!("{}/stream", base)).await.unwrap();
    station.shutdown().await;

    // Drains whatever was in flight, then the body ends
    let ended = timeout(Duration::from_secs(3), async {
        while let Ok(Some(_)) = response.chunk().await {}
    })
    .await;
    assert!(ended.is_ok());

    server.stop().await;
}
