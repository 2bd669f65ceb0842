//! Extension pmoserver pour la radio
//!
//! Ce module fournit le trait [`RadioServerExt`] qui monte sur un
//! `pmoserver::Server` le flux audio, le titre en cours, une page d'accueil
//! et une petite API documentée (OpenAPI + Swagger UI).

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use utoipa::OpenApi;

use crate::{
    broadcast::BufferStats,
    catalog::CatalogSnapshot,
    playback::{NowPlaying, PlaybackState, PlaybackStatus},
    station::{RadioStation, StationStatus},
    track::TrackRef,
};

/// État partagé des routes radio
#[derive(Clone)]
pub struct RadioState {
    station: Arc<RadioStation>,
}

impl RadioState {
    pub fn new(station: Arc<RadioStation>) -> Self {
        Self { station }
    }

    pub fn station(&self) -> &Arc<RadioStation> {
        &self.station
    }
}

/// Flux audio continu
///
/// Chaque requête ouvre une session d'écoute au point live ; la session est
/// libérée quand le client se déconnecte.
async fn stream_audio(State(state): State<RadioState>) -> impl IntoResponse {
    let station = &state.station;
    let session = station.open_session();
    tracing::info!(
        listener = session.id(),
        listeners = station.listener_count(),
        "Listener connected"
    );

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(station.content_type()),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("icy-name"),
        HeaderValue::from_str(&station.settings().name)
            .unwrap_or_else(|_| HeaderValue::from_static("PMORadio")),
    );
    if let Ok(bitrate) = HeaderValue::from_str(&station.settings().bitrate_kbps.to_string()) {
        headers.insert(HeaderName::from_static("icy-br"), bitrate);
    }

    (headers, Body::from_stream(session.into_byte_stream()))
}

async fn now_playing(State(state): State<RadioState>) -> Json<NowPlaying> {
    Json(state.station.now_playing())
}

async fn landing_page(State(state): State<RadioState>) -> Html<String> {
    Html(render_landing_page(&state.station))
}

fn render_landing_page(station: &RadioStation) -> String {
    let name = escape_html(&station.settings().name);
    let playback = station.playback();
    let on_air = match (&playback.status, &playback.current) {
        (PlaybackStatus::Stopped, _) => "Off the air".to_string(),
        (_, Some(track)) => escape_html(&track.name),
        (_, None) => "Waiting for tracks…".to_string(),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{name}</title>
</head>
<body>
<h1>{name}</h1>
<p>Now playing: <strong id="nowplaying">{on_air}</strong></p>
<p>Listeners: {listeners}</p>
<audio controls preload="none" src="/stream"></audio>
<p><a href="/stream">Stream</a> ({format}, {bitrate} kbps) · <a href="/nowplaying">nowplaying</a> · <a href="/swagger-ui/radio">API</a></p>
</body>
</html>
"#,
        listeners = station.listener_count(),
        format = escape_html(&station.settings().format),
        bitrate = station.settings().bitrate_kbps,
    )
}

fn escape_html(s: &str) -> String {
    htmlescape::encode_minimal(s)
}

#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "État de la lecture et du buffer", body = StationStatus)
    ),
    tag = "Radio"
)]
async fn get_status(State(state): State<RadioState>) -> Json<StationStatus> {
    Json(state.station.status())
}

#[utoipa::path(
    get,
    path = "/catalog",
    responses(
        (status = 200, description = "Catalogue courant", body = CatalogSnapshot),
        (status = 204, description = "Aucun catalogue chargé")
    ),
    tag = "Radio"
)]
async fn get_catalog(State(state): State<RadioState>) -> axum::response::Response {
    match state.station.catalog_snapshot() {
        Some(snapshot) => Json(snapshot.as_ref().clone()).into_response(),
        None => axum::http::StatusCode::NO_CONTENT.into_response(),
    }
}

/// Documentation OpenAPI de l'API radio
#[derive(OpenApi)]
#[openapi(
    info(
        title = "PMORadio API",
        version = "1.0.0",
        description = "État de la station, du buffer de diffusion et du catalogue"
    ),
    paths(get_status, get_catalog),
    components(schemas(
        StationStatus,
        PlaybackState,
        PlaybackStatus,
        BufferStats,
        CatalogSnapshot,
        TrackRef,
        NowPlaying
    )),
    tags(
        (name = "Radio", description = "Station de radio en direct")
    )
)]
pub struct RadioApiDoc;

/// Crée le router de l'API (`/status`, `/catalog`)
pub fn create_api_router(state: RadioState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/catalog", get(get_catalog))
        .with_state(state)
}

/// Crée le router public (`/`, `/stream`, `/nowplaying`)
pub fn create_radio_router(state: RadioState) -> Router {
    Router::new()
        .route("/", get(landing_page))
        .route("/stream", get(stream_audio))
        .route("/nowplaying", get(now_playing))
        .with_state(state)
}

/// Trait d'extension pour pmoserver::Server
#[cfg(feature = "pmoserver")]
pub trait RadioServerExt {
    /// Monte la station sur le serveur
    ///
    /// # Routes créées
    ///
    /// - `/`, `/stream`, `/nowplaying`
    /// - API: `/api/radio/status`, `/api/radio/catalog`
    /// - Swagger: `/swagger-ui/radio`
    async fn init_radio(&mut self, station: Arc<RadioStation>) -> anyhow::Result<RadioState>;
}

#[cfg(feature = "pmoserver")]
impl RadioServerExt for pmoserver::Server {
    async fn init_radio(&mut self, station: Arc<RadioStation>) -> anyhow::Result<RadioState> {
        let state = RadioState::new(station);

        self.add_router("/", create_radio_router(state.clone())).await;
        self.add_openapi(create_api_router(state.clone()), RadioApiDoc::openapi(), "radio")
            .await;

        Ok(state)
    }
}
