use anyhow::Context;
use pmorelay::{ProcessEncoder, RadioServerExt, RadioStation, RelaySettings};
use pmoserver::{LoggingOptions, ServerBuilder};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ========== PHASE 1 : Configuration et logs ==========

    // Répertoire de configuration optionnel en premier argument
    let config_dir = std::env::args().nth(1).unwrap_or_default();
    let config = pmoconfig::init_config(&config_dir).context("cannot load configuration")?;

    let mut server = ServerBuilder::new_configured().build();
    server.init_logging(LoggingOptions::from_config()).await;
    info!(config_dir = %config.dir(), "📻 Starting PMORadio {}", pmorelay::VERSION);

    server
        .add_route("/info", || async {
            serde_json::json!({"name": "PMORadio", "version": pmorelay::VERSION})
        })
        .await;

    // ========== PHASE 2 : Station ==========

    let settings = RelaySettings::from_config(&config)?;
    let catalog = settings
        .build_catalog()
        .context("invalid catalog configuration")?;
    info!(
        kind = %settings.catalog.kind,
        encoder = %settings.encoder.program,
        "🎵 Catalog: {}",
        catalog.describe()
    );

    let station = RadioStation::start(
        catalog,
        Box::new(ProcessEncoder::new(settings.encoder.clone())),
        settings.station.clone(),
    );
    server.init_radio(station.clone()).await?;

    // ========== PHASE 3 : Démarrage du serveur ==========

    info!("🌐 Starting HTTP server...");
    if let Err(e) = server.start().await {
        station.shutdown().await;
        return Err(e);
    }

    info!("✅ PMORadio is on air at {}/stream", server.info().base_url);
    info!("Press Ctrl+C to stop...");
    server.wait().await;

    info!("Shutting down...");
    station.shutdown().await;
    server.stop().await;

    if let Err(e) = config.save() {
        warn!("Failed to save configuration: {}", e);
    }
    Ok(())
}
