//! # pmoserver - Serveur web haut niveau basé sur Axum
//!
//! Cette crate fournit une abstraction simple pour créer le serveur HTTP
//! de PMORadio : les crates métier y enregistrent leurs routes via des
//! traits d'extension, et la crate se charge du démarrage, de l'arrêt
//! gracieux et de la journalisation.
//!
//! ## Fonctionnalités
//!
//! - **API de haut niveau** : routes JSON, handlers avec état, sous-routers
//! - **Server-Sent Events (SSE)** : logs en temps réel via `/log-sse`
//! - **Documentation OpenAPI** : Swagger UI généré par `utoipa`
//! - **Arrêt gracieux** : Ctrl+C / SIGTERM ou arrêt programmatique
//!
//! ## Architecture
//!
//! - [`server`] : serveur principal et builder
//! - [`logs`] : buffer de logs, couche SSE et API de niveau de log
//!
//! ## Exemple d'utilisation
//!
//! ```rust,no_run
//! use pmoserver::{ServerBuilder, logs::LoggingOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = ServerBuilder::new_configured().build();
//!     server.init_logging(LoggingOptions::from_config()).await;
//!
//!     server.add_route("/api/health", || async {
//!         serde_json::json!({"status": "ok"})
//!     }).await;
//!
//!     server.start().await?;
//!     server.wait().await;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

pub mod logs;
pub mod server;

pub use logs::{LogState, LoggingOptions, SseLayer, log_dump, log_sse};
pub use server::{Server, ServerBuilder, ServerInfo, shutdown_signal};
