//! Extension pour configurer la radio depuis pmoconfig
//!
//! Le trait [`RelayConfigExt`] ajoute à `pmoconfig::Config` les accesseurs
//! de la section `radio:` ; [`RelaySettings::from_config`] les rassemble
//! en une configuration prête à démarrer une station.
//!
//! ```rust,ignore
//! use pmoconfig::get_config;
//! use pmorelay::{RelayConfigExt, RelaySettings};
//!
//! let config = get_config();
//! println!("Music directory: {}", config.get_music_dir()?);
//! let settings = RelaySettings::from_config(&config)?;
//! let catalog = settings.build_catalog()?;
//! ```

use std::{fmt, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use pmoconfig::Config;
use serde_yaml::Value;
use tracing::warn;

use crate::{
    catalog::{
        default_extensions, HttpIndexCatalog, LocalDirCatalog, MirrorCatalog, MirrorSettings,
        StaticCatalog, TrackCatalog,
    },
    encoder::EncoderSettings,
    scheduler::SchedulerSettings,
    station::StationSettings,
};

const DEFAULT_MUSIC_DIR: &str = "music";
const DEFAULT_STAGING_DIR: &str = "music_tmp";

/// Where the track list comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Local,
    HttpIndex,
    Mirror,
    Static,
}

impl FromStr for CatalogKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "local" | "dir" => Ok(Self::Local),
            "http_index" | "http" | "index" => Ok(Self::HttpIndex),
            "mirror" => Ok(Self::Mirror),
            "static" | "list" => Ok(Self::Static),
            other => Err(anyhow!("unknown catalog kind '{}'", other)),
        }
    }
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::HttpIndex => "http_index",
            Self::Mirror => "mirror",
            Self::Static => "static",
        })
    }
}

/// Trait d'extension pour la section `radio:` de pmoconfig
pub trait RelayConfigExt {
    /// Nom de la station (default: `PMORadio`)
    fn get_radio_name(&self) -> String;
    fn set_radio_name(&self, name: String) -> Result<()>;

    /// Type de catalogue; une valeur inconnue retombe sur `local`
    fn get_catalog_kind(&self) -> CatalogKind;
    fn set_catalog_kind(&self, kind: CatalogKind) -> Result<()>;

    /// Répertoire de musique, absolu ou relatif au config_dir. Créé si absent.
    fn get_music_dir(&self) -> Result<String>;
    fn set_music_dir(&self, directory: String) -> Result<()>;

    fn get_catalog_refresh_interval(&self) -> Duration;
    /// Extensions acceptées, la liste par défaut si vide
    fn get_catalog_extensions(&self) -> Vec<String>;
    fn get_catalog_index_url(&self) -> String;
    fn get_catalog_tracks(&self) -> Vec<String>;

    /// Commande de synchronisation du catalogue `mirror`
    fn get_mirror_settings(&self) -> Result<MirrorSettings>;

    fn get_encoder_settings(&self) -> EncoderSettings;

    fn get_buffer_retention_bytes(&self) -> usize;

    fn get_scheduler_settings(&self) -> SchedulerSettings;
}

impl RelayConfigExt for Config {
    fn get_radio_name(&self) -> String {
        self.get_string(&["radio", "name"], "PMORadio")
    }

    fn set_radio_name(&self, name: String) -> Result<()> {
        self.set_value(&["radio", "name"], Value::String(name))
    }

    fn get_catalog_kind(&self) -> CatalogKind {
        let raw = self.get_string(&["radio", "catalog", "kind"], "local");
        raw.parse().unwrap_or_else(|e| {
            warn!("{}, using local", e);
            CatalogKind::Local
        })
    }

    fn set_catalog_kind(&self, kind: CatalogKind) -> Result<()> {
        self.set_value(&["radio", "catalog", "kind"], Value::String(kind.to_string()))
    }

    fn get_music_dir(&self) -> Result<String> {
        self.get_managed_dir(&["radio", "catalog", "music_dir"], DEFAULT_MUSIC_DIR)
    }

    fn set_music_dir(&self, directory: String) -> Result<()> {
        self.set_managed_dir(&["radio", "catalog", "music_dir"], directory)
    }

    fn get_catalog_refresh_interval(&self) -> Duration {
        let secs = self.get_u64(&["radio", "catalog", "refresh_interval_secs"], 86400);
        Duration::from_secs(secs.max(1))
    }

    fn get_catalog_extensions(&self) -> Vec<String> {
        let extensions = self.get_string_list(&["radio", "catalog", "extensions"]);
        if extensions.is_empty() {
            default_extensions()
        } else {
            extensions
        }
    }

    fn get_catalog_index_url(&self) -> String {
        self.get_string(&["radio", "catalog", "index_url"], "")
    }

    fn get_catalog_tracks(&self) -> Vec<String> {
        self.get_string_list(&["radio", "catalog", "tracks"])
    }

    fn get_mirror_settings(&self) -> Result<MirrorSettings> {
        let staging_dir = self.get_managed_dir(
            &["radio", "catalog", "mirror", "staging_dir"],
            DEFAULT_STAGING_DIR,
        )?;
        let mut settings = MirrorSettings::rclone(
            self.get_string(&["radio", "catalog", "mirror", "source_url"], ""),
            staging_dir,
        );
        settings.command = self.get_string(&["radio", "catalog", "mirror", "command"], "rclone");
        let args = self.get_string_list(&["radio", "catalog", "mirror", "args"]);
        if !args.is_empty() {
            settings.args = args;
        }
        Ok(settings)
    }

    fn get_encoder_settings(&self) -> EncoderSettings {
        let defaults = EncoderSettings::default();
        let args = self.get_string_list(&["radio", "encoder", "args"]);
        let bitrate = self.get_u64(
            &["radio", "encoder", "bitrate_kbps"],
            defaults.bitrate_kbps as u64,
        );
        let bitrate_kbps = match u32::try_from(bitrate) {
            Ok(b) if b > 0 => b,
            _ => {
                warn!(bitrate, "Invalid encoder bitrate, using {}", defaults.bitrate_kbps);
                defaults.bitrate_kbps
            }
        };
        let chunk_size = match self.get_usize(&["radio", "encoder", "chunk_size"], defaults.chunk_size) {
            0 => {
                warn!("Encoder chunk size cannot be 0, using {}", defaults.chunk_size);
                defaults.chunk_size
            }
            n => n,
        };

        EncoderSettings {
            program: self.get_string(&["radio", "encoder", "program"], &defaults.program),
            args: if args.is_empty() { defaults.args } else { args },
            format: self.get_string(&["radio", "encoder", "format"], &defaults.format),
            bitrate_kbps,
            chunk_size,
            grace_period: Duration::from_millis(self.get_u64(
                &["radio", "encoder", "grace_period_ms"],
                defaults.grace_period.as_millis() as u64,
            )),
        }
    }

    fn get_buffer_retention_bytes(&self) -> usize {
        self.get_usize(
            &["radio", "buffer", "retention_bytes"],
            crate::broadcast::DEFAULT_RETENTION_BYTES,
        )
    }

    fn get_scheduler_settings(&self) -> SchedulerSettings {
        let defaults = SchedulerSettings::default();
        SchedulerSettings {
            idle_poll: Duration::from_secs(
                self.get_u64(&["radio", "scheduler", "idle_poll_secs"], 30)
                    .max(1),
            ),
            failure_backoff: Duration::from_secs(self.get_u64(
                &["radio", "scheduler", "failure_backoff_secs"],
                defaults.failure_backoff.as_secs(),
            )),
        }
    }
}

/// Catalog provider selection with everything needed to build it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSettings {
    pub kind: CatalogKind,
    pub music_dir: PathBuf,
    pub extensions: Vec<String>,
    pub index_url: String,
    pub tracks: Vec<String>,
    pub mirror: Option<MirrorSettings>,
}

/// Complete radio configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub station: StationSettings,
    pub encoder: EncoderSettings,
    pub catalog: CatalogSettings,
}

impl RelaySettings {
    /// Reads the `radio:` section. Creates the managed directories the
    /// selected catalog needs.
    pub fn from_config(config: &Config) -> Result<Self> {
        let kind = config.get_catalog_kind();
        let encoder = config.get_encoder_settings();

        let music_dir = match kind {
            CatalogKind::Local | CatalogKind::Mirror => PathBuf::from(config.get_music_dir()?),
            CatalogKind::HttpIndex | CatalogKind::Static => PathBuf::new(),
        };
        let mirror = match kind {
            CatalogKind::Mirror => Some(config.get_mirror_settings()?),
            _ => None,
        };

        let catalog = CatalogSettings {
            kind,
            music_dir,
            extensions: config.get_catalog_extensions(),
            index_url: config.get_catalog_index_url(),
            tracks: config.get_catalog_tracks(),
            mirror,
        };

        let station = StationSettings {
            name: config.get_radio_name(),
            format: encoder.format.clone(),
            bitrate_kbps: encoder.bitrate_kbps,
            retention_bytes: config.get_buffer_retention_bytes(),
            refresh_interval: config.get_catalog_refresh_interval(),
            scheduler: config.get_scheduler_settings(),
        };

        Ok(Self {
            station,
            encoder,
            catalog,
        })
    }

    /// Instantiates the configured catalog provider.
    pub fn build_catalog(&self) -> Result<Arc<dyn TrackCatalog>> {
        let settings = &self.catalog;
        let catalog: Arc<dyn TrackCatalog> = match settings.kind {
            CatalogKind::Local => Arc::new(
                LocalDirCatalog::new(&settings.music_dir)
                    .with_extensions(settings.extensions.clone()),
            ),
            CatalogKind::HttpIndex => {
                if settings.index_url.is_empty() {
                    return Err(anyhow!("radio.catalog.index_url is required for http_index"));
                }
                Arc::new(
                    HttpIndexCatalog::new(&settings.index_url)?
                        .with_extensions(settings.extensions.clone()),
                )
            }
            CatalogKind::Mirror => {
                let mirror = settings
                    .mirror
                    .clone()
                    .ok_or_else(|| anyhow!("mirror settings missing"))?;
                if mirror.source_url.is_empty() {
                    return Err(anyhow!(
                        "radio.catalog.mirror.source_url is required for mirror"
                    ));
                }
                let local = LocalDirCatalog::new(&settings.music_dir)
                    .with_extensions(settings.extensions.clone());
                Arc::new(MirrorCatalog::new(local, mirror))
            }
            CatalogKind::Static => Arc::new(StaticCatalog::new(settings.tracks.clone())),
        };
        Ok(catalog)
    }
}
