use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use super::{LocalDirCatalog, TrackCatalog};
use crate::{
    error::{Error, Result},
    track::TrackRef,
};

/// Sync command used to populate the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorSettings {
    /// Remote folder handed to the command as `{source}`
    pub source_url: String,
    /// Download target, `{staging}` in the argument template
    pub staging_dir: PathBuf,
    pub command: String,
    pub args: Vec<String>,
}

impl MirrorSettings {
    pub fn rclone(source_url: impl Into<String>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_url: source_url.into(),
            staging_dir: staging_dir.into(),
            command: "rclone".to_string(),
            args: ["copyurl", "{source}", "{staging}", "--update"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    fn render_args(&self) -> Vec<String> {
        let staging = self.staging_dir.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{source}", &self.source_url)
                    .replace("{staging}", &staging)
            })
            .collect()
    }
}

/// Local directory kept in sync with a remote folder.
///
/// Each refresh downloads into the staging directory, moves the staged
/// files into the music directory, then scans it. Files that are playing
/// are replaced by rename, so an open handle keeps reading the old data.
pub struct MirrorCatalog {
    local: LocalDirCatalog,
    settings: MirrorSettings,
}

impl MirrorCatalog {
    pub fn new(local: LocalDirCatalog, settings: MirrorSettings) -> Self {
        Self { local, settings }
    }

    async fn sync(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.settings.staging_dir).await?;
        tokio::fs::create_dir_all(self.local.dir()).await?;

        let args = self.settings.render_args();
        info!(command = %self.settings.command, source = %self.settings.source_url, "Starting mirror sync");
        let status = Command::new(&self.settings.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| Error::catalog(format!("cannot run {}: {}", self.settings.command, e)))?;

        if !status.success() {
            return Err(Error::catalog(format!(
                "{} exited with {}",
                self.settings.command, status
            )));
        }

        let moved = promote_staged(&self.settings.staging_dir, self.local.dir()).await?;
        info!(files = moved, "Mirror sync complete");
        Ok(())
    }
}

/// Moves every regular file of `staging` into `target`, replacing existing ones.
async fn promote_staged(staging: &Path, target: &Path) -> Result<usize> {
    let mut entries = tokio::fs::read_dir(staging).await?;
    let mut moved = 0;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let dst = target.join(entry.file_name());
        tokio::fs::rename(entry.path(), &dst).await?;
        moved += 1;
    }
    Ok(moved)
}

#[async_trait]
impl TrackCatalog for MirrorCatalog {
    async fn refresh(&self) -> Result<Vec<TrackRef>> {
        if let Err(e) = self.sync().await {
            warn!("Mirror sync failed, scanning existing files: {}", e);
        }
        self.local.scan().await
    }

    fn describe(&self) -> String {
        format!(
            "mirror of {} into {}",
            self.settings.source_url,
            self.local.dir().display()
        )
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    fn settings(script: &str, staging: &Path) -> MirrorSettings {
        MirrorSettings {
            source_url: "https://example.org/folder".to_string(),
            staging_dir: staging.to_path_buf(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    #[tokio::test]
    async fn test_sync_moves_staged_files_and_scans() {
        let root = tempfile::tempdir().unwrap();
        let music = root.path().join("music");
        let staging = root.path().join("music_tmp");
        fs::create_dir_all(&music).unwrap();
        fs::write(music.join("old.mp3"), b"old").unwrap();

        let script = format!(
            "printf new > '{0}/new.mp3' && printf v2 > '{0}/old.mp3'",
            staging.display()
        );
        let catalog = MirrorCatalog::new(LocalDirCatalog::new(&music), settings(&script, &staging));

        let names: Vec<_> = catalog
            .refresh()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["new.mp3", "old.mp3"]);
        assert_eq!(fs::read(music.join("old.mp3")).unwrap(), b"v2");
        assert_eq!(fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_sync_still_scans_local_files() {
        let root = tempfile::tempdir().unwrap();
        let music = root.path().join("music");
        fs::create_dir_all(&music).unwrap();
        fs::write(music.join("kept.ogg"), b"x").unwrap();

        let catalog = MirrorCatalog::new(
            LocalDirCatalog::new(&music),
            settings("exit 1", &root.path().join("staging")),
        );
        let tracks = catalog.refresh().await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].name, "kept.ogg");
    }

    #[test]
    fn test_rclone_template() {
        let settings = MirrorSettings::rclone("https://mega.example/folder", "/tmp/staging");
        assert_eq!(
            settings.render_args(),
            vec!["copyurl", "https://mega.example/folder", "/tmp/staging", "--update"]
        );
    }
}
