use crate::config::AppConfig;
use crate::config_loader::ConfigLoader;
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::watch;

/// Publishes the current [`AppConfig`] and replaces it whenever the file on
/// disk changes to something different.
pub struct ConfigWatcher {
    tx: watch::Sender<AppConfig>,
    profile: Option<String>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver already holding `initial_config`.
    #[must_use]
    pub fn new(initial_config: AppConfig) -> (Self, watch::Receiver<AppConfig>) {
        let (tx, rx) = watch::channel(initial_config);
        (Self { tx, profile: None }, rx)
    }

    /// Reloads through [`ConfigLoader::load_with_profile`] instead.
    #[must_use]
    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    /// Reloads `config_path` once. Subscribers are only woken when the
    /// parsed config differs from the current one.
    ///
    /// # Errors
    /// Returns an error if the file cannot be parsed; the current config
    /// stays in place.
    pub fn reload(&self, config_path: &Path) -> Result<bool> {
        let loaded = match &self.profile {
            Some(profile) => ConfigLoader::load_with_profile(config_path, profile)?,
            None => ConfigLoader::load_from(config_path)?,
        };
        Ok(self.tx.send_if_modified(|current| {
            if *current == loaded {
                return false;
            }
            *current = loaded;
            true
        }))
    }

    /// Blocks (on a blocking-pool thread) reloading the config each time
    /// `config_path` is written or replaced, until every receiver is gone.
    ///
    /// The parent directory is watched so editors that save through a
    /// rename are still picked up.
    ///
    /// # Errors
    /// Returns an error if file watching cannot be initiated or if the
    /// watcher task fails.
    pub async fn watch(self, config_path: impl AsRef<Path>) -> Result<()> {
        let config_path: PathBuf = config_path.as_ref().to_path_buf();
        let dir = match config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = config_path
            .file_name()
            .map(ToOwned::to_owned)
            .with_context(|| format!("{} is not a file path", config_path.display()))?;

        tokio::task::spawn_blocking(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();
            let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            })?;
            watcher.watch(&dir, RecursiveMode::NonRecursive)?;
            tracing::info!("Watching {} for changes", config_path.display());

            for event in notify_rx {
                let touches_file = event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()));
                if !touches_file || !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    continue;
                }
                match self.reload(&config_path) {
                    Ok(true) => tracing::info!("Config {} reloaded", config_path.display()),
                    Ok(false) => tracing::debug!("Config {} unchanged", config_path.display()),
                    Err(e) => tracing::error!("Keeping previous config: {:#}", e),
                }
                if self.tx.is_closed() {
                    tracing::debug!("No config subscribers left, stopping watcher");
                    break;
                }
            }

            Ok::<_, anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}
