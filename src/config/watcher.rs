//! Configuration file watcher for hot reload.
//!
//! Reloaded configs are validated before they are forwarded; an invalid file
//! is logged and the engine keeps its current configuration. Only command and
//! collapser properties take effect for existing keys; pool capacities and
//! rolling window shapes are fixed when a key is first used.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::EngineConfig;

/// Watches a configuration file and emits each valid revision.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<EngineConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    ///
    /// Pass the receiver to [`crate::Engine::follow_config_updates`].
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<EngineConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match load_config(&path) {
                        Ok(config) => {
                            tracing::info!(
                                path = %path.display(),
                                commands = config.commands.len(),
                                pools = config.pools.len(),
                                collapsers = config.collapsers.len(),
                                "Engine config reloaded"
                            );
                            if tx.send(config).is_err() {
                                tracing::debug!("Config update receiver dropped");
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Config reload rejected, keeping current configuration");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}
