//! Config hot reload
//!
//! Polls the config file's modification time and publishes each valid new
//! version on a watch channel. An invalid file is rejected with a warning
//! and the previous config stays active.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::loader::{load_config, Config, ConfigError};

pub struct ConfigWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
    tx: watch::Sender<Arc<Config>>,
}

impl ConfigWatcher {
    /// Start watching `path`, with `initial` as the active config
    pub fn new(path: impl Into<PathBuf>, initial: Config) -> (Self, watch::Receiver<Arc<Config>>) {
        let path = path.into();
        let last_modified = modified_at(&path).ok();
        let (tx, rx) = watch::channel(Arc::new(initial));
        (
            Self {
                path,
                last_modified,
                tx,
            },
            rx,
        )
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.tx.subscribe()
    }

    /// Reload if the file changed. Ok(true) when a new config was published
    pub fn check_for_updates(&mut self) -> Result<bool, ConfigError> {
        let modified = modified_at(&self.path)?;
        if self.last_modified.map_or(false, |last| modified <= last) {
            return Ok(false);
        }
        // remember the attempt so a broken file is not re-parsed every poll
        self.last_modified = Some(modified);

        let config = load_config(&self.path)?;
        self.tx.send_replace(Arc::new(config));
        tracing::info!(path = %self.path.display(), "Configuration reloaded");
        Ok(true)
    }

    /// Poll on an interval until every receiver is gone
    pub fn spawn(mut self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if self.tx.is_closed() {
                    break;
                }
                if let Err(e) = self.check_for_updates() {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Rejected config reload, keeping previous configuration"
                    );
                }
            }
        })
    }
}

fn modified_at(path: &PathBuf) -> Result<SystemTime, ConfigError> {
    Ok(std::fs::metadata(path)?.modified()?)
}
