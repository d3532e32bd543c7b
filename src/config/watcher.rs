//! Configuration file watcher for hot reload.
//!
//! Editors often emit several modify events per save, so a reload is only
//! forwarded when the parsed configuration actually differs from the last
//! one delivered.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::SentinelConfig;

/// Names of the top-level sections that differ between two configurations.
pub fn changed_sections(old: &SentinelConfig, new: &SentinelConfig) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if old.archive != new.archive {
        changed.push("archive");
    }
    if old.circuit_breaker != new.circuit_breaker {
        changed.push("circuit_breaker");
    }
    if old.metrics != new.metrics {
        changed.push("metrics");
    }
    if old.health != new.health {
        changed.push("health");
    }
    if old.alerting != new.alerting {
        changed.push("alerting");
    }
    if old.observability != new.observability {
        changed.push("observability");
    }
    changed
}

/// Re-reads the file and remembers the last configuration handed out.
#[derive(Debug)]
struct Reloader {
    path: PathBuf,
    last: SentinelConfig,
}

impl Reloader {
    /// The new configuration if the file parses, validates and changed.
    fn reload(&mut self) -> Option<SentinelConfig> {
        let new_config = match load_config(&self.path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to reload config, keeping current configuration"
                );
                return None;
            }
        };

        let sections = changed_sections(&self.last, &new_config);
        if sections.is_empty() {
            tracing::debug!(path = %self.path.display(), "Config file touched without changes");
            return None;
        }
        tracing::info!(sections = ?sections, "Config reloaded");
        self.last = new_config.clone();
        Some(new_config)
    }
}

/// Watches the sentinel configuration file and streams validated updates.
pub struct ConfigWatcher {
    reloader: Reloader,
    update_tx: mpsc::UnboundedSender<SentinelConfig>,
}

impl ConfigWatcher {
    /// `current` is the configuration already in effect; identical reloads are dropped.
    pub fn new(path: &Path, current: SentinelConfig) -> (Self, mpsc::UnboundedReceiver<SentinelConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let reloader = Reloader {
            path: path.to_path_buf(),
            last: current,
        };
        (Self { reloader, update_tx }, update_rx)
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.reloader.path.clone();
        let tx = self.update_tx;
        let mut reloader = self.reloader;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    if let Some(new_config) = reloader.reload() {
                        if tx.send(new_config).is_err() {
                            tracing::debug!("Config update receiver dropped");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %path.display(), "Config watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, Write};
    use std::sync::Arc;

    use crate::clock::ManualClock;
    use crate::lifecycle::ArchiveSystem;

    fn rewrite(file: &mut tempfile::NamedTempFile, content: &str) {
        let handle = file.as_file_mut();
        handle.set_len(0).unwrap();
        handle.rewind().unwrap();
        handle.write_all(content.as_bytes()).unwrap();
        handle.flush().unwrap();
    }

    #[test]
    fn test_changed_sections() {
        let old = SentinelConfig::default();
        let mut new = old.clone();
        assert!(changed_sections(&old, &new).is_empty());

        new.archive.auto_archive = false;
        new.alerting.max_alerts = 10;
        assert_eq!(changed_sections(&old, &new), vec!["archive", "alerting"]);
    }

    #[test]
    fn test_archive_change_reaches_running_system() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        rewrite(&mut file, "[archive]\nfallback_order = [\"internetarchive\"]\n");
        let initial = load_config(file.path()).unwrap();

        let system = ArchiveSystem::new(initial.clone(), Arc::new(ManualClock::new(0)));
        let (watcher, _updates) = ConfigWatcher::new(file.path(), initial);
        let mut reloader = watcher.reloader;

        // Same content saved again.
        assert!(reloader.reload().is_none());

        rewrite(
            &mut file,
            "[archive]\nauto_archive = false\nfallback_order = [\"archivetoday\", \"internetarchive\"]\n",
        );
        let update = reloader.reload().unwrap();
        system.apply_config(update);

        let preferences = system.coordinator().preferences();
        assert!(!preferences.auto_archive);
        assert_eq!(preferences.fallback_order, vec!["archivetoday", "internetarchive"]);

        // Duplicate event for the same save is dropped.
        assert!(reloader.reload().is_none());
    }

    #[test]
    fn test_invalid_reload_keeps_previous() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        rewrite(&mut file, "[archive]\ndefault_service = \"archivetoday\"\n");
        let initial = load_config(file.path()).unwrap();
        let (watcher, _updates) = ConfigWatcher::new(file.path(), initial.clone());
        let mut reloader = watcher.reloader;

        rewrite(&mut file, "[archive\n");
        assert!(reloader.reload().is_none());
        assert_eq!(reloader.last, initial);

        rewrite(&mut file, "[alerting]\nmax_alerts = 0\n");
        assert!(reloader.reload().is_none());
        assert_eq!(reloader.last, initial);
    }
}
