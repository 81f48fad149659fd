//! Configuration file watcher for hot reload.
//!
//! Editors and `notify` produce bursts of events for one save. Events are
//! coalesced over a short quiet period, the file is re-read once, and the
//! result is forwarded only when it parses, validates and differs from the
//! last configuration handed to the server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GatewayConfig;

/// Quiet period before a burst of file events triggers one reload.
const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Watches the configuration file and emits changed configurations.
pub struct ConfigWatcher {
    path: PathBuf,
    current: GatewayConfig,
    debounce: Duration,
    update_tx: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    /// `current` is the configuration the gateway started with.
    pub fn new(path: &Path, current: GatewayConfig) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            current,
            debounce: DEFAULT_DEBOUNCE,
            update_tx,
        };
        (watcher, update_rx)
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching. Must run inside a tokio runtime; the returned
    /// watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    let _ = event_tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, debounce = ?self.debounce, "Config watcher started");
        tokio::spawn(self.reload_loop(event_rx));
        Ok(watcher)
    }

    async fn reload_loop(mut self, mut events: mpsc::UnboundedReceiver<()>) {
        while events.recv().await.is_some() {
            tokio::time::sleep(self.debounce).await;
            while events.try_recv().is_ok() {}

            if let Some(config) = self.reload() {
                if self.update_tx.send(config).is_err() {
                    break;
                }
            }
        }
    }

    /// Re-read the file; `Some` only for a valid configuration that differs
    /// from the current one.
    fn reload(&mut self) -> Option<GatewayConfig> {
        let config = match load_config(&self.path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(path = ?self.path, error = %e, "Failed to reload config, keeping current configuration");
                return None;
            }
        };

        if same_config(&config, &self.current) {
            tracing::debug!(path = ?self.path, "Config file touched without changes");
            return None;
        }

        tracing::info!(path = ?self.path, "Config change detected");
        self.current = config.clone();
        Some(config)
    }
}

fn same_config(a: &GatewayConfig, b: &GatewayConfig) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TempConfig(PathBuf);

    impl TempConfig {
        fn new(content: &str) -> Self {
            let path = std::env::temp_dir().join(format!("gateway-{}.toml", uuid::Uuid::new_v4()));
            std::fs::write(&path, content).unwrap();
            Self(path)
        }

        fn write(&self, content: &str) {
            std::fs::write(&self.0, content).unwrap();
        }
    }

    impl Drop for TempConfig {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    const IP_LIMIT_5: &str = "[rate_limit.limits]\nip = 5\n";
    const IP_LIMIT_9: &str = "[rate_limit.limits]\nip = 9\n";

    #[test]
    fn test_unchanged_file_is_not_forwarded() {
        let file = TempConfig::new(IP_LIMIT_5);
        let (mut watcher, _rx) = ConfigWatcher::new(&file.0, load_config(&file.0).unwrap());

        assert!(watcher.reload().is_none());
    }

    #[test]
    fn test_changed_file_is_forwarded_once() {
        let file = TempConfig::new(IP_LIMIT_5);
        let (mut watcher, _rx) = ConfigWatcher::new(&file.0, load_config(&file.0).unwrap());

        file.write(IP_LIMIT_9);
        let reloaded = watcher.reload().expect("change should be reported");
        assert_eq!(reloaded.rate_limit.limits.ip, 9);
        assert!(watcher.reload().is_none());
    }

    #[test]
    fn test_invalid_file_keeps_current() {
        let file = TempConfig::new(IP_LIMIT_5);
        let (mut watcher, _rx) = ConfigWatcher::new(&file.0, load_config(&file.0).unwrap());

        file.write("[rate_limit.limits]\nip = 0\n");
        assert!(watcher.reload().is_none());
        assert_eq!(watcher.current.rate_limit.limits.ip, 5);
    }

    #[tokio::test]
    async fn test_event_burst_yields_one_update() {
        let file = TempConfig::new(IP_LIMIT_5);
        let (watcher, mut updates) = ConfigWatcher::new(&file.0, load_config(&file.0).unwrap());
        let watcher = watcher.with_debounce(Duration::from_millis(20));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(watcher.reload_loop(event_rx));

        file.write(IP_LIMIT_9);
        for _ in 0..5 {
            event_tx.send(()).unwrap();
        }

        let update = tokio::time::timeout(Duration::from_secs(1), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.rate_limit.limits.ip, 9);
        assert!(tokio::time::timeout(Duration::from_millis(100), updates.recv()).await.is_err());
    }
}
