//! Config file watching.
//!
//! The watcher observes the config file's parent directory (editors often
//! replace a file by renaming over it, which a watch on the file itself would
//! miss), debounces bursts of events, then reloads and validates the file.  A
//! valid file becomes a [`SchedulerEvent::ConfigChanged`]; an invalid one is
//! logged and the running configuration stays in place.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::{Config, Settings};
use crate::error::ConfigError;
use crate::poll::SchedulerEvent;

/// Quiet period after the last file event before reloading.
const DEBOUNCE: Duration = Duration::from_millis(500);

/// Keeps the OS watcher and its forwarding task alive; dropping it stops both.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start watching `path`, sending reloads to `events`.
pub fn spawn(
    path: PathBuf,
    client: Client,
    events: mpsc::Sender<SchedulerEvent>,
) -> Result<ConfigWatcher, notify::Error> {
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        // The receiver only goes away when the watcher is being torn down.
        let _ = raw_tx.send(res);
    })?;

    let dir = watch_dir(&path);
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::info!(path = %path.display(), "watching config for changes");

    let task = tokio::spawn(async move {
        while let Some(res) = raw_rx.recv().await {
            match res {
                Ok(event) if touches(&event, &path) => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "config watcher error");
                    continue;
                }
            }

            // Let the writer finish, then swallow whatever else arrived.
            sleep(DEBOUNCE).await;
            while raw_rx.try_recv().is_ok() {}

            match reload_settings(&path, client.clone()) {
                Ok(settings) => {
                    let event = SchedulerEvent::ConfigChanged(Arc::new(settings));
                    if events.send(event).await.is_err() {
                        tracing::debug!("scheduler gone, config watcher exiting");
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "rejected new configuration, keeping the previous one");
                }
            }
        }
    });

    Ok(ConfigWatcher {
        _watcher: watcher,
        task,
    })
}

fn reload_settings(path: &Path, client: Client) -> Result<Settings, ConfigError> {
    let config = Config::load(path)?;
    Settings::build(config, client)
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Whether `event` is a write, create or rename that involves `path`.
fn touches(event: &Event, path: &Path) -> bool {
    let relevant = matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_));
    relevant
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some() && p.file_name() == path.file_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind};
    use tempfile::TempDir;

    fn event(kind: EventKind, path: &str) -> Event {
        Event {
            kind,
            paths: vec![PathBuf::from(path)],
            attrs: Default::default(),
        }
    }

    #[test]
    fn write_to_config_file_is_relevant() {
        let e = event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), "/etc/fw/config.json");
        assert!(touches(&e, Path::new("/etc/fw/config.json")));
    }

    #[test]
    fn create_by_rename_is_relevant() {
        let e = event(EventKind::Create(CreateKind::File), "/etc/fw/config.json");
        assert!(touches(&e, Path::new("/etc/fw/config.json")));
    }

    #[test]
    fn other_files_and_reads_are_ignored() {
        let other = event(EventKind::Modify(ModifyKind::Any), "/etc/fw/archives.txt");
        let read = event(EventKind::Access(AccessKind::Any), "/etc/fw/config.json");
        assert!(!touches(&other, Path::new("/etc/fw/config.json")));
        assert!(!touches(&read, Path::new("/etc/fw/config.json")));
    }

    #[test]
    fn bare_file_name_watches_current_dir() {
        assert_eq!(watch_dir(Path::new("config.json")), PathBuf::from("."));
        assert_eq!(watch_dir(Path::new("/etc/fw/config.json")), PathBuf::from("/etc/fw"));
    }

    #[tokio::test]
    async fn rewriting_the_file_emits_config_changed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "values": ["a"] }"#).unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let _watcher = spawn(path.clone(), Client::new(), tx).unwrap();
        // Give the OS watcher a moment to register.
        sleep(Duration::from_millis(100)).await;

        std::fs::write(&path, r#"{ "values": ["a", "b"], "refresh": 2 }"#).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("reload not observed")
            .expect("watcher channel closed");
        let SchedulerEvent::ConfigChanged(settings) = event;
        assert_eq!(settings.sources, vec!["a", "b"]);
        assert_eq!(settings.interval, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn invalid_rewrite_is_not_forwarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{}").unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let _watcher = spawn(path.clone(), Client::new(), tx).unwrap();
        sleep(Duration::from_millis(100)).await;

        std::fs::write(&path, r#"{ "refresh": 0 }"#).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(got.is_err(), "invalid config must not reach the scheduler");
    }
}
