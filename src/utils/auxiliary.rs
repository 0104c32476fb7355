use std::{path::{Path, PathBuf}, sync::Arc, time::Duration};

use chrono::prelude::*;
use notify::{Event, Watcher};
use tokio::sync::RwLock;

use crate::state::Config;

/// Watches the config file and applies the hot-reloadable parts in place.
///
/// Listen address and channel settings are only read at startup.
pub async fn update_config(path: PathBuf, config: Arc<RwLock<Config>>) -> anyhow::Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<notify::Result<Event>>(1);
    let mut watcher = notify::PollWatcher::new(
        move |res| {
            let _ = tx.blocking_send(res);
        },
        notify::Config::default().with_poll_interval(Duration::from_secs(5)),
    )?;
    watcher.watch(&path, notify::RecursiveMode::NonRecursive)?;

    while let Some(event) = rx.recv().await {
        if let Err(kind) = event {
            tracing::warn!(error = %kind, "Config watcher error");
            continue;
        }
        let new_config = match Config::parse(path.clone()) {
            Ok(new_config) => new_config,
            Err(kind) => {
                tracing::error!("Error occured while reloading the configuration, keeping the old one: {kind:#}");
                continue;
            }
        };
        let mut config = config.write().await;

        if new_config != *config {
            tracing::info!("Server configuration modification detected!");
            if new_config.listen != config.listen || new_config.channel != config.channel {
                tracing::warn!("Listen address and channel settings are applied on restart only");
            }
            if new_config.subscribe != config.subscribe {
                new_config.subscribe.log_policy();
            }
            *config = new_config;
        }
    }
    Ok(())
}

pub fn get_log_file(folder: &str) -> String {
    let local_date = Local::now().format("%Y-%m-%d");
    let mut index: u16 = 0;
    loop {
        let file_name = format!("{local_date}.{:04}.log", index);
        let file_path = Path::new(folder).join(&file_name);
        if !Path::new(&file_path).exists() {
            return file_name;
        }
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_skips_existing() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().to_str().unwrap();

        let first = get_log_file(folder);
        assert!(first.ends_with(".0000.log"));
        std::fs::write(dir.path().join(&first), b"").unwrap();
        assert!(get_log_file(folder).ends_with(".0001.log"));
    }

    #[tokio::test]
    async fn reload_applies_new_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.toml");
        std::fs::write(&path, "listen = \"127.0.0.1:0\"\ntoken = \"old\"").unwrap();

        let config = Arc::new(RwLock::new(Config::parse(path.clone()).unwrap()));
        let watcher = tokio::spawn(update_config(path.clone(), Arc::clone(&config)));

        // mtime resolution on some filesystems is one second
        tokio::time::sleep(Duration::from_millis(1100)).await;
        std::fs::write(&path, "listen = \"127.0.0.1:0\"\ntoken = \"new\"").unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
        while config.read().await.token.as_deref() != Some("new") {
            assert!(tokio::time::Instant::now() < deadline, "config was not reloaded");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        watcher.abort();
    }
}
