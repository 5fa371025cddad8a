//! Reload-on-change for debug mode.
//!
//! Watches the configured paths and asks the supervisor for a rolling reload
//! whenever something relevant changes. Runtime files the supervisor writes
//! itself (sockets, pidfile) are ignored, or every reload would trigger the
//! next one.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use notify_debouncer_full::notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{DebounceEventResult, Debouncer, FileIdMap, new_debouncer};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::command::SupervisorHandle;
use crate::error::{Result, WarmpoolError};
use crate::settings::Settings;

/// Editors that format on save write twice in quick succession.
const DEBOUNCE: Duration = Duration::from_millis(500);

const IGNORED_DIRS: [&str; 4] = [".git", "target", "node_modules", "__pycache__"];
const IGNORED_SUFFIXES: [&str; 4] = [".swp", ".swo", "~", ".log"];

pub struct ReloadWatcher {
    _debouncer: Debouncer<RecommendedWatcher, FileIdMap>,
    task: JoinHandle<()>,
}

impl ReloadWatcher {
    pub fn spawn(settings: &Settings, handle: SupervisorHandle) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();
        let runtime_paths = vec![settings.socket_path.clone(), settings.pidfile.clone()];

        let mut debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let changed: Vec<PathBuf> = events
                        .iter()
                        .flat_map(|event| event.paths.iter())
                        .filter(|path| !should_ignore_path(path, &runtime_paths))
                        .cloned()
                        .collect();
                    if !changed.is_empty() {
                        let _ = tx.send(changed);
                    }
                }
                Err(errors) => tracing::warn!(?errors, "File watch error"),
            }
        })
        .map_err(|e| WarmpoolError::Watch(format!("Failed to create file watcher: {}", e)))?;

        for path in &settings.watch {
            if !path.exists() {
                tracing::warn!(path = %path.display(), "Watch path does not exist, skipping");
                continue;
            }
            debouncer
                .watcher()
                .watch(path, RecursiveMode::Recursive)
                .map_err(|e| {
                    WarmpoolError::Watch(format!("Failed to watch {}: {}", path.display(), e))
                })?;
            tracing::debug!(path = %path.display(), "Watching for changes");
        }

        let task = tokio::spawn(async move {
            while let Some(changed) = rx.recv().await {
                tracing::info!(
                    files = changed.len(),
                    first = %changed[0].display(),
                    "Change detected, reloading workers"
                );
                if let Err(e) = handle.reload().await {
                    tracing::warn!(error = %e, "Reload after change was not accepted");
                }
            }
        });

        Ok(Self {
            _debouncer: debouncer,
            task,
        })
    }
}

impl Drop for ReloadWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn should_ignore_path(path: &Path, runtime_paths: &[PathBuf]) -> bool {
    if runtime_paths.iter().any(|p| path.starts_with(p)) {
        return true;
    }
    if path.components().any(|c| match c {
        Component::Normal(name) => IGNORED_DIRS.iter().any(|d| name == *d),
        _ => false,
    }) {
        return true;
    }
    let name = path.to_string_lossy();
    IGNORED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_ignore_path() {
        let runtime = vec![
            PathBuf::from("/srv/app/.warmpool/run"),
            PathBuf::from("/srv/app/.warmpool/warmpool.pid"),
        ];
        assert!(should_ignore_path(
            Path::new("/srv/app/.warmpool/run/worker-0.sock"),
            &runtime
        ));
        assert!(should_ignore_path(
            Path::new("/srv/app/.warmpool/warmpool.pid"),
            &runtime
        ));
        assert!(should_ignore_path(Path::new("/srv/app/.git/index"), &runtime));
        assert!(should_ignore_path(Path::new("/srv/app/src/app.rb.swp"), &runtime));
        assert!(!should_ignore_path(Path::new("/srv/app/src/app.rb"), &runtime));
        assert!(!should_ignore_path(Path::new("/srv/app/targets.txt"), &runtime));
    }
}
