//! Filesystem watcher (C8).
//!
//! Synchronous by design — the core engine has no async runtime of its own, so a change
//! feed is exposed as a plain `std::sync::mpsc::Receiver` that a caller (the CLI's `dev`
//! command, or a test) drains on its own thread. Events are coalesced over a short window
//! so a save-triggered burst of filesystem events collapses into a single rebuild signal.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};

const DEBOUNCE: Duration = Duration::from_millis(50);

/// Watches `root` for changes and delivers coalesced batches of changed paths.
pub struct Watcher {
    _inner: RecommendedWatcher,
    pub changes: Receiver<Vec<PathBuf>>,
}

impl Watcher {
    /// # Errors
    /// Returns an error if the underlying OS watch cannot be established.
    pub fn new(root: &Path) -> notify::Result<Self> {
        let (raw_tx, raw_rx) = channel();
        let mut inner = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = raw_tx.send(event.paths);
            }
        })?;
        inner.watch(root, RecursiveMode::Recursive)?;

        let (out_tx, out_rx) = channel();
        std::thread::spawn(move || {
            let mut pending: Vec<PathBuf> = Vec::new();
            let mut last_event = Instant::now();
            loop {
                match raw_rx.recv_timeout(DEBOUNCE) {
                    Ok(paths) => {
                        pending.extend(paths);
                        last_event = Instant::now();
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if !pending.is_empty() && last_event.elapsed() >= DEBOUNCE {
                            pending.sort();
                            pending.dedup();
                            if out_tx.send(std::mem::take(&mut pending)).is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        Ok(Self {
            _inner: inner,
            changes: out_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn reports_a_file_write() {
        let dir = tempdir().unwrap();
        let watcher = Watcher::new(dir.path()).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        std::fs::write(dir.path().join("a.js"), b"x").unwrap();
        let changed = watcher
            .changes
            .recv_timeout(Duration::from_secs(2))
            .expect("expected a change notification");
        assert!(changed.iter().any(|p| p.ends_with("a.js")));
    }
}
