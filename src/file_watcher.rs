// Configuration file watching with scoped subscriptions

use std::path::Path;

use notify::event::{AccessKind, AccessMode, EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::warn;

/// Watch event classes the orchestrator distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
    /// The watched file was rewritten in place and closed.
    CloseWrite,
    /// The watch target was replaced out-of-band, e.g. by an editor's
    /// atomic rename. The watch is dead and must be re-armed.
    Ignored,
}

/// Scoped watch handle. Dropping it cancels the watch; no further events are
/// delivered from it. Replace the held subscription *before* installing a new
/// one to keep single delivery.
pub struct WatchSubscription {
    _watcher: RecommendedWatcher,
}

/// Factory for watch subscriptions feeding one event channel.
pub struct FileWatcher {
    tx: mpsc::UnboundedSender<FileEvent>,
}

impl FileWatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FileEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Install a watch on `path`.
    pub fn subscribe(&self, path: &Path) -> Result<WatchSubscription, notify::Error> {
        let tx = self.tx.clone();
        let mut watcher =
            notify::recommended_watcher(move |result: Result<notify::Event, notify::Error>| {
                match result {
                    Ok(event) => {
                        if let Some(event) = classify(&event.kind) {
                            let _ = tx.send(event);
                        }
                    }
                    Err(error) => warn!("file watch error: {error}"),
                }
            })?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        Ok(WatchSubscription { _watcher: watcher })
    }
}

/// Map backend event kinds onto the two classes the service reacts to.
/// In-place content writes are only interesting once the writer closes the
/// file.
fn classify(kind: &EventKind) -> Option<FileEvent> {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(FileEvent::CloseWrite),
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => Some(FileEvent::Ignored),
        _ => None,
    }
}
