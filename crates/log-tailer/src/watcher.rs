use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatch;
use crate::tailer::{FileTailer, StartPosition, TailOptions};

/// Default interval between glob re-resolutions when file system
/// notifications are unavailable.
pub const DEFAULT_RESCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Buffered notification events. A queued creation event already triggers a
/// full rescan, so events that do not fit are dropped. Errors never are.
const EVENT_BUFFER: usize = 16;

/// A live platform watcher and the receiving end of its event queue.
type Subscription = (RecommendedWatcher, mpsc::Receiver<notify::Result<Event>>);

/// Fatal watcher errors. Any of these terminates the process.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("invalid glob pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("failed to watch directory {}: {source}", dir.display())]
    WatchDirectory {
        dir: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("file system event source failed: {0}")]
    EventSource(#[source] notify::Error),

    #[error("file system event source closed unexpectedly")]
    EventSourceClosed,
}

/// Configuration for a [`GlobWatcher`].
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Shell glob selecting the files to tail.
    pub pattern: String,
    /// Options handed to every tailer.
    pub tail: TailOptions,
    /// Polling interval used when notifications cannot be set up.
    pub rescan_interval: Duration,
}

/// Resolves a glob pattern to files, runs one [`FileTailer`] per match and
/// picks up matching files created later.
///
/// The path → tailer map is owned by the watcher task alone and only ever
/// grows: a tailer whose file vanishes keeps retrying on its own.
pub struct GlobWatcher {
    config: WatcherConfig,
    dispatch: Dispatch,
    cancel: CancellationToken,
    tailers: HashMap<PathBuf, JoinHandle<()>>,
}

impl GlobWatcher {
    pub fn new(config: WatcherConfig, dispatch: Dispatch, cancel: CancellationToken) -> Self {
        Self {
            config,
            dispatch,
            cancel,
            tailers: HashMap::new(),
        }
    }

    /// Paths that currently have a tailer.
    pub fn tracked(&self) -> impl Iterator<Item = &Path> {
        self.tailers.keys().map(PathBuf::as_path)
    }

    /// Run until cancelled or a fatal error occurs.
    ///
    /// On cancellation every tailer is awaited before returning. On error the
    /// tailers are left to observe the shared cancellation token.
    pub async fn run(mut self) -> Result<(), WatchError> {
        info!(pattern = %self.config.pattern, "starting glob watcher");

        let result = match self.start()? {
            Some((_watcher, events)) => self.follow_events(events).await,
            None => self.poll().await,
        };

        if result.is_ok() {
            self.join_tailers().await;
        }
        result
    }

    /// Validate the pattern, register the directory watch and run the
    /// initial scan, in that order. A file created while starting up is then
    /// found either by the scan or by a later event.
    fn start(&mut self) -> Result<Option<Subscription>, WatchError> {
        glob::Pattern::new(&self.config.pattern).map_err(|source| WatchError::Pattern {
            pattern: self.config.pattern.clone(),
            source,
        })?;

        let subscription = self.subscribe()?;
        self.scan(self.config.tail.start)?;
        Ok(subscription)
    }

    /// Set up file system notifications on the pattern's root directory.
    ///
    /// Returns `Ok(None)` when the platform watcher cannot be created, in
    /// which case the caller falls back to polling.
    fn subscribe(&self) -> Result<Option<Subscription>, WatchError> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let handler = move |event: notify::Result<Event>| forward(&tx, event);

        let mut watcher = match notify::recommended_watcher(handler) {
            Ok(watcher) => watcher,
            Err(err) => {
                error!(
                    error = %err,
                    rescan_interval = ?self.config.rescan_interval,
                    "unable to watch for file changes, falling back to polling"
                );
                return Ok(None);
            }
        };

        let (dir, mode) = watch_root(&self.config.pattern);
        watcher
            .watch(&dir, mode)
            .map_err(|source| WatchError::WatchDirectory {
                dir: dir.clone(),
                source,
            })?;
        info!(directory = %dir.display(), ?mode, "watching directory for new files");

        Ok(Some((watcher, rx)))
    }

    async fn follow_events(
        &mut self,
        mut events: mpsc::Receiver<notify::Result<Event>>,
    ) -> Result<(), WatchError> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("context cancelled, stopping glob watcher");
                    return Ok(());
                }
                event = events.recv() => match event {
                    Some(Ok(event)) if is_creation(&event.kind) => {
                        debug!(?event, "file system event");
                        self.scan(StartPosition::Beginning)?;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        error!(error = %err, "error watching files");
                        return Err(WatchError::EventSource(err));
                    }
                    None => return Err(WatchError::EventSourceClosed),
                },
            }
        }
    }

    async fn poll(&mut self) -> Result<(), WatchError> {
        let mut ticker = tokio::time::interval(self.config.rescan_interval);
        // The first tick completes immediately and the initial scan is done.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("context cancelled, stopping glob watcher");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    debug!("rescanning for new files");
                    self.scan(StartPosition::Beginning)?;
                }
            }
        }
    }

    /// Resolve the pattern and start a tailer for every untracked regular
    /// file. Returns the number of tailers started.
    fn scan(&mut self, start: StartPosition) -> Result<usize, WatchError> {
        let pattern = &self.config.pattern;
        info!(pattern = %pattern, "looking for files matching pattern");

        let matches = glob::glob(pattern).map_err(|source| WatchError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;

        let mut started = 0;
        for entry in matches {
            let path = match entry {
                Ok(path) => path,
                Err(err) => {
                    warn!(path = %err.path().display(), error = %err.error(), "unable to read glob match");
                    continue;
                }
            };
            if path.is_dir() || self.tailers.contains_key(&path) {
                continue;
            }

            info!(filepath = %path.display(), ?start, "new file found, starting tail");
            let tailer = FileTailer::new(
                path.clone(),
                start,
                self.config.tail.clone(),
                self.dispatch.clone(),
                self.cancel.clone(),
            );
            self.tailers.insert(path, tokio::spawn(tailer.run()));
            started += 1;
        }

        Ok(started)
    }

    async fn join_tailers(&mut self) {
        for (path, handle) in self.tailers.drain() {
            if let Err(err) = handle.await {
                warn!(path = %path.display(), error = %err, "tailer task failed");
            }
        }
    }
}

/// Called on the notifier's own thread. Events may be dropped when the queue
/// is full; errors block until the watcher task takes them or goes away.
fn forward(tx: &mpsc::Sender<notify::Result<Event>>, event: notify::Result<Event>) {
    match event {
        Ok(event) => {
            let _ = tx.try_send(Ok(event));
        }
        Err(err) => {
            let _ = tx.blocking_send(Err(err));
        }
    }
}

/// Whether an event may have produced a new path: a creation, or a rename
/// into the watched directory.
fn is_creation(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Name(
                RenameMode::To | RenameMode::Both | RenameMode::Any
            ))
    )
}

/// The directory to watch for a glob pattern and whether to recurse.
///
/// This is the longest leading run of path components without wildcards. A
/// wildcard before the final component means matches can appear in
/// subdirectories, so the watch is recursive.
pub fn watch_root(pattern: &str) -> (PathBuf, RecursiveMode) {
    let components: Vec<Component<'_>> = Path::new(pattern).components().collect();
    let wildcard = components
        .iter()
        .position(|c| has_wildcard(&c.as_os_str().to_string_lossy()));

    let (mut root, mode) = match wildcard {
        Some(idx) => {
            let root: PathBuf = components[..idx].iter().collect();
            let mode = if idx + 1 < components.len() {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            (root, mode)
        }
        None => {
            let mut root: PathBuf = components.iter().collect();
            root.pop();
            (root, RecursiveMode::NonRecursive)
        }
    };

    if root.as_os_str().is_empty() {
        root = PathBuf::from(".");
    }
    (root, mode)
}

fn has_wildcard(component: &str) -> bool {
    component.chars().any(|c| matches!(c, '*' | '?' | '['))
}
