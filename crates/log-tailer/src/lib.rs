//! Rotation-aware tailing of glob-matched JSON-line log files.
//!
//! A [`GlobWatcher`] resolves a shell glob, starts one [`FileTailer`] per
//! matching file and keeps watching the pattern's directory for new matches.
//! Each tailer follows its file through truncation and replacement, splits
//! the stream into complete lines, classifies them with
//! [`line_classifier::classify`] and pushes the results onto two bounded
//! queues created by [`channels`]:
//!
//! ```text
//!  file A ── FileTailer ─┐            ┌─> audit queue ───────> audit sink
//!  file B ── FileTailer ─┼─ classify ─┤
//!  file C ── FileTailer ─┘            └─> passthrough queue ─> stdout sink
//! ```
//!
//! Every task shares one [`CancellationToken`](tokio_util::sync::CancellationToken);
//! all waits (file polling, retry backoff, queue capacity) race it.
//!
//! Restarting skips to the end of existing files. A detected rotation
//! restarts reading at the beginning of the new file, so delivery is
//! at-most-once per file identity rather than exactly-once.

pub mod dispatch;
pub mod rotation;
pub mod tailer;
pub mod watcher;

// Re-export the primary public types at the crate root for convenience.
pub use dispatch::{channels, Dispatch, DispatchError, DispatchReceivers, DEFAULT_CHANNEL_CAPACITY};
pub use tailer::{FileTailer, StartPosition, TailOptions};
pub use watcher::{GlobWatcher, WatchError, WatcherConfig, DEFAULT_RESCAN_INTERVAL};
