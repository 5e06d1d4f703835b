use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use line_classifier::{classify, Classification};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::dispatch::{Dispatch, DispatchError};
use crate::rotation::{self, FileSnapshot, RotationCheck};

/// Size of each read from the file.
const READ_CHUNK: usize = 64 * 1024;

/// Emit an idle status record at most this often.
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// Emit a progress record every this many entries.
const PROGRESS_EVERY: u64 = 100;

/// Where reading starts the first time a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Skip existing content; only entries appended from now on are read.
    End,
    /// Read existing content first.
    Beginning,
}

/// Timing and limits shared by every tailer.
#[derive(Debug, Clone)]
pub struct TailOptions {
    /// Start position for files present when the watcher starts. Files
    /// discovered later are always read from the beginning.
    pub start: StartPosition,
    /// Backoff between attempts to open a missing or unreadable file.
    pub retry_interval: Duration,
    /// Sleep after reaching end-of-file before reading again.
    pub read_interval: Duration,
    /// How often the path is compared against the open handle.
    pub rotation_check_interval: Duration,
    /// Longest line kept; longer lines are discarded whole.
    pub max_line_bytes: usize,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            start: StartPosition::End,
            retry_interval: Duration::from_secs(5),
            read_interval: Duration::from_millis(100),
            rotation_check_interval: Duration::from_secs(5),
            max_line_bytes: 1024 * 1024,
        }
    }
}

/// Follows a single file, surviving truncation and replacement, and feeds
/// every complete line through the classifier into the dispatch queues.
///
/// Exactly one tailer exists per path. Reading and rotation checks
/// interleave within the same task so the handle is never shared.
pub struct FileTailer {
    path: PathBuf,
    start: StartPosition,
    options: TailOptions,
    dispatch: Dispatch,
    cancel: CancellationToken,
}

/// The open handle and what is known about the file behind it.
struct OpenFile {
    file: File,
    snapshot: FileSnapshot,
    cursor: u64,
}

impl FileTailer {
    pub fn new(
        path: PathBuf,
        start: StartPosition,
        options: TailOptions,
        dispatch: Dispatch,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            path,
            start,
            options,
            dispatch,
            cancel,
        }
    }

    /// Tail the file until cancelled.
    pub async fn run(self) {
        let span = tracing::info_span!("tailer", file = %file_name(&self.path));
        self.tail().instrument(span).await
    }

    async fn tail(self) {
        let Some(mut open) = self.open_with_retry(self.start).await else {
            info!("cancelled before the file could be opened");
            return;
        };
        info!(position = open.cursor, "start tailing file");

        let mut lines = LineBuffer::new(self.options.max_line_bytes);
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut progress = Progress::new();
        let mut next_rotation_check = Instant::now() + self.options.rotation_check_interval;

        'tail: loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if Instant::now() >= next_rotation_check {
                next_rotation_check = Instant::now() + self.options.rotation_check_interval;
                let current = FileSnapshot::of_path(&self.path).await;
                match rotation::check(&open.snapshot, open.cursor, current.as_ref()) {
                    RotationCheck::Unchanged(snapshot) => open.snapshot = snapshot,
                    rotated => {
                        info!(reason = rotated.reason(), "log rotation detected, reopening file");
                        let dropped = lines.clear();
                        if dropped > 0 {
                            debug!(bytes = dropped, "discarded incomplete line from rotated file");
                        }
                        drop(open);
                        match self.open_with_retry(StartPosition::Beginning).await {
                            Some(reopened) => {
                                info!(
                                    new_file_size_bytes = reopened.snapshot.size,
                                    "successfully reopened log file"
                                );
                                open = reopened;
                                continue;
                            }
                            None => break,
                        }
                    }
                }
            }

            match open.file.read(&mut chunk).await {
                Ok(0) => {
                    if progress.status_due() {
                        log_idle_status(&mut open, &progress).await;
                    }
                    if !self.pause(self.options.read_interval).await {
                        break;
                    }
                }
                Ok(n) => {
                    open.cursor += n as u64;
                    for line in lines.push(&chunk[..n]) {
                        if let Err(err) = self.handle_line(line, &mut progress).await {
                            match err {
                                DispatchError::Cancelled => {}
                                DispatchError::Closed(queue) => {
                                    warn!(queue, "dispatch queue closed, stopping tailer")
                                }
                            }
                            break 'tail;
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "read error");
                    if !self.pause(self.options.read_interval).await {
                        break;
                    }
                }
            }
        }

        info!(entries = progress.entries, "context cancelled, stopping log processing");
    }

    /// Classify one complete line and enqueue it.  Malformed lines are logged
    /// and dropped.
    async fn handle_line(&self, line: String, progress: &mut Progress) -> Result<(), DispatchError> {
        match classify(&line) {
            Classification::Invalid(invalid) => {
                warn!(
                    error = %invalid.reason,
                    truncated_line = %invalid.excerpt,
                    "failed to parse JSON log line"
                );
                Ok(())
            }
            Classification::Audit(event) => {
                progress.record();
                self.dispatch.send_audit(event, &self.cancel).await
            }
            Classification::Passthrough(line) => {
                progress.record();
                self.dispatch.send_line(line, &self.cancel).await
            }
        }
    }

    /// Open the file, retrying at `retry_interval` until it succeeds.
    /// Returns `None` if cancelled first.
    async fn open_with_retry(&self, start: StartPosition) -> Option<OpenFile> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            match self.open(start).await {
                Ok(open) => return Some(open),
                Err(err) => {
                    warn!(
                        error = %err,
                        retry_interval = ?self.options.retry_interval,
                        "unable to open file, retrying"
                    );
                    if !self.pause(self.options.retry_interval).await {
                        return None;
                    }
                }
            }
        }
    }

    async fn open(&self, start: StartPosition) -> std::io::Result<OpenFile> {
        let mut file = File::open(&self.path).await?;
        let snapshot = FileSnapshot::of(&file.metadata().await?);

        let cursor = match start {
            StartPosition::End if snapshot.size > 0 => {
                let position = file.seek(SeekFrom::End(0)).await?;
                info!(
                    file_size_bytes = snapshot.size,
                    position,
                    "skipping existing log content, only new entries will be processed"
                );
                position
            }
            StartPosition::End => {
                info!("log file is empty, waiting for new entries");
                0
            }
            StartPosition::Beginning => {
                info!(file_size_bytes = snapshot.size, "reading file from the beginning");
                0
            }
        };

        Ok(OpenFile {
            file,
            snapshot,
            cursor,
        })
    }

    /// Sleep for `duration` unless cancelled. Returns `false` on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

async fn log_idle_status(open: &mut OpenFile, progress: &Progress) {
    if let Ok(metadata) = open.file.metadata().await {
        let size = metadata.len();
        debug!(
            file_size_bytes = size,
            position = open.cursor,
            remaining = size.saturating_sub(open.cursor),
            entries = progress.entries,
            "waiting for new data"
        );
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Entry counters for diagnostics.
struct Progress {
    entries: u64,
    last_status: Instant,
}

impl Progress {
    fn new() -> Self {
        Self {
            entries: 0,
            last_status: Instant::now(),
        }
    }

    fn record(&mut self) {
        self.entries += 1;
        if self.entries == 1 {
            debug!("successfully read first log entry");
        } else if self.entries % PROGRESS_EVERY == 0 {
            debug!(entries = self.entries, "processing");
        }
    }

    fn status_due(&mut self) -> bool {
        if self.last_status.elapsed() >= STATUS_INTERVAL {
            self.last_status = Instant::now();
            true
        } else {
            false
        }
    }
}

/// Accumulates raw bytes and yields complete lines.
///
/// Bytes after the last `\n` are held back until their terminator arrives. A
/// trailing `\r` is stripped and empty lines are skipped.
struct LineBuffer {
    pending: Vec<u8>,
    max_line_bytes: usize,
    /// Set while skipping the remainder of an oversized line.
    discarding: bool,
}

impl LineBuffer {
    fn new(max_line_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line_bytes,
            discarding: false,
        }
    }

    fn push(&mut self, mut data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        while let Some(pos) = data.iter().position(|&b| b == b'\n') {
            let (head, tail) = data.split_at(pos);
            data = &tail[1..];

            if self.discarding {
                self.discarding = false;
                continue;
            }

            self.pending.extend_from_slice(head);
            if self.pending.len() > self.max_line_bytes {
                warn!(
                    bytes = self.pending.len(),
                    max_line_bytes = self.max_line_bytes,
                    "discarding oversized log line"
                );
                self.pending.clear();
                continue;
            }

            let mut raw = std::mem::take(&mut self.pending);
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
            if !raw.is_empty() {
                lines.push(String::from_utf8_lossy(&raw).into_owned());
            }
        }

        if !self.discarding && !data.is_empty() {
            self.pending.extend_from_slice(data);
            if self.pending.len() > self.max_line_bytes {
                warn!(
                    bytes = self.pending.len(),
                    max_line_bytes = self.max_line_bytes,
                    "discarding oversized log line"
                );
                self.pending.clear();
                self.discarding = true;
            }
        }

        lines
    }

    /// Drop any buffered partial line, returning how many bytes were held.
    fn clear(&mut self) -> usize {
        let held = self.pending.len();
        self.pending.clear();
        self.discarding = false;
        held
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{channels, DispatchReceivers};
    use std::io::Write;
    use tokio::task::JoinHandle;

    const WAIT: Duration = Duration::from_secs(3);

    fn fast_options() -> TailOptions {
        TailOptions {
            start: StartPosition::End,
            retry_interval: Duration::from_millis(20),
            read_interval: Duration::from_millis(10),
            rotation_check_interval: Duration::from_millis(50),
            max_line_bytes: 1024,
        }
    }

    struct Harness {
        rx: DispatchReceivers,
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    }

    impl Harness {
        fn spawn(path: &Path, start: StartPosition) -> Self {
            Self::spawn_with_capacity(path, start, 16)
        }

        fn spawn_with_capacity(path: &Path, start: StartPosition, capacity: usize) -> Self {
            let (dispatch, rx) = channels(capacity);
            let cancel = CancellationToken::new();
            let tailer = FileTailer::new(
                path.to_path_buf(),
                start,
                fast_options(),
                dispatch,
                cancel.clone(),
            );
            let handle = tokio::spawn(tailer.run());
            Self { rx, cancel, handle }
        }

        async fn next_line(&mut self) -> String {
            tokio::time::timeout(WAIT, self.rx.lines.recv())
                .await
                .expect("timed out waiting for a passthrough line")
                .expect("passthrough queue closed")
        }

        async fn assert_quiet(&mut self) {
            tokio::time::sleep(Duration::from_millis(150)).await;
            assert!(self.rx.lines.try_recv().is_err(), "unexpected passthrough line");
            assert!(self.rx.audit.try_recv().is_err(), "unexpected audit event");
        }

        async fn stop(self) {
            self.cancel.cancel();
            tokio::time::timeout(Duration::from_secs(1), self.handle)
                .await
                .expect("tailer did not stop after cancellation")
                .unwrap();
        }
    }

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    #[tokio::test]
    async fn skips_existing_content_and_follows_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postgres.json");
        append(&path, "{\"message\":\"old\"}\n");

        let mut h = Harness::spawn(&path, StartPosition::End);
        settle().await;
        append(&path, "{\"message\":\"new\"}\n");

        assert_eq!(h.next_line().await, r#"{"message":"new"}"#);
        h.assert_quiet().await;
        h.stop().await;
    }

    #[tokio::test]
    async fn from_beginning_reads_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postgres.json");
        append(&path, "{\"n\":1}\n{\"n\":2}\n");

        let mut h = Harness::spawn(&path, StartPosition::Beginning);
        assert_eq!(h.next_line().await, r#"{"n":1}"#);
        assert_eq!(h.next_line().await, r#"{"n":2}"#);
        h.stop().await;
    }

    #[tokio::test]
    async fn partial_line_is_held_until_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postgres.json");
        append(&path, "");

        let mut h = Harness::spawn(&path, StartPosition::End);
        settle().await;
        append(&path, "{\"message\":\"hel");
        h.assert_quiet().await;

        append(&path, "lo\"}\r\n");
        assert_eq!(h.next_line().await, r#"{"message":"hello"}"#);
        h.stop().await;
    }

    #[tokio::test]
    async fn lines_are_routed_and_malformed_lines_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postgres.json");
        append(
            &path,
            concat!(
                "{\"message\":\"AUDIT: SESSION,1,1,READ,SELECT,,,SELECT 1\",\"user\":\"app\"}\n",
                "not json at all\n",
                "\n",
                "{\"message\":\"checkpoint complete\"}\n",
            ),
        );

        let mut h = Harness::spawn(&path, StartPosition::Beginning);

        let event = tokio::time::timeout(WAIT, h.rx.audit.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.labels.command.as_deref(), Some("SELECT"));
        assert_eq!(event.labels.user.as_deref(), Some("app"));

        assert_eq!(h.next_line().await, r#"{"message":"checkpoint complete"}"#);
        h.assert_quiet().await;
        h.stop().await;
    }

    #[tokio::test]
    async fn truncation_resumes_with_new_content_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postgres.json");
        append(&path, "{\"message\":\"first entry before truncation\"}\n");
        append(&path, "{\"message\":\"second entry before truncation\"}\n");

        let mut h = Harness::spawn(&path, StartPosition::Beginning);
        h.next_line().await;
        h.next_line().await;

        // Truncate in place and write something shorter than before.
        std::fs::write(&path, "{\"message\":\"after\"}\n").unwrap();

        assert_eq!(h.next_line().await, r#"{"message":"after"}"#);
        h.assert_quiet().await;
        h.stop().await;
    }

    #[tokio::test]
    async fn delete_and_recreate_is_followed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postgres.json");
        append(&path, "{\"message\":\"written to the original file\"}\n");

        let mut h = Harness::spawn(&path, StartPosition::Beginning);
        h.next_line().await;

        std::fs::remove_file(&path).unwrap();
        settle().await;
        append(&path, "{\"message\":\"fresh\"}\n");

        assert_eq!(h.next_line().await, r#"{"message":"fresh"}"#);
        h.assert_quiet().await;
        h.stop().await;
    }

    #[tokio::test]
    async fn file_renamed_over_the_path_is_followed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postgres.json");
        append(&path, "{\"message\":\"written to the original file\"}\n");

        let mut h = Harness::spawn(&path, StartPosition::Beginning);
        h.next_line().await;

        // The path never disappears, only its inode changes.
        let staged = dir.path().join("postgres.json.tmp");
        append(&staged, "{\"message\":\"replacement\"}\n");
        std::fs::rename(&staged, &path).unwrap();

        assert_eq!(h.next_line().await, r#"{"message":"replacement"}"#);
        h.assert_quiet().await;
        h.stop().await;
    }

    #[tokio::test]
    async fn waits_for_missing_file_to_appear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("later.json");

        let mut h = Harness::spawn(&path, StartPosition::End);
        settle().await;
        append(&path, "");
        settle().await;
        append(&path, "{\"message\":\"arrived\"}\n");

        assert_eq!(h.next_line().await, r#"{"message":"arrived"}"#);
        h.stop().await;
    }

    #[tokio::test]
    async fn cancellation_while_waiting_to_open_returns() {
        let dir = tempfile::tempdir().unwrap();
        let h = Harness::spawn(&dir.path().join("never.json"), StartPosition::End);
        settle().await;
        h.stop().await;
    }

    #[tokio::test]
    async fn cancellation_while_blocked_on_full_queue_returns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postgres.json");
        append(&path, "{\"n\":1}\n{\"n\":2}\n{\"n\":3}\n");

        let h = Harness::spawn_with_capacity(&path, StartPosition::Beginning, 1);
        settle().await;
        assert!(!h.handle.is_finished());
        h.stop().await;
    }

    #[test]
    fn line_buffer_splits_and_holds_remainder() {
        let mut buf = LineBuffer::new(64);
        assert_eq!(buf.push(b"a\nb\r\n\nc"), vec!["a", "b"]);
        assert_eq!(buf.push(b"d\n"), vec!["cd"]);
        assert_eq!(buf.clear(), 0);
    }

    #[test]
    fn line_buffer_discards_oversized_lines() {
        let mut buf = LineBuffer::new(4);
        assert!(buf.push(b"toolong").is_empty());
        assert!(buf.push(b"still the same line").is_empty());
        assert_eq!(buf.push(b"\nok\n"), vec!["ok"]);

        assert!(buf.push(b"12345\nfine\n") == vec!["fine"]);
    }

    #[test]
    fn line_buffer_clear_reports_held_bytes() {
        let mut buf = LineBuffer::new(64);
        buf.push(b"partial");
        assert_eq!(buf.clear(), 7);
        assert_eq!(buf.push(b"\n"), Vec::<String>::new());
    }
}
