//! `--test-last-n`: dump the newest entries of a log file and exit.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use line_classifier::{parse_entry, LogEntry};

/// Bytes read back per requested entry.
const BYTES_PER_ENTRY: u64 = 1000;

/// The first file matching `pattern`, or the pattern itself when nothing
/// matches so the open error names it.
pub fn first_match(pattern: &str) -> Result<PathBuf> {
    let matches = glob::glob(pattern).with_context(|| format!("invalid glob pattern {pattern}"))?;
    Ok(matches
        .filter_map(Result::ok)
        .find(|p| p.is_file())
        .unwrap_or_else(|| PathBuf::from(pattern)))
}

/// Pretty-print up to `n` of the last entries in `path` to `out`. Returns
/// how many entries were printed.
pub async fn print_last_entries<W>(path: &Path, n: u64, out: &mut W) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let entries = read_last_entries(path, n).await?;
    for (i, entry) in entries.iter().enumerate() {
        let pretty = serde_json::to_string_pretty(entry)?;
        out.write_all(format!("=== Entry {} ===\n{pretty}\n", i + 1).as_bytes())
            .await
            .context("failed to write entry")?;
    }
    out.flush().await?;
    Ok(entries.len())
}

async fn read_last_entries(path: &Path, n: u64) -> Result<Vec<LogEntry>> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let size = file.metadata().await?.len();
    let offset = size.saturating_sub(n.saturating_mul(BYTES_PER_ENTRY));

    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = Vec::with_capacity((size - offset) as usize);
    file.read_to_end(&mut buf).await?;
    info!(path = %path.display(), size, offset, "reading tail of log file");

    let text = String::from_utf8_lossy(&buf);
    let mut entries: Vec<LogEntry> = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match parse_entry(line) {
            Ok(entry) => entries.push(entry),
            // The first line is usually cut by the seek.
            Err(invalid) => debug!(reason = %invalid.reason, "skipping undecodable line"),
        }
    }

    let total = entries.len();
    let keep = total.min(usize::try_from(n).unwrap_or(usize::MAX));
    info!(total, shown = keep, "decoded entries");
    Ok(entries.split_off(total - keep))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn log_file(lines: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 0..lines {
            writeln!(file, r#"{{"message":"entry {i}","user":"app"}}"#).unwrap();
        }
        file
    }

    #[tokio::test]
    async fn prints_only_the_last_n_entries() {
        let file = log_file(10);
        let mut out = Vec::new();
        let printed = print_last_entries(file.path(), 3, &mut out).await.unwrap();
        assert_eq!(printed, 3);

        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("=== Entry 1 ===\n{\n"));
        assert!(out.contains(r#""message": "entry 7""#));
        assert!(out.contains(r#""message": "entry 9""#));
        assert!(!out.contains(r#""message": "entry 6""#));
    }

    #[tokio::test]
    async fn short_file_prints_everything() {
        let file = log_file(2);
        let mut out = Vec::new();
        assert_eq!(print_last_entries(file.path(), 50, &mut out).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn partial_first_line_is_skipped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", "x".repeat(1500)).unwrap();
        writeln!(file, r#"{{"message":"last"}}"#).unwrap();

        let entries = read_last_entries(file.path(), 1).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["message"], "last");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = Vec::new();
        assert!(print_last_entries(&dir.path().join("absent.json"), 1, &mut out).await.is_err());
    }

    #[test]
    fn first_match_prefers_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("postgresql-1.json"), "").unwrap();
        let pattern = format!("{}/*.json", dir.path().display());
        assert_eq!(first_match(&pattern).unwrap(), dir.path().join("postgresql-1.json"));

        let none = format!("{}/*.csv", dir.path().display());
        assert_eq!(first_match(&none).unwrap(), PathBuf::from(&none));
    }
}
