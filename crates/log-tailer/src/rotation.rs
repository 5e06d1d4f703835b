//! File identity tracking and rotation detection.

use std::fs::Metadata;
use std::path::Path;

/// Identifies the underlying file independently of its path.
///
/// On Unix this is the `(device, inode)` pair. Elsewhere the creation time is
/// the closest portable substitute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
    #[cfg(not(unix))]
    created: Option<std::time::SystemTime>,
}

impl FileIdentity {
    pub fn of(metadata: &Metadata) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Self {
                dev: metadata.dev(),
                ino: metadata.ino(),
            }
        }

        #[cfg(not(unix))]
        {
            Self {
                created: metadata.created().ok(),
            }
        }
    }
}

/// Identity and size of a file at the moment it was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSnapshot {
    pub identity: FileIdentity,
    pub size: u64,
}

impl FileSnapshot {
    pub fn of(metadata: &Metadata) -> Self {
        Self {
            identity: FileIdentity::of(metadata),
            size: metadata.len(),
        }
    }

    /// Stat `path`. Any failure, including absence, yields `None`.
    pub async fn of_path(path: &Path) -> Option<Self> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) => Some(Self::of(&metadata)),
            Err(err) => {
                tracing::debug!(path = %path.display(), %err, "unable to stat file");
                None
            }
        }
    }
}

/// Result of comparing the current state of a path against the last
/// observation made through the open handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationCheck {
    /// Same file, not shrunk. Carries the fresh snapshot.
    Unchanged(FileSnapshot),
    /// The path now refers to a different file.
    Replaced,
    /// The file shrank below the last observed size or the read cursor.
    Truncated { previous: u64, current: u64 },
    /// Nothing exists at the path.
    Missing,
}

impl RotationCheck {
    pub fn reason(&self) -> &'static str {
        match self {
            RotationCheck::Unchanged(_) => "unchanged",
            RotationCheck::Replaced => "file replaced",
            RotationCheck::Truncated { .. } => "file truncated",
            RotationCheck::Missing => "file missing",
        }
    }
}

/// Decide whether the file behind a tailer's handle has been rotated.
pub fn check(last: &FileSnapshot, cursor: u64, current: Option<&FileSnapshot>) -> RotationCheck {
    let Some(current) = current else {
        return RotationCheck::Missing;
    };

    if current.identity != last.identity {
        return RotationCheck::Replaced;
    }

    let high_water = last.size.max(cursor);
    if current.size < high_water {
        return RotationCheck::Truncated {
            previous: high_water,
            current: current.size,
        };
    }

    RotationCheck::Unchanged(*current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn snapshot_of(path: &Path) -> FileSnapshot {
        FileSnapshot::of(&std::fs::metadata(path).unwrap())
    }

    #[test]
    fn growth_is_not_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "one\n").unwrap();
        let before = snapshot_of(&path);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"two\n").unwrap();
        let after = snapshot_of(&path);

        let result = check(&before, before.size, Some(&after));
        assert_eq!(result, RotationCheck::Unchanged(after));
        assert_eq!(result.reason(), "unchanged");
    }

    #[test]
    fn shrink_below_last_size_is_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "a fairly long line\n").unwrap();
        let before = snapshot_of(&path);

        std::fs::write(&path, "x\n").unwrap();
        let after = snapshot_of(&path);

        assert_eq!(
            check(&before, 0, Some(&after)),
            RotationCheck::Truncated {
                previous: before.size,
                current: 2
            }
        );
    }

    #[test]
    fn shrink_below_cursor_is_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "abc\n").unwrap();
        let snap = snapshot_of(&path);

        // The handle has read further than the file now extends.
        let result = check(&snap, snap.size + 10, Some(&snap));
        assert!(matches!(result, RotationCheck::Truncated { .. }));
    }

    #[test]
    fn missing_file_is_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "abc\n").unwrap();
        let snap = snapshot_of(&path);

        assert_eq!(check(&snap, 0, None), RotationCheck::Missing);
        assert_eq!(RotationCheck::Missing.reason(), "file missing");
    }

    #[cfg(unix)]
    #[test]
    fn different_file_is_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.log");
        let second = dir.path().join("b.log");
        std::fs::write(&first, "abc\n").unwrap();
        std::fs::write(&second, "abcdef\n").unwrap();

        let result = check(&snapshot_of(&first), 0, Some(&snapshot_of(&second)));
        assert_eq!(result, RotationCheck::Replaced);
    }

    #[tokio::test]
    async fn of_path_returns_none_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileSnapshot::of_path(&dir.path().join("nope")).await.is_none());
    }
}
