//! Random-access shim (§4.5.6): for extractors that require seeking (ZIP,
//! 7Z, RAR) but received only a stream, spill it to a uniquely-named
//! temporary file and guarantee its deletion on every exit path.
//!
//! Cleanup is a Drop guard that removes what it created unless disarmed,
//! rather than manual cleanup scattered across error branches. The unique
//! name embeds a nanosecond timestamp plus an atomic counter, avoiding a
//! TOCTOU `exists()` check.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::errors::{walk_error_from_io, WalkResult};

static SPILL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Builds a path under the system temp directory that has not been handed
/// out by this process before. Combines a nanosecond timestamp with a
/// monotonic counter so that two calls within the same clock tick still
/// produce distinct names.
pub fn unique_temp_path(prefix: &str, suffix: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    let seq = SPILL_SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("{prefix}-{nanos}-{seq}{suffix}"))
}

/// A temporary file that deletes itself on drop, unless [`disarm`](Self::disarm)
/// was called (e.g. because the caller took ownership of the path another
/// way).
pub struct SpilledFile {
    path: PathBuf,
    active: bool,
}

impl SpilledFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn disarm(&mut self) {
        self.active = false;
    }

    /// Writes `reader` in full to a freshly chosen temp path.
    pub fn write_from(mut reader: impl Read, suffix: &str) -> WalkResult<Self> {
        let path = unique_temp_path("walktree-spill", suffix);
        let mut file = fs::File::create(&path).map_err(|e| walk_error_from_io("create spill file", e))?;
        io::copy(&mut reader, &mut file).map_err(|e| walk_error_from_io("write spill file", e))?;
        Ok(Self { path, active: true })
    }
}

impl Drop for SpilledFile {
    fn drop(&mut self) {
        if self.active {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Either an existing on-disk file (pass-through) or a spilled copy of a
/// stream, handed uniformly to extractors that need random access.
pub enum RandomAccessSource {
    Existing(PathBuf),
    Spilled(SpilledFile),
}

impl RandomAccessSource {
    /// Uses `fs_path` directly when present; otherwise drains `reader` to a
    /// temp file.
    pub fn acquire(fs_path: Option<&Path>, reader: impl Read, suffix: &str) -> WalkResult<Self> {
        match fs_path {
            Some(path) => Ok(Self::Existing(path.to_path_buf())),
            None => Ok(Self::Spilled(SpilledFile::write_from(reader, suffix)?)),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Existing(path) => path,
            Self::Spilled(spilled) => spilled.path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn spilled_file_is_removed_on_drop() {
        let path = {
            let spilled = SpilledFile::write_from(Cursor::new(b"payload".to_vec()), ".bin").unwrap();
            let path = spilled.path().to_path_buf();
            assert!(path.exists());
            path
        };
        assert!(!path.exists());
    }

    #[test]
    fn disarmed_spilled_file_survives_drop() {
        let path = {
            let mut spilled = SpilledFile::write_from(Cursor::new(b"payload".to_vec()), ".bin").unwrap();
            spilled.disarm();
            spilled.path().to_path_buf()
        };
        assert!(path.exists());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn existing_source_passes_through_without_spilling() {
        let existing = PathBuf::from("/some/archive.zip");
        let source = RandomAccessSource::acquire(Some(&existing), Cursor::new(Vec::<u8>::new()), ".zip").unwrap();
        assert_eq!(source.path(), existing);
    }

    #[test]
    fn unique_temp_path_does_not_repeat_within_same_process() {
        let a = unique_temp_path("p", ".x");
        let b = unique_temp_path("p", ".x");
        assert_ne!(a, b);
    }
}
