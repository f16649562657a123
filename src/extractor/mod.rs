//! Extractor interface, registry, and the random-access spill helper
//! (component D).

mod spill;
pub mod rar_format;
pub mod seven_z_format;
pub mod single_file;
pub mod stream_archive;
pub mod zip_format;

pub use spill::{RandomAccessSource, SpilledFile};

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use crate::attributes::Attributes;
use crate::errors::{WalkError, WalkErrorCode, WalkResult};
use crate::mode::FileType;

/// A byte stream that is valid only for the duration of one consumer
/// invocation. Modelled as a one-shot enum rather than a repeatedly callable
/// closure: a closure that must lazily produce a reader borrowing from data
/// it owns itself does not type-check as a `Fn`/`FnMut`, so each supplier is
/// consumed exactly once via [`InputSupplier::open`].
pub enum InputSupplier<'a> {
    /// A reader that already exists (e.g. a live handle into an archive
    /// entry for the duration of one iteration step).
    Ready(Box<dyn Read + 'a>),
    /// Deferred construction, e.g. `File::open` against an owned `PathBuf`.
    Lazy(Box<dyn FnOnce() -> WalkResult<Box<dyn Read + 'a>> + 'a>),
    /// The entry is known to be unreadable (e.g. an out-of-order tar
    /// hard-link); still reported, but opening it raises.
    Failing(String),
    /// Already opened once; opening again is a programming error.
    Consumed,
}

impl<'a> InputSupplier<'a> {
    pub fn ready(reader: impl Read + 'a) -> Self {
        Self::Ready(Box::new(reader))
    }

    pub fn lazy(f: impl FnOnce() -> WalkResult<Box<dyn Read + 'a>> + 'a) -> Self {
        Self::Lazy(Box::new(f))
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::Failing(message.into())
    }

    /// Consumes the supplier, producing the readable stream. Calling this
    /// more than once on the same supplier yields an `Io` error rather than
    /// panicking, since the contract violation is the caller's, not this
    /// crate's, to recover from.
    pub fn open(&mut self) -> WalkResult<Box<dyn Read + 'a>> {
        match std::mem::replace(self, Self::Consumed) {
            Self::Ready(reader) => Ok(reader),
            Self::Lazy(f) => f(),
            Self::Failing(message) => Err(WalkError::new(WalkErrorCode::Io, message)),
            Self::Consumed => Err(WalkError::new(WalkErrorCode::Io, "input supplier already consumed")),
        }
    }
}

/// The payload `extract` hands back to the traversal engine for each entry
/// found inside a container, mirroring the `(fs_path?, match_path,
/// display_path, input_supplier, attributes)` tuple `filter` takes directly.
pub struct FilterRequest<'a> {
    pub fs_path: Option<PathBuf>,
    pub match_path: String,
    pub display_path: String,
    pub input: Option<InputSupplier<'a>>,
    pub attributes: Attributes,
}

/// The engine's re-entry point, as seen by an extractor. Kept in this module
/// (rather than the engine module) so extractors can depend on it without a
/// circular module dependency; the engine implements it on its own internal
/// traversal state.
pub trait Recursor {
    fn recurse(&mut self, request: FilterRequest<'_>) -> WalkResult<()>;

    /// Reports a recoverable failure tied to `display_path`. Propagates a
    /// fatal abort via `?` exactly like the engine's own error handler
    /// invocation; returning `Ok(())` means "continue as a leaf".
    fn report_error(
        &mut self,
        display_path: &str,
        attributes: &Attributes,
        message: &str,
        cause: Option<WalkError>,
    ) -> WalkResult<()>;
}

/// What an extractor was asked to read: the container entry itself plus
/// enough context to build the `display_path`/`match_path` of whatever is
/// found inside.
pub struct ExtractContext<'a> {
    pub extension: &'a str,
    /// Present only when the container lives directly on disk; absent when
    /// it was itself found nested inside another container's stream.
    pub fs_path: Option<&'a Path>,
    pub display_path: &'a str,
    pub input: InputSupplier<'a>,
    /// Attributes already collected for the container file itself.
    pub archive_attributes: &'a Attributes,
}

pub trait Extractor: Send + Sync {
    /// Lower-case extensions this extractor claims, without the leading dot.
    fn extensions(&self) -> &[&str];

    /// The `TYPE` a matching file is reclassified to once this extractor is
    /// assigned (`ARCHIVE` for containers, `COMPRESSED_FILE` for single-file
    /// codecs).
    fn modified_type(&self) -> FileType;

    /// Reads every entry of the container and calls `recursor.recurse` for
    /// each one. A return of `Ok(())` after calling `report_error` once (and
    /// nothing else) is the "skip this archive, treat as leaf" signal — no
    /// dedicated marker type is needed because the caller already stops
    /// recursing once `extract` returns without having recursed further.
    fn extract(&self, ctx: ExtractContext<'_>, recursor: &mut dyn Recursor) -> WalkResult<()>;
}

/// Extension → extractor mapping. The index is rebuilt lazily behind a
/// `OnceLock`; mutating the extractor set swaps in a fresh, empty lock so
/// the next lookup rebuilds rather than serving stale entries.
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
    index: OnceLock<HashMap<String, usize>>,
}

impl ExtractorRegistry {
    pub fn new(extractors: Vec<Arc<dyn Extractor>>) -> Self {
        Self { extractors, index: OnceLock::new() }
    }

    pub fn default_set() -> Self {
        Self::new(vec![
            Arc::new(stream_archive::StreamArchiveExtractor) as Arc<dyn Extractor>,
            Arc::new(zip_format::ZipExtractor) as Arc<dyn Extractor>,
            Arc::new(seven_z_format::SevenZExtractor) as Arc<dyn Extractor>,
            Arc::new(rar_format::RarExtractor::default()) as Arc<dyn Extractor>,
            Arc::new(single_file::SingleFileExtractor) as Arc<dyn Extractor>,
        ])
    }

    pub fn set_extractors(&mut self, extractors: Vec<Arc<dyn Extractor>>) {
        self.extractors = extractors;
        self.index = OnceLock::new();
    }

    fn index(&self) -> &HashMap<String, usize> {
        self.index.get_or_init(|| {
            let mut map = HashMap::new();
            for (position, extractor) in self.extractors.iter().enumerate() {
                for extension in extractor.extensions() {
                    map.insert(extension.to_ascii_lowercase(), position);
                }
            }
            map
        })
    }

    /// Looks up the extractor registered for `extension` (case-insensitive).
    pub fn lookup(&self, extension: &str) -> Option<&Arc<dyn Extractor>> {
        self.index().get(&extension.to_ascii_lowercase()).map(|&i| &self.extractors[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct StubExtractor;

    impl Extractor for StubExtractor {
        fn extensions(&self) -> &[&str] {
            &["stub", "stb"]
        }

        fn modified_type(&self) -> FileType {
            FileType::Archive
        }

        fn extract(&self, _ctx: ExtractContext<'_>, _recursor: &mut dyn Recursor) -> WalkResult<()> {
            Ok(())
        }
    }

    #[test]
    fn registry_looks_up_case_insensitively() {
        let registry = ExtractorRegistry::new(vec![Arc::new(StubExtractor)]);
        assert!(registry.lookup("STUB").is_some());
        assert!(registry.lookup("stb").is_some());
        assert!(registry.lookup("zzz").is_none());
    }

    #[test]
    fn set_extractors_invalidates_stale_index() {
        let mut registry = ExtractorRegistry::new(vec![Arc::new(StubExtractor)]);
        assert!(registry.lookup("stub").is_some());
        registry.set_extractors(vec![]);
        assert!(registry.lookup("stub").is_none());
    }

    #[test]
    fn input_supplier_open_is_one_shot() {
        let mut supplier = InputSupplier::ready(Cursor::new(b"hi".to_vec()));
        let mut buf = Vec::new();
        supplier.open().unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hi");
        assert!(supplier.open().is_err());
    }

    #[test]
    fn failing_supplier_errors_on_open_but_can_be_reported() {
        let mut supplier = InputSupplier::failing("hard link target missing");
        assert!(supplier.open().is_err());
    }
}
