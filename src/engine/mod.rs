//! Traversal engine (component F): `filter` is both the central classifier
//! and the re-entry point extractors call back into (`Recursor`), a
//! recursive-descent directory walk generalised so the "directory" being
//! walked can also be an archive stream.

use std::collections::HashSet;
use std::fs::{self, File};
use std::path::Path;

use crate::attributes::{Attribute, AttributeValue, Attributes};
use crate::errors::{walk_error_from_io, WalkError, WalkErrorCode, WalkResult};
use crate::extractor::{ExtractContext, Extractor, ExtractorRegistry, FilterRequest, InputSupplier, Recursor};
use crate::matcher::PathMatcher;
use crate::mode::{permissions_from_mode, type_from_mode, FileType};

/// How `file_types`/`file_types_except`/`all_file_types` narrows emission.
/// The three configurators are mutually exclusive; `WalkerBuilder::build`
/// is where that conflict is caught, not here.
#[derive(Clone, Debug)]
pub enum FileTypeMode {
    All,
    Only(HashSet<FileType>),
    Except(HashSet<FileType>),
}

impl Default for FileTypeMode {
    fn default() -> Self {
        Self::All
    }
}

impl FileTypeMode {
    fn shows(&self, file_type: FileType) -> bool {
        match self {
            Self::All => true,
            Self::Only(types) => types.contains(&file_type),
            Self::Except(types) => !types.contains(&file_type),
        }
    }
}

/// Resolved, validated configuration a `Walker` hands to the engine for one
/// `walk`/`make_tree` call.
pub struct WalkOptions {
    pub max_depth: usize,
    pub recurse_into_archives: bool,
    pub follow_links: bool,
    pub unix_attributes: bool,
    pub dos_attributes: bool,
    pub include: PathMatcher,
    pub exclude: PathMatcher,
    pub file_type_mode: FileTypeMode,
    pub extractors: ExtractorRegistry,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            max_depth: usize::MAX,
            recurse_into_archives: true,
            follow_links: false,
            unix_attributes: true,
            dos_attributes: true,
            include: PathMatcher::new(),
            exclude: PathMatcher::new(),
            file_type_mode: FileTypeMode::All,
            extractors: ExtractorRegistry::default_set(),
        }
    }
}

pub type Consumer<'a> = dyn FnMut(&str, &mut InputSupplier<'_>, &Attributes) -> WalkResult<()> + 'a;
pub type ErrorHandler<'a> = dyn FnMut(&str, &Attributes, &str, Option<WalkError>) -> WalkResult<()> + 'a;

/// Default error handler: re-raises whatever it was handed, matching "abort
/// on first error" as the library's out-of-the-box behaviour.
pub fn raising_error_handler(_display_path: &str, _attributes: &Attributes, message: &str, cause: Option<WalkError>) -> WalkResult<()> {
    match cause {
        Some(cause) => Err(cause),
        None => Err(WalkError::new(WalkErrorCode::Unknown, message.to_string())),
    }
}

fn name_count(path: &str) -> usize {
    path.split('/').filter(|c| !c.is_empty()).count()
}

pub(crate) fn normalize_to_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

struct Engine<'a> {
    options: &'a WalkOptions,
    root_name_count: usize,
    excluded_subpaths: HashSet<String>,
    non_excluded_subpaths: HashSet<String>,
    consume: &'a mut Consumer<'a>,
    on_error: &'a mut ErrorHandler<'a>,
}

impl<'a> Engine<'a> {
    fn depth_of(&self, display_path: &str) -> usize {
        name_count(display_path).saturating_sub(self.root_name_count)
    }

    /// Memoised prefix-exclusion check (§4.1): tests each non-empty prefix
    /// of `match_path` against the exclude matcher, caching both the
    /// "excluded" and "not excluded" verdicts so sibling entries under the
    /// same directory don't re-run the matcher.
    fn is_excluded(&mut self, match_path: &str) -> bool {
        if match_path.is_empty() {
            return false;
        }
        let mut prefix = String::new();
        for component in match_path.split('/').filter(|c| !c.is_empty()) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(component);
            if self.excluded_subpaths.contains(&prefix) {
                return true;
            }
            if self.non_excluded_subpaths.contains(&prefix) {
                continue;
            }
            if self.options.exclude.matches(&prefix) {
                self.excluded_subpaths.insert(prefix);
                return true;
            }
            self.non_excluded_subpaths.insert(prefix.clone());
        }
        false
    }

    fn attributes_for_fs_entry(&self, path: &Path, metadata: &fs::Metadata) -> Attributes {
        let mut attrs = Attributes::new();
        if let Ok(modified) = metadata.modified() {
            attrs.put(Attribute::LastModifiedTime, Some(AttributeValue::Time(modified)));
        }
        if let Ok(accessed) = metadata.accessed() {
            attrs.put(Attribute::LastAccessTime, Some(AttributeValue::Time(accessed)));
        }
        if let Ok(created) = metadata.created() {
            attrs.put(Attribute::CreationTime, Some(AttributeValue::Time(created)));
        }

        let file_type = classify_fs_entry(metadata);
        attrs.set_type(file_type);

        if metadata.is_file() {
            attrs.put(Attribute::Size, Some(AttributeValue::Size(metadata.len())));
        }

        if self.options.unix_attributes {
            unix::populate(&mut attrs, metadata);
        }
        if self.options.dos_attributes {
            dos::populate(&mut attrs, path, metadata);
        }

        attrs
    }

    /// The central classifier and extractor re-entry point (§4.1).
    fn filter(
        &mut self,
        fs_path: Option<&Path>,
        match_path: &str,
        display_path: &str,
        input: Option<InputSupplier<'_>>,
        mut attributes: Attributes,
    ) -> WalkResult<()> {
        let depth = self.depth_of(display_path);
        if depth > self.options.max_depth {
            tracing::trace!(display_path, depth, max_depth = self.options.max_depth, "dropping entry beyond max depth");
            return Ok(());
        }

        if self.is_excluded(match_path) {
            tracing::trace!(display_path, "dropping entry matched by exclusion");
            return Ok(());
        }

        let mut assigned_extractor: Option<std::sync::Arc<dyn Extractor>> = None;
        let mut extension_as_typed: Option<String> = None;
        if attributes.file_type() == Some(FileType::RegularFile) {
            if let Some(extension) = extension_of(match_path) {
                if let Some(extractor) = self.options.extractors.lookup(extension) {
                    tracing::debug!(display_path, extension, "assigning extractor");
                    attributes.set_type(extractor.modified_type());
                    assigned_extractor = Some(extractor.clone());
                    extension_as_typed = Some(extension.to_string());
                }
            }
        }

        let file_type = attributes.file_type().unwrap_or(FileType::Unknown);
        let will_recurse = assigned_extractor.is_some() && self.options.recurse_into_archives;

        // A stream-only supplier (no `fs_path`) can be opened exactly once
        // (§5, "valid only during that consumer invocation"). When the same
        // entry must be both emitted to the consumer and handed to its
        // extractor, an on-disk `fs_path` lets each side get its own fresh
        // `File::open`; a nested stream with no backing path cannot be
        // replayed, so extraction takes the one supplier that exists and
        // the consumer is told the raw bytes were routed there instead.
        let (consumer_input, extractor_input) = if will_recurse {
            match fs_path {
                Some(path) => (reopen_supplier(path), Some(reopen_supplier(path))),
                None => (
                    InputSupplier::failing("entry was routed directly to its extractor; raw bytes not separately available"),
                    input,
                ),
            }
        } else {
            (input.unwrap_or_else(|| InputSupplier::failing("entry has no readable byte stream")), None)
        };

        if self.options.file_type_mode.shows(file_type) {
            let should_emit = self.options.include.is_empty() || self.options.include.matches(match_path);
            if should_emit {
                let mut supplier = consumer_input;
                (self.consume)(display_path, &mut supplier, &attributes)?;
            }
        }

        if let (Some(extractor), true) = (assigned_extractor, will_recurse) {
            let extension = extension_as_typed.expect("extractor assignment always records its extension");
            let supplier = match extractor_input {
                Some(supplier) => supplier,
                None => InputSupplier::failing("archive entry has no byte stream to extract from"),
            };
            let ctx = ExtractContext {
                extension: &extension,
                fs_path,
                display_path,
                input: supplier,
                archive_attributes: &attributes,
            };
            extractor.extract(ctx, self)?;
        }

        Ok(())
    }

    fn walk_directory(&mut self, fs_path: &Path, display_path: &str, match_path: &str, attrs: Attributes) -> WalkResult<()> {
        self.filter(Some(fs_path), match_path, display_path, None, attrs)?;

        let depth = self.depth_of(display_path);
        if depth >= self.options.max_depth || self.is_excluded(match_path) {
            return Ok(());
        }

        let read_dir = match fs::read_dir(fs_path) {
            Ok(rd) => rd,
            Err(e) => return (self.on_error)(display_path, &Attributes::new(), &e.to_string(), Some(walk_error_from_io("read directory", e))),
        };

        for entry in read_dir {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    (self.on_error)(display_path, &Attributes::new(), &e.to_string(), Some(walk_error_from_io("read directory entry", e)))?;
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let child_display = format!("{display_path}/{name}");
            let child_match = if match_path.is_empty() { name.clone() } else { format!("{match_path}/{name}") };
            let child_fs_path = entry.path();

            let symlink_metadata = match fs::symlink_metadata(&child_fs_path) {
                Ok(m) => m,
                Err(e) => {
                    (self.on_error)(&child_display, &Attributes::new(), &e.to_string(), Some(walk_error_from_io("stat entry", e)))?;
                    continue;
                }
            };

            if symlink_metadata.is_symlink() && !self.options.follow_links {
                let attrs = self.attributes_for_fs_entry(&child_fs_path, &symlink_metadata);
                let mut attrs = attrs;
                attrs.set_type(FileType::SymbolicLink);
                self.filter(
                    Some(&child_fs_path),
                    &child_match,
                    &child_display,
                    Some(InputSupplier::failing("symbolic link target not followed")),
                    attrs,
                )?;
                continue;
            }

            let metadata = if symlink_metadata.is_symlink() {
                match fs::metadata(&child_fs_path) {
                    Ok(m) => m,
                    Err(e) => {
                        (self.on_error)(&child_display, &Attributes::new(), &e.to_string(), Some(walk_error_from_io("follow symlink", e)))?;
                        continue;
                    }
                }
            } else {
                symlink_metadata
            };

            let attrs = self.attributes_for_fs_entry(&child_fs_path, &metadata);
            if metadata.is_dir() {
                self.walk_directory(&child_fs_path, &child_display, &child_match, attrs)?;
            } else {
                let input = reopen_supplier(&child_fs_path);
                self.filter(Some(&child_fs_path), &child_match, &child_display, Some(input), attrs)?;
            }
        }
        Ok(())
    }
}

impl Recursor for Engine<'_> {
    fn recurse(&mut self, request: FilterRequest<'_>) -> WalkResult<()> {
        self.filter(request.fs_path.as_deref(), &request.match_path, &request.display_path, request.input, request.attributes)
    }

    fn report_error(&mut self, display_path: &str, attributes: &Attributes, message: &str, cause: Option<WalkError>) -> WalkResult<()> {
        tracing::warn!(display_path, message, "extractor reported a recoverable failure, treating entry as a leaf");
        (self.on_error)(display_path, attributes, message, cause)
    }
}

fn classify_fs_entry(metadata: &fs::Metadata) -> FileType {
    if metadata.is_dir() {
        FileType::Directory
    } else if metadata.file_type().is_symlink() {
        FileType::SymbolicLink
    } else {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            let ft = metadata.file_type();
            if ft.is_block_device() {
                return FileType::BlockDevice;
            }
            if ft.is_char_device() {
                return FileType::CharacterDevice;
            }
            if ft.is_fifo() {
                return FileType::Fifo;
            }
            if ft.is_socket() {
                return FileType::Socket;
            }
        }
        FileType::RegularFile
    }
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::fs::MetadataExt;

    pub fn populate(attrs: &mut Attributes, metadata: &fs::Metadata) {
        let mode = metadata.mode();
        attrs.put(Attribute::UnixPermissions, Some(AttributeValue::UnixPermissions(permissions_from_mode(mode as u32))));
        attrs.put(Attribute::UserId, Some(AttributeValue::UserId(metadata.uid())));
        attrs.put(Attribute::GroupId, Some(AttributeValue::GroupId(metadata.gid())));
        let inferred = type_from_mode(mode as u32);
        if inferred != FileType::Unknown && attrs.file_type() != Some(FileType::Directory) && attrs.file_type() != Some(FileType::SymbolicLink) {
            attrs.set_type(inferred);
        }
    }
}

#[cfg(not(unix))]
mod unix {
    use super::*;

    pub fn populate(_attrs: &mut Attributes, _metadata: &fs::Metadata) {}
}

#[cfg(windows)]
mod dos {
    use super::*;
    use std::os::windows::fs::MetadataExt;
    use crate::attributes::DosFlags;

    pub fn populate(attrs: &mut Attributes, _path: &Path, metadata: &fs::Metadata) {
        const READ_ONLY: u32 = 0x1;
        const HIDDEN: u32 = 0x2;
        const SYSTEM: u32 = 0x4;
        const ARCHIVE: u32 = 0x20;
        let bits = metadata.file_attributes();
        attrs.put(
            Attribute::Dos,
            Some(AttributeValue::Dos(DosFlags {
                read_only: bits & READ_ONLY != 0,
                hidden: bits & HIDDEN != 0,
                system: bits & SYSTEM != 0,
                archive: bits & ARCHIVE != 0,
            })),
        );
    }
}

#[cfg(not(windows))]
mod dos {
    use super::*;

    pub fn populate(_attrs: &mut Attributes, _path: &Path, _metadata: &fs::Metadata) {}
}

fn reopen_supplier<'a>(path: &Path) -> InputSupplier<'a> {
    let owned = path.to_path_buf();
    InputSupplier::lazy(move || {
        File::open(&owned).map(|f| Box::new(f) as Box<dyn std::io::Read>).map_err(|e| walk_error_from_io("open file", e))
    })
}

fn extension_of(match_path: &str) -> Option<&str> {
    let name = match_path.rsplit('/').next().unwrap_or(match_path);
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// Runs one full traversal of `root` under `options`, invoking `consume` for
/// every kept entry and `on_error` for every recoverable failure.
pub fn walk(
    root: &Path,
    options: &WalkOptions,
    consume: &mut Consumer<'_>,
    on_error: &mut ErrorHandler<'_>,
) -> WalkResult<()> {
    let display_root = normalize_to_display(root);
    let root_name_count = name_count(&display_root);

    let mut engine = Engine {
        options,
        root_name_count,
        excluded_subpaths: HashSet::new(),
        non_excluded_subpaths: HashSet::new(),
        consume,
        on_error,
    };

    let metadata = fs::symlink_metadata(root).map_err(|e| walk_error_from_io("stat root", e))?;
    if metadata.is_dir() {
        let attrs = engine.attributes_for_fs_entry(root, &metadata);
        engine.walk_directory(root, &display_root, "", attrs)
    } else {
        let attrs = engine.attributes_for_fs_entry(root, &metadata);
        let input = reopen_supplier(root);
        engine.filter(Some(root), &display_root, &display_root, Some(input), attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static SEQ: AtomicU64 = AtomicU64::new(0);

    fn uniq_path(name: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("walktree-engine-{name}-{nanos}-{seq}"))
    }

    #[test]
    fn plain_file_is_emitted_with_its_size() {
        let path = uniq_path("plain-file");
        fs::write(&path, b"test data").unwrap();

        let options = WalkOptions::default();
        let mut seen = Vec::new();
        walk(
            &path,
            &options,
            &mut |display_path, supplier, attrs| {
                let mut buf = Vec::new();
                supplier.open()?.read_to_end(&mut buf).map_err(|e| walk_error_from_io("read", e))?;
                seen.push((display_path.to_string(), buf, attrs.get(Attribute::Size).cloned()));
                Ok(())
            },
            &mut raising_error_handler,
        )
        .unwrap();

        let _ = fs::remove_file(&path);

        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, b"test data");
        assert_eq!(seen[0].2, Some(AttributeValue::Size(9)));
    }

    #[test]
    fn max_depth_zero_emits_only_the_root() {
        let root = uniq_path("depth-zero-root");
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(root.join("nested/file.txt"), b"x").unwrap();

        let mut options = WalkOptions::default();
        options.max_depth = 0;
        let mut seen = Vec::new();
        walk(
            &root,
            &options,
            &mut |display_path, _supplier, _attrs| {
                seen.push(display_path.to_string());
                Ok(())
            },
            &mut raising_error_handler,
        )
        .unwrap();

        let _ = fs::remove_dir_all(&root);
        assert_eq!(seen, vec![normalize_to_display(&root)]);
    }

    #[test]
    fn exclusion_wins_over_inclusion() {
        let root = uniq_path("exclusion-wins");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("keep.j"), b"1").unwrap();

        let mut options = WalkOptions::default();
        options.include = PathMatcher::from_patterns(["*.j"]).unwrap();
        options.exclude = PathMatcher::from_patterns(["*.j"]).unwrap();
        let mut seen = Vec::new();
        walk(
            &root,
            &options,
            &mut |display_path, _supplier, _attrs| {
                seen.push(display_path.to_string());
                Ok(())
            },
            &mut raising_error_handler,
        )
        .unwrap();

        let _ = fs::remove_dir_all(&root);
        assert!(seen.iter().all(|p| !p.ends_with("keep.j")));
    }

    #[test]
    fn directory_exclusion_prunes_its_entire_subtree() {
        let root = uniq_path("dir-exclusion");
        fs::create_dir_all(root.join("d1/d2")).unwrap();
        fs::write(root.join("d1/d2/deep.txt"), b"x").unwrap();
        fs::write(root.join("keep.txt"), b"y").unwrap();

        let mut options = WalkOptions::default();
        options.exclude = PathMatcher::from_patterns(["d1"]).unwrap();
        let mut seen = Vec::new();
        walk(
            &root,
            &options,
            &mut |display_path, _supplier, _attrs| {
                seen.push(display_path.to_string());
                Ok(())
            },
            &mut raising_error_handler,
        )
        .unwrap();

        let _ = fs::remove_dir_all(&root);
        assert!(seen.iter().any(|p| p.ends_with("keep.txt")));
        assert!(seen.iter().all(|p| !p.contains("d1")));
    }
}
