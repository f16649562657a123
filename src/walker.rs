//! Public facade (component H): `walker()` builds a validated `Walker`
//! which exposes `walk` and `make_tree`.
//!
//! `file_types`/`file_types_except`/`all_file_types` are mutually exclusive
//! modes: calling more than one distinct one of the three on the same
//! builder is a configuration error, raised as `WalkErrorCode::Configuration`
//! at `build()` time (called internally by `walk`/`make_tree`) rather than
//! at the setter call site, matching a builder that accumulates state and
//! validates once at the end.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::engine::{self, raising_error_handler, Consumer, ErrorHandler, FileTypeMode, WalkOptions};
use crate::errors::{WalkError, WalkErrorCode, WalkResult};
use crate::extractor::{Extractor, ExtractorRegistry};
use crate::matcher::PathMatcher;
use crate::mode::FileType;
use crate::tree::{make_tree as build_tree, FileTreeNode, TreeError};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum FileTypeKind {
    Only,
    Except,
    All,
}

/// Accumulates file-type configuration across possibly-repeated setter
/// calls. `kinds` records every *distinct* kind of setter invoked so far;
/// more than one distinct kind present at `build()` time means inverted and
/// non-inverted modes were mixed, which is rejected there. `only`/`except`
/// hold the most recent argument list for whichever single kind ends up
/// selected.
#[derive(Clone, Default)]
struct FileTypeSelection {
    kinds: HashSet<FileTypeKind>,
    only: Vec<FileType>,
    except: Vec<FileType>,
}

/// Accumulates configuration; `build()` (called internally by `walk`/
/// `make_tree`) validates it into a `WalkOptions`.
pub struct WalkerBuilder {
    max_depth: usize,
    recurse_into_archives: bool,
    follow_links: bool,
    unix_attributes: bool,
    dos_attributes: bool,
    include: PathMatcher,
    exclude: PathMatcher,
    file_types: FileTypeSelection,
    extractors: Option<Vec<Arc<dyn Extractor>>>,
}

/// Starts a new configuration builder.
pub fn walker() -> WalkerBuilder {
    WalkerBuilder::default()
}

impl Default for WalkerBuilder {
    fn default() -> Self {
        Self {
            max_depth: usize::MAX,
            recurse_into_archives: true,
            follow_links: false,
            unix_attributes: true,
            dos_attributes: true,
            include: PathMatcher::new(),
            exclude: PathMatcher::new(),
            file_types: FileTypeSelection::default(),
            extractors: None,
        }
    }
}

impl WalkerBuilder {
    /// `0` means "root only"; archives count as directories for this bound.
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn recurse_into_archives(mut self, recurse: bool) -> Self {
        self.recurse_into_archives = recurse;
        self
    }

    /// Applies to filesystem symlinks only; symlinks inside archives are
    /// never followed.
    pub fn follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    pub fn unix_attributes(mut self, enabled: bool) -> Self {
        self.unix_attributes = enabled;
        self
    }

    pub fn dos_attributes(mut self, enabled: bool) -> Self {
        self.dos_attributes = enabled;
        self
    }

    pub fn include(mut self, pattern: impl Into<String>) -> Result<Self, globset::Error> {
        self.include.add(pattern.into())?;
        Ok(self)
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Result<Self, globset::Error> {
        self.exclude.add(pattern.into())?;
        Ok(self)
    }

    pub fn file_types(mut self, types: impl IntoIterator<Item = FileType>) -> Self {
        self.file_types.kinds.insert(FileTypeKind::Only);
        self.file_types.only = types.into_iter().collect();
        self
    }

    pub fn file_types_except(mut self, types: impl IntoIterator<Item = FileType>) -> Self {
        self.file_types.kinds.insert(FileTypeKind::Except);
        self.file_types.except = types.into_iter().collect();
        self
    }

    pub fn all_file_types(mut self) -> Self {
        self.file_types.kinds.insert(FileTypeKind::All);
        self
    }

    /// Replaces the default extractor set (the five built-ins).
    pub fn extract_with(mut self, extractors: impl IntoIterator<Item = Arc<dyn Extractor>>) -> Self {
        self.extractors = Some(extractors.into_iter().collect());
        self
    }

    fn build(self) -> WalkResult<Walker> {
        if self.file_types.kinds.len() > 1 {
            return Err(WalkError::new(
                WalkErrorCode::Configuration,
                "file_types, file_types_except, and all_file_types are mutually exclusive",
            ));
        }

        let file_type_mode = match self.file_types.kinds.iter().next() {
            None | Some(FileTypeKind::All) => FileTypeMode::All,
            Some(FileTypeKind::Only) => FileTypeMode::Only(self.file_types.only.into_iter().collect::<HashSet<_>>()),
            Some(FileTypeKind::Except) => FileTypeMode::Except(self.file_types.except.into_iter().collect::<HashSet<_>>()),
        };

        let extractors = match self.extractors {
            Some(list) => ExtractorRegistry::new(list),
            None => ExtractorRegistry::default_set(),
        };

        Ok(Walker {
            options: WalkOptions {
                max_depth: self.max_depth,
                recurse_into_archives: self.recurse_into_archives,
                follow_links: self.follow_links,
                unix_attributes: self.unix_attributes,
                dos_attributes: self.dos_attributes,
                include: self.include,
                exclude: self.exclude,
                file_type_mode,
                extractors,
            },
        })
    }

    pub fn walk(self, path: impl AsRef<Path>, consumer: &mut Consumer<'_>) -> WalkResult<()> {
        self.walk_with_handler(path, consumer, &mut raising_error_handler)
    }

    pub fn walk_with_handler(
        self,
        path: impl AsRef<Path>,
        consumer: &mut Consumer<'_>,
        error_handler: &mut ErrorHandler<'_>,
    ) -> WalkResult<()> {
        let walker = self.build()?;
        engine::walk(path.as_ref(), &walker.options, consumer, error_handler)
    }

    pub fn make_tree(self, path: impl AsRef<Path>) -> WalkResult<(FileTreeNode, Vec<TreeError>)> {
        let walker = self.build()?;
        build_tree(path.as_ref(), &walker.options)
    }
}

/// A validated, ready-to-run configuration. Produced only by
/// `WalkerBuilder::build`, which is why construction always goes through
/// `walker()`.
struct Walker {
    options: WalkOptions,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static SEQ: AtomicU64 = AtomicU64::new(0);

    fn uniq_path(name: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("walktree-walker-{name}-{nanos}-{seq}"))
    }

    #[test]
    fn builder_walks_a_plain_directory() {
        let root = uniq_path("builder-basic");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a.txt"), b"content").unwrap();

        let mut seen = Vec::new();
        walker()
            .walk(&root, &mut |display_path, _supplier, _attrs| {
                seen.push(display_path.to_string());
                Ok(())
            })
            .unwrap();

        let _ = fs::remove_dir_all(&root);
        assert!(seen.iter().any(|p| p.ends_with("a.txt")));
    }

    #[test]
    fn builder_make_tree_round_trips_with_walk() {
        let root = uniq_path("builder-tree");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("sub/leaf.txt"), b"content").unwrap();

        let mut walked = HashSet::new();
        walker()
            .walk(&root, &mut |display_path, _supplier, _attrs| {
                walked.insert(display_path.to_string());
                Ok(())
            })
            .unwrap();

        let (tree, errors) = walker().make_tree(&root).unwrap();
        let _ = fs::remove_dir_all(&root);

        assert!(errors.is_empty());
        assert!(tree.child("sub").and_then(|s| s.child("leaf.txt")).is_some());
        assert!(walked.iter().any(|p| p.ends_with("sub/leaf.txt")));
    }

    #[test]
    fn mixing_inverted_and_non_inverted_file_type_modes_is_a_configuration_error() {
        let root = uniq_path("builder-mixed-file-types");
        fs::create_dir_all(&root).unwrap();

        let err = walker()
            .file_types([FileType::RegularFile])
            .file_types_except([FileType::Directory])
            .walk(&root, &mut |_display_path, _supplier, _attrs| Ok(()))
            .unwrap_err();

        let _ = fs::remove_dir_all(&root);
        assert_eq!(err.code(), crate::errors::WalkErrorCode::Configuration);
    }

    #[test]
    fn repeating_the_same_file_type_setter_is_not_an_error() {
        let root = uniq_path("builder-repeated-file-types");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a.txt"), b"x").unwrap();

        walker()
            .file_types([FileType::RegularFile])
            .file_types([FileType::RegularFile, FileType::Directory])
            .walk(&root, &mut |_display_path, _supplier, _attrs| Ok(()))
            .unwrap();

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn max_depth_builder_configurator_is_honoured() {
        let root = uniq_path("builder-depth");
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(root.join("nested/deep.txt"), b"x").unwrap();

        let mut seen = Vec::new();
        walker()
            .max_depth(0)
            .walk(&root, &mut |display_path, _supplier, _attrs| {
                seen.push(display_path.to_string());
                Ok(())
            })
            .unwrap();

        let _ = fs::remove_dir_all(&root);
        assert_eq!(seen.len(), 1);
    }
}
