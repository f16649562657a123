//! Recursively enumerates every file reachable from a starting filesystem
//! path, treating archive and compression containers as traversable
//! directories.
//!
//! The public entry point is [`walker`], which builds a [`WalkerBuilder`]
//! for configuring depth limits, glob filters, file-type filters, and the
//! extractor set before calling [`WalkerBuilder::walk`] or
//! [`WalkerBuilder::make_tree`].

pub mod attributes;
pub mod engine;
pub mod errors;
pub mod extractor;
pub mod matcher;
pub mod mode;
pub mod tree;
pub mod walker;

pub use attributes::{ArchiveFormat, Attribute, AttributeValue, Attributes, DosFlags};
pub use engine::{Consumer, ErrorHandler, FileTypeMode, WalkOptions};
pub use errors::{WalkError, WalkErrorCode, WalkResult};
pub use extractor::{ExtractContext, Extractor, ExtractorRegistry, FilterRequest, InputSupplier, Recursor};
pub use matcher::PathMatcher;
pub use mode::FileType;
pub use tree::{FileTreeNode, TreeError};
pub use walker::{walker, WalkerBuilder};
