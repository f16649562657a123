use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::mode::FileType;

/// Typed key into an [`Attributes`] bundle. New formats add a variant here
/// rather than a new struct field, per the open-attribute-set design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Attribute {
    Type,
    CreationTime,
    LastAccessTime,
    LastModifiedTime,
    Size,
    UserName,
    GroupName,
    UserId,
    GroupId,
    UnixPermissions,
    Dos,
    InArchive,
    ArjHostOs,
    GzipHostFs,
    Checksum,
    Comment,
}

/// DOS file attribute flags (read-only, hidden, system, archive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DosFlags {
    pub read_only: bool,
    pub hidden: bool,
    pub system: bool,
    pub archive: bool,
}

/// The container format an entry was produced from. Stamped under
/// `Attribute::InArchive`; presence of the attribute at all is what
/// signals "this entry came from inside a container".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Ar,
    Arj,
    Cpio,
    Dump,
    Tar,
    Zip,
    SevenZ,
    Rar,
    Gzip,
    Bzip2,
    Xz,
    Lzma,
    Zstd,
    Brotli,
    Lz4,
    Snappy,
    Z,
    Lz,
    Lzo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Type(FileType),
    Time(SystemTime),
    Size(u64),
    Text(String),
    UserId(u32),
    GroupId(u32),
    UnixPermissions(u16),
    Dos(DosFlags),
    InArchive(ArchiveFormat),
    Checksum(u32),
}

/// Heterogeneous, structurally-equal mapping of per-entry metadata.
///
/// Backed by a `BTreeMap` rather than a `HashMap` so that equality is
/// independent of insertion order without needing every `AttributeValue`
/// variant to implement `Hash` (`SystemTime` does not).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    values: BTreeMap<Attribute, AttributeValue>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// `value = None` removes the attribute; absence and a "sentinel absent"
    /// retrieval are the same thing in this model.
    pub fn put(&mut self, attr: Attribute, value: Option<AttributeValue>) {
        match value {
            Some(v) => {
                self.values.insert(attr, v);
            }
            None => {
                self.values.remove(&attr);
            }
        }
    }

    pub fn get(&self, attr: Attribute) -> Option<&AttributeValue> {
        self.values.get(&attr)
    }

    pub fn has(&self, attr: Attribute) -> bool {
        self.values.contains_key(&attr)
    }

    pub fn get_or(&self, attr: Attribute, default: impl FnOnce() -> AttributeValue) -> AttributeValue {
        self.values.get(&attr).cloned().unwrap_or_else(default)
    }

    pub fn copy(&self) -> Self {
        self.clone()
    }

    pub fn for_each(&self, mut f: impl FnMut(Attribute, &AttributeValue)) {
        for (attr, value) in &self.values {
            f(*attr, value);
        }
    }

    pub fn file_type(&self) -> Option<FileType> {
        match self.get(Attribute::Type) {
            Some(AttributeValue::Type(t)) => Some(*t),
            _ => None,
        }
    }

    pub fn set_type(&mut self, file_type: FileType) {
        self.values.insert(Attribute::Type, AttributeValue::Type(file_type));
    }

    pub fn is_type(&self, candidates: &[FileType]) -> bool {
        self.file_type().map(|t| candidates.contains(&t)).unwrap_or(false)
    }

    pub fn size(&self) -> Option<u64> {
        match self.get(Attribute::Size) {
            Some(AttributeValue::Size(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn in_archive(&self) -> Option<ArchiveFormat> {
        match self.get(Attribute::InArchive) {
            Some(AttributeValue::InArchive(f)) => Some(*f),
            _ => None,
        }
    }

    pub fn unix_permissions(&self) -> Option<u16> {
        match self.get(Attribute::UnixPermissions) {
            Some(AttributeValue::UnixPermissions(p)) => Some(*p),
            _ => None,
        }
    }
}
