//! 7Z extractor (component E §4.5.3). Random-access, via the spill shim
//! when nested inside another container's stream.
//!
//! Built on `sevenz_rust2::decompress_file_with_extract_fn`. Its `dest_dir`
//! argument is only ever used internally to build an unused placeholder
//! path handed to the closure — the closure itself decides whether and
//! where to write — so the same function serves a read-only, no-disk-write
//! traversal just by never writing inside the closure, rather than walking
//! `Archive::open(..).files` and re-deriving block/stream offsets by hand.

use std::io::{Cursor, Read};

use sevenz_rust2::{decompress_file_with_extract_fn, Error as SevenZError};

use crate::attributes::{ArchiveFormat, Attribute, AttributeValue, Attributes, DosFlags};
use crate::errors::{WalkError, WalkErrorCode, WalkResult};
use crate::extractor::spill::{RandomAccessSource, SpilledFile};
use crate::extractor::{Extractor, ExtractContext, FilterRequest, InputSupplier, Recursor};
use crate::mode::{permissions_from_mode, type_from_mode, FileType};

pub struct SevenZExtractor;

impl Extractor for SevenZExtractor {
    fn extensions(&self) -> &[&str] {
        &["7z"]
    }

    fn modified_type(&self) -> FileType {
        FileType::Archive
    }

    fn extract(&self, mut ctx: ExtractContext<'_>, recursor: &mut dyn Recursor) -> WalkResult<()> {
        let source = match ctx.fs_path {
            Some(path) => RandomAccessSource::Existing(path.to_path_buf()),
            None => {
                let reader = ctx.input.open()?;
                RandomAccessSource::Spilled(SpilledFile::write_from(reader, ".7z")?)
            }
        };

        // Placeholder only: every closure invocation below reads into an
        // in-memory buffer and never touches this path.
        let placeholder_dest = std::env::temp_dir();

        // `decompress_file_with_extract_fn` itself owns the `?` propagation
        // of any archive-open failure; callback errors can't be separated
        // from the archive's own I/O errors, so both are classified the
        // same way through `report_error` followed by the skip signal.
        let recurse_result = std::cell::RefCell::new(Ok(()));
        let outcome = decompress_file_with_extract_fn(source.path(), &placeholder_dest, |entry, reader, _dest_path| {
            if entry.is_anti_item {
                let mut attrs = Attributes::new();
                attrs.put(Attribute::InArchive, Some(AttributeValue::InArchive(ArchiveFormat::SevenZ)));
                attrs.set_type(FileType::Whiteout);
                let entry_path = entry.name.trim_end_matches('/').to_string();
                let display_path = format!("{}/{}", ctx.display_path, entry_path);
                if let Err(e) = recursor.recurse(FilterRequest {
                    fs_path: None,
                    match_path: entry_path,
                    display_path,
                    input: None,
                    attributes: attrs,
                }) {
                    *recurse_result.borrow_mut() = Err(e);
                }
                return Ok(true);
            }

            let entry_path = entry.name.trim_end_matches('/').to_string();
            if entry_path.is_empty() {
                return Ok(true);
            }

            let mut attrs = Attributes::new();
            attrs.put(Attribute::InArchive, Some(AttributeValue::InArchive(ArchiveFormat::SevenZ)));
            attrs.put(Attribute::Size, Some(AttributeValue::Size(entry.size)));
            if entry.has_crc {
                attrs.put(Attribute::Checksum, Some(AttributeValue::Checksum(entry.crc as u32)));
            }
            if entry.has_creation_date {
                if let Some(t) = nt_time_to_system_time(entry.creation_date) {
                    attrs.put(Attribute::CreationTime, Some(AttributeValue::Time(t)));
                }
            }
            if entry.has_last_modified_date {
                if let Some(t) = nt_time_to_system_time(entry.last_modified_date) {
                    attrs.put(Attribute::LastModifiedTime, Some(AttributeValue::Time(t)));
                }
            }
            if entry.has_access_date {
                if let Some(t) = nt_time_to_system_time(entry.access_date) {
                    attrs.put(Attribute::LastAccessTime, Some(AttributeValue::Time(t)));
                }
            }

            let mut file_type = if entry.is_directory { FileType::Directory } else { FileType::RegularFile };
            if entry.has_windows_attributes {
                attrs.put(
                    Attribute::Dos,
                    Some(AttributeValue::Dos(dos_flags_from_windows_attributes(entry.windows_attributes))),
                );
                let unix_mode = entry.windows_attributes >> 16;
                if unix_mode != 0 {
                    file_type = resolve_type_with_unix_mode(entry.is_directory, file_type, unix_mode);
                    attrs.put(
                        Attribute::UnixPermissions,
                        Some(AttributeValue::UnixPermissions(permissions_from_mode(unix_mode))),
                    );
                }
            }
            attrs.set_type(file_type);

            let display_path = format!("{}/{}", ctx.display_path, entry_path);

            if file_type == FileType::Directory || !entry.has_stream {
                if let Err(e) = recursor.recurse(FilterRequest {
                    fs_path: None,
                    match_path: entry_path,
                    display_path,
                    input: None,
                    attributes: attrs,
                }) {
                    *recurse_result.borrow_mut() = Err(e);
                }
                return Ok(true);
            }

            let mut buf = Vec::with_capacity(entry.size as usize);
            if let Err(e) = reader.read_to_end(&mut buf) {
                return Err(SevenZError::Io(e, std::borrow::Cow::Owned(format!("failed to read 7z entry {entry_path}"))));
            }

            if let Err(e) = recursor.recurse(FilterRequest {
                fs_path: None,
                match_path: entry_path,
                display_path,
                input: Some(InputSupplier::ready(Cursor::new(buf))),
                attributes: attrs,
            }) {
                *recurse_result.borrow_mut() = Err(e);
            }
            Ok(true)
        });

        if let Err(e) = outcome {
            let message = format!("failed to extract 7z: {e}");
            return recursor.report_error(
                ctx.display_path,
                ctx.archive_attributes,
                &message,
                Some(WalkError::with_source(WalkErrorCode::ArchiveOpenFailed, message.clone(), e)),
            );
        }
        recurse_result.into_inner()
    }
}

/// The directory flag always wins over the packed UNIX-mode nybble: a mode
/// value that doesn't actually encode a directory bit must not reclassify an
/// entry the archive itself marked as a directory.
fn resolve_type_with_unix_mode(is_directory: bool, current: FileType, unix_mode: u32) -> FileType {
    if is_directory {
        return current;
    }
    match type_from_mode(unix_mode) {
        FileType::Unknown => current,
        resolved => resolved,
    }
}

fn dos_flags_from_windows_attributes(attrs: u32) -> DosFlags {
    const READ_ONLY: u32 = 0x1;
    const HIDDEN: u32 = 0x2;
    const SYSTEM: u32 = 0x4;
    const ARCHIVE: u32 = 0x20;
    DosFlags {
        read_only: attrs & READ_ONLY != 0,
        hidden: attrs & HIDDEN != 0,
        system: attrs & SYSTEM != 0,
        archive: attrs & ARCHIVE != 0,
    }
}

/// `NtTime` is a Windows FILETIME (100-ns intervals since 1601-01-01),
/// symmetric with the crate's own `NtTime: TryFrom<SystemTime>`.
fn nt_time_to_system_time(nt: sevenz_rust2::NtTime) -> Option<std::time::SystemTime> {
    std::time::SystemTime::try_from(nt).ok()
}
