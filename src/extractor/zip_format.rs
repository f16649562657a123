//! ZIP extractor (component E §4.5.2). Random-access, via the spill shim
//! when the container arrived as a nested stream.
//!
//! Iterates entries with `zip::ZipArchive::by_index`, reading `enclosed_name`,
//! `unix_mode`, and `is_dir` to classify each one.

use std::fs::File;
use std::io::Cursor;

use chrono::{NaiveDate, TimeZone, Utc};
use zip::ZipArchive;

use crate::attributes::{ArchiveFormat, Attribute, AttributeValue, Attributes};
use crate::errors::{WalkError, WalkErrorCode, WalkResult};
use crate::extractor::spill::{RandomAccessSource, SpilledFile};
use crate::extractor::{Extractor, ExtractContext, FilterRequest, InputSupplier, Recursor};
use crate::mode::{permissions_from_mode, type_from_mode, FileType};

pub struct ZipExtractor;

impl Extractor for ZipExtractor {
    fn extensions(&self) -> &[&str] {
        &["zip"]
    }

    fn modified_type(&self) -> FileType {
        FileType::Archive
    }

    fn extract(&self, mut ctx: ExtractContext<'_>, recursor: &mut dyn Recursor) -> WalkResult<()> {
        let source = match ctx.fs_path {
            Some(path) => RandomAccessSource::Existing(path.to_path_buf()),
            None => {
                let reader = ctx.input.open()?;
                RandomAccessSource::Spilled(SpilledFile::write_from(reader, ".zip")?)
            }
        };
        let file = File::open(source.path())
            .map_err(|e| WalkError::with_source(WalkErrorCode::ArchiveOpenFailed, format!("open zip: {e}"), e))?;
        let mut archive = ZipArchive::new(file)
            .map_err(|e| WalkError::with_source(WalkErrorCode::ArchiveOpenFailed, format!("read zip central directory: {e}"), e))?;

        for i in 0..archive.len() {
            let mut entry = match archive.by_index(i) {
                Ok(entry) => entry,
                Err(e) => {
                    let message = format!("failed to read zip entry {i}: {e}");
                    recursor.report_error(
                        ctx.display_path,
                        ctx.archive_attributes,
                        &message,
                        Some(WalkError::with_source(WalkErrorCode::ArchiveOpenFailed, message.clone(), e)),
                    )?;
                    continue;
                }
            };

            let raw_name = entry.name().to_string();
            let entry_path = raw_name.trim_end_matches('/').to_string();
            if entry_path.is_empty() {
                continue;
            }

            let mut attrs = Attributes::new();
            attrs.put(Attribute::InArchive, Some(AttributeValue::InArchive(ArchiveFormat::Zip)));
            attrs.put(Attribute::Size, Some(AttributeValue::Size(entry.size())));
            if !entry.comment().is_empty() {
                attrs.put(Attribute::Comment, Some(AttributeValue::Text(entry.comment().to_string())));
            }
            if let Some(t) = zip_datetime_to_system_time(entry.last_modified()) {
                attrs.put(Attribute::LastModifiedTime, Some(AttributeValue::Time(t)));
            }

            let is_dir = entry.is_dir() || raw_name.ends_with('/');
            let file_type = if let Some(mode) = entry.unix_mode() {
                attrs.put(Attribute::UnixPermissions, Some(AttributeValue::UnixPermissions(permissions_from_mode(mode))));
                match type_from_mode(mode) {
                    FileType::Unknown if is_dir => FileType::Directory,
                    FileType::Unknown => FileType::RegularFile,
                    resolved => resolved,
                }
            } else if is_dir {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            attrs.set_type(file_type);

            let display_path = format!("{}/{}", ctx.display_path, entry_path);
            if file_type == FileType::Directory {
                recursor.recurse(FilterRequest {
                    fs_path: None,
                    match_path: entry_path,
                    display_path,
                    input: None,
                    attributes: attrs,
                })?;
                continue;
            }

            let mut buf = Vec::with_capacity(entry.size() as usize);
            use std::io::Read;
            if let Err(e) = entry.read_to_end(&mut buf) {
                let message = format!("failed to read zip entry {entry_path}: {e}");
                recursor.report_error(&display_path, &attrs, &message, Some(walk_io(e)))?;
                continue;
            }

            recursor.recurse(FilterRequest {
                fs_path: None,
                match_path: entry_path,
                display_path,
                input: Some(InputSupplier::ready(Cursor::new(buf))),
                attributes: attrs,
            })?;
        }
        Ok(())
    }
}

fn walk_io(e: std::io::Error) -> WalkError {
    WalkError::with_source(WalkErrorCode::Io, e.to_string(), e)
}

/// The `zip` crate's `DateTime` exposes only MS-DOS-resolution getters
/// without the `time` feature (not enabled, to keep the dependency surface
/// minimal); converted by hand via `chrono`, treating the timestamp as
/// local-to-UTC since ZIP carries no timezone information.
fn zip_datetime_to_system_time(dt: zip::DateTime) -> Option<std::time::SystemTime> {
    let date = NaiveDate::from_ymd_opt(dt.year() as i32, dt.month() as u32, dt.day() as u32)?;
    let time = date.and_hms_opt(dt.hour() as u32, dt.minute() as u32, dt.second() as u32)?;
    let utc = Utc.from_utc_datetime(&time);
    Some(std::time::SystemTime::from(utc))
}
