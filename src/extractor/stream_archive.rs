//! Stream-archive extractor (component E §4.5.1): `a`/`ar`, `arj`, `cpio`,
//! `dump`, `tar`. All five share one entry point because they are read the
//! same way — sequentially, from one wrapping byte stream — even though
//! only `tar` (via the `tar` crate) and `ar`/`cpio` (hand-rolled, see below)
//! have a decoder available at all.

use std::io::Read;

use tar::Archive;

use crate::attributes::{ArchiveFormat, Attribute, AttributeValue, Attributes};
use crate::errors::{WalkError, WalkErrorCode, WalkResult};
use crate::extractor::{Extractor, ExtractContext, FilterRequest, InputSupplier, Recursor};
use crate::mode::{permissions_from_mode, type_from_mode, FileType};

pub struct StreamArchiveExtractor;

impl Extractor for StreamArchiveExtractor {
    fn extensions(&self) -> &[&str] {
        &["a", "ar", "arj", "cpio", "dump", "tar"]
    }

    fn modified_type(&self) -> FileType {
        FileType::Archive
    }

    fn extract(&self, mut ctx: ExtractContext<'_>, recursor: &mut dyn Recursor) -> WalkResult<()> {
        let extension = ctx.extension.to_ascii_lowercase();
        match extension.as_str() {
            "tar" => extract_tar(&mut ctx, recursor),
            "a" | "ar" => extract_ar(&mut ctx, recursor),
            "cpio" => extract_cpio(&mut ctx, recursor),
            "arj" | "dump" => {
                let message = format!("{extension} archives are not supported by this build");
                recursor.report_error(
                    ctx.display_path,
                    ctx.archive_attributes,
                    &message,
                    Some(WalkError::new(WalkErrorCode::UnsupportedFormat, message.clone())),
                )
            }
            _ => Ok(()),
        }
    }
}

fn extract_tar(ctx: &mut ExtractContext<'_>, recursor: &mut dyn Recursor) -> WalkResult<()> {
    let reader = ctx.input.open()?;
    let mut archive = Archive::new(reader);
    let entries = archive.entries().map_err(|e| {
        WalkError::with_source(WalkErrorCode::ArchiveOpenFailed, format!("failed to iterate tar: {e}"), e)
    })?;

    for entry_result in entries {
        let mut entry = match entry_result {
            Ok(entry) => entry,
            Err(e) => {
                let message = format!("failed to read tar entry: {e}");
                recursor.report_error(ctx.display_path, ctx.archive_attributes, &message, Some(
                    WalkError::with_source(WalkErrorCode::ArchiveOpenFailed, message.clone(), e),
                ))?;
                continue;
            }
        };

        let header = entry.header().clone();
        let raw_path = match entry.path() {
            Ok(path) => path.into_owned(),
            Err(e) => {
                recursor.report_error(
                    ctx.display_path,
                    ctx.archive_attributes,
                    "invalid tar entry path",
                    Some(walk_error(e)),
                )?;
                continue;
            }
        };
        let entry_path = raw_path.to_string_lossy().trim_end_matches('/').to_string();
        if entry_path.is_empty() {
            continue;
        }

        let mut attrs = Attributes::new();
        attrs.put(Attribute::InArchive, Some(AttributeValue::InArchive(ArchiveFormat::Tar)));
        if let Ok(mtime) = header.mtime() {
            attrs.put(Attribute::LastModifiedTime, Some(AttributeValue::Time(unix_time(mtime))));
        }
        if let Ok(uid) = header.uid() {
            attrs.put(Attribute::UserId, Some(AttributeValue::UserId(uid as u32)));
        }
        if let Ok(gid) = header.gid() {
            attrs.put(Attribute::GroupId, Some(AttributeValue::GroupId(gid as u32)));
        }
        if let Ok(Some(name)) = header.username() {
            attrs.put(Attribute::UserName, Some(AttributeValue::Text(name.to_string())));
        }
        if let Ok(Some(name)) = header.groupname() {
            attrs.put(Attribute::GroupName, Some(AttributeValue::Text(name.to_string())));
        }
        if let Ok(mode) = header.mode() {
            attrs.put(Attribute::UnixPermissions, Some(AttributeValue::UnixPermissions(permissions_from_mode(mode))));
        }

        let entry_type = header.entry_type();
        let (file_type, unreadable) = if entry_type.is_dir() {
            (FileType::Directory, false)
        } else if entry_type.is_symlink() {
            (FileType::SymbolicLink, false)
        } else if entry_type.is_hard_link() {
            (FileType::HardLink, true)
        } else if entry_type.is_character_special() {
            (FileType::CharacterDevice, false)
        } else if entry_type.is_block_special() {
            (FileType::BlockDevice, false)
        } else if entry_type.is_fifo() {
            (FileType::Fifo, false)
        } else {
            (FileType::RegularFile, false)
        };
        attrs.set_type(file_type);
        if !unreadable {
            attrs.put(Attribute::Size, Some(AttributeValue::Size(entry.size())));
        }

        let display_path = format!("{}/{}", ctx.display_path, entry_path);
        let input = if unreadable {
            InputSupplier::failing(format!("{entry_path}: hard-link target unavailable in stream order"))
        } else {
            InputSupplier::ready(entry)
        };

        recursor.recurse(FilterRequest {
            fs_path: None,
            match_path: entry_path,
            display_path,
            input: Some(input),
            attributes: attrs,
        })?;
    }
    Ok(())
}

fn walk_error(e: impl std::error::Error + Send + Sync + 'static) -> WalkError {
    WalkError::with_source(WalkErrorCode::ArchiveOpenFailed, e.to_string(), e)
}

fn unix_time(secs: u64) -> std::time::SystemTime {
    std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs)
}

// --- AR (`!<arch>\n` global header + fixed 60-byte entry headers) --------

const AR_GLOBAL_MAGIC: &[u8; 8] = b"!<arch>\n";
const AR_ENTRY_HEADER_LEN: usize = 60;

fn extract_ar(ctx: &mut ExtractContext<'_>, recursor: &mut dyn Recursor) -> WalkResult<()> {
    let mut reader = ctx.input.open()?;
    let mut magic = [0u8; 8];
    if reader.read_exact(&mut magic).is_err() || &magic != AR_GLOBAL_MAGIC {
        let message = "not a valid ar archive (missing global header)";
        return recursor.report_error(
            ctx.display_path,
            ctx.archive_attributes,
            message,
            Some(WalkError::new(WalkErrorCode::ArchiveOpenFailed, message)),
        );
    }

    loop {
        let mut header = [0u8; AR_ENTRY_HEADER_LEN];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                return recursor.report_error(
                    ctx.display_path,
                    ctx.archive_attributes,
                    "truncated ar entry header",
                    Some(walk_error(e)),
                )
            }
        }

        let name = ascii_field(&header[0..16]).trim_end_matches('/').to_string();
        let mtime: u64 = ascii_field(&header[16..28]).parse().unwrap_or(0);
        let uid: u32 = ascii_field(&header[28..34]).parse().unwrap_or(0);
        let gid: u32 = ascii_field(&header[34..40]).parse().unwrap_or(0);
        let mode = u32::from_str_radix(ascii_field(&header[40..48]).trim(), 8).unwrap_or(0);
        let size: usize = match ascii_field(&header[48..58]).parse() {
            Ok(size) => size,
            Err(_) => {
                return recursor.report_error(
                    ctx.display_path,
                    ctx.archive_attributes,
                    "malformed ar entry size field",
                    None,
                )
            }
        };

        let mut data = vec![0u8; size];
        if let Err(e) = reader.read_exact(&mut data) {
            return recursor.report_error(
                ctx.display_path,
                ctx.archive_attributes,
                "truncated ar entry body",
                Some(walk_error(e)),
            );
        }
        if size % 2 == 1 {
            let mut pad = [0u8; 1];
            let _ = reader.read_exact(&mut pad);
        }

        if name.is_empty() || name == "/" || name == "//" {
            // Linker symbol table / extended-name table entries; not a real file.
            continue;
        }

        let mut attrs = Attributes::new();
        attrs.put(Attribute::InArchive, Some(AttributeValue::InArchive(ArchiveFormat::Ar)));
        attrs.put(Attribute::LastModifiedTime, Some(AttributeValue::Time(unix_time(mtime))));
        attrs.put(Attribute::UserId, Some(AttributeValue::UserId(uid)));
        attrs.put(Attribute::GroupId, Some(AttributeValue::GroupId(gid)));
        attrs.put(Attribute::UnixPermissions, Some(AttributeValue::UnixPermissions(permissions_from_mode(mode))));
        let file_type = match type_from_mode(mode) {
            FileType::Unknown => FileType::RegularFile,
            other => other,
        };
        attrs.set_type(file_type);
        attrs.put(Attribute::Size, Some(AttributeValue::Size(size as u64)));

        let display_path = format!("{}/{}", ctx.display_path, name);
        recursor.recurse(FilterRequest {
            fs_path: None,
            match_path: name.clone(),
            display_path,
            input: Some(InputSupplier::ready(std::io::Cursor::new(data))),
            attributes: attrs,
        })?;
    }
    Ok(())
}

fn ascii_field(bytes: &[u8]) -> &str {
    std::str::from_utf8(bytes).unwrap_or_default().trim()
}

// --- CPIO "newc" (ASCII, 110-byte fixed header) ---------------------------

const CPIO_NEWC_MAGIC: &[u8; 6] = b"070701";
const CPIO_NEWC_HEADER_LEN: usize = 110;
const CPIO_TRAILER_NAME: &str = "TRAILER!!!";

fn extract_cpio(ctx: &mut ExtractContext<'_>, recursor: &mut dyn Recursor) -> WalkResult<()> {
    let mut reader = ctx.input.open()?;

    loop {
        let mut header = [0u8; CPIO_NEWC_HEADER_LEN];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                return recursor.report_error(
                    ctx.display_path,
                    ctx.archive_attributes,
                    "truncated cpio entry header",
                    Some(walk_error(e)),
                )
            }
        }

        if &header[0..6] != CPIO_NEWC_MAGIC {
            let message = "unsupported cpio variant (only the \"newc\" ASCII format is read)";
            return recursor.report_error(
                ctx.display_path,
                ctx.archive_attributes,
                message,
                Some(WalkError::new(WalkErrorCode::UnsupportedFormat, message)),
            );
        }

        let field = |range: std::ops::Range<usize>| -> u32 {
            u32::from_str_radix(std::str::from_utf8(&header[range]).unwrap_or("0"), 16).unwrap_or(0)
        };
        let mode = field(14..22);
        let uid = field(22..30);
        let gid = field(30..38);
        let mtime = field(46..54) as u64;
        let filesize = field(54..62) as usize;
        let namesize = field(94..102) as usize;

        let mut name_bytes = vec![0u8; namesize];
        if let Err(e) = reader.read_exact(&mut name_bytes) {
            return recursor.report_error(
                ctx.display_path,
                ctx.archive_attributes,
                "truncated cpio entry name",
                Some(walk_error(e)),
            );
        }
        skip_padding(&mut reader, CPIO_NEWC_HEADER_LEN + namesize)?;

        let name = String::from_utf8_lossy(&name_bytes).trim_end_matches('\0').to_string();

        let mut data = vec![0u8; filesize];
        if let Err(e) = reader.read_exact(&mut data) {
            return recursor.report_error(
                ctx.display_path,
                ctx.archive_attributes,
                "truncated cpio entry body",
                Some(walk_error(e)),
            );
        }
        skip_padding(&mut reader, filesize)?;

        if name == CPIO_TRAILER_NAME {
            break;
        }

        let mut attrs = Attributes::new();
        attrs.put(Attribute::InArchive, Some(AttributeValue::InArchive(ArchiveFormat::Cpio)));
        attrs.put(Attribute::LastModifiedTime, Some(AttributeValue::Time(unix_time(mtime))));
        attrs.put(Attribute::UserId, Some(AttributeValue::UserId(uid)));
        attrs.put(Attribute::GroupId, Some(AttributeValue::GroupId(gid)));
        attrs.put(Attribute::UnixPermissions, Some(AttributeValue::UnixPermissions(permissions_from_mode(mode))));
        attrs.set_type(type_from_mode(mode));
        attrs.put(Attribute::Size, Some(AttributeValue::Size(filesize as u64)));

        let display_path = format!("{}/{}", ctx.display_path, name);
        recursor.recurse(FilterRequest {
            fs_path: None,
            match_path: name.clone(),
            display_path,
            input: Some(InputSupplier::ready(std::io::Cursor::new(data))),
            attributes: attrs,
        })?;
    }
    Ok(())
}

/// cpio "newc" pads header+name and each file body up to a 4-byte boundary.
fn skip_padding(reader: &mut Box<dyn Read + '_>, len_so_far: usize) -> WalkResult<()> {
    let pad = (4 - (len_so_far % 4)) % 4;
    if pad == 0 {
        return Ok(());
    }
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf[..pad]).map_err(|e| walk_error(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::WalkResult as Res;

    struct RecordingRecursor {
        display_paths: Vec<String>,
    }

    impl Recursor for RecordingRecursor {
        fn recurse(&mut self, request: FilterRequest<'_>) -> Res<()> {
            self.display_paths.push(request.display_path);
            Ok(())
        }

        fn report_error(
            &mut self,
            _display_path: &str,
            _attributes: &Attributes,
            _message: &str,
            _cause: Option<WalkError>,
        ) -> Res<()> {
            Ok(())
        }
    }

    fn build_ar_fixture() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(AR_GLOBAL_MAGIC);
        let body = b"hello";
        let header = format!(
            "{:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n",
            "hello.txt", 0, 0, 0, "100644", body.len()
        );
        assert_eq!(header.len(), AR_ENTRY_HEADER_LEN);
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn ar_extractor_yields_one_entry() {
        let data = build_ar_fixture();
        let extractor = StreamArchiveExtractor;
        let mut recursor = RecordingRecursor { display_paths: Vec::new() };
        let archive_attrs = Attributes::new();
        let ctx = ExtractContext {
            extension: "ar",
            fs_path: None,
            display_path: "lib.a",
            input: InputSupplier::ready(std::io::Cursor::new(data)),
            archive_attributes: &archive_attrs,
        };
        extractor.extract(ctx, &mut recursor).unwrap();
        assert_eq!(recursor.display_paths, vec!["lib.a/hello.txt".to_string()]);
    }

    fn build_cpio_newc_fixture(name: &str, body: &[u8]) -> Vec<u8> {
        fn header_for(name: &str, filesize: usize, mode: u32) -> String {
            let namesize = name.len() + 1;
            format!(
                "070701{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}",
                0, mode, 0, 0, 1, 0, filesize, 0, 0, 0, 0, namesize, 0
            )
        }
        fn push_entry(buf: &mut Vec<u8>, name: &str, body: &[u8], mode: u32) {
            let header = header_for(name, body.len(), mode);
            buf.extend_from_slice(header.as_bytes());
            buf.extend_from_slice(name.as_bytes());
            buf.push(0);
            let header_and_name = CPIO_NEWC_HEADER_LEN + name.len() + 1;
            let pad = (4 - (header_and_name % 4)) % 4;
            buf.extend(std::iter::repeat(0u8).take(pad));
            buf.extend_from_slice(body);
            let body_pad = (4 - (body.len() % 4)) % 4;
            buf.extend(std::iter::repeat(0u8).take(body_pad));
        }
        let mut buf = Vec::new();
        push_entry(&mut buf, name, body, 0o100644);
        push_entry(&mut buf, CPIO_TRAILER_NAME, &[], 0);
        buf
    }

    #[test]
    fn cpio_newc_extractor_yields_one_entry_and_stops_at_trailer() {
        let data = build_cpio_newc_fixture("payload.bin", b"abc");
        let extractor = StreamArchiveExtractor;
        let mut recursor = RecordingRecursor { display_paths: Vec::new() };
        let archive_attrs = Attributes::new();
        let ctx = ExtractContext {
            extension: "cpio",
            fs_path: None,
            display_path: "archive.cpio",
            input: InputSupplier::ready(std::io::Cursor::new(data)),
            archive_attributes: &archive_attrs,
        };
        extractor.extract(ctx, &mut recursor).unwrap();
        assert_eq!(recursor.display_paths, vec!["archive.cpio/payload.bin".to_string()]);
    }

    #[test]
    fn arj_is_registered_but_reports_unsupported() {
        let extractor = StreamArchiveExtractor;
        let mut reported = Vec::new();
        struct Recording<'a>(&'a mut Vec<String>);
        impl Recursor for Recording<'_> {
            fn recurse(&mut self, _request: FilterRequest<'_>) -> Res<()> {
                Ok(())
            }
            fn report_error(
                &mut self,
                display_path: &str,
                _attributes: &Attributes,
                message: &str,
                _cause: Option<WalkError>,
            ) -> Res<()> {
                self.0.push(format!("{display_path}: {message}"));
                Ok(())
            }
        }
        let mut recursor = Recording(&mut reported);
        let archive_attrs = Attributes::new();
        let ctx = ExtractContext {
            extension: "arj",
            fs_path: None,
            display_path: "data.arj",
            input: InputSupplier::ready(std::io::Cursor::new(Vec::<u8>::new())),
            archive_attributes: &archive_attrs,
        };
        extractor.extract(ctx, &mut recursor).unwrap();
        assert_eq!(reported.len(), 1);
        assert!(reported[0].starts_with("data.arj:"));
    }
}
