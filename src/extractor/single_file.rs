//! Single-file decompressor (component E §4.5.5): `gz`, `bz2`, `xz`/`lzma`,
//! and `zst` are exposed by crates already in the dependency stack
//! (`flate2`, `bzip2`, `xz2`, `zstd`); every other extension this module
//! claims (`br`, `lz4`, `snappy`/`snz`/`sz`, classic `.Z`, `lz`, `lzo`) has no
//! standalone-decoder crate available and is reported as an unsupported
//! format rather than faked.
//!
//! None of the four supported codecs need random access, so unlike ZIP/7Z/
//! RAR this extractor never spills to disk — it streams straight from the
//! supplied reader, same as `tar::Archive` does for the stream-archive
//! extractor.

use std::io::Read;

use crate::attributes::{ArchiveFormat, Attribute, AttributeValue, Attributes};
use crate::errors::{WalkError, WalkErrorCode, WalkResult};
use crate::extractor::{Extractor, ExtractContext, FilterRequest, InputSupplier, Recursor};
use crate::mode::FileType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl Codec {
    fn archive_format(self) -> ArchiveFormat {
        match self {
            Self::Gzip => ArchiveFormat::Gzip,
            Self::Bzip2 => ArchiveFormat::Bzip2,
            Self::Xz => ArchiveFormat::Xz,
            Self::Zstd => ArchiveFormat::Zstd,
        }
    }
}

enum Plan {
    Fixed(Codec),
    /// Extension alone doesn't determine framing; sniff the stream's magic
    /// bytes and fall back to unsupported if nothing recognisable matches.
    Autodetect,
    Unsupported,
}

fn plan_for_extension(extension: &str) -> Plan {
    match extension.to_ascii_lowercase().as_str() {
        "gz" | "tgz" => Plan::Fixed(Codec::Gzip),
        "bz2" | "tbz2" | "tbz" => Plan::Fixed(Codec::Bzip2),
        "xz" | "txz" | "lzma" | "tlz" => Plan::Fixed(Codec::Xz),
        "zst" | "tzst" => Plan::Fixed(Codec::Zstd),
        "lz4" | "snappy" | "snz" | "sz" | "lz" | "lzo" => Plan::Autodetect,
        _ => Plan::Unsupported,
    }
}

/// `tar`-combined aliases: the decompressed payload is itself a tarball, so
/// the derived inner name must end in `.tar` to re-enter the extractor
/// dispatch chain rather than being treated as a leaf.
fn is_combined_tar_alias(extension: &str) -> bool {
    matches!(
        extension.to_ascii_lowercase().as_str(),
        "tgz" | "tbz2" | "tbz" | "txz" | "tlz" | "tzst"
    )
}

fn sniff_codec(bytes: &[u8]) -> Option<Codec> {
    if bytes.starts_with(&[0x1F, 0x8B]) {
        Some(Codec::Gzip)
    } else if bytes.starts_with(b"BZh") {
        Some(Codec::Bzip2)
    } else if bytes.starts_with(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]) {
        Some(Codec::Xz)
    } else if bytes.starts_with(&[0x28, 0xB5, 0x2F, 0xFD]) {
        Some(Codec::Zstd)
    } else {
        None
    }
}

/// Derives the name of the entry found inside the compressed stream from the
/// compressed file's own name: strips the last extension component, and
/// re-appends `.tar` for the combined aliases so the payload re-enters the
/// extractor chain as a tarball instead of a leaf.
fn derived_inner_name(display_name: &str, extension: &str) -> String {
    let stripped = display_name.strip_suffix(&format!(".{extension}")).unwrap_or(display_name);
    if is_combined_tar_alias(extension) {
        format!("{stripped}.tar")
    } else {
        stripped.to_string()
    }
}

fn gzip_host_fs_name(os_code: u8) -> &'static str {
    match os_code {
        0 => "fat",
        1 => "amiga",
        2 => "vms",
        3 => "unix",
        4 => "vm_cms",
        5 => "atari_tos",
        6 => "hpfs",
        7 => "macintosh",
        8 => "z_system",
        9 => "cp_m",
        10 => "tops_20",
        11 => "ntfs",
        12 => "qdos",
        13 => "acorn_riscos",
        _ => "unknown",
    }
}

pub struct SingleFileExtractor;

impl Extractor for SingleFileExtractor {
    fn extensions(&self) -> &[&str] {
        &[
            "gz", "tgz", "bz2", "tbz2", "tbz", "xz", "txz", "lzma", "tlz", "zst", "tzst", "br",
            "lz4", "snappy", "snz", "sz", "z", "lz", "lzo",
        ]
    }

    fn modified_type(&self) -> FileType {
        FileType::CompressedFile
    }

    fn extract(&self, mut ctx: ExtractContext<'_>, recursor: &mut dyn Recursor) -> WalkResult<()> {
        let codec = match plan_for_extension(ctx.extension) {
            Plan::Fixed(codec) => codec,
            Plan::Unsupported => {
                let message = format!("no decoder available for .{}", ctx.extension);
                return recursor.report_error(
                    ctx.display_path,
                    ctx.archive_attributes,
                    &message,
                    Some(WalkError::new(WalkErrorCode::UnsupportedFormat, message.clone())),
                );
            }
            Plan::Autodetect => {
                let mut reader = ctx.input.open()?;
                let mut prefix = [0u8; 6];
                let read = reader.read(&mut prefix).map_err(|e| WalkError::with_source(WalkErrorCode::Io, e.to_string(), e))?;
                match sniff_codec(&prefix[..read]) {
                    Some(codec) => {
                        let rest = prefix[..read].to_vec();
                        ctx.input = InputSupplier::ready(std::io::Cursor::new(rest).chain(reader));
                        codec
                    }
                    None => {
                        let message = format!("could not determine a supported codec for .{}", ctx.extension);
                        return recursor.report_error(
                            ctx.display_path,
                            ctx.archive_attributes,
                            &message,
                            Some(WalkError::new(WalkErrorCode::UnsupportedFormat, message.clone())),
                        );
                    }
                }
            }
        };

        let mut reader = ctx.input.open()?;
        let mut buf = Vec::new();
        let mut gzip_header_meta = None;

        match codec {
            Codec::Gzip => {
                let mut decoder = flate2::read::GzDecoder::new(reader);
                decoder
                    .read_to_end(&mut buf)
                    .map_err(|e| WalkError::with_source(WalkErrorCode::ArchiveOpenFailed, format!("inflate gzip: {e}"), e))?;
                gzip_header_meta = Some(GzipHeaderMeta::from(decoder.header()));
            }
            Codec::Bzip2 => {
                bzip2::read::BzDecoder::new(&mut reader)
                    .read_to_end(&mut buf)
                    .map_err(|e| WalkError::with_source(WalkErrorCode::ArchiveOpenFailed, format!("decompress bzip2: {e}"), e))?;
            }
            Codec::Xz => {
                xz2::read::XzDecoder::new(&mut reader)
                    .read_to_end(&mut buf)
                    .map_err(|e| WalkError::with_source(WalkErrorCode::ArchiveOpenFailed, format!("decompress xz: {e}"), e))?;
            }
            Codec::Zstd => {
                let mut decoder = zstd::stream::read::Decoder::new(reader)
                    .map_err(|e| WalkError::with_source(WalkErrorCode::ArchiveOpenFailed, format!("open zstd frame: {e}"), e))?;
                decoder
                    .read_to_end(&mut buf)
                    .map_err(|e| WalkError::with_source(WalkErrorCode::ArchiveOpenFailed, format!("decompress zstd: {e}"), e))?;
            }
        }

        let mut attrs = Attributes::new();
        attrs.put(Attribute::InArchive, Some(AttributeValue::InArchive(codec.archive_format())));
        attrs.put(Attribute::Size, Some(AttributeValue::Size(buf.len() as u64)));
        attrs.set_type(FileType::RegularFile);

        let mut inner_name = derived_inner_name(ctx.display_path.rsplit('/').next().unwrap_or(ctx.display_path), ctx.extension);

        if let Some(meta) = gzip_header_meta {
            if let Some(name) = meta.filename {
                inner_name = name;
            }
            if let Some(comment) = meta.comment {
                attrs.put(Attribute::Comment, Some(AttributeValue::Text(comment)));
            }
            attrs.put(Attribute::GzipHostFs, Some(AttributeValue::Text(gzip_host_fs_name(meta.os_code).to_string())));
            if let Some(mtime) = meta.mtime {
                attrs.put(Attribute::LastModifiedTime, Some(AttributeValue::Time(mtime)));
            }
        }

        let display_path = format!("{}/{}", ctx.display_path, inner_name);
        recursor.recurse(FilterRequest {
            fs_path: None,
            match_path: inner_name,
            display_path,
            input: Some(InputSupplier::ready(std::io::Cursor::new(buf))),
            attributes: attrs,
        })
    }
}

struct GzipHeaderMeta {
    filename: Option<String>,
    comment: Option<String>,
    os_code: u8,
    mtime: Option<std::time::SystemTime>,
}

impl GzipHeaderMeta {
    fn from(header: Option<&flate2::GzHeader>) -> Self {
        match header {
            Some(header) => Self {
                filename: header.filename().map(|b| String::from_utf8_lossy(b).into_owned()),
                comment: header.comment().map(|b| String::from_utf8_lossy(b).into_owned()),
                os_code: header.operating_system(),
                mtime: match header.mtime() {
                    0 => None,
                    secs => Some(std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs as u64)),
                },
            },
            None => Self { filename: None, comment: None, os_code: 255, mtime: None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Write;

    struct RecordedEntry {
        match_path: String,
        display_path: String,
    }

    struct RecordingRecursor {
        entries: RefCell<Vec<RecordedEntry>>,
        errors: RefCell<Vec<String>>,
    }

    impl RecordingRecursor {
        fn new() -> Self {
            Self { entries: RefCell::new(Vec::new()), errors: RefCell::new(Vec::new()) }
        }
    }

    impl Recursor for RecordingRecursor {
        fn recurse(&mut self, request: FilterRequest<'_>) -> WalkResult<()> {
            self.entries.borrow_mut().push(RecordedEntry {
                match_path: request.match_path,
                display_path: request.display_path,
            });
            Ok(())
        }

        fn report_error(&mut self, _display_path: &str, _attrs: &Attributes, message: &str, _cause: Option<WalkError>) -> WalkResult<()> {
            self.errors.borrow_mut().push(message.to_string());
            Ok(())
        }
    }

    fn gzip_bytes(payload: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(payload).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn gz_extractor_yields_decompressed_payload_named_by_stripping_extension() {
        let bytes = gzip_bytes(b"hello from inside a gzip stream");
        let extractor = SingleFileExtractor;
        let attrs = Attributes::new();
        let ctx = ExtractContext {
            extension: "gz",
            fs_path: None,
            display_path: "notes.txt.gz",
            input: InputSupplier::ready(std::io::Cursor::new(bytes)),
            archive_attributes: &attrs,
        };
        let mut recursor = RecordingRecursor::new();
        extractor.extract(ctx, &mut recursor).unwrap();
        let entries = recursor.entries.borrow();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].match_path, "notes.txt");
        assert_eq!(entries[0].display_path, "notes.txt.gz/notes.txt");
    }

    #[test]
    fn combined_tar_alias_reappends_tar_suffix() {
        assert_eq!(derived_inner_name("bundle.tgz", "tgz"), "bundle.tar");
        assert_eq!(derived_inner_name("notes.txt.gz", "gz"), "notes.txt");
    }

    #[test]
    fn unsupported_codec_reports_error_and_does_not_recurse() {
        let extractor = SingleFileExtractor;
        let attrs = Attributes::new();
        let ctx = ExtractContext {
            extension: "lzo",
            fs_path: None,
            display_path: "data.lzo",
            input: InputSupplier::ready(std::io::Cursor::new(b"not a real lzo stream".to_vec())),
            archive_attributes: &attrs,
        };
        let mut recursor = RecordingRecursor::new();
        extractor.extract(ctx, &mut recursor).unwrap();
        assert!(recursor.entries.borrow().is_empty());
        assert_eq!(recursor.errors.borrow().len(), 1);
    }

    #[test]
    fn autodetect_sniffs_gzip_magic_for_ambiguous_extension() {
        let bytes = gzip_bytes(b"payload behind an ambiguous extension");
        let extractor = SingleFileExtractor;
        let attrs = Attributes::new();
        let ctx = ExtractContext {
            extension: "lz4",
            fs_path: None,
            display_path: "data.lz4",
            input: InputSupplier::ready(std::io::Cursor::new(bytes)),
            archive_attributes: &attrs,
        };
        let mut recursor = RecordingRecursor::new();
        extractor.extract(ctx, &mut recursor).unwrap();
        assert_eq!(recursor.entries.borrow().len(), 1);
        assert!(recursor.errors.borrow().is_empty());
    }
}
