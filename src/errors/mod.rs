//! Typed error hierarchy for the traversal library: a small `ErrorCode`
//! trait, a classification layer that turns a raw `std::io::Error` (or an
//! external tool's stderr text) into the closest typed code, and a single
//! concrete error struct implementing `std::error::Error`. `WalkError` is
//! the outermost error type callers see — no IPC/API boundary to cross.

use std::fmt;
use std::io;

pub trait ErrorCode {
    #[allow(clippy::wrong_self_convention)]
    fn as_code_str(self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkErrorCode {
    /// Mutually-exclusive configuration options set together; always fatal.
    Configuration,
    NotFound,
    PermissionDenied,
    ReadOnlyFilesystem,
    Io,
    UnsupportedFormat,
    ArchiveOpenFailed,
    ExternalToolTimeout,
    ExternalToolFailed,
    ExternalToolMissing,
    DuplicateChild,
    Unknown,
}

impl ErrorCode for WalkErrorCode {
    fn as_code_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::ReadOnlyFilesystem => "read_only_filesystem",
            Self::Io => "io",
            Self::UnsupportedFormat => "unsupported_format",
            Self::ArchiveOpenFailed => "archive_open_failed",
            Self::ExternalToolTimeout => "external_tool_timeout",
            Self::ExternalToolFailed => "external_tool_failed",
            Self::ExternalToolMissing => "external_tool_missing",
            Self::DuplicateChild => "duplicate_child",
            Self::Unknown => "unknown",
        }
    }
}

pub trait DomainError: std::error::Error {
    fn code_str(&self) -> &'static str;
    fn message(&self) -> &str;
}

#[derive(Debug)]
pub struct WalkError {
    code: WalkErrorCode,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl WalkError {
    pub fn new(code: WalkErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), source: None }
    }

    pub fn with_source(
        code: WalkErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self { code, message: message.into(), source: Some(Box::new(source)) }
    }

    pub fn code(&self) -> WalkErrorCode {
        self.code
    }
}

impl DomainError for WalkError {
    fn code_str(&self) -> &'static str {
        self.code.as_code_str()
    }

    fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WalkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type WalkResult<T> = Result<T, WalkError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorHint {
    NotFound,
    PermissionDenied,
    ReadOnlyFilesystem,
    Other,
}

pub fn classify_io_error(error: &io::Error) -> IoErrorHint {
    let from_kind = match error.kind() {
        io::ErrorKind::NotFound => IoErrorHint::NotFound,
        io::ErrorKind::PermissionDenied => IoErrorHint::PermissionDenied,
        _ => IoErrorHint::Other,
    };
    if from_kind != IoErrorHint::Other {
        return from_kind;
    }
    error.raw_os_error().map(classify_raw_os_error).unwrap_or(IoErrorHint::Other)
}

pub fn classify_raw_os_error(raw: i32) -> IoErrorHint {
    #[cfg(windows)]
    {
        return match raw {
            5 => IoErrorHint::PermissionDenied,
            2 | 3 => IoErrorHint::NotFound,
            19 => IoErrorHint::ReadOnlyFilesystem,
            _ => IoErrorHint::Other,
        };
    }

    #[cfg(unix)]
    {
        return match raw {
            1 | 13 => IoErrorHint::PermissionDenied,
            2 => IoErrorHint::NotFound,
            30 => IoErrorHint::ReadOnlyFilesystem,
            _ => IoErrorHint::Other,
        };
    }

    #[allow(unreachable_code)]
    IoErrorHint::Other
}

pub fn classify_message_by_patterns<C: Copy>(message: &str, rules: &[(C, &[&str])], fallback: C) -> C {
    let normalized = message.to_ascii_lowercase();
    for &(code, patterns) in rules {
        if patterns.iter().any(|pattern| normalized.contains(pattern)) {
            return code;
        }
    }
    fallback
}

/// Classifies a raw I/O error by kind/errno and wraps it as a `WalkError`.
pub fn walk_error_from_io(action: &str, error: io::Error) -> WalkError {
    let code = match classify_io_error(&error) {
        IoErrorHint::NotFound => WalkErrorCode::NotFound,
        IoErrorHint::PermissionDenied => WalkErrorCode::PermissionDenied,
        IoErrorHint::ReadOnlyFilesystem => WalkErrorCode::ReadOnlyFilesystem,
        IoErrorHint::Other => WalkErrorCode::Io,
    };
    let message = format!("{action}: {error}");
    WalkError::with_source(code, message, error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_message_falls_back_when_no_rule_matches() {
        const RULES: &[(WalkErrorCode, &[&str])] =
            &[(WalkErrorCode::ExternalToolTimeout, &["timed out"])];
        assert_eq!(
            classify_message_by_patterns("process timed out waiting", RULES, WalkErrorCode::Unknown),
            WalkErrorCode::ExternalToolTimeout
        );
        assert_eq!(
            classify_message_by_patterns("totally unrelated", RULES, WalkErrorCode::Unknown),
            WalkErrorCode::Unknown
        );
    }

    #[test]
    fn walk_error_from_io_classifies_not_found() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let walk_err = walk_error_from_io("open archive", io_err);
        assert_eq!(walk_err.code(), WalkErrorCode::NotFound);
    }

    #[test]
    fn source_chain_is_preserved() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let walk_err = walk_error_from_io("open archive", io_err);
        assert!(std::error::Error::source(&walk_err).is_some());
    }
}
