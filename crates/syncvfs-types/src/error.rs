//! Error taxonomy surfaced at the VFS boundary.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

/// Discrete, POSIX-like error codes.
///
/// These are what cross the guest boundary; an ABI adapter maps them to its
/// own errno space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    NotADirectory,
    IsADirectory,
    DirectoryNotEmpty,
    /// Hard links, and anything the backing store cannot express.
    Unsupported,
    /// Malformed path or argument.
    InvalidArgument,
    /// The backing store refused because the entry is in use.
    Busy,
    /// Any other backing-store failure, message kept verbatim.
    Io,
    /// Symlink resolution exceeded the depth limit.
    Loop,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "not found",
            ErrorCode::AlreadyExists => "already exists",
            ErrorCode::NotADirectory => "not a directory",
            ErrorCode::IsADirectory => "is a directory",
            ErrorCode::DirectoryNotEmpty => "directory not empty",
            ErrorCode::Unsupported => "unsupported",
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::Busy => "busy",
            ErrorCode::Io => "i/o error",
            ErrorCode::Loop => "too many levels of symbolic links",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned by a VFS operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct VfsError {
    pub code: ErrorCode,
    pub message: String,
}

/// Result type for VFS operations.
pub type VfsResult<T> = Result<T, VfsError>;

impl VfsError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::new(ErrorCode::NotFound, what.to_string())
    }

    pub fn already_exists(what: impl fmt::Display) -> Self {
        Self::new(ErrorCode::AlreadyExists, what.to_string())
    }

    pub fn not_a_directory(what: impl fmt::Display) -> Self {
        Self::new(ErrorCode::NotADirectory, what.to_string())
    }

    pub fn is_a_directory(what: impl fmt::Display) -> Self {
        Self::new(ErrorCode::IsADirectory, what.to_string())
    }

    pub fn invalid(what: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InvalidArgument, what.to_string())
    }

    pub fn unsupported(what: impl fmt::Display) -> Self {
        Self::new(ErrorCode::Unsupported, what.to_string())
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }
}

impl From<io::Error> for VfsError {
    fn from(err: io::Error) -> Self {
        let code = match err.kind() {
            io::ErrorKind::NotFound => ErrorCode::NotFound,
            io::ErrorKind::AlreadyExists => ErrorCode::AlreadyExists,
            io::ErrorKind::NotADirectory => ErrorCode::NotADirectory,
            io::ErrorKind::IsADirectory => ErrorCode::IsADirectory,
            io::ErrorKind::DirectoryNotEmpty => ErrorCode::DirectoryNotEmpty,
            io::ErrorKind::Unsupported => ErrorCode::Unsupported,
            io::ErrorKind::InvalidInput => ErrorCode::InvalidArgument,
            io::ErrorKind::ResourceBusy => ErrorCode::Busy,
            _ => ErrorCode::Io,
        };
        Self::new(code, err.to_string())
    }
}

impl From<VfsError> for io::Error {
    fn from(err: VfsError) -> Self {
        let kind = match err.code {
            ErrorCode::NotFound => io::ErrorKind::NotFound,
            ErrorCode::AlreadyExists => io::ErrorKind::AlreadyExists,
            ErrorCode::NotADirectory => io::ErrorKind::NotADirectory,
            ErrorCode::IsADirectory => io::ErrorKind::IsADirectory,
            ErrorCode::DirectoryNotEmpty => io::ErrorKind::DirectoryNotEmpty,
            ErrorCode::Unsupported => io::ErrorKind::Unsupported,
            ErrorCode::InvalidArgument => io::ErrorKind::InvalidInput,
            ErrorCode::Busy => io::ErrorKind::ResourceBusy,
            ErrorCode::Io | ErrorCode::Loop => io::ErrorKind::Other,
        };
        io::Error::new(kind, err.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(io::ErrorKind::NotFound, ErrorCode::NotFound)]
    #[case(io::ErrorKind::AlreadyExists, ErrorCode::AlreadyExists)]
    #[case(io::ErrorKind::ResourceBusy, ErrorCode::Busy)]
    #[case(io::ErrorKind::Unsupported, ErrorCode::Unsupported)]
    #[case(io::ErrorKind::PermissionDenied, ErrorCode::Io)]
    fn io_kinds_map_to_codes(#[case] kind: io::ErrorKind, #[case] code: ErrorCode) {
        let err: VfsError = io::Error::new(kind, "boom").into();
        assert_eq!(err.code, code);
    }

    #[test]
    fn backing_store_message_is_kept() {
        let err: VfsError = io::Error::other("quota exceeded").into();
        assert_eq!(err.code, ErrorCode::Io);
        assert!(err.message.contains("quota exceeded"));
        assert_eq!(err.to_string(), "i/o error: quota exceeded");
    }

    #[test]
    fn round_trips_through_io_error() {
        let err = VfsError::not_found("/x");
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::NotFound);
        let back: VfsError = io_err.into();
        assert_eq!(back.code, ErrorCode::NotFound);
    }
}
