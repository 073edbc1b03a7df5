//! Filesystem error codes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error codes returned by filesystem operations, similar to `errno` in POSIX.
///
/// Not every code is produced by the in-memory filesystem; the full set is
/// kept so guests can branch on the same enumeration they were compiled
/// against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// Permission denied (`EACCES`).
    #[error("access")]
    Access,
    /// Operation would block (`EAGAIN`).
    #[error("would-block")]
    WouldBlock,
    /// Connection already in progress (`EALREADY`).
    #[error("already")]
    Already,
    /// Bad descriptor (`EBADF`).
    #[error("bad-descriptor")]
    BadDescriptor,
    /// Device or resource busy (`EBUSY`).
    #[error("busy")]
    Busy,
    /// Resource deadlock would occur (`EDEADLK`).
    #[error("deadlock")]
    Deadlock,
    /// Storage quota exceeded (`EDQUOT`).
    #[error("quota")]
    Quota,
    /// File exists (`EEXIST`).
    #[error("exist")]
    Exist,
    /// File too large (`EFBIG`).
    #[error("file-too-large")]
    FileTooLarge,
    /// Illegal byte sequence (`EILSEQ`).
    #[error("illegal-byte-sequence")]
    IllegalByteSequence,
    /// Operation in progress (`EINPROGRESS`).
    #[error("in-progress")]
    InProgress,
    /// Interrupted function (`EINTR`).
    #[error("interrupted")]
    Interrupted,
    /// Invalid argument (`EINVAL`).
    #[error("invalid")]
    Invalid,
    /// I/O error (`EIO`).
    #[error("io")]
    Io,
    /// Is a directory (`EISDIR`).
    #[error("is-directory")]
    IsDirectory,
    /// Too many levels of symbolic links (`ELOOP`).
    #[error("loop")]
    Loop,
    /// Too many links (`EMLINK`).
    #[error("too-many-links")]
    TooManyLinks,
    /// Message too large (`EMSGSIZE`).
    #[error("message-size")]
    MessageSize,
    /// Filename too long (`ENAMETOOLONG`).
    #[error("name-too-long")]
    NameTooLong,
    /// No such device (`ENODEV`).
    #[error("no-device")]
    NoDevice,
    /// No such file or directory (`ENOENT`).
    #[error("no-entry")]
    NoEntry,
    /// No locks available (`ENOLCK`).
    #[error("no-lock")]
    NoLock,
    /// Not enough space (`ENOMEM`).
    #[error("insufficient-memory")]
    InsufficientMemory,
    /// No space left on device (`ENOSPC`).
    #[error("insufficient-space")]
    InsufficientSpace,
    /// Not a directory (`ENOTDIR`).
    #[error("not-directory")]
    NotDirectory,
    /// Directory not empty (`ENOTEMPTY`).
    #[error("not-empty")]
    NotEmpty,
    /// State not recoverable (`ENOTRECOVERABLE`).
    #[error("not-recoverable")]
    NotRecoverable,
    /// Not supported (`ENOTSUP`, `ENOSYS`).
    #[error("unsupported")]
    Unsupported,
    /// Inappropriate I/O control operation (`ENOTTY`).
    #[error("no-tty")]
    NoTty,
    /// No such device or address (`ENXIO`).
    #[error("no-such-device")]
    NoSuchDevice,
    /// Value too large to be stored in data type (`EOVERFLOW`).
    #[error("overflow")]
    Overflow,
    /// Operation not permitted (`EPERM`).
    #[error("not-permitted")]
    NotPermitted,
    /// Broken pipe (`EPIPE`).
    #[error("pipe")]
    Pipe,
    /// Read-only file system (`EROFS`).
    #[error("read-only")]
    ReadOnly,
    /// Invalid seek (`ESPIPE`).
    #[error("invalid-seek")]
    InvalidSeek,
    /// Text file busy (`ETXTBSY`).
    #[error("text-file-busy")]
    TextFileBusy,
    /// Cross-device link (`EXDEV`).
    #[error("cross-device")]
    CrossDevice,
}

impl ErrorCode {
    /// Every code, in the order of the guest interface's enum discriminants.
    pub const ALL: [ErrorCode; 37] = [
        ErrorCode::Access,
        ErrorCode::WouldBlock,
        ErrorCode::Already,
        ErrorCode::BadDescriptor,
        ErrorCode::Busy,
        ErrorCode::Deadlock,
        ErrorCode::Quota,
        ErrorCode::Exist,
        ErrorCode::FileTooLarge,
        ErrorCode::IllegalByteSequence,
        ErrorCode::InProgress,
        ErrorCode::Interrupted,
        ErrorCode::Invalid,
        ErrorCode::Io,
        ErrorCode::IsDirectory,
        ErrorCode::Loop,
        ErrorCode::TooManyLinks,
        ErrorCode::MessageSize,
        ErrorCode::NameTooLong,
        ErrorCode::NoDevice,
        ErrorCode::NoEntry,
        ErrorCode::NoLock,
        ErrorCode::InsufficientMemory,
        ErrorCode::InsufficientSpace,
        ErrorCode::NotDirectory,
        ErrorCode::NotEmpty,
        ErrorCode::NotRecoverable,
        ErrorCode::Unsupported,
        ErrorCode::NoTty,
        ErrorCode::NoSuchDevice,
        ErrorCode::Overflow,
        ErrorCode::NotPermitted,
        ErrorCode::Pipe,
        ErrorCode::ReadOnly,
        ErrorCode::InvalidSeek,
        ErrorCode::TextFileBusy,
        ErrorCode::CrossDevice,
    ];

    /// The numeric discriminant the guest interface assigns to this code.
    pub fn discriminant(self) -> u8 {
        self as u8
    }

    /// Look a code up by discriminant.
    pub fn from_discriminant(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_kebab_case() {
        assert_eq!(ErrorCode::NoEntry.to_string(), "no-entry");
        assert_eq!(ErrorCode::IsDirectory.to_string(), "is-directory");
        assert_eq!(ErrorCode::BadDescriptor.to_string(), "bad-descriptor");
    }

    #[test]
    fn serde_matches_display() {
        for code in ErrorCode::ALL {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code));
        }
    }

    #[test]
    fn discriminants_follow_declaration_order() {
        assert_eq!(ErrorCode::Access.discriminant(), 0);
        assert_eq!(ErrorCode::Exist.discriminant(), 7);
        assert_eq!(ErrorCode::NoEntry.discriminant(), 20);
        assert_eq!(ErrorCode::Unsupported.discriminant(), 27);
        assert_eq!(ErrorCode::CrossDevice.discriminant(), 36);
        assert_eq!(ErrorCode::from_discriminant(24), Some(ErrorCode::NotDirectory));
        assert_eq!(ErrorCode::from_discriminant(37), None);
    }
}
