//! The packed error value used throughout the library.
//!
//! An error is a single 32 bit word: bits 30-31 hold the severity level,
//! bits 28-29 the domain the error originated in, and bits 0-27 the error
//! code itself. Public functions never report failure any other way.

use std::fmt;

/// Severity of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Not an error.
    None = 0,
    /// Something noteworthy happened but the operation carried on.
    Warn = 1,
    /// The operation failed.
    Error = 2,
    /// The operation failed and the library may be unusable.
    Fatal = 3,
}

/// The subsystem an [`Error`] originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    /// This library.
    Ipc = 0,
    /// The D-Bus library or the message bus daemon.
    Dbus = 1,
    /// The C runtime / operating system.
    Posix = 2,
    /// Platform specific facilities.
    Platform = 3,
}

/// The closed set of error codes the library can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// No error.
    Ok = 0,
    /// The requested operation is not supported.
    NotSupported = 1,
    /// An allocation failed.
    NoMemory = 2,
    /// An argument was missing or malformed.
    BadArgs = 3,
    /// An internal invariant was violated.
    Internal = 4,
    /// The bus daemon reported an error; the accompanying status carries
    /// the daemon's error name and message.
    Dbus = 5,
    /// The command could not be queued for the dispatch thread.
    CmdSubmission = 6,
    /// The connection is no longer connected to the daemon.
    NotConnected = 7,
    /// The operation was cancelled before it completed.
    Cancelled = 8,
    /// A message could not be queued on the connection.
    ConnSend = 9,
    /// No pending command, subscription, or registration matched.
    NotFound = 10,
    /// A synchronous call was made from the dispatch thread.
    Deadlock = 11,
    /// A string was not valid UTF-8.
    Format = 12,
}

impl ErrorCode {
    /// The dotted error name used on the wire for this code.
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::Ok => "com.hsae.dbusipc.error.Ok",
            ErrorCode::NotSupported => "com.hsae.dbusipc.error.NotSupported",
            ErrorCode::NoMemory => "com.hsae.dbusipc.error.NoMemory",
            ErrorCode::BadArgs => "com.hsae.dbusipc.error.BadArgs",
            ErrorCode::Internal => "com.hsae.dbusipc.error.Internal",
            ErrorCode::Dbus => "com.hsae.dbusipc.error.DBus",
            ErrorCode::CmdSubmission => "com.hsae.dbusipc.error.CmdSubmission",
            ErrorCode::NotConnected => "com.hsae.dbusipc.error.NotConnected",
            ErrorCode::Cancelled => "com.hsae.dbusipc.error.Cancelled",
            ErrorCode::ConnSend => "com.hsae.dbusipc.error.ConnectionSend",
            ErrorCode::NotFound => "com.hsae.dbusipc.error.NotFound",
            ErrorCode::Deadlock => "com.hsae.dbusipc.error.Deadlock",
            ErrorCode::Format => "com.hsae.dbusipc.error.Format",
        }
    }

    fn from_bits(bits: u32) -> ErrorCode {
        match bits {
            0 => ErrorCode::Ok,
            1 => ErrorCode::NotSupported,
            2 => ErrorCode::NoMemory,
            3 => ErrorCode::BadArgs,
            4 => ErrorCode::Internal,
            5 => ErrorCode::Dbus,
            6 => ErrorCode::CmdSubmission,
            7 => ErrorCode::NotConnected,
            8 => ErrorCode::Cancelled,
            9 => ErrorCode::ConnSend,
            10 => ErrorCode::NotFound,
            11 => ErrorCode::Deadlock,
            12 => ErrorCode::Format,
            _ => ErrorCode::Internal,
        }
    }
}

/// A packed error value: level, domain and code in one 32 bit word.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Error(u32);

impl Error {
    /// The "no error" value.
    pub const NONE: Error = Error(0);

    /// Packs a level, domain and code into an error value.
    pub fn new(level: Level, domain: Domain, code: ErrorCode) -> Error {
        Error(((level as u32 & 0x3) << 30) | ((domain as u32 & 0x3) << 28) | (code as u32 & 0x0fff_ffff))
    }

    /// An error-level failure originating in this library.
    pub(crate) fn lib(code: ErrorCode) -> Error {
        Error::new(Level::Error, Domain::Ipc, code)
    }

    /// An error-level failure originating in the D-Bus library or daemon.
    pub(crate) fn bus(code: ErrorCode) -> Error {
        Error::new(Level::Error, Domain::Dbus, code)
    }

    /// An error-level failure originating in the operating system.
    pub(crate) fn posix(code: ErrorCode) -> Error {
        Error::new(Level::Error, Domain::Posix, code)
    }

    /// The severity level of this error.
    pub fn level(self) -> Level {
        match (self.0 >> 30) & 0x3 {
            0 => Level::None,
            1 => Level::Warn,
            2 => Level::Error,
            _ => Level::Fatal,
        }
    }

    /// The domain this error originated in.
    pub fn domain(self) -> Domain {
        match (self.0 >> 28) & 0x3 {
            0 => Domain::Ipc,
            1 => Domain::Dbus,
            2 => Domain::Posix,
            _ => Domain::Platform,
        }
    }

    /// The error code.
    pub fn code(self) -> ErrorCode {
        ErrorCode::from_bits(self.0 & 0x0fff_ffff)
    }

    /// The dotted wire name for this error's code.
    pub fn name(self) -> &'static str {
        self.code().name()
    }

    /// Whether the level indicates failure (error or fatal).
    pub fn is_error(self) -> bool {
        match self.level() {
            Level::Error | Level::Fatal => true,
            _ => false,
        }
    }

    /// The raw packed representation.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Reconstructs an error from its raw packed representation.
    pub fn from_bits(bits: u32) -> Error {
        Error(bits)
    }
}

impl Default for Error {
    fn default() -> Error {
        Error::NONE
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Error")
            .field("level", &self.level())
            .field("domain", &self.domain())
            .field("code", &self.code())
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({:?}/{:?})", self.name(), self.level(), self.domain())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pack_unpack() {
        let e = Error::new(Level::Error, Domain::Dbus, ErrorCode::NotConnected);
        assert_eq!(e.level(), Level::Error);
        assert_eq!(e.domain(), Domain::Dbus);
        assert_eq!(e.code(), ErrorCode::NotConnected);
        assert!(e.is_error());
        assert_eq!(Error::from_bits(e.bits()), e);
    }

    #[test]
    fn none_is_not_an_error() {
        assert!(!Error::NONE.is_error());
        assert_eq!(Error::NONE.level(), Level::None);
        assert_eq!(Error::NONE.code(), ErrorCode::Ok);
    }

    #[test]
    fn warn_is_not_an_error() {
        let e = Error::new(Level::Warn, Domain::Ipc, ErrorCode::Internal);
        assert!(!e.is_error());
        let f = Error::new(Level::Fatal, Domain::Ipc, ErrorCode::Internal);
        assert!(f.is_error());
    }

    #[test]
    fn wire_names() {
        assert_eq!(ErrorCode::Ok.name(), "com.hsae.dbusipc.error.Ok");
        assert_eq!(ErrorCode::ConnSend.name(), "com.hsae.dbusipc.error.ConnectionSend");
        assert_eq!(ErrorCode::Cancelled.name(), "com.hsae.dbusipc.error.Cancelled");
        assert_eq!(Error::lib(ErrorCode::Deadlock).name(), "com.hsae.dbusipc.error.Deadlock");
    }
}
