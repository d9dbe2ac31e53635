//! Small public value types shared across the API surface.

use crate::error::{Error, ErrorCode};
use crate::ffi;

/// Identifies a submitted command, and can be used to cancel a pending
/// method invocation. Handles are assigned monotonically; the value 0 is
/// reserved as "invalid".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub(crate) u32);

impl Handle {
    /// The reserved "no such command" handle.
    pub const INVALID: Handle = Handle(0);

    /// Whether this handle refers to a submitted command.
    pub fn is_valid(self) -> bool {
        self != Handle::INVALID
    }
}

/// Which well-known bus to connect to.
#[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub enum BusType {
    /// The session bus - local to every logged in session.
    Session = ffi::DBusBusType::Session as isize,
    /// The system wide bus.
    System = ffi::DBusBusType::System as isize,
    /// The bus that started us, if any.
    Starter = ffi::DBusBusType::Starter as isize,
}

/// The outcome delivered with every asynchronous completion.
#[derive(Debug, Clone)]
pub struct CallbackStatus {
    /// The packed error value; [`Error::NONE`] on success.
    pub error: Error,
    /// The error name, when one is known. For daemon failures this is the
    /// daemon's error name (e.g. `org.freedesktop.DBus.Error.ServiceUnknown`).
    pub err_name: Option<String>,
    /// A human readable description of the failure.
    pub err_msg: Option<String>,
}

impl CallbackStatus {
    pub(crate) fn ok() -> CallbackStatus {
        CallbackStatus { error: Error::NONE, err_name: None, err_msg: None }
    }

    pub(crate) fn lib_error(code: ErrorCode, msg: &str) -> CallbackStatus {
        CallbackStatus {
            error: Error::lib(code),
            err_name: Some(code.name().to_string()),
            err_msg: Some(msg.to_string()),
        }
    }

    pub(crate) fn bus_error(name: Option<String>, msg: Option<String>) -> CallbackStatus {
        CallbackStatus { error: Error::bus(ErrorCode::Dbus), err_name: name, err_msg: msg }
    }

    pub(crate) fn cancelled() -> CallbackStatus {
        CallbackStatus::lib_error(ErrorCode::Cancelled, "operation cancelled")
    }

    /// Whether the operation failed.
    pub fn is_error(&self) -> bool {
        self.error.is_error()
    }
}

/// The reply to a synchronous [`invoke`](crate::invoke). A daemon-side
/// failure is reported through the fields rather than as an `Err` so the
/// daemon's error name and message are not lost.
#[derive(Debug, Clone)]
pub struct Response {
    /// The packed error value; [`Error::NONE`] on success.
    pub err_code: Error,
    /// The error name reported by the daemon or the service, if any.
    pub err_name: Option<String>,
    /// The error message reported by the daemon or the service, if any.
    pub err_msg: Option<String>,
    /// The string result returned by the service; `None` on failure.
    pub result: Option<String>,
}

impl Response {
    pub(crate) fn from_status(status: CallbackStatus, result: Option<String>) -> Response {
        Response {
            err_code: status.error,
            err_name: status.err_name,
            err_msg: status.err_msg,
            result,
        }
    }

    /// Whether the invocation failed.
    pub fn is_error(&self) -> bool {
        self.err_code.is_error()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invalid_handle() {
        assert!(!Handle::INVALID.is_valid());
        assert!(Handle(1).is_valid());
    }

    #[test]
    fn cancelled_status() {
        let st = CallbackStatus::cancelled();
        assert!(st.is_error());
        assert_eq!(st.error.code(), ErrorCode::Cancelled);
        assert_eq!(st.err_name.as_deref(), Some("com.hsae.dbusipc.error.Cancelled"));
    }
}
