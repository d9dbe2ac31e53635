//! The context handed to a service callback for an incoming request. It
//! captures the request message so a reply or error can be produced later,
//! from any thread.

use std::ffi::CString;
use std::fmt;

use crate::connection::{Connection, ConnectionEntry};
use crate::error::{Error, ErrorCode};
use crate::message::Message;

/// Carries one incoming method call. The service callback owns the context
/// and must release it with [`free_request_context`](crate::free_request_context)
/// (or by dropping it) once [`return_result`](crate::return_result) or
/// [`return_error`](crate::return_error) has been issued.
pub struct RequestContext {
    conn: Connection,
    request: Option<Message>,
}

impl RequestContext {
    pub(crate) fn new(conn: Connection, request: Message) -> RequestContext {
        RequestContext { conn, request: Some(request) }
    }

    /// The connection the request arrived on.
    pub fn connection(&self) -> Connection {
        self.conn
    }

    pub(crate) fn clone_message(&self) -> Option<Message> {
        self.request.as_ref().map(|m| m.clone_ref())
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RequestContext").field("connection", &self.conn).finish()
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        if let Some(request) = self.request.take() {
            // Route the release through the dispatch thread; if the library
            // is already shut down the reference is dropped right here.
            crate::submit_free_request_context(request);
        }
    }
}

/// Sends a method-return carrying `result` for the captured request.
pub(crate) fn send_reply(entry: &ConnectionEntry, request: &Message, result: &str) -> Error {
    if !entry.is_connected() {
        return Error::lib(ErrorCode::NotConnected);
    }
    let mut reply = match request.method_return() {
        Some(r) => r,
        None => return Error::lib(ErrorCode::NoMemory),
    };
    if let Err(e) = reply.append_str(result) {
        return e;
    }
    match entry.send(&reply) {
        Ok(_) => Error::NONE,
        Err(e) => e,
    }
}

/// Sends an error reply for the captured request.
pub(crate) fn send_error(entry: &ConnectionEntry, request: &Message, err_name: &str, err_msg: &str) -> Error {
    if !entry.is_connected() {
        return Error::lib(ErrorCode::NotConnected);
    }
    let name = match crate::strings::ErrorName::new(err_name) {
        Ok(n) => n,
        Err(_) => return Error::lib(ErrorCode::BadArgs),
    };
    let msg = match CString::new(err_msg) {
        Ok(m) => m,
        Err(_) => return Error::lib(ErrorCode::Format),
    };
    let error = match request.error_reply(&name, &msg) {
        Some(e) => e,
        None => return Error::lib(ErrorCode::NoMemory),
    };
    match entry.send(&error) {
        Ok(_) => Error::NONE,
        Err(e) => e,
    }
}
