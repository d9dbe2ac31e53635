//! A thread-safe, JSON-oriented client/server facade over D-Bus.
//!
//! [D-Bus](http://dbus.freedesktop.org/) is a message bus, and is mainly
//! used in Linux for communication between processes. This crate speaks a
//! deliberately small dialect of it: services register a bus name and
//! receive string-encoded method calls through a single `Invoke` method,
//! clients call them synchronously or with completion callbacks, and
//! signals travel as `(name, data)` string pairs through a single `Emit`
//! signal. Payload strings are conventionally JSON, but the library never
//! inspects them.
//!
//! libdbus itself is asynchronous and not thread-safe; this crate hides
//! that behind one internal dispatch thread that owns every interaction
//! with it. Every public function is safe to call from any thread. The
//! synchronous functions block on a per-call semaphore and must not be
//! called from inside a callback (they fail with `Deadlock` there);
//! the `_async` variants are safe everywhere.
//!
//! Call [`initialize`] once before anything else, and [`shutdown`] when
//! done. A minimal service:
//!
//! ```no_run
//! dbusipc::initialize()?;
//! let conn = dbusipc::get_connection(dbusipc::BusType::Session, false)?;
//! let _reg = dbusipc::register_service(conn, "com.example.echo", None, 0,
//!     |ctx, method, params, _no_reply| {
//!         println!("{}({})", method, params);
//!         let _ = dbusipc::return_result_async(&ctx, Some(params), |_| ());
//!     })?;
//! # Ok::<(), dbusipc::Error>(())
//! ```

#![warn(missing_docs)]

pub(crate) mod ffi {
    //! Re-export of `libdbus_sys`, supplemented with a handful of libdbus
    //! functions that this particular build of `libdbus-sys` doesn't bind.
    pub use libdbus_sys::*;

    pub use libdbus_sys::{DBusBusType, DBusConnection, DBusError, DBusPendingCall};
    use std::os::raw::c_char;

    extern "C" {
        pub fn dbus_pending_call_get_completed(pending: *mut DBusPendingCall) -> u32;
        pub fn dbus_pending_call_cancel(pending: *mut DBusPendingCall);
        pub fn dbus_connection_open(address: *const c_char, error: *mut DBusError) -> *mut DBusConnection;
        pub fn dbus_bus_get(bus_type: DBusBusType, error: *mut DBusError) -> *mut DBusConnection;
        pub fn dbus_shutdown();
        pub fn dbus_validate_utf8(alleged_utf8: *const c_char, error: *mut DBusError) -> u32;
    }
}

mod error;
pub use crate::error::{Domain, Error, ErrorCode, Level};

mod types;
pub use crate::types::{BusType, CallbackStatus, Handle, Response};

mod interface;
pub use crate::interface::{DEFAULT_ERROR_NAME, INTERFACE_NAME, METHOD_MEMBER, SIGNAL_MEMBER};

mod command;
mod config;
mod connection;
mod context;
mod dispatcher;
mod message;
mod registration;
mod strings;
mod subscription;
mod sync;
mod watch;

pub use crate::connection::Connection;
pub use crate::context::RequestContext;
pub use crate::registration::Registration;
pub use crate::subscription::Subscription;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::{Arc, Mutex};

use crate::command::{Command, Completion, SyncSlot};
use crate::dispatcher::Dispatcher;
use crate::message::{BusError, Message};
use crate::sync::Semaphore;

static INITDBUS: std::sync::Once = std::sync::Once::new();

fn init_dbus() {
    INITDBUS.call_once(|| {
        if unsafe { ffi::dbus_threads_init_default() } == 0 {
            panic!("Out of memory when trying to initialize D-Bus library!");
        }
    });
}

fn c_str_to_slice(c: &*const c_char) -> Option<&str> {
    if *c == ptr::null() {
        None
    } else {
        std::str::from_utf8(unsafe { CStr::from_ptr(*c).to_bytes() }).ok()
    }
}

fn to_c_str(n: &str) -> CString {
    CString::new(n.as_bytes()).unwrap()
}

static DISPATCHER: Mutex<Option<Arc<Dispatcher>>> = Mutex::new(None);

fn dispatcher() -> Result<Arc<Dispatcher>, Error> {
    DISPATCHER
        .lock()
        .unwrap()
        .clone()
        .ok_or_else(|| Error::lib(ErrorCode::CmdSubmission))
}

/// Like [`dispatcher`], but also refuses calls made from the dispatch
/// thread itself: a synchronous wait there would never be answered.
fn sync_dispatcher() -> Result<Arc<Dispatcher>, Error> {
    let d = dispatcher()?;
    if d.is_current_thread() {
        return Err(Error::lib(ErrorCode::Deadlock));
    }
    Ok(d)
}

pub(crate) fn submit_free_request_context(request: Message) {
    // Message release normally runs on the dispatch thread with everything
    // else; once the library is shut down the reference just drops here.
    if let Ok(d) = dispatcher() {
        let _ = d.submit(Command::FreeRequestContext { request });
    }
}

/// Starts the library: recovers the session bus address if necessary,
/// makes libdbus thread-aware, and spawns the dispatch thread. Redundant
/// calls after the first succeed immediately.
pub fn initialize() -> Result<(), Error> {
    config::ensure_session_bus_address();
    if unsafe { ffi::dbus_threads_init_default() } == 0 {
        return Err(Error::lib(ErrorCode::Dbus));
    }
    let mut guard = DISPATCHER.lock().unwrap();
    if let Some(d) = guard.as_ref() {
        if d.is_running() {
            return Ok(());
        }
    }
    let d = Arc::new(Dispatcher::new()?);
    d.start()?;
    *guard = Some(d);
    Ok(())
}

/// Stops the library: force-releases every cached connection on the
/// dispatch thread, waits for the thread to exit, and delivers a
/// cancellation to any command it never ran. Safe to call more than once.
pub fn shutdown() {
    let disp = DISPATCHER.lock().unwrap().take();
    if let Some(d) = disp {
        if d.is_running() {
            let sem = Arc::new(Semaphore::new(0));
            match d.submit(Command::Shutdown { sem: sem.clone() }) {
                Ok(_) => sem.wait(),
                Err(_) => d.stop(),
            }
        }
        d.wait();
        d.drain_cancelled();
    }
}

/// Opens a connection to the bus at `address`. With `open_private` the
/// underlying connection is exclusive to the returned handle; otherwise it
/// may be shared with other callers of the library.
pub fn open_connection(address: &str, open_private: bool) -> Result<Connection, Error> {
    let d = sync_dispatcher()?;
    let slot = SyncSlot::new();
    d.submit(Command::OpenConnection {
        address: address.to_string(),
        private: open_private,
        done: Completion::Sync(slot.clone()),
    })?;
    let (status, conn) = slot.wait();
    match conn {
        Some(c) if !status.is_error() => Ok(c),
        _ => Err(status.error),
    }
}

/// Asynchronous [`open_connection`]; `on_connect` runs on the dispatch
/// thread with the outcome.
pub fn open_connection_async<F>(address: &str, open_private: bool, on_connect: F) -> Result<(), Error>
where
    F: FnOnce(CallbackStatus, Option<Connection>) + Send + 'static,
{
    let d = dispatcher()?;
    d.submit(Command::OpenConnection {
        address: address.to_string(),
        private: open_private,
        done: Completion::Callback(Box::new(on_connect)),
    })?;
    Ok(())
}

/// Opens a connection to a well-known bus.
pub fn get_connection(bus: BusType, open_private: bool) -> Result<Connection, Error> {
    let d = sync_dispatcher()?;
    let slot = SyncSlot::new();
    d.submit(Command::GetConnection { bus, private: open_private, done: Completion::Sync(slot.clone()) })?;
    let (status, conn) = slot.wait();
    match conn {
        Some(c) if !status.is_error() => Ok(c),
        _ => Err(status.error),
    }
}

/// Asynchronous [`get_connection`].
pub fn get_connection_async<F>(bus: BusType, open_private: bool, on_connect: F) -> Result<(), Error>
where
    F: FnOnce(CallbackStatus, Option<Connection>) + Send + 'static,
{
    let d = dispatcher()?;
    d.submit(Command::GetConnection {
        bus,
        private: open_private,
        done: Completion::Callback(Box::new(on_connect)),
    })?;
    Ok(())
}

/// Releases one reference on the connection. The last release deregisters
/// outstanding match rules and owned bus names before tearing down.
pub fn close_connection(conn: Connection) -> Result<(), Error> {
    let d = sync_dispatcher()?;
    let slot = SyncSlot::new();
    d.submit(Command::CloseConnection { conn, done: Completion::Sync(slot.clone()) })?;
    let (status, ()) = slot.wait();
    status_result(status)
}

/// Asynchronous [`close_connection`].
pub fn close_connection_async<F>(conn: Connection, on_status: F) -> Result<(), Error>
where
    F: FnOnce(CallbackStatus) + Send + 'static,
{
    let d = dispatcher()?;
    d.submit(Command::CloseConnection { conn, done: status_callback(on_status) })?;
    Ok(())
}

/// Calls `method` on the service owning `bus_name` and waits for the
/// reply. `obj_path` `None` derives the path from the bus name;
/// `parameters` `None` sends `"{}"`. `msec_timeout` of -1 uses the libdbus
/// default. Daemon-side failure is reported inside the returned
/// [`Response`], so the error name and message survive.
pub fn invoke(
    conn: Connection,
    bus_name: &str,
    obj_path: Option<&str>,
    method: &str,
    parameters: Option<&str>,
    msec_timeout: i32,
) -> Result<Response, Error> {
    if bus_name.is_empty() || method.is_empty() {
        return Err(Error::lib(ErrorCode::BadArgs));
    }
    let d = sync_dispatcher()?;
    let slot = SyncSlot::new();
    d.submit(Command::Invoke {
        conn,
        bus_name: bus_name.to_string(),
        obj_path: obj_path.map(str::to_string),
        method: method.to_string(),
        parameters: parameters.unwrap_or(interface::DEFAULT_PAYLOAD).to_string(),
        no_reply: false,
        timeout_ms: msec_timeout,
        done: Completion::Sync(slot.clone()),
    })?;
    let (status, result) = slot.wait();
    Ok(Response::from_status(status, result))
}

/// Asynchronous [`invoke`]. Returns the handle that [`cancel`] accepts.
/// With `no_reply_expected` the call is fire-and-forget: `on_result` still
/// receives one completion, with no result payload.
pub fn invoke_async<F>(
    conn: Connection,
    bus_name: &str,
    obj_path: Option<&str>,
    method: &str,
    parameters: Option<&str>,
    no_reply_expected: bool,
    msec_timeout: i32,
    on_result: F,
) -> Result<Handle, Error>
where
    F: FnOnce(CallbackStatus, Option<String>) + Send + 'static,
{
    if bus_name.is_empty() || method.is_empty() {
        return Err(Error::lib(ErrorCode::BadArgs));
    }
    let d = dispatcher()?;
    d.submit(Command::Invoke {
        conn,
        bus_name: bus_name.to_string(),
        obj_path: obj_path.map(str::to_string),
        method: method.to_string(),
        parameters: parameters.unwrap_or(interface::DEFAULT_PAYLOAD).to_string(),
        no_reply: no_reply_expected,
        timeout_ms: msec_timeout,
        done: Completion::Callback(Box::new(on_result)),
    })
}

/// Cancels a pending method invocation. Best-effort: a reply that already
/// arrived is silently dropped, and the invocation's own completion
/// reports `Cancelled` exactly once. Returns `NotFound` when no pending
/// command carries the handle.
pub fn cancel(handle: Handle) -> Result<(), Error> {
    if !handle.is_valid() {
        return Err(Error::lib(ErrorCode::BadArgs));
    }
    let d = sync_dispatcher()?;
    let slot = SyncSlot::new();
    d.submit(Command::Cancel { target: handle, done: Completion::Sync(slot.clone()) })?;
    let (status, ()) = slot.wait();
    status_result(status)
}

/// Emits signal `sig_name` from the registered service's object path.
/// `data` `None` sends `"{}"`.
pub fn emit(reg: Registration, sig_name: &str, data: Option<&str>) -> Result<(), Error> {
    if sig_name.is_empty() {
        return Err(Error::lib(ErrorCode::BadArgs));
    }
    let d = sync_dispatcher()?;
    let slot = SyncSlot::new();
    d.submit(Command::Emit {
        reg,
        sig_name: sig_name.to_string(),
        data: data.unwrap_or(interface::DEFAULT_PAYLOAD).to_string(),
        done: Completion::Sync(slot.clone()),
    })?;
    let (status, ()) = slot.wait();
    status_result(status)
}

/// Asynchronous [`emit`].
pub fn emit_async<F>(reg: Registration, sig_name: &str, data: Option<&str>, on_status: F) -> Result<(), Error>
where
    F: FnOnce(CallbackStatus) + Send + 'static,
{
    if sig_name.is_empty() {
        return Err(Error::lib(ErrorCode::BadArgs));
    }
    let d = dispatcher()?;
    d.submit(Command::Emit {
        reg,
        sig_name: sig_name.to_string(),
        data: data.unwrap_or(interface::DEFAULT_PAYLOAD).to_string(),
        done: status_callback(on_status),
    })?;
    Ok(())
}

/// Subscribes to signal `sig_name` emitted on `obj_path`. The returned
/// handle exists once the daemon has acknowledged the match rule.
/// `on_signal` receives `(name, data)` for every delivery.
pub fn subscribe<F>(conn: Connection, obj_path: &str, sig_name: &str, on_signal: F) -> Result<Subscription, Error>
where
    F: FnMut(&str, &str) + Send + 'static,
{
    if obj_path.is_empty() || sig_name.is_empty() {
        return Err(Error::lib(ErrorCode::BadArgs));
    }
    let d = sync_dispatcher()?;
    let slot = SyncSlot::new();
    d.submit(Command::Subscribe {
        conn,
        obj_path: obj_path.to_string(),
        sig_name: sig_name.to_string(),
        on_signal: Box::new(on_signal),
        done: Completion::Sync(slot.clone()),
    })?;
    let (status, sub) = slot.wait();
    match sub {
        Some(s) if !status.is_error() => Ok(s),
        _ => Err(status.error),
    }
}

/// Asynchronous [`subscribe`]; `on_subscription` reports the established
/// subscription handle (or the failure).
pub fn subscribe_async<F, G>(
    conn: Connection,
    obj_path: &str,
    sig_name: &str,
    on_signal: F,
    on_subscription: G,
) -> Result<(), Error>
where
    F: FnMut(&str, &str) + Send + 'static,
    G: FnOnce(CallbackStatus, Option<Subscription>) + Send + 'static,
{
    if obj_path.is_empty() || sig_name.is_empty() {
        return Err(Error::lib(ErrorCode::BadArgs));
    }
    let d = dispatcher()?;
    d.submit(Command::Subscribe {
        conn,
        obj_path: obj_path.to_string(),
        sig_name: sig_name.to_string(),
        on_signal: Box::new(on_signal),
        done: Completion::Callback(Box::new(on_subscription)),
    })?;
    Ok(())
}

/// Removes a subscription; the daemon-side match rule goes with it.
pub fn unsubscribe(sub: Subscription) -> Result<(), Error> {
    let d = sync_dispatcher()?;
    let slot = SyncSlot::new();
    d.submit(Command::Unsubscribe { sub, done: Completion::Sync(slot.clone()) })?;
    let (status, ()) = slot.wait();
    status_result(status)
}

/// Asynchronous [`unsubscribe`].
pub fn unsubscribe_async<F>(sub: Subscription, on_status: F) -> Result<(), Error>
where
    F: FnOnce(CallbackStatus) + Send + 'static,
{
    let d = dispatcher()?;
    d.submit(Command::Unsubscribe { sub, done: status_callback(on_status) })?;
    Ok(())
}

/// Registers a service: requests `bus_name` from the daemon (replacing an
/// existing owner, never queueing) and delivers incoming `Invoke` calls on
/// `obj_path` to `on_request`. `obj_path` `None` derives the path from the
/// bus name. The callback owns each [`RequestContext`] it receives.
pub fn register_service<F>(
    conn: Connection,
    bus_name: &str,
    obj_path: Option<&str>,
    flags: u32,
    on_request: F,
) -> Result<Registration, Error>
where
    F: FnMut(RequestContext, &str, &str, bool) + Send + 'static,
{
    if bus_name.is_empty() {
        return Err(Error::lib(ErrorCode::BadArgs));
    }
    let d = sync_dispatcher()?;
    let slot = SyncSlot::new();
    d.submit(Command::RegisterService {
        conn,
        bus_name: bus_name.to_string(),
        obj_path: obj_path.map(str::to_string),
        flags,
        on_request: Box::new(on_request),
        done: Completion::Sync(slot.clone()),
    })?;
    let (status, reg) = slot.wait();
    match reg {
        Some(r) if !status.is_error() => Ok(r),
        _ => Err(status.error),
    }
}

/// Asynchronous [`register_service`].
pub fn register_service_async<F, G>(
    conn: Connection,
    bus_name: &str,
    obj_path: Option<&str>,
    flags: u32,
    on_request: F,
    on_register: G,
) -> Result<(), Error>
where
    F: FnMut(RequestContext, &str, &str, bool) + Send + 'static,
    G: FnOnce(CallbackStatus, Option<Registration>) + Send + 'static,
{
    if bus_name.is_empty() {
        return Err(Error::lib(ErrorCode::BadArgs));
    }
    let d = dispatcher()?;
    d.submit(Command::RegisterService {
        conn,
        bus_name: bus_name.to_string(),
        obj_path: obj_path.map(str::to_string),
        flags,
        on_request: Box::new(on_request),
        done: Completion::Callback(Box::new(on_register)),
    })?;
    Ok(())
}

/// Unregisters a service and releases its bus name. The registration is
/// removed even when the daemon declines the release.
pub fn unregister_service(reg: Registration) -> Result<(), Error> {
    let d = sync_dispatcher()?;
    let slot = SyncSlot::new();
    d.submit(Command::UnregisterService { reg, done: Completion::Sync(slot.clone()) })?;
    let (status, ()) = slot.wait();
    status_result(status)
}

/// Asynchronous [`unregister_service`].
pub fn unregister_service_async<F>(reg: Registration, on_status: F) -> Result<(), Error>
where
    F: FnOnce(CallbackStatus) + Send + 'static,
{
    let d = dispatcher()?;
    d.submit(Command::UnregisterService { reg, done: status_callback(on_status) })?;
    Ok(())
}

/// Replies to the request captured in `context` with `result` (`None`
/// sends `"{}"`). The context stays usable until it is freed.
pub fn return_result(context: &RequestContext, result: Option<&str>) -> Result<(), Error> {
    let request = context.clone_message().ok_or_else(|| Error::lib(ErrorCode::BadArgs))?;
    let d = sync_dispatcher()?;
    let slot = SyncSlot::new();
    d.submit(Command::ReturnResult {
        conn: context.connection(),
        request,
        result: result.unwrap_or(interface::DEFAULT_PAYLOAD).to_string(),
        done: Completion::Sync(slot.clone()),
    })?;
    let (status, ()) = slot.wait();
    status_result(status)
}

/// Asynchronous [`return_result`] - the form service callbacks must use,
/// since they run on the dispatch thread.
pub fn return_result_async<F>(context: &RequestContext, result: Option<&str>, on_status: F) -> Result<(), Error>
where
    F: FnOnce(CallbackStatus) + Send + 'static,
{
    let request = context.clone_message().ok_or_else(|| Error::lib(ErrorCode::BadArgs))?;
    let d = dispatcher()?;
    d.submit(Command::ReturnResult {
        conn: context.connection(),
        request,
        result: result.unwrap_or(interface::DEFAULT_PAYLOAD).to_string(),
        done: status_callback(on_status),
    })?;
    Ok(())
}

/// Replies to the request captured in `context` with an error. `name`
/// `None` uses [`DEFAULT_ERROR_NAME`], `msg` `None` sends `"{}"`.
pub fn return_error(context: &RequestContext, name: Option<&str>, msg: Option<&str>) -> Result<(), Error> {
    let request = context.clone_message().ok_or_else(|| Error::lib(ErrorCode::BadArgs))?;
    let d = sync_dispatcher()?;
    let slot = SyncSlot::new();
    d.submit(Command::ReturnError {
        conn: context.connection(),
        request,
        err_name: name.unwrap_or(DEFAULT_ERROR_NAME).to_string(),
        err_msg: msg.unwrap_or(interface::DEFAULT_PAYLOAD).to_string(),
        done: Completion::Sync(slot.clone()),
    })?;
    let (status, ()) = slot.wait();
    status_result(status)
}

/// Asynchronous [`return_error`].
pub fn return_error_async<F>(
    context: &RequestContext,
    name: Option<&str>,
    msg: Option<&str>,
    on_status: F,
) -> Result<(), Error>
where
    F: FnOnce(CallbackStatus) + Send + 'static,
{
    let request = context.clone_message().ok_or_else(|| Error::lib(ErrorCode::BadArgs))?;
    let d = dispatcher()?;
    d.submit(Command::ReturnError {
        conn: context.connection(),
        request,
        err_name: name.unwrap_or(DEFAULT_ERROR_NAME).to_string(),
        err_msg: msg.unwrap_or(interface::DEFAULT_PAYLOAD).to_string(),
        done: status_callback(on_status),
    })?;
    Ok(())
}

/// Releases a request context. Dropping the context has the same effect;
/// this form just makes the hand-off explicit at call sites.
pub fn free_request_context(context: RequestContext) {
    drop(context);
}

/// Asks the daemon whether `bus_name` currently has an owner.
pub fn name_has_owner(conn: Connection, bus_name: &str) -> Result<bool, Error> {
    if bus_name.is_empty() {
        return Err(Error::lib(ErrorCode::BadArgs));
    }
    let d = sync_dispatcher()?;
    let slot = SyncSlot::new();
    d.submit(Command::NameHasOwner {
        conn,
        bus_name: bus_name.to_string(),
        done: Completion::Sync(slot.clone()),
    })?;
    let (status, has_owner) = slot.wait();
    if status.is_error() {
        Err(status.error)
    } else {
        Ok(has_owner)
    }
}

/// Asynchronous [`name_has_owner`]; the callback receives the queried
/// name alongside the answer.
pub fn name_has_owner_async<F>(conn: Connection, bus_name: &str, on_has_owner: F) -> Result<(), Error>
where
    F: FnOnce(CallbackStatus, &str, bool) + Send + 'static,
{
    if bus_name.is_empty() {
        return Err(Error::lib(ErrorCode::BadArgs));
    }
    let d = dispatcher()?;
    let name = bus_name.to_string();
    d.submit(Command::NameHasOwner {
        conn,
        bus_name: bus_name.to_string(),
        done: Completion::Callback(Box::new(move |status, has_owner| on_has_owner(status, &name, has_owner))),
    })?;
    Ok(())
}

/// Subscribes to bus-name ownership changes. With `bus_name` `None` (or
/// empty) every name is reported; otherwise only the given one.
/// `on_owner_changed` receives `(name, old_owner, new_owner)`; unowned is
/// the empty string.
pub fn subscribe_owner_changed<F>(conn: Connection, bus_name: Option<&str>, on_owner_changed: F) -> Result<Subscription, Error>
where
    F: FnMut(&str, &str, &str) + Send + 'static,
{
    let d = sync_dispatcher()?;
    let slot = SyncSlot::new();
    d.submit(Command::SubscribeOwnerChanged {
        conn,
        bus_name: bus_name.filter(|s| !s.is_empty()).map(str::to_string),
        on_change: Box::new(on_owner_changed),
        done: Completion::Sync(slot.clone()),
    })?;
    let (status, sub) = slot.wait();
    match sub {
        Some(s) if !status.is_error() => Ok(s),
        _ => Err(status.error),
    }
}

/// Asynchronous [`subscribe_owner_changed`].
pub fn subscribe_owner_changed_async<F, G>(
    conn: Connection,
    bus_name: Option<&str>,
    on_owner_changed: F,
    on_subscription: G,
) -> Result<(), Error>
where
    F: FnMut(&str, &str, &str) + Send + 'static,
    G: FnOnce(CallbackStatus, Option<Subscription>) + Send + 'static,
{
    let d = dispatcher()?;
    d.submit(Command::SubscribeOwnerChanged {
        conn,
        bus_name: bus_name.filter(|s| !s.is_empty()).map(str::to_string),
        on_change: Box::new(on_owner_changed),
        done: Completion::Callback(Box::new(on_subscription)),
    })?;
    Ok(())
}

/// Validates that `bytes` is well-formed UTF-8 as D-Bus defines it.
/// Returns `Format` otherwise.
pub fn validate_utf8(bytes: &[u8]) -> Result<(), Error> {
    init_dbus();
    let c = CString::new(bytes).map_err(|_| Error::lib(ErrorCode::Format))?;
    let mut e = BusError::empty();
    if unsafe { ffi::dbus_validate_utf8(c.as_ptr(), e.get_mut()) } != 0 {
        Ok(())
    } else {
        Err(Error::lib(ErrorCode::Format))
    }
}

fn status_callback<F>(on_status: F) -> Completion<()>
where
    F: FnOnce(CallbackStatus) + Send + 'static,
{
    Completion::Callback(Box::new(move |status, ()| on_status(status)))
}

fn status_result(status: CallbackStatus) -> Result<(), Error> {
    if status.is_error() {
        Err(status.error)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn calls_before_initialize_fail_cleanly() {
        // The dispatcher singleton may be live if another test initialized
        // it; only assert when we know it is absent.
        if DISPATCHER.lock().unwrap().is_none() {
            let err = invoke(Connection(1), "com.example.svc", None, "Ping", None, -1).unwrap_err();
            assert_eq!(err.code(), ErrorCode::CmdSubmission);
            let err = cancel(Handle(42)).unwrap_err();
            assert_eq!(err.code(), ErrorCode::CmdSubmission);
        }
    }

    #[test]
    fn bad_args_are_rejected_before_submission() {
        assert_eq!(
            invoke(Connection(1), "", None, "Ping", None, -1).unwrap_err().code(),
            ErrorCode::BadArgs
        );
        assert_eq!(
            invoke(Connection(1), "com.example.svc", None, "", None, -1).unwrap_err().code(),
            ErrorCode::BadArgs
        );
        assert_eq!(cancel(Handle::INVALID).unwrap_err().code(), ErrorCode::BadArgs);
        assert_eq!(emit(Registration(1), "", None).unwrap_err().code(), ErrorCode::BadArgs);
        assert_eq!(
            name_has_owner(Connection(1), "").unwrap_err().code(),
            ErrorCode::BadArgs
        );
    }

    #[test]
    fn utf8_validation() {
        assert!(validate_utf8(b"{\"s\":\"hi\"}").is_ok());
        assert!(validate_utf8(&[0xff, 0xfe]).is_err());
        assert!(validate_utf8(b"embedded\0nul").is_err());
    }
}
