//! One command per user operation. A command is built on the caller's
//! thread, queued, and executed by the dispatch thread. Commands that issue
//! a daemon call park themselves in their connection's pending set and are
//! finished by the pending-call notification, by cancellation, or by
//! connection teardown - whichever comes first delivers the one terminal
//! completion.

use std::os::raw::{c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use crate::connection::{ConnTarget, Connection, ConnectionEntry};
use crate::context;
use crate::dispatcher::DispatcherCore;
use crate::error::{Error, ErrorCode};
use crate::ffi;
use crate::interface;
use crate::message::{Message, MessageType};
use crate::registration::{derive_object_path, Registration, RequestHandler, ServiceRegistration};
use crate::strings::{BusName, Path};
use crate::subscription::{OwnerChangedHandler, SignalHandler, SignalSubscription, Subscription};
use crate::sync::Semaphore;
use crate::types::{BusType, CallbackStatus, Handle};

/// Where a synchronous caller parks until its completion arrives.
pub(crate) struct SyncSlot<T> {
    sem: Semaphore,
    value: Mutex<Option<(CallbackStatus, T)>>,
}

impl<T> SyncSlot<T> {
    pub fn new() -> Arc<SyncSlot<T>> {
        Arc::new(SyncSlot { sem: Semaphore::new(0), value: Mutex::new(None) })
    }

    fn complete(&self, status: CallbackStatus, value: T) {
        *self.value.lock().unwrap() = Some((status, value));
        self.sem.post();
    }

    /// Blocks until the dispatch thread posts the completion.
    pub fn wait(&self) -> (CallbackStatus, T) {
        self.sem.wait();
        self.value.lock().unwrap().take().unwrap()
    }
}

/// How a command reports back: a user callback, a synchronous slot, or
/// nothing at all.
pub(crate) enum Completion<T> {
    Callback(Box<dyn FnOnce(CallbackStatus, T) + Send>),
    Sync(Arc<SyncSlot<T>>),
}

impl<T> Completion<T> {
    /// The single terminal delivery for the owning command.
    pub fn deliver(self, status: CallbackStatus, value: T) {
        match self {
            Completion::Callback(f) => {
                if catch_unwind(AssertUnwindSafe(move || f(status, value))).is_err() {
                    log::error!("completion callback panicked");
                }
            }
            Completion::Sync(slot) => slot.complete(status, value),
        }
    }
}

/// The closed set of operations the dispatch thread executes.
pub(crate) enum Command {
    OpenConnection {
        address: String,
        private: bool,
        done: Completion<Option<Connection>>,
    },
    GetConnection {
        bus: BusType,
        private: bool,
        done: Completion<Option<Connection>>,
    },
    CloseConnection {
        conn: Connection,
        done: Completion<()>,
    },
    Subscribe {
        conn: Connection,
        obj_path: String,
        sig_name: String,
        on_signal: SignalHandler,
        done: Completion<Option<Subscription>>,
    },
    SubscribeOwnerChanged {
        conn: Connection,
        bus_name: Option<String>,
        on_change: OwnerChangedHandler,
        done: Completion<Option<Subscription>>,
    },
    Unsubscribe {
        sub: Subscription,
        done: Completion<()>,
    },
    RegisterService {
        conn: Connection,
        bus_name: String,
        obj_path: Option<String>,
        flags: u32,
        on_request: RequestHandler,
        done: Completion<Option<Registration>>,
    },
    UnregisterService {
        reg: Registration,
        done: Completion<()>,
    },
    Invoke {
        conn: Connection,
        bus_name: String,
        obj_path: Option<String>,
        method: String,
        parameters: String,
        no_reply: bool,
        timeout_ms: i32,
        done: Completion<Option<String>>,
    },
    Emit {
        reg: Registration,
        sig_name: String,
        data: String,
        done: Completion<()>,
    },
    Cancel {
        target: Handle,
        done: Completion<()>,
    },
    NameHasOwner {
        conn: Connection,
        bus_name: String,
        done: Completion<bool>,
    },
    ReturnResult {
        conn: Connection,
        request: Message,
        result: String,
        done: Completion<()>,
    },
    ReturnError {
        conn: Connection,
        request: Message,
        err_name: String,
        err_msg: String,
        done: Completion<()>,
    },
    FreeRequestContext {
        request: Message,
    },
    Shutdown {
        sem: Arc<Semaphore>,
    },
}

impl Command {
    /// Runs on the dispatch thread. Consumes the command: it either
    /// completes here or transfers itself into a connection's pending set.
    pub fn execute(self, handle: Handle, core: &DispatcherCore) {
        match self {
            Command::OpenConnection { address, private, done } => {
                execute_open(core, ConnTarget::Address(address), private, done)
            }
            Command::GetConnection { bus, private, done } => execute_open(core, ConnTarget::Bus(bus), private, done),
            Command::CloseConnection { conn, done } => {
                // Releasing an unknown connection is a no-op so that an
                // extra close cannot tear down someone else's reference.
                if let Some(entry) = core.connection(conn) {
                    entry.dec_ref(core);
                }
                done.deliver(CallbackStatus::ok(), ());
            }
            Command::Subscribe { conn, obj_path, sig_name, on_signal, done } => {
                let entry = match core.connection(conn) {
                    Some(e) => e,
                    None => return done.deliver(unknown_connection(), None),
                };
                let sub = Rc::new(SignalSubscription::user_signal(obj_path, sig_name, on_signal));
                let msg = match add_match_msg(sub.rule()) {
                    Ok(m) => m,
                    Err(st) => return done.deliver(st, None),
                };
                defer_daemon_call(&entry, handle, msg, PendingOp::Subscribe { sub, done });
            }
            Command::SubscribeOwnerChanged { conn, bus_name, on_change, done } => {
                let entry = match core.connection(conn) {
                    Some(e) => e,
                    None => return done.deliver(unknown_connection(), None),
                };
                let sub = Rc::new(SignalSubscription::owner_changed(bus_name, on_change));
                let msg = match add_match_msg(sub.rule()) {
                    Ok(m) => m,
                    Err(st) => return done.deliver(st, None),
                };
                defer_daemon_call(&entry, handle, msg, PendingOp::Subscribe { sub, done });
            }
            Command::Unsubscribe { sub, done } => {
                let (entry, found) = match core.find_subscription(sub) {
                    Some(v) => v,
                    None => {
                        return done.deliver(
                            CallbackStatus::lib_error(ErrorCode::NotFound, "subscription does not exist"),
                            (),
                        )
                    }
                };
                let msg = match remove_match_msg(found.rule()) {
                    Ok(m) => m,
                    Err(st) => return done.deliver(st, ()),
                };
                defer_daemon_call(&entry, handle, msg, PendingOp::Unsubscribe { sub, done });
            }
            Command::RegisterService { conn, bus_name, obj_path, flags, on_request, done } => {
                let entry = match core.connection(conn) {
                    Some(e) => e,
                    None => return done.deliver(unknown_connection(), None),
                };
                if BusName::new(bus_name.as_str()).is_err() {
                    return done.deliver(CallbackStatus::lib_error(ErrorCode::BadArgs, "invalid bus name"), None);
                }
                let reg = Rc::new(ServiceRegistration::new(bus_name.clone(), obj_path, flags, on_request));
                if Path::new(reg.object_path()).is_err() {
                    return done.deliver(CallbackStatus::lib_error(ErrorCode::BadArgs, "invalid object path"), None);
                }
                let msg = match request_name_msg(&bus_name) {
                    Ok(m) => m,
                    Err(st) => return done.deliver(st, None),
                };
                defer_daemon_call(&entry, handle, msg, PendingOp::RegisterService { reg, done });
            }
            Command::UnregisterService { reg, done } => {
                let (entry, found) = match core.find_registration(reg) {
                    Some(v) => v,
                    None => {
                        return done.deliver(
                            CallbackStatus::lib_error(ErrorCode::NotFound, "service registration does not exist"),
                            (),
                        )
                    }
                };
                let msg = match release_name_msg(found.bus_name()) {
                    Ok(m) => m,
                    Err(st) => return done.deliver(st, ()),
                };
                defer_daemon_call(&entry, handle, msg, PendingOp::UnregisterService { reg, done });
            }
            Command::Invoke { conn, bus_name, obj_path, method, parameters, no_reply, timeout_ms, done } => {
                execute_invoke(core, handle, conn, bus_name, obj_path, method, parameters, no_reply, timeout_ms, done)
            }
            Command::Emit { reg, sig_name, data, done } => {
                let (entry, found) = match core.find_registration(reg) {
                    Some(v) => v,
                    None => {
                        return done.deliver(
                            CallbackStatus::lib_error(ErrorCode::NotFound, "service registration does not exist"),
                            (),
                        )
                    }
                };
                let path = match Path::new(found.object_path()) {
                    Ok(p) => p.into_static(),
                    Err(_) => return done.deliver(CallbackStatus::lib_error(ErrorCode::BadArgs, "invalid object path"), ()),
                };
                let mut msg = Message::signal(
                    &path,
                    &interface::INTERFACE_NAME.into(),
                    &interface::SIGNAL_MEMBER.into(),
                );
                if let Err(e) = msg.append2_str(&sig_name, &data) {
                    return done.deliver(CallbackStatus::lib_error(e.code(), "unable to build signal"), ());
                }
                match entry.send(&msg) {
                    Ok(_) => done.deliver(CallbackStatus::ok(), ()),
                    Err(e) => done.deliver(CallbackStatus::lib_error(e.code(), "unable to send signal"), ()),
                }
            }
            Command::Cancel { target, done } => match core.cancel_pending_by_handle(target) {
                Ok(()) => done.deliver(CallbackStatus::ok(), ()),
                Err(e) => done.deliver(CallbackStatus::lib_error(e.code(), "no pending command with that handle"), ()),
            },
            Command::NameHasOwner { conn, bus_name, done } => {
                execute_name_has_owner(core, handle, conn, bus_name, done)
            }
            Command::ReturnResult { conn, request, result, done } => {
                let entry = match core.connection(conn) {
                    Some(e) => e,
                    None => {
                        return done
                            .deliver(CallbackStatus::lib_error(ErrorCode::NotConnected, "connection is closed"), ())
                    }
                };
                let status = context::send_reply(&entry, &request, &result);
                done.deliver(status_from_error(status), ());
            }
            Command::ReturnError { conn, request, err_name, err_msg, done } => {
                let entry = match core.connection(conn) {
                    Some(e) => e,
                    None => {
                        return done
                            .deliver(CallbackStatus::lib_error(ErrorCode::NotConnected, "connection is closed"), ())
                    }
                };
                let status = context::send_error(&entry, &request, &err_name, &err_msg);
                done.deliver(status_from_error(status), ());
            }
            Command::FreeRequestContext { request } => drop(request),
            Command::Shutdown { sem } => {
                core.force_release_all();
                core.stop();
                sem.post();
            }
        }
    }

    /// Terminal delivery for a command that was queued but will never run
    /// (the dispatcher stopped first).
    pub fn cancel_offline(self) {
        let cancelled = CallbackStatus::cancelled;
        match self {
            Command::OpenConnection { done, .. } => done.deliver(cancelled(), None),
            Command::GetConnection { done, .. } => done.deliver(cancelled(), None),
            Command::CloseConnection { done, .. } => done.deliver(cancelled(), ()),
            Command::Subscribe { done, .. } => done.deliver(cancelled(), None),
            Command::SubscribeOwnerChanged { done, .. } => done.deliver(cancelled(), None),
            Command::Unsubscribe { done, .. } => done.deliver(cancelled(), ()),
            Command::RegisterService { done, .. } => done.deliver(cancelled(), None),
            Command::UnregisterService { done, .. } => done.deliver(cancelled(), ()),
            Command::Invoke { done, .. } => done.deliver(cancelled(), None),
            Command::Emit { done, .. } => done.deliver(cancelled(), ()),
            Command::Cancel { done, .. } => done.deliver(cancelled(), ()),
            Command::NameHasOwner { done, .. } => done.deliver(cancelled(), false),
            Command::ReturnResult { done, .. } => done.deliver(cancelled(), ()),
            Command::ReturnError { done, .. } => done.deliver(cancelled(), ()),
            Command::FreeRequestContext { request } => drop(request),
            Command::Shutdown { sem } => sem.post(),
        }
    }
}

fn execute_open(core: &DispatcherCore, target: ConnTarget, private: bool, done: Completion<Option<Connection>>) {
    match ConnectionEntry::open(core, &target, private) {
        Ok(conn) => done.deliver(CallbackStatus::ok(), Some(conn)),
        Err(status) => done.deliver(status, None),
    }
}

fn execute_invoke(
    core: &DispatcherCore,
    handle: Handle,
    conn: Connection,
    bus_name: String,
    obj_path: Option<String>,
    method: String,
    parameters: String,
    no_reply: bool,
    timeout_ms: i32,
    done: Completion<Option<String>>,
) {
    let entry = match core.connection(conn) {
        Some(e) => e,
        None => return done.deliver(unknown_connection(), None),
    };
    let dest = match BusName::new(bus_name.as_str()) {
        Ok(d) => d.into_static(),
        Err(_) => return done.deliver(CallbackStatus::lib_error(ErrorCode::BadArgs, "invalid bus name"), None),
    };
    let path = obj_path.unwrap_or_else(|| derive_object_path(&bus_name));
    let path = match Path::new(path) {
        Ok(p) => p.into_static(),
        Err(_) => return done.deliver(CallbackStatus::lib_error(ErrorCode::BadArgs, "invalid object path"), None),
    };
    let mut msg = Message::method_call(
        &dest,
        &path,
        &interface::INTERFACE_NAME.into(),
        &interface::METHOD_MEMBER.into(),
    );
    if let Err(e) = msg.append2_str(&method, &parameters) {
        return done.deliver(CallbackStatus::lib_error(e.code(), "unable to build method call"), None);
    }

    if no_reply {
        msg.set_no_reply(true);
        match entry.send(&msg) {
            Ok(_) => done.deliver(CallbackStatus::ok(), None),
            Err(e) => done.deliver(CallbackStatus::lib_error(e.code(), "unable to send method call"), None),
        }
    } else {
        defer_daemon_call_with_timeout(&entry, handle, msg, timeout_ms as c_int, PendingOp::Invoke { done });
    }
}

/// A deferred command parked on its connection: the sent pending call plus
/// what to do when the reply (or cancellation) arrives.
pub(crate) struct PendingCmd {
    call: *mut ffi::DBusPendingCall,
    op: PendingOp,
}

pub(crate) enum PendingOp {
    Subscribe {
        sub: Rc<SignalSubscription>,
        done: Completion<Option<Subscription>>,
    },
    Unsubscribe {
        sub: Subscription,
        done: Completion<()>,
    },
    RegisterService {
        reg: Rc<ServiceRegistration>,
        done: Completion<Option<Registration>>,
    },
    UnregisterService {
        reg: Registration,
        done: Completion<()>,
    },
    Invoke {
        done: Completion<Option<String>>,
    },
    NameHasOwner {
        done: Completion<bool>,
    },
}

impl PendingCmd {
    /// Reply notification: steal the reply and finish the parked command.
    pub fn complete(self, entry: &ConnectionEntry) {
        let reply = unsafe { ffi::dbus_pending_call_steal_reply(self.call) };
        unsafe { ffi::dbus_pending_call_unref(self.call) };
        let reply = if reply.is_null() { None } else { Some(Message::from_ptr(reply, false)) };
        self.op.on_reply(entry, reply);
    }

    /// Best-effort cancellation. A reply that already arrived is stolen and
    /// dropped; an outstanding call is cancelled. Either way the originator
    /// receives its single `Cancelled` delivery.
    pub fn cancel(self) {
        unsafe {
            if ffi::dbus_pending_call_get_completed(self.call) != 0 {
                let reply = ffi::dbus_pending_call_steal_reply(self.call);
                if !reply.is_null() {
                    ffi::dbus_message_unref(reply);
                }
            } else {
                ffi::dbus_pending_call_cancel(self.call);
            }
            ffi::dbus_pending_call_unref(self.call);
        }
        self.op.cancelled();
    }
}

impl PendingOp {
    fn on_reply(self, entry: &ConnectionEntry, reply: Option<Message>) {
        match self {
            PendingOp::Subscribe { sub, done } => match classify(reply) {
                Reply::Value(_) => {
                    let token = entry.core().next_token();
                    entry.add_subscription(token, sub);
                    done.deliver(CallbackStatus::ok(), Some(Subscription(token)));
                }
                Reply::Failed(status) => {
                    // The daemon may have installed the rule before failing.
                    if let Ok(msg) = remove_match_msg(sub.rule()) {
                        send_one_way(entry, msg);
                    }
                    done.deliver(status, None);
                }
            },
            PendingOp::Unsubscribe { sub, done } => match classify(reply) {
                Reply::Value(_) => {
                    entry.remove_subscription(sub.0);
                    done.deliver(CallbackStatus::ok(), ());
                }
                Reply::Failed(status) => done.deliver(status, ()),
            },
            PendingOp::RegisterService { reg, done } => match classify(reply) {
                Reply::Value(r) => {
                    let code = r.read1_u32().unwrap_or(0);
                    let primary = code == ffi::DBusRequestNameReply::PrimaryOwner as u32;
                    let already = code == ffi::DBusRequestNameReply::AlreadyOwner as u32;
                    if primary || already {
                        let token = entry.core().next_token();
                        entry.add_registration(token, reg);
                        done.deliver(CallbackStatus::ok(), Some(Registration(token)));
                    } else {
                        if let Ok(msg) = release_name_msg(reg.bus_name()) {
                            send_one_way(entry, msg);
                        }
                        done.deliver(
                            CallbackStatus::bus_error(
                                Some(ErrorCode::Dbus.name().to_string()),
                                Some(format!("unable to own bus name (reply code {})", code)),
                            ),
                            None,
                        );
                    }
                }
                Reply::Failed(status) => {
                    if let Ok(msg) = release_name_msg(reg.bus_name()) {
                        send_one_way(entry, msg);
                    }
                    done.deliver(status, None);
                }
            },
            PendingOp::UnregisterService { reg, done } => {
                // The registration goes away no matter what the daemon said.
                let removed = entry.remove_registration(reg.0);
                match classify(reply) {
                    Reply::Value(r) => {
                        let code = r.read1_u32().unwrap_or(0);
                        if code != ffi::DBusReleaseNameReply::Released as u32 {
                            if let Some(found) = removed {
                                log::warn!("bus name '{}' was not released (reply code {})", found.bus_name(), code);
                            }
                        }
                        done.deliver(CallbackStatus::ok(), ());
                    }
                    Reply::Failed(status) => done.deliver(status, ()),
                }
            }
            PendingOp::Invoke { done } => match classify(reply) {
                Reply::Value(r) => {
                    let result = r.read1_str().unwrap_or_else(|| interface::DEFAULT_PAYLOAD.to_string());
                    done.deliver(CallbackStatus::ok(), Some(result));
                }
                Reply::Failed(status) => done.deliver(status, None),
            },
            PendingOp::NameHasOwner { done } => match classify(reply) {
                Reply::Value(r) => done.deliver(CallbackStatus::ok(), r.read1_bool().unwrap_or(false)),
                Reply::Failed(status) => done.deliver(status, false),
            },
        }
    }

    fn cancelled(self) {
        let status = CallbackStatus::cancelled();
        match self {
            PendingOp::Subscribe { done, .. } => done.deliver(status, None),
            PendingOp::Unsubscribe { done, .. } => done.deliver(status, ()),
            PendingOp::RegisterService { done, .. } => done.deliver(status, None),
            PendingOp::UnregisterService { done, .. } => done.deliver(status, ()),
            PendingOp::Invoke { done } => done.deliver(status, None),
            PendingOp::NameHasOwner { done } => done.deliver(status, false),
        }
    }

    fn fail(self, status: CallbackStatus) {
        match self {
            PendingOp::Subscribe { done, .. } => done.deliver(status, None),
            PendingOp::Unsubscribe { done, .. } => done.deliver(status, ()),
            PendingOp::RegisterService { done, .. } => done.deliver(status, None),
            PendingOp::UnregisterService { done, .. } => done.deliver(status, ()),
            PendingOp::Invoke { done } => done.deliver(status, None),
            PendingOp::NameHasOwner { done } => done.deliver(status, false),
        }
    }
}

enum Reply {
    Value(Message),
    Failed(CallbackStatus),
}

/// Splits a pending-call reply into a usable value or a failure status
/// carrying the daemon's error name and message.
fn classify(reply: Option<Message>) -> Reply {
    match reply {
        Some(r) => {
            if r.msg_type() == MessageType::Error {
                match r.error_info() {
                    Some(e) => Reply::Failed(CallbackStatus::bus_error(e.name_owned(), e.message_owned())),
                    None => Reply::Failed(CallbackStatus::bus_error(None, None)),
                }
            } else {
                Reply::Value(r)
            }
        }
        None => Reply::Failed(CallbackStatus::lib_error(ErrorCode::Internal, "pending call produced no reply")),
    }
}

struct NotifyCtx {
    entry: *const ConnectionEntry,
    handle: Handle,
}

extern "C" fn pending_call_notify_cb(call: *mut ffi::DBusPendingCall, data: *mut c_void) {
    let ctx = unsafe { &*(data as *const NotifyCtx) };
    let entry = unsafe { &*ctx.entry };
    if let Some(cmd) = entry.take_pending(ctx.handle) {
        debug_assert!(cmd.call == call);
        if catch_unwind(AssertUnwindSafe(move || cmd.complete(entry))).is_err() {
            log::error!("pending call completion panicked");
        }
    }
}

extern "C" fn free_notify_ctx(data: *mut c_void) {
    unsafe { drop(Box::from_raw(data as *mut NotifyCtx)) };
}

fn execute_name_has_owner(
    core: &DispatcherCore,
    handle: Handle,
    conn: Connection,
    bus_name: String,
    done: Completion<bool>,
) {
    let entry = match core.connection(conn) {
        Some(e) => e,
        None => return done.deliver(unknown_connection(), false),
    };
    let mut msg = daemon_call("NameHasOwner");
    if let Err(e) = msg.append_str(&bus_name) {
        return done.deliver(CallbackStatus::lib_error(e.code(), "unable to build daemon call"), false);
    }
    defer_daemon_call(&entry, handle, msg, PendingOp::NameHasOwner { done });
}

fn defer_daemon_call(entry: &Rc<ConnectionEntry>, handle: Handle, msg: Message, op: PendingOp) {
    defer_daemon_call_with_timeout(entry, handle, msg, -1, op)
}

/// Sends a method call without blocking and parks `op` in the connection's
/// pending set, keyed by the submitting command's handle.
fn defer_daemon_call_with_timeout(
    entry: &Rc<ConnectionEntry>,
    handle: Handle,
    msg: Message,
    timeout_ms: c_int,
    op: PendingOp,
) {
    let mut call: *mut ffi::DBusPendingCall = ptr::null_mut();
    let sent = unsafe { ffi::dbus_connection_send_with_reply(entry.raw(), msg.ptr(), &mut call, timeout_ms) != 0 };
    if !sent {
        return op.fail(CallbackStatus::lib_error(ErrorCode::NoMemory, "unable to queue method call"));
    }
    if call.is_null() {
        return op.fail(CallbackStatus::lib_error(ErrorCode::NotConnected, "connection is closed"));
    }
    let ctx = Box::new(NotifyCtx { entry: Rc::as_ptr(entry), handle });
    let armed = unsafe {
        ffi::dbus_pending_call_set_notify(
            call,
            Some(pending_call_notify_cb),
            Box::into_raw(ctx) as *mut c_void,
            Some(free_notify_ctx),
        ) != 0
    };
    if !armed {
        unsafe {
            ffi::dbus_pending_call_cancel(call);
            ffi::dbus_pending_call_unref(call);
        }
        return op.fail(CallbackStatus::lib_error(ErrorCode::NoMemory, "unable to arm reply notification"));
    }
    entry.add_pending(handle, PendingCmd { call, op });
}

fn daemon_call(member: &str) -> Message {
    Message::method_call(
        &interface::DBUS_SERVICE.into(),
        &interface::DBUS_PATH.into(),
        &interface::DBUS_INTERFACE.into(),
        &member.into(),
    )
}

fn add_match_msg(rule: &str) -> Result<Message, CallbackStatus> {
    let mut msg = daemon_call("AddMatch");
    msg.append_str(rule)
        .map_err(|e| CallbackStatus::lib_error(e.code(), "unable to build AddMatch"))?;
    Ok(msg)
}

fn remove_match_msg(rule: &str) -> Result<Message, CallbackStatus> {
    let mut msg = daemon_call("RemoveMatch");
    msg.append_str(rule)
        .map_err(|e| CallbackStatus::lib_error(e.code(), "unable to build RemoveMatch"))?;
    Ok(msg)
}

fn request_name_msg(bus_name: &str) -> Result<Message, CallbackStatus> {
    let mut msg = daemon_call("RequestName");
    let flags = ffi::DBUS_NAME_FLAG_DO_NOT_QUEUE as u32 | ffi::DBUS_NAME_FLAG_REPLACE_EXISTING as u32;
    if let Err(e) = msg.append_str(bus_name) {
        return Err(CallbackStatus::lib_error(e.code(), "unable to build RequestName"));
    }
    if let Err(e) = msg.append_u32(flags) {
        return Err(CallbackStatus::lib_error(e.code(), "unable to build RequestName"));
    }
    Ok(msg)
}

fn release_name_msg(bus_name: &str) -> Result<Message, CallbackStatus> {
    let mut msg = daemon_call("ReleaseName");
    msg.append_str(bus_name)
        .map_err(|e| CallbackStatus::lib_error(e.code(), "unable to build ReleaseName"))?;
    Ok(msg)
}

fn send_one_way(entry: &ConnectionEntry, mut msg: Message) {
    msg.set_no_reply(true);
    let _ = entry.send(&msg);
}

fn unknown_connection() -> CallbackStatus {
    CallbackStatus::lib_error(ErrorCode::BadArgs, "connection does not exist")
}

fn status_from_error(error: Error) -> CallbackStatus {
    if error.is_error() {
        CallbackStatus::lib_error(error.code(), "request reply could not be sent")
    } else {
        CallbackStatus::ok()
    }
}
