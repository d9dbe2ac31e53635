//! Logical bus connections: the process-wide cache, reference counting,
//! the incoming message filter, and introspection of registered objects.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::ffi::CString;
use std::os::raw::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use crate::command::PendingCmd;
use crate::config;
use crate::dispatcher::{self, DispatcherCore};
use crate::error::{Error, ErrorCode};
use crate::ffi;
use crate::interface;
use crate::message::{BusError, Message, MessageType};
use crate::registration::ServiceRegistration;
use crate::subscription::SignalSubscription;
use crate::to_c_str;
use crate::types::{BusType, CallbackStatus, Handle};

/// An opened bus connection. Cheap to copy; the worker-side state lives in
/// the dispatcher's connection cache until the last close releases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Connection(pub(crate) u32);

/// What to connect to: an explicit address or a well-known bus.
pub(crate) enum ConnTarget {
    Address(String),
    Bus(BusType),
}

/// Worker-side state of one logical connection.
pub(crate) struct ConnectionEntry {
    id: u32,
    raw: *mut ffi::DBusConnection,
    private: bool,
    core: *const DispatcherCore,
    ref_count: Cell<u32>,
    max_dispatch_proc_time: u64,
    subscriptions: RefCell<BTreeMap<u64, Rc<SignalSubscription>>>,
    registrations: RefCell<BTreeMap<u64, Rc<ServiceRegistration>>>,
    pending: RefCell<BTreeMap<Handle, PendingCmd>>,
}

impl ConnectionEntry {
    /// Opens (or re-acquires from the cache) a connection. Each successful
    /// call holds one reference on the underlying libdbus connection, paid
    /// back by the matching [`dec_ref`](Self::dec_ref).
    pub fn open(core: &DispatcherCore, target: &ConnTarget, private: bool) -> Result<Connection, CallbackStatus> {
        let mut e = BusError::empty();
        let raw = match target {
            ConnTarget::Address(address) => {
                let c_addr = match CString::new(address.as_str()) {
                    Ok(c) => c,
                    Err(_) => return Err(CallbackStatus::lib_error(ErrorCode::BadArgs, "bad connection address")),
                };
                let raw = unsafe {
                    if private {
                        ffi::dbus_connection_open_private(c_addr.as_ptr(), e.get_mut())
                    } else {
                        ffi::dbus_connection_open(c_addr.as_ptr(), e.get_mut())
                    }
                };
                if raw.is_null() {
                    return Err(CallbackStatus::bus_error(e.name_owned(), e.message_owned()));
                }
                // Address connections are not registered with the daemon yet.
                let mut reg_err = BusError::empty();
                if unsafe { ffi::dbus_bus_register(raw, reg_err.get_mut()) } == 0 {
                    unsafe {
                        if private {
                            ffi::dbus_connection_close(raw);
                        }
                        ffi::dbus_connection_unref(raw);
                    }
                    return Err(CallbackStatus::bus_error(reg_err.name_owned(), reg_err.message_owned()));
                }
                raw
            }
            ConnTarget::Bus(bus) => {
                let bus = match bus {
                    BusType::Session => ffi::DBusBusType::Session,
                    BusType::System => ffi::DBusBusType::System,
                    BusType::Starter => ffi::DBusBusType::Starter,
                };
                let raw = unsafe {
                    if private {
                        ffi::dbus_bus_get_private(bus, e.get_mut())
                    } else {
                        ffi::dbus_bus_get(bus, e.get_mut())
                    }
                };
                if raw.is_null() {
                    return Err(CallbackStatus::bus_error(e.name_owned(), e.message_owned()));
                }
                raw
            }
        };

        // A shared open can hand back an underlying connection we already
        // manage; that re-acquisition is just another logical reference.
        if let Some(existing) = core.find_connection_by_raw(raw) {
            existing.inc_ref();
            return Ok(Connection(existing.id));
        }

        let entry = Rc::new(ConnectionEntry {
            id: core.next_conn_id(),
            raw,
            private,
            core: core as *const DispatcherCore,
            ref_count: Cell::new(1),
            max_dispatch_proc_time: config::max_dispatch_proc_time(),
            subscriptions: RefCell::new(BTreeMap::new()),
            registrations: RefCell::new(BTreeMap::new()),
            pending: RefCell::new(BTreeMap::new()),
        });

        let cleanup = |raw: *mut ffi::DBusConnection| unsafe {
            if private {
                ffi::dbus_connection_close(raw);
            }
            ffi::dbus_connection_unref(raw);
        };

        unsafe {
            ffi::dbus_connection_set_exit_on_disconnect(raw, 0);
            ffi::dbus_connection_set_dispatch_status_function(
                raw,
                Some(dispatch_status_cb),
                Rc::as_ptr(&entry) as *mut c_void,
                None,
            );
            if ffi::dbus_connection_set_watch_functions(
                raw,
                Some(dispatcher::add_watch_cb),
                Some(dispatcher::remove_watch_cb),
                Some(dispatcher::toggled_watch_cb),
                core as *const DispatcherCore as *mut c_void,
                None,
            ) == 0
            {
                cleanup(raw);
                return Err(CallbackStatus::lib_error(ErrorCode::NoMemory, "unable to install watch handlers"));
            }
            if ffi::dbus_connection_set_timeout_functions(
                raw,
                Some(dispatcher::add_timeout_cb),
                Some(dispatcher::remove_timeout_cb),
                Some(dispatcher::toggled_timeout_cb),
                core as *const DispatcherCore as *mut c_void,
                None,
            ) == 0
            {
                cleanup(raw);
                return Err(CallbackStatus::lib_error(ErrorCode::NoMemory, "unable to install timeout handlers"));
            }
            if ffi::dbus_connection_add_filter(raw, Some(message_filter_cb), Rc::as_ptr(&entry) as *mut c_void, None) == 0 {
                cleanup(raw);
                return Err(CallbackStatus::lib_error(ErrorCode::NoMemory, "unable to add message filter"));
            }
        }

        let conn = Connection(entry.id);
        core.insert_connection(entry);
        core.add_pending_dispatch(conn.0);
        Ok(conn)
    }

    pub fn id(&self) -> Connection {
        Connection(self.id)
    }

    pub fn raw(&self) -> *mut ffi::DBusConnection {
        self.raw
    }

    pub fn core(&self) -> &DispatcherCore {
        // The core strictly outlives every connection entry; both are torn
        // down on the dispatch thread, connections first.
        unsafe { &*self.core }
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.get()
    }

    pub fn inc_ref(&self) {
        self.ref_count.set(self.ref_count.get() + 1);
    }

    /// Releases one logical reference. At zero the connection deregisters
    /// outstanding match rules and owned bus names, stops filtering, closes
    /// private connections and leaves the cache. Every call releases one
    /// reference on the underlying libdbus connection.
    pub fn dec_ref(self: &Rc<Self>, core: &DispatcherCore) {
        let remaining = self.ref_count.get().saturating_sub(1);
        self.ref_count.set(remaining);

        if remaining == 0 {
            if self.is_connected() {
                for sub in self.subscriptions.borrow().values() {
                    let mut e = BusError::empty();
                    let rule = to_c_str(sub.rule());
                    unsafe { ffi::dbus_bus_remove_match(self.raw, rule.as_ptr(), e.get_mut()) };
                }
                for reg in self.registrations.borrow().values() {
                    let mut e = BusError::empty();
                    let name = to_c_str(reg.bus_name());
                    unsafe { ffi::dbus_bus_release_name(self.raw, name.as_ptr(), e.get_mut()) };
                }
                self.flush();
            }

            unsafe {
                ffi::dbus_connection_remove_filter(self.raw, Some(message_filter_cb), Rc::as_ptr(self) as *mut c_void);
                ffi::dbus_connection_set_dispatch_status_function(self.raw, None, std::ptr::null_mut(), None);
                if self.private {
                    ffi::dbus_connection_close(self.raw);
                }
            }

            core.remove_connection(self.id);
            core.remove_pending_dispatch(self.id);

            // Commands still waiting on replies get their one terminal
            // delivery here.
            let pending = std::mem::replace(&mut *self.pending.borrow_mut(), BTreeMap::new());
            for (_, cmd) in pending {
                cmd.cancel();
            }

            self.subscriptions.borrow_mut().clear();
            self.registrations.borrow_mut().clear();
        }

        unsafe { ffi::dbus_connection_unref(self.raw) };
    }

    pub fn is_connected(&self) -> bool {
        unsafe { ffi::dbus_connection_get_is_connected(self.raw) != 0 }
    }

    /// Puts a message into the libdbus out queue.
    pub fn send(&self, msg: &Message) -> Result<u32, Error> {
        let mut serial = 0u32;
        let r = unsafe { ffi::dbus_connection_send(self.raw, msg.ptr(), &mut serial) };
        if r == 0 {
            Err(Error::lib(ErrorCode::ConnSend))
        } else {
            Ok(serial)
        }
    }

    pub fn flush(&self) {
        unsafe { ffi::dbus_connection_flush(self.raw) }
    }

    /// Runs the libdbus dispatch step until no buffered data remains.
    /// Returns whether dispatching completed (false asks to be retried).
    pub fn dispatch_messages(&self) -> bool {
        if !self.is_connected() {
            return true;
        }
        loop {
            match unsafe { ffi::dbus_connection_dispatch(self.raw) } {
                ffi::DBusDispatchStatus::DataRemains => continue,
                ffi::DBusDispatchStatus::Complete => return true,
                // Out of memory; leave the rest for a later tick.
                _ => return false,
            }
        }
    }

    pub fn add_subscription(&self, token: u64, sub: Rc<SignalSubscription>) {
        self.subscriptions.borrow_mut().insert(token, sub);
    }

    pub fn remove_subscription(&self, token: u64) -> Option<Rc<SignalSubscription>> {
        self.subscriptions.borrow_mut().remove(&token)
    }

    pub fn subscription(&self, token: u64) -> Option<Rc<SignalSubscription>> {
        self.subscriptions.borrow().get(&token).cloned()
    }

    pub fn add_registration(&self, token: u64, reg: Rc<ServiceRegistration>) {
        self.registrations.borrow_mut().insert(token, reg);
    }

    pub fn remove_registration(&self, token: u64) -> Option<Rc<ServiceRegistration>> {
        self.registrations.borrow_mut().remove(&token)
    }

    pub fn registration(&self, token: u64) -> Option<Rc<ServiceRegistration>> {
        self.registrations.borrow().get(&token).cloned()
    }

    pub fn add_pending(&self, handle: Handle, cmd: PendingCmd) {
        self.pending.borrow_mut().insert(handle, cmd);
    }

    pub fn take_pending(&self, handle: Handle) -> Option<PendingCmd> {
        self.pending.borrow_mut().remove(&handle)
    }

    /// The per-connection message filter. Returns whether the message was
    /// consumed.
    fn handle_message(&self, msg: &Message) -> bool {
        if msg.is_signal(interface::DBUS_INTERFACE_LOCAL, "Disconnected") && msg.has_path(interface::DBUS_PATH_LOCAL) {
            log::info!("connection {} disconnected by local bus", self.id);
            if self.private {
                unsafe { ffi::dbus_connection_close(self.raw) };
            }
            return true;
        }

        if msg.msg_type() == MessageType::Signal {
            // Every matching subscription sees the signal; handlers run on
            // a snapshot so they may unsubscribe freely.
            let subs: Vec<Rc<SignalSubscription>> = self.subscriptions.borrow().values().cloned().collect();
            let mut handled = false;
            for sub in subs {
                if sub.dispatch_if_match(msg, self.max_dispatch_proc_time) {
                    handled = true;
                }
            }
            return handled;
        }

        if msg.is_method_call(interface::INTERFACE_NAME, interface::METHOD_MEMBER) {
            let (method, parameters) = match msg.read2_str() {
                Some(v) => v,
                None => {
                    log::error!("failed to decode method call arguments");
                    return false;
                }
            };
            let regs: Vec<Rc<ServiceRegistration>> = self.registrations.borrow().values().cloned().collect();
            for reg in regs {
                if msg.has_path(reg.object_path()) {
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        reg.dispatch(Connection(self.id), msg, &method, &parameters, self.max_dispatch_proc_time)
                    }));
                    if outcome.is_err() {
                        log::warn!("request handler for '{}' panicked", method);
                    }
                    return true;
                }
            }
            return false;
        }

        if msg.is_method_call("org.freedesktop.DBus.Introspectable", "Introspect") {
            return self.introspect(msg);
        }

        false
    }

    /// Answers an Introspect call over the registered objects.
    fn introspect(&self, msg: &Message) -> bool {
        let obj_path = match msg.path() {
            Some(p) => p.to_string(),
            None => return false,
        };
        let mut reply = match msg.method_return() {
            Some(r) => r,
            None => return false,
        };
        let regs: Vec<Rc<ServiceRegistration>> = self.registrations.borrow().values().cloned().collect();
        let xml = introspect_xml(&regs, &obj_path);
        if reply.append_str(&xml).is_err() {
            return false;
        }
        self.send(&reply).is_ok()
    }
}

/// Builds the introspection document for `obj_path` over the given
/// registrations: the fixed interface block when the path is registered,
/// then one entry per unique immediate child, lexically sorted.
pub(crate) fn introspect_xml(regs: &[Rc<ServiceRegistration>], obj_path: &str) -> String {
    let mut xml = String::from(interface::INTROSPECT_DOCTYPE);

    let registered = regs.iter().find(|r| r.object_path() == obj_path);
    match registered {
        Some(reg) => {
            xml.push_str("<node name=\"");
            xml.push_str(obj_path);
            xml.push_str("\">\n");
            reg.introspect_into(&mut xml);
        }
        None => xml.push_str("<node>\n"),
    }

    let mut prefix = obj_path.to_string();
    if !prefix.ends_with('/') {
        prefix.push('/');
    }

    let mut children: Vec<&str> = Vec::new();
    for reg in regs {
        let path = reg.object_path();
        if path.len() > prefix.len() && path.starts_with(&prefix) {
            let rest = &path[prefix.len()..];
            children.push(match rest.find('/') {
                Some(i) => &rest[..i],
                None => rest,
            });
        }
    }
    children.sort_unstable();
    children.dedup();
    for child in children {
        xml.push_str("   <node name=\"");
        xml.push_str(child);
        xml.push_str("\"/>\n");
    }

    xml.push_str("</node>");
    xml
}

extern "C" fn dispatch_status_cb(_conn: *mut ffi::DBusConnection, status: ffi::DBusDispatchStatus, data: *mut c_void) {
    let entry = unsafe { &*(data as *const ConnectionEntry) };
    match status {
        ffi::DBusDispatchStatus::DataRemains => entry.core().add_pending_dispatch(entry.id),
        _ => {}
    }
}

pub(crate) extern "C" fn message_filter_cb(
    _conn: *mut ffi::DBusConnection,
    msg: *mut ffi::DBusMessage,
    data: *mut c_void,
) -> ffi::DBusHandlerResult {
    let entry = unsafe { &*(data as *const ConnectionEntry) };
    let msg = Message::from_ptr(msg, true);
    match catch_unwind(AssertUnwindSafe(|| entry.handle_message(&msg))) {
        Ok(true) => ffi::DBusHandlerResult::Handled,
        Ok(false) => ffi::DBusHandlerResult::NotYetHandled,
        Err(_) => {
            log::error!("message filter panicked");
            ffi::DBusHandlerResult::Handled
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registration::ServiceRegistration;

    fn reg(path: &str) -> Rc<ServiceRegistration> {
        Rc::new(ServiceRegistration::new(
            "com.example.svc".into(),
            Some(path.to_string()),
            0,
            Box::new(|_, _, _, _| {}),
        ))
    }

    #[test]
    fn introspect_exact_match() {
        let regs = vec![reg("/com/example/svc")];
        let xml = introspect_xml(&regs, "/com/example/svc");
        assert!(xml.starts_with("<!DOCTYPE node PUBLIC"));
        assert!(xml.contains("<node name=\"/com/example/svc\">"));
        assert!(xml.contains("<interface name=\"com.hsae.dbusipc\">"));
        assert!(xml.ends_with("</node>"));
    }

    #[test]
    fn introspect_parent_lists_sorted_unique_children() {
        let regs = vec![reg("/com/example/b/inner"), reg("/com/example/a"), reg("/com/example/b/other")];
        let xml = introspect_xml(&regs, "/com/example");
        assert!(xml.contains("<node>\n"));
        let a = xml.find("<node name=\"a\"/>").expect("child a");
        let b = xml.find("<node name=\"b\"/>").expect("child b");
        assert!(a < b);
        assert_eq!(xml.matches("<node name=\"b\"/>").count(), 1);
        assert!(!xml.contains("<interface"));
    }

    #[test]
    fn introspect_root_path() {
        let regs = vec![reg("/com/example/a")];
        let xml = introspect_xml(&regs, "/");
        assert!(xml.contains("<node name=\"com\"/>"));
    }

    #[test]
    fn introspect_unrelated_path_has_no_children() {
        let regs = vec![reg("/com/example/a")];
        let xml = introspect_xml(&regs, "/net/other");
        assert!(xml.contains("<node>\n"));
        assert!(!xml.contains("name=\"a\""));
    }
}
