//! Service registrations: the owned bus name, the object path requests are
//! delivered on, and the introspection fragment advertised for it.

use std::cell::RefCell;

use crate::connection::Connection;
use crate::context::RequestContext;
use crate::interface;
use crate::message::Message;
use crate::subscription::warn_if_slow;
use crate::sync::now_millis;

/// Identifies an established service registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Registration(pub(crate) u64);

pub(crate) type RequestHandler = Box<dyn FnMut(RequestContext, &str, &str, bool) + Send>;

/// One registered service: requests arriving at `obj_path` are handed to
/// `on_request`.
pub(crate) struct ServiceRegistration {
    bus_name: String,
    obj_path: String,
    #[allow(dead_code)]
    flags: u32,
    on_request: RefCell<RequestHandler>,
}

impl ServiceRegistration {
    pub fn new(bus_name: String, obj_path: Option<String>, flags: u32, on_request: RequestHandler) -> ServiceRegistration {
        let obj_path = match obj_path {
            Some(p) if !p.is_empty() => p,
            _ => derive_object_path(&bus_name),
        };
        ServiceRegistration { bus_name, obj_path, flags, on_request: RefCell::new(on_request) }
    }

    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    pub fn object_path(&self) -> &str {
        &self.obj_path
    }

    /// Hands an incoming request to the service callback. The callback owns
    /// the created [`RequestContext`] and is responsible for freeing it.
    pub fn dispatch(&self, conn: Connection, msg: &Message, method: &str, parameters: &str, max_proc_msec: u64) {
        let context = RequestContext::new(conn, msg.clone_ref());
        let no_reply = msg.get_no_reply();
        let started = now_millis();
        (self.on_request.borrow_mut())(context, method, parameters, no_reply);
        warn_if_slow("method", method, started, max_proc_msec);
    }

    /// Appends the interface block advertised for this object.
    pub fn introspect_into(&self, xml: &mut String) {
        xml.push_str(interface::INTROSPECT_INTERFACES);
    }
}

/// The default object path for a bus name: prefix with `/`, map `.` to `/`
/// and `-` to `_`, and squash anything else non-alphanumeric to `_`.
pub(crate) fn derive_object_path(bus_name: &str) -> String {
    let mut path = String::with_capacity(bus_name.len() + 1);
    path.push('/');
    for c in bus_name.chars() {
        match c {
            '.' => path.push('/'),
            '-' => path.push('_'),
            c if c.is_ascii_alphanumeric() || c == '_' => path.push(c),
            _ => path.push('_'),
        }
    }
    path
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn derived_paths() {
        assert_eq!(derive_object_path("com.example.svc"), "/com/example/svc");
        assert_eq!(derive_object_path("com.ex-ample.svc"), "/com/ex_ample/svc");
        assert_eq!(derive_object_path("com.ex+ample.svc2"), "/com/ex_ample/svc2");
    }

    #[test]
    fn default_path_applies_when_absent() {
        let reg = ServiceRegistration::new("com.example.echo".into(), None, 0, Box::new(|_, _, _, _| {}));
        assert_eq!(reg.object_path(), "/com/example/echo");
        let reg = ServiceRegistration::new("com.example.echo".into(), Some(String::new()), 0, Box::new(|_, _, _, _| {}));
        assert_eq!(reg.object_path(), "/com/example/echo");
        let reg = ServiceRegistration::new("com.example.echo".into(), Some("/custom".into()), 0, Box::new(|_, _, _, _| {}));
        assert_eq!(reg.object_path(), "/custom");
    }

    #[test]
    fn interface_block_lists_the_contract() {
        let reg = ServiceRegistration::new("com.example.echo".into(), None, 0, Box::new(|_, _, _, _| {}));
        let mut xml = String::new();
        reg.introspect_into(&mut xml);
        assert!(xml.contains("<interface name=\"com.hsae.dbusipc\">"));
        assert!(xml.contains("<method name=\"Invoke\">"));
        assert!(xml.contains("<signal name=\"Emit\">"));
        assert!(xml.contains("org.freedesktop.DBus.Introspectable"));
    }
}
