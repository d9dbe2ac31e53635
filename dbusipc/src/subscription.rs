//! Signal subscriptions: the match rule registered with the daemon and the
//! routing of incoming signals to user callbacks.

use std::cell::RefCell;

use crate::interface;
use crate::message::Message;
use crate::sync::now_millis;

/// Identifies an established signal (or name-owner-changed) subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subscription(pub(crate) u64);

pub(crate) type SignalHandler = Box<dyn FnMut(&str, &str) + Send>;
pub(crate) type OwnerChangedHandler = Box<dyn FnMut(&str, &str, &str) + Send>;

enum SubscriptionKind {
    /// A user signal emitted by a service through this library.
    UserSignal { obj_path: String, sig_name: String, on_signal: RefCell<SignalHandler> },
    /// The daemon's NameOwnerChanged signal, optionally narrowed to one name.
    OwnerChanged { bus_name: Option<String>, on_change: RefCell<OwnerChangedHandler> },
}

/// One established subscription. The match rule is derived on construction
/// and is the unit of AddMatch/RemoveMatch with the bus daemon.
pub(crate) struct SignalSubscription {
    rule: String,
    kind: SubscriptionKind,
}

impl SignalSubscription {
    pub fn user_signal(obj_path: String, sig_name: String, on_signal: SignalHandler) -> SignalSubscription {
        let rule = format!(
            "type='signal',interface='{}',member='{}',path='{}',arg0='{}'",
            interface::INTERFACE_NAME,
            interface::SIGNAL_MEMBER,
            obj_path,
            sig_name
        );
        SignalSubscription {
            rule,
            kind: SubscriptionKind::UserSignal { obj_path, sig_name, on_signal: RefCell::new(on_signal) },
        }
    }

    pub fn owner_changed(bus_name: Option<String>, on_change: OwnerChangedHandler) -> SignalSubscription {
        // Without a bus name the rule matches ownership changes of any name.
        let rule = match &bus_name {
            Some(name) => format!(
                "type='signal',interface='{}',member='NameOwnerChanged',path='{}',arg0='{}'",
                interface::DBUS_INTERFACE,
                interface::DBUS_PATH,
                name
            ),
            None => format!(
                "type='signal',interface='{}',member='NameOwnerChanged',path='{}'",
                interface::DBUS_INTERFACE,
                interface::DBUS_PATH
            ),
        };
        SignalSubscription { rule, kind: SubscriptionKind::OwnerChanged { bus_name, on_change: RefCell::new(on_change) } }
    }

    pub fn rule(&self) -> &str {
        &self.rule
    }

    /// Routes `msg` to the user callback when it matches this subscription.
    /// Returns whether the message matched.
    pub fn dispatch_if_match(&self, msg: &Message, max_proc_msec: u64) -> bool {
        match &self.kind {
            SubscriptionKind::UserSignal { obj_path, sig_name, on_signal } => {
                if !msg.is_signal(interface::INTERFACE_NAME, interface::SIGNAL_MEMBER) || !msg.has_path(obj_path) {
                    return false;
                }
                let (name, data) = match msg.read2_str() {
                    Some(v) => v,
                    None => match msg.read1_str() {
                        Some(n) => (n, String::new()),
                        None => return false,
                    },
                };
                if name != *sig_name {
                    return false;
                }
                let started = now_millis();
                (on_signal.borrow_mut())(sig_name, &data);
                warn_if_slow("signal", sig_name, started, max_proc_msec);
                true
            }
            SubscriptionKind::OwnerChanged { bus_name, on_change } => {
                if !msg.is_signal(interface::DBUS_INTERFACE, "NameOwnerChanged") || !msg.has_path(interface::DBUS_PATH) {
                    return false;
                }
                let (new_name, old_owner, new_owner) = match msg.read3_str() {
                    Some(v) => v,
                    None => return false,
                };
                if let Some(wanted) = bus_name {
                    if *wanted != new_name {
                        return false;
                    }
                }
                let started = now_millis();
                (on_change.borrow_mut())(&new_name, &old_owner, &new_owner);
                warn_if_slow("name owner change", &new_name, started, max_proc_msec);
                true
            }
        }
    }
}

/// The dispatch thread is single-threaded; a slow handler stalls all other
/// I/O, so overruns of the configured bound are logged.
pub(crate) fn warn_if_slow(what: &str, name: &str, started: u64, max_proc_msec: u64) {
    let elapsed = now_millis().saturating_sub(started);
    if elapsed > max_proc_msec {
        log::warn!("{} handler for '{}' ran {} msec, limit is {} msec", what, name, elapsed, max_proc_msec);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::Message;

    fn emit_msg(path: &str, name: &str, data: &str) -> Message {
        let mut m = Message::signal(&path.into(), &interface::INTERFACE_NAME.into(), &interface::SIGNAL_MEMBER.into());
        m.append2_str(name, data).unwrap();
        m
    }

    #[test]
    fn user_signal_rule() {
        let sub = SignalSubscription::user_signal("/com/example/obj".into(), "Chimed".into(), Box::new(|_, _| {}));
        assert_eq!(
            sub.rule(),
            "type='signal',interface='com.hsae.dbusipc',member='Emit',path='/com/example/obj',arg0='Chimed'"
        );
    }

    #[test]
    fn owner_changed_rules() {
        let any = SignalSubscription::owner_changed(None, Box::new(|_, _, _| {}));
        assert_eq!(
            any.rule(),
            "type='signal',interface='org.freedesktop.DBus',member='NameOwnerChanged',path='/org/freedesktop/DBus'"
        );
        let one = SignalSubscription::owner_changed(Some("com.example.svc".into()), Box::new(|_, _, _| {}));
        assert!(one.rule().ends_with(",arg0='com.example.svc'"));
    }

    #[test]
    fn signal_matching_routes_payload() {
        use std::sync::{Arc, Mutex};
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let sub = SignalSubscription::user_signal(
            "/com/example/obj".into(),
            "Chimed".into(),
            Box::new(move |name, data| seen2.lock().unwrap().push((name.to_string(), data.to_string()))),
        );

        assert!(sub.dispatch_if_match(&emit_msg("/com/example/obj", "Chimed", "{\"n\":3}"), u64::max_value()));
        assert!(!sub.dispatch_if_match(&emit_msg("/com/example/obj", "Other", "{}"), u64::max_value()));
        assert!(!sub.dispatch_if_match(&emit_msg("/com/example/other", "Chimed", "{}"), u64::max_value()));

        let seen = seen.lock().unwrap();
        assert_eq!(&*seen, &[("Chimed".to_string(), "{\"n\":3}".to_string())]);
    }

    #[test]
    fn owner_changed_matching() {
        use std::sync::{Arc, Mutex};
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let sub = SignalSubscription::owner_changed(
            Some("com.example.svc".into()),
            Box::new(move |n, o, w| seen2.lock().unwrap().push((n.to_string(), o.to_string(), w.to_string()))),
        );

        let mut m = Message::signal(
            &interface::DBUS_PATH.into(),
            &interface::DBUS_INTERFACE.into(),
            &"NameOwnerChanged".into(),
        );
        m.append_str("com.example.svc").unwrap();
        m.append_str("").unwrap();
        m.append_str(":1.42").unwrap();
        assert!(sub.dispatch_if_match(&m, u64::max_value()));

        let mut other = Message::signal(
            &interface::DBUS_PATH.into(),
            &interface::DBUS_INTERFACE.into(),
            &"NameOwnerChanged".into(),
        );
        other.append_str("com.example.unrelated").unwrap();
        other.append_str("").unwrap();
        other.append_str(":1.43").unwrap();
        assert!(!sub.dispatch_if_match(&other, u64::max_value()));

        assert_eq!(
            &*seen.lock().unwrap(),
            &[("com.example.svc".to_string(), "".to_string(), ":1.42".to_string())]
        );
    }
}
