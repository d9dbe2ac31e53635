//! Poll units owned by the dispatch thread: wrappers around libdbus
//! watches and timeouts, plus the wake-up pipe watch.

use std::cell::Cell;
use std::os::raw::c_uint;
use std::os::unix::io::RawFd;

use crate::ffi;
use crate::sync::now_millis;

pub(crate) fn dbus_flags_to_poll(flags: c_uint) -> libc::c_short {
    let mut events = 0 as libc::c_short;
    if flags & ffi::DBUS_WATCH_READABLE as c_uint != 0 {
        events |= libc::POLLIN;
    }
    if flags & ffi::DBUS_WATCH_WRITABLE as c_uint != 0 {
        events |= libc::POLLOUT;
    }
    if flags & ffi::DBUS_WATCH_HANGUP as c_uint != 0 {
        events |= libc::POLLHUP;
    }
    if flags & ffi::DBUS_WATCH_ERROR as c_uint != 0 {
        events |= libc::POLLERR;
    }
    events
}

pub(crate) fn poll_to_dbus_flags(revents: libc::c_short) -> c_uint {
    let mut flags = 0 as c_uint;
    if revents & libc::POLLIN != 0 {
        flags |= ffi::DBUS_WATCH_READABLE as c_uint;
    }
    if revents & libc::POLLOUT != 0 {
        flags |= ffi::DBUS_WATCH_WRITABLE as c_uint;
    }
    if revents & libc::POLLHUP != 0 {
        flags |= ffi::DBUS_WATCH_HANGUP as c_uint;
    }
    if revents & libc::POLLERR != 0 {
        flags |= ffi::DBUS_WATCH_ERROR as c_uint;
    }
    flags
}

pub(crate) enum WatchKind {
    /// A descriptor libdbus asked us to monitor.
    Bus(*mut ffi::DBusWatch),
    /// The read end of the command wake-up pipe.
    WakePipe,
}

/// A descriptor the dispatch thread polls, with its current interest set.
pub(crate) struct Watch {
    id: u64,
    fd: RawFd,
    flags: Cell<c_uint>,
    enabled: Cell<bool>,
    kind: WatchKind,
}

impl Watch {
    pub fn from_bus(id: u64, raw: *mut ffi::DBusWatch) -> Watch {
        unsafe {
            Watch {
                id,
                fd: ffi::dbus_watch_get_unix_fd(raw),
                flags: Cell::new(ffi::dbus_watch_get_flags(raw)),
                enabled: Cell::new(ffi::dbus_watch_get_enabled(raw) != 0),
                kind: WatchKind::Bus(raw),
            }
        }
    }

    pub fn wake_pipe(id: u64, fd: RawFd) -> Watch {
        let flags = ffi::DBUS_WATCH_READABLE as c_uint
            | ffi::DBUS_WATCH_HANGUP as c_uint
            | ffi::DBUS_WATCH_ERROR as c_uint;
        Watch { id, fd, flags: Cell::new(flags), enabled: Cell::new(true), kind: WatchKind::WakePipe }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn descriptor(&self) -> RawFd {
        self.fd
    }

    pub fn flags(&self) -> c_uint {
        self.flags.get()
    }

    pub fn enabled(&self) -> bool {
        self.enabled.get()
    }

    pub fn is_wake_pipe(&self) -> bool {
        match self.kind {
            WatchKind::WakePipe => true,
            _ => false,
        }
    }

    /// Re-reads interest and enablement from the underlying libdbus watch.
    /// The interest set may change between toggles.
    pub fn refresh(&self) {
        if let WatchKind::Bus(raw) = self.kind {
            unsafe {
                self.flags.set(ffi::dbus_watch_get_flags(raw));
                self.enabled.set(ffi::dbus_watch_get_enabled(raw) != 0);
            }
        }
    }

    /// Feeds descriptor activity back to libdbus. The wake pipe is handled
    /// by the dispatcher itself.
    pub fn handle_bus_activity(&self, flags: c_uint) -> bool {
        match self.kind {
            WatchKind::Bus(raw) => unsafe { ffi::dbus_watch_handle(raw, flags) != 0 },
            WatchKind::WakePipe => true,
        }
    }
}

/// A timer the dispatch thread arms for libdbus; expiry is tracked against
/// the monotonic millisecond clock.
pub(crate) struct Timeout {
    id: u64,
    raw: *mut ffi::DBusTimeout,
    interval: Cell<i64>,
    expiry: Cell<u64>,
    repeat: bool,
    enabled: Cell<bool>,
}

impl Timeout {
    pub fn from_bus(id: u64, raw: *mut ffi::DBusTimeout) -> Timeout {
        let t = Timeout {
            id,
            raw,
            interval: Cell::new(0),
            expiry: Cell::new(0),
            repeat: true,
            enabled: Cell::new(false),
        };
        t.refresh();
        t
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn enabled(&self) -> bool {
        self.enabled.get()
    }

    pub fn repeat(&self) -> bool {
        self.repeat
    }

    pub fn expiry(&self) -> u64 {
        self.expiry.get()
    }

    pub fn reset_expiry(&self) {
        self.expiry.set(now_millis().wrapping_add(self.interval.get() as u64));
    }

    /// Re-reads interval and enablement; the interval may change between
    /// toggles.
    pub fn refresh(&self) {
        unsafe {
            self.interval.set(ffi::dbus_timeout_get_interval(self.raw) as i64);
            self.enabled.set(ffi::dbus_timeout_get_enabled(self.raw) != 0);
        }
        if self.enabled.get() {
            self.reset_expiry();
        }
    }

    pub fn handle(&self) -> bool {
        unsafe { ffi::dbus_timeout_handle(self.raw) != 0 }
    }
}

pub(crate) fn set_watch_data(raw: *mut ffi::DBusWatch, id: u64) {
    unsafe { ffi::dbus_watch_set_data(raw, id as usize as *mut std::os::raw::c_void, None) }
}

pub(crate) fn watch_data(raw: *mut ffi::DBusWatch) -> u64 {
    unsafe { ffi::dbus_watch_get_data(raw) as usize as u64 }
}

pub(crate) fn set_timeout_data(raw: *mut ffi::DBusTimeout, id: u64) {
    unsafe { ffi::dbus_timeout_set_data(raw, id as usize as *mut std::os::raw::c_void, None) }
}

pub(crate) fn timeout_data(raw: *mut ffi::DBusTimeout) -> u64 {
    unsafe { ffi::dbus_timeout_get_data(raw) as usize as u64 }
}

/// The poll wait bound when no timer is due sooner.
pub(crate) const DEFAULT_POLL_MSEC_WAIT: i64 = 3000;
/// Upper bound on the recovery sleep after a poll failure.
pub(crate) const SLEEP_ON_POLL_ERROR_MSEC: i64 = 10;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flag_mapping_round_trip() {
        let flags = ffi::DBUS_WATCH_READABLE as c_uint | ffi::DBUS_WATCH_WRITABLE as c_uint;
        assert_eq!(poll_to_dbus_flags(dbus_flags_to_poll(flags)), flags);
    }

    #[test]
    fn wake_pipe_watch() {
        let w = Watch::wake_pipe(7, 3);
        assert!(w.enabled());
        assert!(w.is_wake_pipe());
        assert_eq!(w.descriptor(), 3);
        assert_eq!(w.id(), 7);
        assert_ne!(dbus_flags_to_poll(w.flags()) & libc::POLLIN, 0);
    }
}
