//! The single worker thread that owns every interaction with libdbus: it
//! polls the registered descriptors, expires timers, drains the command
//! queue, and dispatches buffered messages per connection.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::os::raw::{c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::command::Command;
use crate::config;
use crate::connection::{Connection, ConnectionEntry};
use crate::error::{Error, ErrorCode};
use crate::ffi;
use crate::registration::{Registration, ServiceRegistration};
use crate::subscription::{SignalSubscription, Subscription};
use crate::sync::{now_millis, Pipe, Semaphore};
use crate::types::Handle;
use crate::watch::{
    dbus_flags_to_poll, poll_to_dbus_flags, set_timeout_data, set_watch_data, timeout_data, watch_data, Timeout,
    Watch, DEFAULT_POLL_MSEC_WAIT, SLEEP_ON_POLL_ERROR_MSEC,
};

struct CmdQueue {
    cmds: VecDeque<(Handle, Command)>,
    next_handle: u32,
}

impl CmdQueue {
    fn next_handle(&mut self) -> Handle {
        self.next_handle = self.next_handle.wrapping_add(1);
        if self.next_handle == 0 {
            // 0 stays reserved as the invalid handle.
            self.next_handle = 1;
        }
        Handle(self.next_handle)
    }
}

pub(crate) struct Shared {
    queue: Mutex<CmdQueue>,
    pipe: Pipe,
    running: AtomicBool,
    worker_thread: Mutex<Option<thread::ThreadId>>,
    started: Semaphore,
}

/// Handle to the dispatch thread. Submitting is safe from any thread; all
/// other work happens on the worker itself.
pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new() -> Result<Dispatcher, Error> {
        let pipe = Pipe::open().map_err(|e| {
            log::error!("unable to open wake-up pipe: {}", e);
            Error::posix(ErrorCode::Internal)
        })?;
        Ok(Dispatcher {
            shared: Arc::new(Shared {
                queue: Mutex::new(CmdQueue { cmds: VecDeque::new(), next_handle: 0 }),
                pipe,
                running: AtomicBool::new(false),
                worker_thread: Mutex::new(None),
                started: Semaphore::new(0),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Spawns the worker and blocks until it is accepting commands.
    pub fn start(&self) -> Result<(), Error> {
        let shared = self.shared.clone();
        self.shared.running.store(true, Ordering::Release);
        let handle = thread::Builder::new()
            .name("dbusipc-dispatch".into())
            .spawn(move || worker_main(shared))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                log::error!("unable to spawn dispatch thread: {}", e);
                Error::posix(ErrorCode::Internal)
            })?;
        *self.worker.lock().unwrap() = Some(handle);
        self.shared.started.wait();
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Whether the calling thread is the dispatch thread. Synchronous entry
    /// points use this to fail with `Deadlock` instead of waiting forever.
    pub fn is_current_thread(&self) -> bool {
        *self.shared.worker_thread.lock().unwrap() == Some(thread::current().id())
    }

    /// Queues a command and wakes the worker. The returned handle is stored
    /// before the queue lock is released so cancellation can observe it.
    pub fn submit(&self, cmd: Command) -> Result<Handle, Error> {
        let mut q = self.shared.queue.lock().unwrap();
        if !self.is_running() {
            return Err(Error::lib(ErrorCode::CmdSubmission));
        }
        let handle = q.next_handle();
        q.cmds.push_back((handle, cmd));
        if !self.shared.pipe.write_byte() {
            log::warn!("failed to write wake-up token, command dropped");
            q.cmds.pop_back();
            return Err(Error::lib(ErrorCode::CmdSubmission));
        }
        Ok(handle)
    }

    /// Asks the worker to exit at its next tick.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.pipe.write_byte();
    }

    /// Joins the worker thread.
    pub fn wait(&self) {
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("dispatch thread terminated abnormally");
            }
        }
    }

    /// Delivers a cancellation to every command the worker never ran.
    pub fn drain_cancelled(&self) {
        let leftovers: Vec<(Handle, Command)> = self.shared.queue.lock().unwrap().cmds.drain(..).collect();
        for (_, cmd) in leftovers {
            cmd.cancel_offline();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
        self.wait();
        self.drain_cancelled();
    }
}

fn worker_main(shared: Arc<Shared>) {
    *shared.worker_thread.lock().unwrap() = Some(thread::current().id());
    config::apply_dispatch_priority();

    let core = Box::new(DispatcherCore::new(shared.clone()));
    core.add_wake_watch();
    shared.started.post();

    while shared.running.load(Ordering::Acquire) {
        core.dispatch_pending();
        core.poll_cycle();
    }

    // libdbus global teardown re-enters the watch and timeout removers, so
    // it has to happen here, while the core is still alive, and before the
    // public shutdown path joins this thread.
    unsafe { ffi::dbus_shutdown() };
    drop(core);
}

/// State owned by the dispatch thread. Raw libdbus callbacks receive a
/// pointer to this struct and only ever run on the worker, which keeps the
/// single-threaded interior (`RefCell`, `Rc`) sound.
pub(crate) struct DispatcherCore {
    shared: Arc<Shared>,
    watches: RefCell<BTreeMap<u64, Rc<Watch>>>,
    timeouts: RefCell<BTreeMap<u64, Rc<Timeout>>>,
    pending_dispatch: RefCell<Vec<u32>>,
    connections: RefCell<BTreeMap<u32, Rc<ConnectionEntry>>>,
    next_conn_id: Cell<u32>,
    next_token: Cell<u64>,
}

impl DispatcherCore {
    fn new(shared: Arc<Shared>) -> DispatcherCore {
        DispatcherCore {
            shared,
            watches: RefCell::new(BTreeMap::new()),
            timeouts: RefCell::new(BTreeMap::new()),
            pending_dispatch: RefCell::new(Vec::new()),
            connections: RefCell::new(BTreeMap::new()),
            next_conn_id: Cell::new(0),
            next_token: Cell::new(0),
        }
    }

    fn add_wake_watch(&self) {
        let id = self.next_token();
        let watch = Rc::new(Watch::wake_pipe(id, self.shared.pipe.read_fd()));
        self.watches.borrow_mut().insert(id, watch);
    }

    pub(crate) fn next_token(&self) -> u64 {
        let id = self.next_token.get() + 1;
        self.next_token.set(id);
        id
    }

    pub(crate) fn next_conn_id(&self) -> u32 {
        let mut id = self.next_conn_id.get().wrapping_add(1);
        if id == 0 {
            id = 1;
        }
        self.next_conn_id.set(id);
        id
    }

    pub(crate) fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
    }

    pub(crate) fn connection(&self, conn: Connection) -> Option<Rc<ConnectionEntry>> {
        self.connections.borrow().get(&conn.0).cloned()
    }

    pub(crate) fn find_connection_by_raw(&self, raw: *mut ffi::DBusConnection) -> Option<Rc<ConnectionEntry>> {
        self.connections.borrow().values().find(|e| e.raw() == raw).cloned()
    }

    pub(crate) fn insert_connection(&self, entry: Rc<ConnectionEntry>) {
        self.connections.borrow_mut().insert(entry.id().0, entry);
    }

    pub(crate) fn remove_connection(&self, id: u32) {
        self.connections.borrow_mut().remove(&id);
    }

    pub(crate) fn add_pending_dispatch(&self, id: u32) {
        let mut pending = self.pending_dispatch.borrow_mut();
        if !pending.contains(&id) {
            pending.push(id);
        }
    }

    pub(crate) fn remove_pending_dispatch(&self, id: u32) {
        self.pending_dispatch.borrow_mut().retain(|x| *x != id);
    }

    /// Searches every connection's pending set for the handle; found
    /// commands are cancelled and deliver their `Cancelled` status.
    pub(crate) fn cancel_pending_by_handle(&self, handle: Handle) -> Result<(), Error> {
        let conns: Vec<Rc<ConnectionEntry>> = self.connections.borrow().values().cloned().collect();
        for entry in conns {
            if let Some(cmd) = entry.take_pending(handle) {
                cmd.cancel();
                return Ok(());
            }
        }
        Err(Error::lib(ErrorCode::NotFound))
    }

    pub(crate) fn find_subscription(&self, sub: Subscription) -> Option<(Rc<ConnectionEntry>, Rc<SignalSubscription>)> {
        let conns: Vec<Rc<ConnectionEntry>> = self.connections.borrow().values().cloned().collect();
        for entry in conns {
            if let Some(found) = entry.subscription(sub.0) {
                return Some((entry, found));
            }
        }
        None
    }

    pub(crate) fn find_registration(&self, reg: Registration) -> Option<(Rc<ConnectionEntry>, Rc<ServiceRegistration>)> {
        let conns: Vec<Rc<ConnectionEntry>> = self.connections.borrow().values().cloned().collect();
        for entry in conns {
            if let Some(found) = entry.registration(reg.0) {
                return Some((entry, found));
            }
        }
        None
    }

    /// Drives every cached connection's reference count to zero. Used by
    /// the shutdown command while the worker is still running.
    pub(crate) fn force_release_all(&self) {
        loop {
            let entry = match self.connections.borrow().values().next().cloned() {
                Some(e) => e,
                None => break,
            };
            while entry.ref_count() > 1 {
                entry.dec_ref(self);
            }
            entry.dec_ref(self);
        }
    }

    /// Step 1 of the tick: give connections with buffered messages their
    /// dispatch slice, dropping the ones that report completion.
    fn dispatch_pending(&self) {
        let snapshot: Vec<u32> = self.pending_dispatch.borrow().clone();
        for id in snapshot {
            let entry = self.connections.borrow().get(&id).cloned();
            let complete = match entry {
                Some(e) => e.dispatch_messages(),
                None => true,
            };
            if complete {
                self.remove_pending_dispatch(id);
            }
        }
    }

    /// One poll cycle: wait for descriptor activity bounded by the nearest
    /// timer, expire timers, then feed activity back to the watch owners.
    fn poll_cycle(&self) {
        let mut fds: Vec<libc::pollfd> = Vec::new();
        let mut polled: Vec<Rc<Watch>> = Vec::new();
        for w in self.watches.borrow().values() {
            if w.enabled() {
                fds.push(libc::pollfd {
                    fd: w.descriptor(),
                    events: dbus_flags_to_poll(w.flags()),
                    revents: 0,
                });
                polled.push(w.clone());
            }
        }

        let mut min_wait = DEFAULT_POLL_MSEC_WAIT;
        let now = now_millis();
        for t in self.timeouts.borrow().values() {
            if !t.enabled() {
                continue;
            }
            if now >= t.expiry() {
                // A timer is already due; do not block in poll at all.
                min_wait = 0;
                break;
            }
            let remaining = (t.expiry() - now) as i64;
            if remaining < min_wait {
                min_wait = remaining;
            }
        }

        let selected = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, min_wait as c_int) };

        if selected < 0 {
            // Back off so a persistently failing poll cannot spin the CPU.
            let elapsed = now_millis().saturating_sub(now) as i64;
            if min_wait > elapsed {
                let ms = std::cmp::min(min_wait - elapsed, SLEEP_ON_POLL_ERROR_MSEC);
                thread::sleep(Duration::from_millis(ms as u64));
            }
        }

        let now = now_millis();
        // Snapshot the currently expired timers before handling any of
        // them: a handler may remove timers from the set. Repeating timers
        // get their expiry reset before the handler runs for the same
        // reason.
        let expired: Vec<Rc<Timeout>> = self
            .timeouts
            .borrow()
            .values()
            .filter(|t| t.enabled() && now >= t.expiry())
            .cloned()
            .collect();
        for t in expired {
            if t.repeat() {
                t.reset_expiry();
            }
            if !t.handle() {
                log::warn!("dbus timeout handler reported failure (out of memory?)");
            }
        }

        if selected > 0 {
            // Same snapshot discipline: a watch handler may remove other
            // watches, so re-check membership before each invocation.
            let active: Vec<(Rc<Watch>, u32)> = polled
                .iter()
                .zip(fds.iter())
                .filter(|(w, pfd)| w.enabled() && pfd.revents != 0)
                .map(|(w, pfd)| (w.clone(), poll_to_dbus_flags(pfd.revents)))
                .collect();
            for (w, flags) in active {
                if !self.watches.borrow().contains_key(&w.id()) {
                    continue;
                }
                if w.is_wake_pipe() {
                    self.drain_commands();
                } else if !w.handle_bus_activity(flags) {
                    log::warn!("dbus watch handler reported failure (out of memory?)");
                }
            }
        }
    }

    /// Pops and executes queued commands, one wake-up byte per command. The
    /// queue lock is never held while a command runs.
    pub(crate) fn drain_commands(&self) {
        loop {
            let item = {
                let mut q = self.shared.queue.lock().unwrap();
                if !self.shared.running.load(Ordering::Acquire) {
                    break;
                }
                match q.cmds.pop_front() {
                    Some(c) => {
                        self.shared.pipe.read_byte();
                        Some(c)
                    }
                    None => None,
                }
            };
            match item {
                Some((handle, cmd)) => {
                    if catch_unwind(AssertUnwindSafe(move || cmd.execute(handle, self))).is_err() {
                        log::error!("command execution panicked");
                    }
                }
                None => break,
            }
        }
    }
}

// Adapters libdbus calls to hand descriptor watches to the dispatcher. The
// user data is the DispatcherCore pointer installed per connection.

pub(crate) extern "C" fn add_watch_cb(watch: *mut ffi::DBusWatch, data: *mut c_void) -> u32 {
    let core = unsafe { &*(data as *const DispatcherCore) };
    let id = core.next_token();
    set_watch_data(watch, id);
    core.watches.borrow_mut().insert(id, Rc::new(Watch::from_bus(id, watch)));
    1
}

pub(crate) extern "C" fn remove_watch_cb(watch: *mut ffi::DBusWatch, data: *mut c_void) {
    let core = unsafe { &*(data as *const DispatcherCore) };
    let id = watch_data(watch);
    core.watches.borrow_mut().remove(&id);
    set_watch_data(watch, 0);
}

pub(crate) extern "C" fn toggled_watch_cb(watch: *mut ffi::DBusWatch, data: *mut c_void) {
    let core = unsafe { &*(data as *const DispatcherCore) };
    let id = watch_data(watch);
    if let Some(w) = core.watches.borrow().get(&id) {
        w.refresh();
    }
}

pub(crate) extern "C" fn add_timeout_cb(timeout: *mut ffi::DBusTimeout, data: *mut c_void) -> u32 {
    let core = unsafe { &*(data as *const DispatcherCore) };
    let id = core.next_token();
    set_timeout_data(timeout, id);
    core.timeouts.borrow_mut().insert(id, Rc::new(Timeout::from_bus(id, timeout)));
    1
}

pub(crate) extern "C" fn remove_timeout_cb(timeout: *mut ffi::DBusTimeout, data: *mut c_void) {
    let core = unsafe { &*(data as *const DispatcherCore) };
    let id = timeout_data(timeout);
    core.timeouts.borrow_mut().remove(&id);
    set_timeout_data(timeout, 0);
}

pub(crate) extern "C" fn toggled_timeout_cb(timeout: *mut ffi::DBusTimeout, data: *mut c_void) {
    let core = unsafe { &*(data as *const DispatcherCore) };
    let id = timeout_data(timeout);
    if let Some(t) = core.timeouts.borrow().get(&id) {
        t.refresh();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn handle_counter_skips_zero() {
        let mut q = CmdQueue { cmds: VecDeque::new(), next_handle: u32::max_value() - 1 };
        assert_eq!(q.next_handle(), Handle(u32::max_value()));
        // wrap: 0 is reserved
        assert_eq!(q.next_handle(), Handle(1));
        assert_eq!(q.next_handle(), Handle(2));
    }

    #[test]
    fn submit_requires_running() {
        let d = Dispatcher::new().unwrap();
        let sem = Arc::new(Semaphore::new(0));
        let err = d.submit(Command::Shutdown { sem }).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CmdSubmission);
    }

    #[test]
    fn drain_cancelled_posts_shutdown_sem() {
        let d = Dispatcher::new().unwrap();
        let sem = Arc::new(Semaphore::new(0));
        // Queue directly; the dispatcher never ran, so draining must still
        // produce the one terminal delivery.
        d.shared.running.store(true, Ordering::Release);
        d.submit(Command::Shutdown { sem: sem.clone() }).unwrap();
        d.shared.running.store(false, Ordering::Release);
        d.drain_cancelled();
        assert!(sem.wait_timeout(100));
    }
}
