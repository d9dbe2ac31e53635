//! Cross-thread primitives: the counting semaphore synchronous calls block
//! on, and the wake-up pipe that nudges the dispatch thread.

use std::io;
use std::os::raw::c_void;
use std::os::unix::io::RawFd;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A counting semaphore. Synchronous public calls park on one of these
/// until the dispatch thread delivers their completion.
pub(crate) struct Semaphore {
    count: Mutex<u32>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(initial: u32) -> Semaphore {
        Semaphore { count: Mutex::new(initial), cond: Condvar::new() }
    }

    pub fn post(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cond.notify_one();
    }

    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cond.wait(count).unwrap();
        }
        *count -= 1;
    }

    /// Waits up to `ms` milliseconds; returns false on timeout.
    #[allow(dead_code)]
    pub fn wait_timeout(&self, ms: u64) -> bool {
        let deadline = Duration::from_millis(ms);
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            let (guard, result) = self.cond.wait_timeout(count, deadline).unwrap();
            count = guard;
            if result.timed_out() && *count == 0 {
                return false;
            }
        }
        *count -= 1;
        true
    }
}

/// An anonymous pipe. One byte is written per submitted command; the read
/// end is polled by the dispatch thread alongside the D-Bus descriptors.
#[derive(Debug)]
pub(crate) struct Pipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl Pipe {
    pub fn open() -> io::Result<Pipe> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        // The drain loop must never block on a missing byte.
        unsafe {
            let flags = libc::fcntl(fds[0], libc::F_GETFL);
            libc::fcntl(fds[0], libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
        Ok(Pipe { read_fd: fds[0], write_fd: fds[1] })
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Writes the one-byte wake-up token. Returns false if the write failed.
    pub fn write_byte(&self) -> bool {
        let token = 0u8;
        unsafe { libc::write(self.write_fd, &token as *const u8 as *const c_void, 1) == 1 }
    }

    /// Drains one wake-up token, if present.
    pub fn read_byte(&self) -> bool {
        let mut token = 0u8;
        unsafe { libc::read(self.read_fd, &mut token as *mut u8 as *mut c_void, 1) == 1 }
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

/// Returns a monotonic millisecond clock reading.
pub(crate) fn now_millis() -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1000 + (ts.tv_nsec as u64) / 1_000_000
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn semaphore_hand_off() {
        let sem = Arc::new(Semaphore::new(0));
        let sem2 = sem.clone();
        let t = std::thread::spawn(move || sem2.wait());
        sem.post();
        t.join().unwrap();
    }

    #[test]
    fn semaphore_timeout() {
        let sem = Semaphore::new(0);
        assert!(!sem.wait_timeout(10));
        sem.post();
        assert!(sem.wait_timeout(10));
    }

    #[test]
    fn pipe_round_trip() {
        let pipe = Pipe::open().unwrap();
        assert!(!pipe.read_byte());
        assert!(pipe.write_byte());
        assert!(pipe.read_byte());
        assert!(!pipe.read_byte());
    }

    #[test]
    fn clock_is_monotonic() {
        let a = now_millis();
        let b = now_millis();
        assert!(b >= a);
    }
}
