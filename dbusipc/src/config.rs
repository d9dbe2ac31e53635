//! Environment driven configuration.

use std::env;
use std::fs;

/// Name of the variable bounding user callback processing time.
const MAX_DISPATCH_PROC_TIME: &str = "DBUSIPC_MAX_DISPATCH_PROC_TIME_MSEC";
/// Name of the variable selecting the dispatch thread priority.
const DISPATCH_PRIORITY: &str = "DBUSIPC_DISPATCH_PRIORITY";
const SESSION_BUS_ADDRESS: &str = "DBUS_SESSION_BUS_ADDRESS";
const SCRIPT_FILE_NAME: &str = "DBUS_SCRIPT_FILE_NAME";

/// How long a user callback may run before a warning is logged. Unset or
/// unparsable means "never warn".
pub(crate) fn max_dispatch_proc_time() -> u64 {
    match env::var(MAX_DISPATCH_PROC_TIME) {
        Ok(v) => match v.trim().parse::<u64>() {
            Ok(ms) => {
                log::info!("max dispatch processing time: {} msec", ms);
                ms
            }
            Err(_) => {
                log::warn!("ignoring unparsable {}={:?}", MAX_DISPATCH_PROC_TIME, v);
                u64::max_value()
            }
        },
        Err(_) => u64::max_value(),
    }
}

/// The requested dispatch thread priority, validated against the range the
/// scheduler accepts. Out-of-range or unparsable values are rejected with a
/// warning rather than clamped.
pub(crate) fn dispatch_priority() -> Option<i32> {
    let v = env::var(DISPATCH_PRIORITY).ok()?;
    match v.trim().parse::<i32>() {
        Ok(p) if (-20..=19).contains(&p) => Some(p),
        Ok(p) => {
            log::warn!("{}={} is outside -20..=19, not applied", DISPATCH_PRIORITY, p);
            None
        }
        Err(_) => {
            log::warn!("ignoring unparsable {}={:?}", DISPATCH_PRIORITY, v);
            None
        }
    }
}

/// Applies the configured priority to the calling thread.
pub(crate) fn apply_dispatch_priority() {
    if let Some(p) = dispatch_priority() {
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS as _, 0, p) };
        if rc != 0 {
            log::warn!("failed to set dispatch thread priority to {}", p);
        }
    }
}

/// When `DBUS_SESSION_BUS_ADDRESS` is unset, attempts to recover it from
/// the shell-style script named by `DBUS_SCRIPT_FILE_NAME`, which is
/// expected to contain a line of the form
/// `DBUS_SESSION_BUS_ADDRESS='unix:path=...';`.
pub(crate) fn ensure_session_bus_address() {
    if env::var_os(SESSION_BUS_ADDRESS).is_some() {
        return;
    }
    let script = match env::var(SCRIPT_FILE_NAME) {
        Ok(s) => s,
        Err(_) => return,
    };
    match fs::read_to_string(&script) {
        Ok(contents) => {
            if let Some(address) = parse_bus_address_script(&contents) {
                log::info!("session bus address recovered from {}", script);
                env::set_var(SESSION_BUS_ADDRESS, address);
            }
        }
        Err(e) => log::warn!("unable to read {}: {}", script, e),
    }
}

fn parse_bus_address_script(contents: &str) -> Option<String> {
    for line in contents.lines() {
        let line = line.trim();
        let rest = match line.strip_prefix("DBUS_SESSION_BUS_ADDRESS='") {
            Some(r) => r,
            None => continue,
        };
        let end = rest.find('\'')?;
        let address = &rest[..end];
        if !address.is_empty() {
            return Some(address.to_string());
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn script_parsing() {
        let contents = "#!/bin/sh\nDBUS_SESSION_BUS_ADDRESS='unix:abstract=/tmp/dbus-test';\nexport DBUS_SESSION_BUS_ADDRESS\n";
        assert_eq!(parse_bus_address_script(contents).as_deref(), Some("unix:abstract=/tmp/dbus-test"));
    }

    #[test]
    fn script_without_address() {
        assert_eq!(parse_bus_address_script("#!/bin/sh\necho hello\n"), None);
        assert_eq!(parse_bus_address_script("DBUS_SESSION_BUS_ADDRESS='';\n"), None);
    }

    #[test]
    fn script_file_round_trip() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "DBUS_SESSION_BUS_ADDRESS='unix:path=/tmp/sock';").unwrap();
        let contents = std::fs::read_to_string(f.path()).unwrap();
        assert_eq!(parse_bus_address_script(&contents).as_deref(), Some("unix:path=/tmp/sock"));
    }
}
