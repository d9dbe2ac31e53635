//! Thin wrapper around libdbus messages, restricted to the fixed string
//! argument contract this library speaks.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::{fmt, mem, ptr};

use crate::error::{Error, ErrorCode};
use crate::ffi;
use crate::strings::{BusName, ErrorName, Interface, Member, Path};
use crate::{c_str_to_slice, init_dbus, to_c_str};

/// One of the four different message types.
#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub(crate) enum MessageType {
    /// This is a method call D-Bus message.
    MethodCall = 1,
    /// This is a method return Ok D-Bus message.
    MethodReturn = 2,
    /// This is a method return with error D-Bus message.
    Error = 3,
    /// This is a signal, usually sent to whoever wants to listen.
    Signal = 4,
}

/// Holder for a libdbus error slot.
pub(crate) struct BusError {
    e: ffi::DBusError,
}

impl BusError {
    pub fn empty() -> BusError {
        init_dbus();
        let mut e = ffi::DBusError {
            name: ptr::null(),
            message: ptr::null(),
            dummy: 0,
            padding1: ptr::null(),
        };
        unsafe {
            ffi::dbus_error_init(&mut e);
        }
        BusError { e }
    }

    /// Error name, e g 'org.freedesktop.DBus.Error.Failed'.
    pub fn name(&self) -> Option<&str> {
        c_str_to_slice(&self.e.name)
    }

    /// Custom message, e g 'Could not find a matching object path'.
    pub fn message(&self) -> Option<&str> {
        c_str_to_slice(&self.e.message)
    }

    pub fn get_mut(&mut self) -> &mut ffi::DBusError {
        &mut self.e
    }

    pub fn name_owned(&self) -> Option<String> {
        self.name().map(|s| s.to_string())
    }

    pub fn message_owned(&self) -> Option<String> {
        self.message().map(|s| s.to_string())
    }
}

impl Drop for BusError {
    fn drop(&mut self) {
        unsafe {
            ffi::dbus_error_free(&mut self.e);
        }
    }
}

impl fmt::Debug for BusError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "D-Bus error: {} ({})", self.message().unwrap_or(""), self.name().unwrap_or(""))
    }
}

/// A D-Bus message: headers (destination, path, interface, member) and a
/// list of string arguments.
pub(crate) struct Message {
    msg: *mut ffi::DBusMessage,
}

unsafe impl Send for Message {}

fn ffi_iter() -> ffi::DBusMessageIter {
    unsafe { mem::zeroed() }
}

unsafe fn iter_get_str(i: *mut ffi::DBusMessageIter) -> Option<String> {
    if ffi::dbus_message_iter_get_arg_type(i) != ffi::DBUS_TYPE_STRING as c_int {
        return None;
    }
    let mut p: *const c_char = ptr::null();
    ffi::dbus_message_iter_get_basic(i, &mut p as *mut _ as *mut c_void);
    if p.is_null() {
        return None;
    }
    Some(String::from_utf8_lossy(CStr::from_ptr(p).to_bytes()).into_owned())
}

impl Message {
    /// Creates a new method call message.
    ///
    /// Panics: if libdbus fails to allocate it.
    pub fn method_call(destination: &BusName, path: &Path, iface: &Interface, name: &Member) -> Message {
        init_dbus();
        let ptr = unsafe {
            ffi::dbus_message_new_method_call(
                destination.as_ref().as_ptr(),
                path.as_ref().as_ptr(),
                iface.as_ref().as_ptr(),
                name.as_ref().as_ptr(),
            )
        };
        if ptr.is_null() {
            panic!("D-Bus error: dbus_message_new_method_call failed")
        }
        Message { msg: ptr }
    }

    /// Creates a new signal message.
    ///
    /// Panics: if libdbus fails to allocate it.
    pub fn signal(path: &Path, iface: &Interface, name: &Member) -> Message {
        init_dbus();
        let ptr = unsafe {
            ffi::dbus_message_new_signal(path.as_ref().as_ptr(), iface.as_ref().as_ptr(), name.as_ref().as_ptr())
        };
        if ptr.is_null() {
            panic!("D-Bus error: dbus_message_new_signal failed")
        }
        Message { msg: ptr }
    }

    /// Creates a method return (reply) for this method call.
    pub fn method_return(&self) -> Option<Message> {
        let ptr = unsafe { ffi::dbus_message_new_method_return(self.msg) };
        if ptr.is_null() {
            None
        } else {
            Some(Message { msg: ptr })
        }
    }

    /// Creates a new error reply for this method call.
    pub fn error_reply(&self, error_name: &ErrorName, error_message: &CStr) -> Option<Message> {
        let ptr = unsafe { ffi::dbus_message_new_error(self.msg, error_name.as_ref().as_ptr(), error_message.as_ptr()) };
        if ptr.is_null() {
            None
        } else {
            Some(Message { msg: ptr })
        }
    }

    /// Appends one string argument.
    pub fn append_str(&mut self, s: &str) -> Result<(), Error> {
        if s.as_bytes().contains(&0) {
            return Err(Error::lib(ErrorCode::Format));
        }
        let c = to_c_str(s);
        let p = c.as_ptr();
        let q = &p as *const _ as *const c_void;
        let mut i = ffi_iter();
        unsafe {
            ffi::dbus_message_iter_init_append(self.msg, &mut i);
            if ffi::dbus_message_iter_append_basic(&mut i, ffi::DBUS_TYPE_STRING as c_int, q) == 0 {
                return Err(Error::lib(ErrorCode::NoMemory));
            }
        }
        Ok(())
    }

    /// Appends two string arguments.
    pub fn append2_str(&mut self, a: &str, b: &str) -> Result<(), Error> {
        self.append_str(a)?;
        self.append_str(b)
    }

    /// Appends one uint32 argument.
    pub fn append_u32(&mut self, v: u32) -> Result<(), Error> {
        let q = &v as *const u32 as *const c_void;
        let mut i = ffi_iter();
        unsafe {
            ffi::dbus_message_iter_init_append(self.msg, &mut i);
            if ffi::dbus_message_iter_append_basic(&mut i, ffi::DBUS_TYPE_UINT32 as c_int, q) == 0 {
                return Err(Error::lib(ErrorCode::NoMemory));
            }
        }
        Ok(())
    }

    /// Gets the first argument, if it is a string.
    pub fn read1_str(&self) -> Option<String> {
        let mut i = ffi_iter();
        unsafe {
            if ffi::dbus_message_iter_init(self.msg, &mut i) == 0 {
                return None;
            }
            iter_get_str(&mut i)
        }
    }

    /// Gets the first two arguments, if both are strings.
    pub fn read2_str(&self) -> Option<(String, String)> {
        let mut i = ffi_iter();
        unsafe {
            if ffi::dbus_message_iter_init(self.msg, &mut i) == 0 {
                return None;
            }
            let a = iter_get_str(&mut i)?;
            if ffi::dbus_message_iter_next(&mut i) == 0 {
                return None;
            }
            let b = iter_get_str(&mut i)?;
            Some((a, b))
        }
    }

    /// Gets the first three arguments, if all are strings.
    pub fn read3_str(&self) -> Option<(String, String, String)> {
        let mut i = ffi_iter();
        unsafe {
            if ffi::dbus_message_iter_init(self.msg, &mut i) == 0 {
                return None;
            }
            let a = iter_get_str(&mut i)?;
            if ffi::dbus_message_iter_next(&mut i) == 0 {
                return None;
            }
            let b = iter_get_str(&mut i)?;
            if ffi::dbus_message_iter_next(&mut i) == 0 {
                return None;
            }
            let c = iter_get_str(&mut i)?;
            Some((a, b, c))
        }
    }

    /// Gets the first argument, if it is a boolean.
    pub fn read1_bool(&self) -> Option<bool> {
        let mut i = ffi_iter();
        unsafe {
            if ffi::dbus_message_iter_init(self.msg, &mut i) == 0 {
                return None;
            }
            if ffi::dbus_message_iter_get_arg_type(&mut i) != ffi::DBUS_TYPE_BOOLEAN as c_int {
                return None;
            }
            let mut v = 0u32;
            ffi::dbus_message_iter_get_basic(&mut i, &mut v as *mut _ as *mut c_void);
            Some(v != 0)
        }
    }

    /// Gets the first argument, if it is a uint32.
    pub fn read1_u32(&self) -> Option<u32> {
        let mut i = ffi_iter();
        unsafe {
            if ffi::dbus_message_iter_init(self.msg, &mut i) == 0 {
                return None;
            }
            if ffi::dbus_message_iter_get_arg_type(&mut i) != ffi::DBUS_TYPE_UINT32 as c_int {
                return None;
            }
            let mut v = 0u32;
            ffi::dbus_message_iter_get_basic(&mut i, &mut v as *mut _ as *mut c_void);
            Some(v)
        }
    }

    /// Gets the MessageType of the Message.
    pub fn msg_type(&self) -> MessageType {
        match unsafe { ffi::dbus_message_get_type(self.msg) } {
            1 => MessageType::MethodCall,
            2 => MessageType::MethodReturn,
            3 => MessageType::Error,
            4 => MessageType::Signal,
            x => panic!("Invalid message type {}", x),
        }
    }

    fn msg_internal_str<'a>(&'a self, c: *const c_char) -> Option<&'a str> {
        if c.is_null() {
            None
        } else {
            std::str::from_utf8(unsafe { CStr::from_ptr(c) }.to_bytes()).ok()
        }
    }

    /// Gets the object path this Message is being sent to.
    pub fn path(&self) -> Option<&str> {
        self.msg_internal_str(unsafe { ffi::dbus_message_get_path(self.msg) })
    }

    /// Gets the interface this Message is being sent to.
    pub fn interface(&self) -> Option<&str> {
        self.msg_internal_str(unsafe { ffi::dbus_message_get_interface(self.msg) })
    }

    /// Gets the interface member being called.
    pub fn member(&self) -> Option<&str> {
        self.msg_internal_str(unsafe { ffi::dbus_message_get_member(self.msg) })
    }

    /// Gets the name of the connection that originated this message.
    #[allow(dead_code)]
    pub fn sender(&self) -> Option<&str> {
        self.msg_internal_str(unsafe { ffi::dbus_message_get_sender(self.msg) })
    }

    pub fn has_path(&self, path: &str) -> bool {
        self.path() == Some(path)
    }

    pub fn is_signal(&self, iface: &str, member: &str) -> bool {
        self.msg_type() == MessageType::Signal && self.interface() == Some(iface) && self.member() == Some(member)
    }

    pub fn is_method_call(&self, iface: &str, member: &str) -> bool {
        self.msg_type() == MessageType::MethodCall && self.interface() == Some(iface) && self.member() == Some(member)
    }

    /// Returns true if the message does not expect a reply.
    pub fn get_no_reply(&self) -> bool {
        unsafe { ffi::dbus_message_get_no_reply(self.msg) != 0 }
    }

    /// Set to true if you send a method call and do not want a reply.
    pub fn set_no_reply(&mut self, v: bool) {
        unsafe { ffi::dbus_message_set_no_reply(self.msg, if v { 1 } else { 0 }) }
    }

    /// When this message is an error reply, extracts the error name and
    /// message carried in it.
    pub fn error_info(&self) -> Option<BusError> {
        let mut e = BusError::empty();
        if unsafe { ffi::dbus_set_error_from_message(e.get_mut(), self.msg) } != 0 {
            Some(e)
        } else {
            None
        }
    }

    pub fn ptr(&self) -> *mut ffi::DBusMessage {
        self.msg
    }

    pub fn from_ptr(ptr: *mut ffi::DBusMessage, add_ref: bool) -> Message {
        if add_ref {
            unsafe { ffi::dbus_message_ref(ptr) };
        }
        Message { msg: ptr }
    }

    /// Takes an additional reference on the underlying message.
    pub fn clone_ref(&self) -> Message {
        Message::from_ptr(self.msg, true)
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        unsafe {
            ffi::dbus_message_unref(self.msg);
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut x = f.debug_struct("Message");
        x.field("Type", &self.msg_type());
        if let Some(path) = self.path() {
            x.field("Path", &path);
        }
        if let Some(iface) = self.interface() {
            x.field("Interface", &iface);
        }
        if let Some(member) = self.member() {
            x.field("Member", &member);
        }
        x.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn string_args_round_trip() {
        let mut m = Message::method_call(
            &"com.example.echo".into(),
            &"/com/example/echo".into(),
            &"com.hsae.dbusipc".into(),
            &"Invoke".into(),
        );
        m.append2_str("Echo", "{\"s\":\"hi\"}").unwrap();
        assert_eq!(m.read2_str(), Some(("Echo".to_string(), "{\"s\":\"hi\"}".to_string())));
        assert_eq!(m.read1_str().as_deref(), Some("Echo"));
        assert_eq!(m.read1_bool(), None);
    }

    #[test]
    fn headers() {
        let m = Message::signal(&"/com/example/obj".into(), &"com.hsae.dbusipc".into(), &"Emit".into());
        assert!(m.is_signal("com.hsae.dbusipc", "Emit"));
        assert!(m.has_path("/com/example/obj"));
        assert!(!m.is_method_call("com.hsae.dbusipc", "Invoke"));
        assert_eq!(m.msg_type(), MessageType::Signal);
    }

    #[test]
    fn no_reply_flag() {
        let mut m = Message::method_call(
            &"com.example.echo".into(),
            &"/".into(),
            &"com.hsae.dbusipc".into(),
            &"Invoke".into(),
        );
        assert!(!m.get_no_reply());
        m.set_no_reply(true);
        assert!(m.get_no_reply());
    }

    #[test]
    fn interior_nul_is_rejected() {
        let mut m = Message::signal(&"/obj".into(), &"com.hsae.dbusipc".into(), &"Emit".into());
        assert!(m.append_str("with\0nul").is_err());
    }
}
