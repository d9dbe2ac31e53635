//! Strings with a specific format: a valid bus name, a valid object path,
//! etc. The internal representation is `Cow<CStr>`, so they can be handed
//! to libdbus without conversion costs.

use std::borrow::Cow;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::{fmt, hash, ops, str};

use crate::ffi;
use crate::message::BusError;

macro_rules! dstring_wrapper {
    ($(#[$comments:meta])* $t: ident, $s: ident) => {

$(#[$comments])*
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct $t<'a>(Cow<'a, CStr>);

impl<'m> $t<'m> {
    fn check_valid(c: *const c_char) -> Result<(), String> {
        let mut e = BusError::empty();
        let b = unsafe { ffi::$s(c, e.get_mut()) };
        if b != 0 { Ok(()) } else { Err(e.message().unwrap_or("invalid string").into()) }
    }

    /// Creates a new instance of this struct, checking the string for
    /// conformance with the D-Bus specification.
    pub fn new<S: Into<Vec<u8>>>(s: S) -> Result<$t<'m>, String> {
        let c = CString::new(s).map_err(|e| e.to_string())?;
        $t::check_valid(c.as_ptr()).map(|_| $t(Cow::Owned(c)))
    }

    /// Creates a new instance of this struct. If you end it with \0,
    /// it can borrow the slice without extra allocation.
    pub fn from_slice(s: &'m [u8]) -> Result<$t<'m>, String> {
        if s.is_empty() || s[s.len()-1] != 0 { return $t::new(s) };
        $t::check_valid(s.as_ptr() as *const c_char).map(|_| {
            let c = unsafe { CStr::from_ptr(s.as_ptr() as *const c_char) };
            $t(Cow::Borrowed(c))
        })
    }

    /// Creates a new instance of this struct without checking. It's up to
    /// you to guarantee that s ends with a \0 and is valid.
    pub unsafe fn from_slice_unchecked(s: &'m [u8]) -> $t<'m> {
        debug_assert!(s[s.len()-1] == 0);
        $t(Cow::Borrowed(CStr::from_ptr(s.as_ptr() as *const c_char)))
    }

    /// View this struct as a CStr.
    pub fn as_cstr(&self) -> &CStr { &self.0 }

    /// Makes sure this string does not contain borrows.
    pub fn into_static(self) -> $t<'static> {
        $t(Cow::Owned(self.0.into_owned()))
    }
}

/// #Panics
///
/// If given string is not valid.
impl<'m> From<String> for $t<'m> { fn from(s: String) -> $t<'m> { $t::new(s).unwrap() } }

/// #Panics
///
/// If given string is not valid.
impl<'m> From<&'m str> for $t<'m> { fn from(s: &'m str) -> $t<'m> { $t::from_slice(s.as_bytes()).unwrap() } }

impl<'m> ops::Deref for $t<'m> {
    type Target = str;
    fn deref(&self) -> &str { str::from_utf8(self.0.to_bytes()).unwrap() }
}

impl<'m> fmt::Display for $t<'m> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        <str as fmt::Display>::fmt(self, f)
    }
}

impl<'m> AsRef<CStr> for $t<'m> {
    fn as_ref(&self) -> &CStr { &self.0 }
}

impl<'m> hash::Hash for $t<'m> {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

}}

dstring_wrapper!(
    /// A wrapper around a string that is guaranteed to be
    /// a valid D-Bus object path.
    Path, dbus_validate_path
);

// This is needed so one can make arrays of paths easily
impl<'a> Default for Path<'a> {
    fn default() -> Path<'a> { unsafe { Path::from_slice_unchecked(b"/\0") } }
}

dstring_wrapper!(
    /// A wrapper around a string that is guaranteed to be
    /// a valid D-Bus member, i e, a signal or method name.
    Member, dbus_validate_member
);

dstring_wrapper!(
    /// A wrapper around a string that is guaranteed to be
    /// a valid D-Bus interface name.
    Interface, dbus_validate_interface
);

dstring_wrapper!(
    /// A wrapper around a string that is guaranteed to be
    /// a valid D-Bus bus name.
    BusName, dbus_validate_bus_name
);

dstring_wrapper!(
    /// A wrapper around a string that is guaranteed to be
    /// a valid D-Bus error name.
    ErrorName, dbus_validate_error_name
);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn some_path() {
        let p1: Path = "/valid".into();
        assert_eq!(&*p1, "/valid");
        assert!(Path::new("##invalid##").is_err());
    }

    #[test]
    fn bus_name_rejects_garbage() {
        assert!(BusName::new("com.example.svc").is_ok());
        assert!(BusName::new("").is_err());
        assert!(BusName::new("no dots").is_err());
    }

    #[test]
    fn interior_nul_is_invalid() {
        assert!(Member::new(&b"Chi\0med"[..]).is_err());
    }
}
