//! The fixed wire contract: interface, member and error names, and the
//! introspection fragments advertised for registered objects.

/// Interface advertised for method calls and signals.
pub const INTERFACE_NAME: &str = "com.hsae.dbusipc";
/// The single method every service exposes.
pub const METHOD_MEMBER: &str = "Invoke";
/// The single signal every service can emit.
pub const SIGNAL_MEMBER: &str = "Emit";
/// Error name used when a service replies with an error and gives no name.
pub const DEFAULT_ERROR_NAME: &str = "com.hsae.service.Error";

/// Substituted for any payload string the caller leaves out.
pub(crate) const DEFAULT_PAYLOAD: &str = "{}";

pub(crate) const DBUS_SERVICE: &str = "org.freedesktop.DBus";
pub(crate) const DBUS_INTERFACE: &str = "org.freedesktop.DBus";
pub(crate) const DBUS_PATH: &str = "/org/freedesktop/DBus";
pub(crate) const DBUS_INTERFACE_LOCAL: &str = "org.freedesktop.DBus.Local";
pub(crate) const DBUS_PATH_LOCAL: &str = "/org/freedesktop/DBus/Local";

pub(crate) const INTROSPECT_DOCTYPE: &str =
    "<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n \
     \"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n";

pub(crate) const INTROSPECT_INTERFACES: &str = "   <interface name=\"com.hsae.dbusipc\">\n\
      <method name=\"Invoke\">\n\
         <arg name=\"method\" type=\"s\" direction=\"in\"/>\n\
         <arg name=\"parameters\" type=\"s\" direction=\"in\"/>\n\
         <arg name=\"result\" type=\"s\" direction=\"out\"/>\n\
      </method>\n\
      <signal name=\"Emit\">\n\
         <arg name=\"name\" type=\"s\"/>\n\
         <arg name=\"data\" type=\"s\"/>\n\
      </signal>\n\
   </interface>\n\
   <interface name=\"org.freedesktop.DBus.Introspectable\">\n\
      <method name=\"Introspect\">\n\
         <arg direction=\"out\" type=\"s\" name=\"data\"/>\n\
      </method>\n\
   </interface>\n";
