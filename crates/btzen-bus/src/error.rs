//! Bus call errors

use thiserror::Error;

/// Failure of a bus primitive
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The addressed object does not exist (e.g. unknown device)
    #[error("No such object: {0}")]
    NoSuchObject(String),
    /// The remote side answered with an error
    #[error("{name}: {message}")]
    Call { name: String, message: String },
    /// The reply could not be decoded
    #[error("Malformed reply: {0}")]
    Malformed(String),
    /// The bus daemon or the connection to it is not available
    #[error("Bus unavailable: {0}")]
    Unavailable(String),
}

impl BusError {
    pub fn call(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Call {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[cfg(feature = "bluez")]
impl From<dbus::Error> for BusError {
    fn from(e: dbus::Error) -> Self {
        let message = e.message().unwrap_or_default().to_string();
        match e.name() {
            Some("org.freedesktop.DBus.Error.UnknownObject")
            | Some("org.freedesktop.DBus.Error.UnknownMethod")
            | Some("org.bluez.Error.DoesNotExist") => Self::NoSuchObject(message),
            Some("org.freedesktop.DBus.Error.ServiceUnknown")
            | Some("org.freedesktop.DBus.Error.NoReply")
            | Some("org.freedesktop.DBus.Error.Disconnected")
            | None => Self::Unavailable(message),
            Some(name) => Self::call(name, message),
        }
    }
}
