//! Transport boundary between the sensor layer and the system bus

use btzen_core::{ObjectPath, Uuid};
use std::fmt;
use std::os::unix::io::RawFd;

use crate::error::BusError;

/// Well-known bus name of the BlueZ daemon
pub const BLUEZ_SERVICE: &str = "org.bluez";
pub const DEVICE_INTERFACE: &str = "org.bluez.Device1";
pub const GATT_CHARACTERISTIC_INTERFACE: &str = "org.bluez.GattCharacteristic1";
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Token identifying which sensor session a unit of traffic concerns
///
/// Allocated by the sensor layer and passed along with every request and
/// subscription; the transport tags the resulting traffic with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of operation a unit of traffic completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficKind {
    /// Reply to an asynchronous value read
    ReadReply,
    /// Value pushed by a notification or property change
    NotifyValue,
}

impl fmt::Display for TrafficKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadReply => write!(f, "read-reply"),
            Self::NotifyValue => write!(f, "notify-value"),
        }
    }
}

/// One unit of bus traffic routed to a sensor session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traffic {
    pub connection: ConnectionId,
    /// Characteristic (or device, for property sources) the traffic is for
    pub path: ObjectPath,
    pub kind: TrafficKind,
    /// Raw value, or the error the bus replied with
    pub payload: Result<Vec<u8>, BusError>,
}

/// Outcome of one step of the drain primitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    /// A message concerning a sensor session
    Traffic(Traffic),
    /// A message was consumed that concerns no session
    Handled,
    /// A message was consumed but could not be interpreted
    Discarded(String),
    /// Nothing left to process
    Idle,
}

/// GATT characteristic discovered on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub path: ObjectPath,
    pub uuid: Uuid,
}

/// System bus primitives used by the sensor layer
///
/// Synchronous calls block until the bus replies. Requests and
/// subscriptions taking a [`ConnectionId`] complete later through
/// [`Transport::process`].
pub trait Transport: Send + Sync {
    /// Descriptor that becomes readable when bus traffic is pending
    fn fd(&self) -> RawFd;

    /// Connect the device at `device`; connecting an already connected device succeeds
    fn connect(&self, device: &ObjectPath) -> Result<(), BusError>;

    fn property_bool(&self, path: &ObjectPath, interface: &str, name: &str)
        -> Result<bool, BusError>;

    fn property_string(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> Result<String, BusError>;

    /// Property value as raw bytes (a single byte for `y` properties)
    fn property_bytes(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> Result<Vec<u8>, BusError>;

    /// Every GATT characteristic known to the bus, ordered by path
    fn characteristics(&self) -> Result<Vec<Characteristic>, BusError>;

    /// Write a characteristic value and wait for the reply
    fn write(&self, path: &ObjectPath, data: &[u8]) -> Result<(), BusError>;

    /// Issue an asynchronous characteristic read; the reply arrives as
    /// [`TrafficKind::ReadReply`] traffic
    fn request_read(&self, connection: ConnectionId, path: &ObjectPath) -> Result<(), BusError>;

    /// Subscribe to characteristic notifications, delivered as
    /// [`TrafficKind::NotifyValue`] traffic
    fn start_notify(&self, connection: ConnectionId, path: &ObjectPath) -> Result<(), BusError>;

    fn stop_notify(&self, connection: ConnectionId, path: &ObjectPath) -> Result<(), BusError>;

    /// Watch changes of an interface property on `path`, delivered as
    /// [`TrafficKind::NotifyValue`] traffic
    fn watch_property(
        &self,
        connection: ConnectionId,
        path: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> Result<(), BusError>;

    fn unwatch_property(
        &self,
        connection: ConnectionId,
        path: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> Result<(), BusError>;

    /// Process at most one pending bus message without blocking
    ///
    /// Reports `Idle` while a blocking call holds the connection; drain again
    /// once that call returns.
    fn process(&self) -> Result<Processed, BusError>;
}
