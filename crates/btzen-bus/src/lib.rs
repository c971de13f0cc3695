//! BTZen Bus - System bus transport boundary
//!
//! This crate defines what the sensor layer needs from the system bus:
//! - Synchronous primitives (connect, property get, method calls)
//! - Subscription primitives tagged with a connection identifier
//! - A drain primitive returning one unit of routed traffic at a time
//!
//! The `bluez` feature provides [`BluezTransport`], an implementation on top
//! of the D-Bus system bus.

pub mod error;
pub mod transport;

#[cfg(feature = "bluez")]
pub mod bluez;

pub use error::BusError;
pub use transport::{
    Characteristic, ConnectionId, Processed, Traffic, TrafficKind, Transport, BLUEZ_SERVICE,
    DEVICE_INTERFACE, GATT_CHARACTERISTIC_INTERFACE, PROPERTIES_INTERFACE,
};

#[cfg(feature = "bluez")]
pub use bluez::BluezTransport;
