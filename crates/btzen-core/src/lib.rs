//! BTZen Core - Core types, sensor descriptors and decoders
//!
//! This crate provides the foundational types for the BTZen system:
//! - Bluetooth addresses and BlueZ object paths
//! - Sensor kind descriptors (UUIDs, configuration payloads, capabilities)
//! - Per-binding sensor parameters
//! - Decoders turning raw characteristic bytes into readings

pub mod decode;
pub mod device;
pub mod sensor;

pub use decode::{DecodeError, Decoder, Reading, ReadingDecoder};
pub use device::{Address, AddressError, DeviceIdentity, ObjectPath, BLUEZ_ROOT, DEFAULT_ADAPTER};
pub use sensor::{kinds, to_uuid, Configuration, DataSource, Mode, Parameters, SensorKind};
pub use uuid::Uuid;
