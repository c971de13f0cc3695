//! Device addressing: hardware addresses and BlueZ object paths

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Root of the BlueZ object tree
pub const BLUEZ_ROOT: &str = "/org/bluez";

/// Adapter used when none is configured
pub const DEFAULT_ADAPTER: &str = "hci0";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid Bluetooth address {0:?}: expected six hex octets separated by ':'")]
    Malformed(String),
}

/// Bluetooth hardware (MAC) address, stored uppercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse an address like `b0:b4:48:c9:4b:01`
    pub fn parse(value: &str) -> Result<Self, AddressError> {
        let octets: Vec<&str> = value.split(':').collect();
        let valid = octets.len() == 6
            && octets
                .iter()
                .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
        if !valid {
            return Err(AddressError::Malformed(value.to_string()));
        }
        Ok(Self(value.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address as it appears in BlueZ object paths (`B0_B4_48_C9_4B_01`)
    pub fn path_segment(&self) -> String {
        self.0.replace(':', "_")
    }

    /// Object path of the device on the given adapter
    pub fn device_path(&self, adapter: &str) -> ObjectPath {
        ObjectPath(format!("{}/{}/dev_{}", BLUEZ_ROOT, adapter, self.path_segment()))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bus object path, e.g. a device or one of its GATT characteristics
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if `self` lies strictly below `parent` in the object tree
    pub fn is_descendant_of(&self, parent: &ObjectPath) -> bool {
        self.0.len() > parent.0.len()
            && self.0.starts_with(&parent.0)
            && self.0.as_bytes()[parent.0.len()] == b'/'
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Peripheral identity, fixed once the device has been connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Hardware address
    pub address: Address,
    /// Display name reported by the device
    pub name: String,
}
