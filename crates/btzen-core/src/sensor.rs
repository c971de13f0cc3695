//! Sensor kind descriptors and binding parameters
//!
//! A [`SensorKind`] describes where a sensor's data lives (a GATT
//! characteristic or a BlueZ interface property) and what the device needs to
//! switch it on and off. Enable/read behavior is selected from the declared
//! capabilities rather than from per-sensor code.

use crate::device::ObjectPath;
use uuid::Uuid;

/// Bluetooth base UUID, `00000000-0000-1000-8000-00805f9b34fb`
const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Convert a 16-bit assigned number to the full 128-bit Bluetooth UUID
pub const fn to_uuid(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// How readings are obtained once a sensor is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Each read asks the device for its current value
    Polling,
    /// The device pushes values; each read waits for the next one
    Notifying,
}

/// Where the sensor value is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// GATT characteristic with the given UUID and payload size
    Characteristic { uuid: Uuid, size: usize },
    /// Property of a BlueZ interface on the device object,
    /// e.g. `org.bluez.Battery1.Percentage`
    Property {
        interface: &'static str,
        property: &'static str,
    },
}

/// Configuration characteristic and the payloads written to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration {
    /// UUID of the configuration characteristic
    pub uuid: Uuid,
    /// Switches the sensor on
    pub on: Option<&'static [u8]>,
    /// Switches the sensor on in notifying mode; `on` is used when absent
    pub on_notify: Option<&'static [u8]>,
    /// Switches the sensor off
    pub off: Option<&'static [u8]>,
}

/// Static description of a sensor type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorKind {
    /// Short name, used in configuration files and logs
    pub name: &'static str,
    /// UUID of the GATT service providing the sensor
    pub service: Uuid,
    pub source: DataSource,
    pub configuration: Option<Configuration>,
    /// UUID of the characteristic receiving the trigger payload
    pub trigger: Option<Uuid>,
    /// Whether the device can push values
    pub notify: bool,
}

impl SensorKind {
    pub fn supports_notify(&self) -> bool {
        self.notify
    }
}

/// Parameters of a sensor bound to a connected device
///
/// Built once path resolution succeeds; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameters {
    /// Display name of the device
    pub name: String,
    /// Path carrying sensor data (the device path for property sources)
    pub data: ObjectPath,
    /// Path of the configuration characteristic
    pub conf: Option<ObjectPath>,
    /// Path of the trigger characteristic
    pub trigger: Option<ObjectPath>,
    pub config_on: Option<&'static [u8]>,
    pub config_on_notify: Option<&'static [u8]>,
    pub config_off: Option<&'static [u8]>,
}

impl Parameters {
    /// Power-on payload for the given mode
    pub fn power_on(&self, mode: Mode) -> Option<&'static [u8]> {
        match mode {
            Mode::Notifying => self.config_on_notify.or(self.config_on),
            Mode::Polling => self.config_on,
        }
    }
}

/// Catalogue of known sensor kinds
pub mod kinds {
    use super::*;

    /// TI SensorTag vendor UUID, `f000xxxx-0451-4000-b000-000000000000`
    const fn sensortag_uuid(short: u16) -> Uuid {
        Uuid::from_u128(0xf0000000_0451_4000_b000_000000000000 | ((short as u128) << 96))
    }

    const fn sensortag(
        name: &'static str,
        base: u16,
        size: usize,
        on: &'static [u8],
        off: &'static [u8],
    ) -> SensorKind {
        SensorKind {
            name,
            service: sensortag_uuid(base),
            source: DataSource::Characteristic {
                uuid: sensortag_uuid(base + 1),
                size,
            },
            configuration: Some(Configuration {
                uuid: sensortag_uuid(base + 2),
                on: Some(on),
                on_notify: None,
                off: Some(off),
            }),
            trigger: None,
            notify: true,
        }
    }

    pub const BATTERY_LEVEL: SensorKind = SensorKind {
        name: "battery",
        service: to_uuid(0x180f),
        source: DataSource::Property {
            interface: "org.bluez.Battery1",
            property: "Percentage",
        },
        configuration: None,
        trigger: None,
        notify: true,
    };

    pub const TEMPERATURE: SensorKind = sensortag("temperature", 0xaa00, 4, &[0x01], &[0x00]);
    pub const HUMIDITY: SensorKind = sensortag("humidity", 0xaa20, 4, &[0x01], &[0x00]);
    pub const PRESSURE: SensorKind = sensortag("pressure", 0xaa40, 6, &[0x01], &[0x00]);
    pub const LIGHT: SensorKind = sensortag("light", 0xaa70, 2, &[0x01], &[0x00]);
    // gyro off, accelerometer xyz on, 8G range
    pub const ACCELEROMETER: SensorKind =
        sensortag("accelerometer", 0xaa80, 18, &[0x38, 0x02], &[0x00, 0x00]);

    pub const BUTTON: SensorKind = SensorKind {
        name: "button",
        service: to_uuid(0xffe0),
        source: DataSource::Characteristic {
            uuid: to_uuid(0xffe1),
            size: 1,
        },
        configuration: None,
        trigger: None,
        notify: true,
    };

    pub const ALL: &[&SensorKind] = &[
        &BATTERY_LEVEL,
        &TEMPERATURE,
        &HUMIDITY,
        &PRESSURE,
        &LIGHT,
        &ACCELEROMETER,
        &BUTTON,
    ];

    /// Look up a sensor kind by its short name
    pub fn by_name(name: &str) -> Option<&'static SensorKind> {
        ALL.iter().copied().find(|k| k.name == name)
    }
}
