//! Device bootstrap: connect, service resolution, name lookup and path binding
//!
//! Every bus call here blocks until BlueZ replies, so each one runs on the
//! blocking pool and leaves the dispatch loop free.

use btzen_bus::{BusError, DEVICE_INTERFACE};
use btzen_core::{Address, DataSource, DeviceIdentity, ObjectPath, Parameters, SensorKind, Uuid};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::bus::Bus;
use crate::error::SensorError;
use crate::lock;

/// Check telling a bootstrap step that its session was closed meanwhile
pub(crate) type Cancelled<'a> = &'a (dyn Fn() -> bool + Sync);

impl Bus {
    /// Connect the device; connecting an already connected device succeeds
    pub(crate) async fn connect(&self, address: &Address) -> Result<(), SensorError> {
        let path = address.device_path(&self.config().adapter);
        debug!(device = %address, path = %path, "Connecting");
        match self.blocking(move |transport| transport.connect(&path)).await {
            Ok(()) => {}
            Err(SensorError::Transport(source)) => {
                return Err(SensorError::Connection {
                    address: address.clone(),
                    source,
                })
            }
            Err(e) => return Err(e),
        }
        info!(device = %address, "Connected");
        Ok(())
    }

    /// Wait until the device reports its GATT services as resolved
    ///
    /// Polls `ServicesResolved` up to `resolve_attempts` times, pausing
    /// `resolve_interval` between polls. Stops with `Cancelled` as soon as
    /// `cancelled` reports the session closed.
    pub(crate) async fn resolve_services(
        &self,
        address: &Address,
        cancelled: Cancelled<'_>,
    ) -> Result<(), SensorError> {
        let path = address.device_path(&self.config().adapter);
        let attempts = self.config().resolve_attempts;
        let interval = self.config().resolve_interval();

        for attempt in 1..=attempts {
            if cancelled() {
                debug!(device = %address, attempt = attempt, "Service resolution cancelled");
                return Err(SensorError::Cancelled);
            }
            let device = path.clone();
            let resolved = self
                .blocking(move |transport| {
                    transport.property_bool(&device, DEVICE_INTERFACE, "ServicesResolved")
                })
                .await?;
            if resolved {
                debug!(device = %address, attempt = attempt, "Services resolved");
                return Ok(());
            }
            debug!(
                device = %address,
                attempt = attempt,
                attempts = attempts,
                "Services not resolved yet"
            );
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }

        Err(SensorError::ResolutionTimeout {
            address: address.clone(),
            attempts,
        })
    }

    /// Display name of the device, looked up once per device
    pub(crate) async fn resolve_name(&self, address: &Address) -> Result<String, SensorError> {
        let cached = lock(&self.inner.names).get(address).cloned();
        if let Some(name) = cached {
            return Ok(name);
        }

        let path = address.device_path(&self.config().adapter);
        let lookup = self
            .blocking(move |transport| transport.property_string(&path, DEVICE_INTERFACE, "Name"))
            .await;
        let name = match lookup {
            Ok(name) => name,
            Err(SensorError::Transport(e)) => {
                info!(device = %address, error = %e, "Device has no name, using its address");
                address.to_string()
            }
            Err(e) => return Err(e),
        };

        Ok(lock(&self.inner.names)
            .entry(address.clone())
            .or_insert(name)
            .clone())
    }

    /// Bind the characteristic paths a sensor kind needs on the device
    pub(crate) async fn bind(
        &self,
        address: &Address,
        name: String,
        kind: &SensorKind,
    ) -> Result<Parameters, SensorError> {
        let device = address.device_path(&self.config().adapter);
        let found: Vec<_> = self
            .blocking(|transport| transport.characteristics())
            .await?
            .into_iter()
            .filter(|c| c.path.is_descendant_of(&device))
            .collect();

        let mut seen: HashMap<&ObjectPath, Uuid> = HashMap::new();
        for c in &found {
            if let Some(previous) = seen.insert(&c.path, c.uuid) {
                if previous != c.uuid {
                    return Err(BusError::Malformed(format!(
                        "{} listed with UUIDs {} and {}",
                        c.path, previous, c.uuid
                    ))
                    .into());
                }
            }
        }

        let lookup = |uuid: Uuid| {
            found
                .iter()
                .find(|c| c.uuid == uuid)
                .map(|c| c.path.clone())
                .ok_or_else(|| SensorError::CharacteristicNotFound {
                    address: address.clone(),
                    uuid,
                })
        };

        let data = match kind.source {
            DataSource::Characteristic { uuid, .. } => lookup(uuid)?,
            DataSource::Property { .. } => device,
        };
        let conf = kind.configuration.map(|c| lookup(c.uuid)).transpose()?;
        let trigger = kind.trigger.map(lookup).transpose()?;

        debug!(device = %address, kind = kind.name, data = %data, "Bound sensor paths");

        Ok(Parameters {
            name,
            data,
            conf,
            trigger,
            config_on: kind.configuration.and_then(|c| c.on),
            config_on_notify: kind.configuration.and_then(|c| c.on_notify),
            config_off: kind.configuration.and_then(|c| c.off),
        })
    }

    /// Connect several devices and resolve their services and names
    ///
    /// Sensors created afterwards for these devices reuse the cached names.
    pub async fn connect_all(
        &self,
        addresses: &[Address],
    ) -> Result<Vec<DeviceIdentity>, SensorError> {
        let mut devices = Vec::with_capacity(addresses.len());
        for address in addresses {
            self.connect(address).await?;
            self.resolve_services(address, &|| false).await?;
            let name = self.resolve_name(address).await?;
            devices.push(DeviceIdentity {
                address: address.clone(),
                name,
            });
        }
        Ok(devices)
    }
}
