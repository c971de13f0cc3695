//! Bus handle shared by every sensor session

use btzen_bus::{BusError, ConnectionId, Transport};
use btzen_core::{Address, Decoder, Mode, SensorKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::debug;

use crate::config::BusConfig;
use crate::error::SensorError;
use crate::registry::Registry;
use crate::session::Sensor;

pub(crate) struct Inner {
    pub transport: Arc<dyn Transport>,
    pub config: BusConfig,
    pub registry: Registry,
    /// Display names resolved per device
    pub names: Mutex<HashMap<Address, String>>,
    next_connection: AtomicU64,
    pub wake: Notify,
    pub shutdown: Notify,
}

/// Handle to the system bus connection and its dispatch loop
///
/// Cheap to clone; every [`Sensor`] keeps a clone of the handle that created
/// it. Exactly one task should drive [`Bus::run`].
#[derive(Clone)]
pub struct Bus {
    pub(crate) inner: Arc<Inner>,
}

impl Bus {
    pub fn new(transport: Arc<dyn Transport>, config: BusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                registry: Registry::new(),
                names: Mutex::new(HashMap::new()),
                next_connection: AtomicU64::new(1),
                wake: Notify::new(),
                shutdown: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.inner.transport.as_ref()
    }

    /// Run a synchronous transport call, then wake the dispatch loop
    ///
    /// The call may have buffered traffic for other sessions without the
    /// bus descriptor becoming readable.
    pub(crate) fn call<T>(
        &self,
        call: impl FnOnce(&dyn Transport) -> Result<T, BusError>,
    ) -> Result<T, BusError> {
        let result = call(self.transport());
        self.wake();
        result
    }

    /// Run a synchronous transport call on the blocking pool, then wake the
    /// dispatch loop
    pub(crate) async fn blocking<T, F>(&self, call: F) -> Result<T, SensorError>
    where
        F: FnOnce(&dyn Transport) -> Result<T, BusError> + Send + 'static,
        T: Send + 'static,
    {
        let transport = self.inner.transport.clone();
        let result = tokio::task::spawn_blocking(move || call(transport.as_ref())).await;
        self.wake();
        Ok(result??)
    }

    /// Create a session reading a sensor of `kind` on the device at `address`
    ///
    /// The session starts `Disconnected`; call [`Sensor::enable`] to connect.
    pub fn sensor<D: Decoder>(
        &self,
        address: Address,
        kind: &'static SensorKind,
        mode: Mode,
        decoder: D,
    ) -> Result<Sensor<D>, SensorError> {
        if mode == Mode::Notifying && !kind.supports_notify() {
            return Err(SensorError::NotifyUnsupported(kind.name));
        }
        let connection = ConnectionId(self.inner.next_connection.fetch_add(1, Ordering::Relaxed));
        debug!(
            device = %address,
            kind = kind.name,
            connection = %connection,
            "Created sensor session"
        );
        Ok(Sensor::new(self.clone(), connection, address, kind, mode, decoder))
    }

    /// Number of sessions currently registered
    pub fn sessions(&self) -> usize {
        self.inner.registry.len()
    }

    /// Force a drain of bus traffic from the dispatch loop
    ///
    /// Blocking calls may buffer traffic without the descriptor becoming
    /// readable again.
    pub fn wake(&self) {
        self.inner.wake.notify_one();
    }

    /// Stop [`Bus::run`]
    pub fn shutdown(&self) {
        self.inner.shutdown.notify_one();
    }
}
