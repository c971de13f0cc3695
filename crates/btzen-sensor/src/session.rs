//! Per-device sensor session
//!
//! A [`Sensor`] walks its device through
//! `Disconnected -> Connecting -> ResolvingServices -> Ready -> Enabling ->
//! Enabled -> Closed`. `Closed` is terminal and reachable from every other
//! state; any failure while enabling closes the session.

use btzen_bus::{BusError, ConnectionId, Traffic, TrafficKind, Transport};
use btzen_core::{Address, DataSource, Decoder, Mode, ObjectPath, Parameters, SensorKind};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

use crate::bus::Bus;
use crate::error::SensorError;
use crate::lock;
use crate::pending::{Completion, PendingTable, Slot};
use crate::registry::Route;

/// Lifecycle state of a sensor session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Connecting,
    ResolvingServices,
    Ready,
    Enabling,
    Enabled(Mode),
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::ResolvingServices => write!(f, "resolving-services"),
            Self::Ready => write!(f, "ready"),
            Self::Enabling => write!(f, "enabling"),
            Self::Enabled(Mode::Polling) => write!(f, "enabled (polling)"),
            Self::Enabled(Mode::Notifying) => write!(f, "enabled (notifying)"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

struct Session<V> {
    state: State,
    params: Option<Parameters>,
    trigger: Option<Vec<u8>>,
    subscribed: bool,
    pending: PendingTable<V>,
}

/// Session data shared with the dispatch loop through the registry
struct Shared<D: Decoder> {
    connection: ConnectionId,
    address: Address,
    kind: &'static SensorKind,
    mode: Mode,
    decoder: D,
    session: Mutex<Session<D::Value>>,
}

impl<D: Decoder> Shared<D> {
    /// Decode `payload` and hand it to the reader waiting on `slot`
    fn fulfil(
        &self,
        slot: Slot<D::Value>,
        path: &ObjectPath,
        payload: Result<Vec<u8>, BusError>,
    ) -> bool {
        let result = match payload {
            Ok(data) => self.decoder.decode(&data).map_err(SensorError::from),
            Err(e) => Err(SensorError::Transport(e)),
        };
        if slot.send(result).is_err() {
            debug!(device = %self.address, path = %path, "Reader gone before completion");
            return false;
        }
        true
    }
}

impl<D: Decoder> Route for Shared<D> {
    fn complete(&self, traffic: Traffic) -> bool {
        let slot = lock(&self.session).pending.take(&traffic.path, traffic.kind);
        let Some(slot) = slot else {
            if traffic.kind == TrafficKind::NotifyValue {
                trace!(device = %self.address, path = %traffic.path, "No reader waiting for value");
            } else {
                let violation = SensorError::ProtocolViolation {
                    connection: traffic.connection,
                    path: traffic.path,
                    kind: traffic.kind,
                };
                warn!(device = %self.address, error = %violation, "Dropping unmatched traffic");
            }
            return false;
        };
        self.fulfil(slot, &traffic.path, traffic.payload)
    }
}

/// Sensor on a BLE device, read through the bus it was created on
///
/// Dropping the sensor closes it.
pub struct Sensor<D: Decoder> {
    bus: Bus,
    shared: Arc<Shared<D>>,
}

impl<D: Decoder> Sensor<D> {
    pub(crate) fn new(
        bus: Bus,
        connection: ConnectionId,
        address: Address,
        kind: &'static SensorKind,
        mode: Mode,
        decoder: D,
    ) -> Self {
        let shared = Arc::new(Shared {
            connection,
            address,
            kind,
            mode,
            decoder,
            session: Mutex::new(Session {
                state: State::Disconnected,
                params: None,
                trigger: None,
                subscribed: false,
                pending: PendingTable::new(),
            }),
        });
        let route: Arc<dyn Route> = shared.clone();
        bus.inner.registry.insert(connection, Arc::downgrade(&route));
        Self { bus, shared }
    }

    fn session(&self) -> MutexGuard<'_, Session<D::Value>> {
        lock(&self.shared.session)
    }

    pub fn address(&self) -> &Address {
        &self.shared.address
    }

    pub fn kind(&self) -> &'static SensorKind {
        self.shared.kind
    }

    pub fn mode(&self) -> Mode {
        self.shared.mode
    }

    pub fn connection(&self) -> ConnectionId {
        self.shared.connection
    }

    pub fn state(&self) -> State {
        self.session().state
    }

    /// Bound parameters, available once the sensor has been enabled
    pub fn parameters(&self) -> Option<Parameters> {
        self.session().params.clone()
    }

    /// Display name of the device
    pub fn name(&self) -> Option<String> {
        self.session().params.as_ref().map(|p| p.name.clone())
    }

    /// Payload written to the trigger characteristic when the sensor is enabled
    pub fn set_trigger(&self, data: impl Into<Vec<u8>>) {
        self.session().trigger = Some(data.into());
    }

    /// Move to `next` unless the session was closed meanwhile
    fn advance(&self, next: State) -> Result<(), SensorError> {
        let mut session = self.session();
        if session.state == State::Closed {
            return Err(SensorError::Cancelled);
        }
        trace!(device = %self.shared.address, from = %session.state, to = %next, "State change");
        session.state = next;
        Ok(())
    }

    /// Connect the device, resolve its services and switch the sensor on
    ///
    /// On failure the session is closed and the error returned.
    pub async fn enable(&self) -> Result<(), SensorError> {
        {
            let session = self.session();
            match session.state {
                State::Disconnected | State::Ready | State::Enabled(_) => {}
                state => {
                    return Err(SensorError::InvalidState {
                        operation: "enable",
                        state,
                    })
                }
            }
            if let Some(path) = session.pending.in_flight() {
                return Err(SensorError::Busy(path.clone()));
            }
        }

        match self.try_enable().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(device = %self.shared.address, kind = self.shared.kind.name, error = %e, "Cannot enable sensor");
                self.close();
                Err(e)
            }
        }
    }

    async fn try_enable(&self) -> Result<(), SensorError> {
        let address = &self.shared.address;
        if let Some(path) = self.take_subscription() {
            let (connection, source) = (self.shared.connection, self.shared.kind.source);
            let result = self
                .bus
                .blocking(move |transport| stop_notifications(transport, connection, source, &path))
                .await;
            if let Err(e) = result {
                warn!(device = %address, error = %e, "Cannot stop notifications");
            }
        }

        self.advance(State::Connecting)?;
        self.bus.connect(address).await?;

        self.advance(State::ResolvingServices)?;
        self.bus
            .resolve_services(address, &|| self.state() == State::Closed)
            .await?;
        let name = self.bus.resolve_name(address).await?;

        self.advance(State::Ready)?;
        let params = self.bus.bind(address, name, self.shared.kind).await?;

        self.advance(State::Enabling)?;
        self.session().params = Some(params.clone());
        self.switch_on(&params).await?;

        self.advance(State::Enabled(self.shared.mode))?;
        self.bus.wake();

        info!(
            device = %address,
            name = %params.name,
            kind = self.shared.kind.name,
            mode = ?self.shared.mode,
            "Sensor enabled"
        );
        Ok(())
    }

    /// Power-on write, subscription, then trigger write
    async fn switch_on(&self, params: &Parameters) -> Result<(), SensorError> {
        let mode = self.shared.mode;

        if let (Some(conf), Some(data)) = (&params.conf, params.power_on(mode)) {
            debug!(device = %self.shared.address, path = %conf, "Writing power-on configuration");
            let (conf, data) = (conf.clone(), data.to_vec());
            self.bus
                .blocking(move |transport| transport.write(&conf, &data))
                .await?;
        }

        if mode == Mode::Notifying {
            self.subscribe(params).await?;
        }

        let trigger = self.session().trigger.clone();
        if let Some(data) = trigger {
            match &params.trigger {
                Some(path) => {
                    debug!(device = %self.shared.address, path = %path, "Writing trigger");
                    let path = path.clone();
                    self.bus
                        .blocking(move |transport| transport.write(&path, &data))
                        .await?;
                }
                None => warn!(
                    device = %self.shared.address,
                    kind = self.shared.kind.name,
                    "Trigger set but sensor has no trigger characteristic"
                ),
            }
        }
        Ok(())
    }

    async fn subscribe(&self, params: &Parameters) -> Result<(), SensorError> {
        let (connection, source) = (self.shared.connection, self.shared.kind.source);
        let path = params.data.clone();
        self.bus
            .blocking(move |transport| match source {
                DataSource::Characteristic { .. } => transport.start_notify(connection, &path),
                DataSource::Property { interface, property } => {
                    transport.watch_property(connection, &path, interface, property)
                }
            })
            .await?;
        self.session().subscribed = true;
        debug!(device = %self.shared.address, path = %params.data, "Subscribed to notifications");
        Ok(())
    }

    /// Clear the subscription flag, returning the path still subscribed to
    fn take_subscription(&self) -> Option<ObjectPath> {
        let mut session = self.session();
        if !std::mem::take(&mut session.subscribed) {
            return None;
        }
        session.params.as_ref().map(|p| p.data.clone())
    }

    /// Start a read and return its completion handle
    ///
    /// Every read completes through its handle: characteristic reads and
    /// notifying reads through the dispatch loop, polling reads of interface
    /// properties from the blocking pool (or inline outside a runtime). A
    /// second request while one is in flight fails with [`SensorError::Busy`].
    pub fn request(&self) -> Result<Completion<D::Value>, SensorError> {
        let mut session = self.session();
        let (mode, params) = match (session.state, &session.params) {
            (State::Enabled(mode), Some(params)) => (mode, params.clone()),
            (state, _) => {
                return Err(SensorError::InvalidState {
                    operation: "read",
                    state,
                })
            }
        };

        match (mode, self.shared.kind.source) {
            (Mode::Notifying, _) => session.pending.arm(&params.data, TrafficKind::NotifyValue),
            (Mode::Polling, DataSource::Property { interface, property }) => {
                let completion = session.pending.arm(&params.data, TrafficKind::ReadReply)?;
                drop(session);

                let (bus, shared, path) = (self.bus.clone(), self.shared.clone(), params.data);
                let fetch = move || {
                    let payload =
                        bus.call(|transport| transport.property_bytes(&path, interface, property));
                    let slot = lock(&shared.session).pending.take(&path, TrafficKind::ReadReply);
                    match slot {
                        Some(slot) => {
                            shared.fulfil(slot, &path, payload);
                        }
                        None => {
                            trace!(device = %shared.address, path = %path, "Property read no longer awaited")
                        }
                    }
                };
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn_blocking(fetch);
                    }
                    Err(_) => fetch(),
                }
                Ok(completion)
            }
            (Mode::Polling, DataSource::Characteristic { .. }) => {
                let completion = session.pending.arm(&params.data, TrafficKind::ReadReply)?;
                drop(session);
                let connection = self.shared.connection;
                if let Err(e) = self
                    .bus
                    .call(|transport| transport.request_read(connection, &params.data))
                {
                    self.session().pending.take(&params.data, TrafficKind::ReadReply);
                    return Err(e.into());
                }
                Ok(completion)
            }
        }
    }

    /// Read one decoded value
    pub async fn read(&self) -> Result<D::Value, SensorError> {
        self.request()?.await
    }

    /// Switch the sensor off and release the session
    ///
    /// Stops notifications, writes the power-off configuration and cancels
    /// a pending read. Teardown failures are logged. Closing again is a no-op.
    pub fn close(&self) {
        {
            let mut session = self.session();
            if session.state == State::Closed {
                return;
            }
            session.state = State::Closed;
        }

        if let Some(path) = self.take_subscription() {
            let (connection, source) = (self.shared.connection, self.shared.kind.source);
            let result = self
                .bus
                .call(|transport| stop_notifications(transport, connection, source, &path));
            if let Err(e) = result {
                warn!(device = %self.shared.address, path = %path, error = %e, "Cannot stop notifications");
            }
        }

        let params = self.session().params.clone();
        if let Some(Parameters {
            conf: Some(conf),
            config_off: Some(off),
            ..
        }) = &params
        {
            debug!(device = %self.shared.address, path = %conf, "Writing power-off configuration");
            if let Err(e) = self.bus.call(|transport| transport.write(conf, off)) {
                warn!(device = %self.shared.address, path = %conf, error = %e, "Cannot switch sensor off");
            }
        }

        let cancelled = self.session().pending.cancel_all();
        self.bus.inner.registry.remove(self.shared.connection);

        info!(
            device = %self.shared.address,
            kind = self.shared.kind.name,
            cancelled = cancelled,
            "Sensor closed"
        );
    }
}

/// Undo a subscription made while switching the sensor on
fn stop_notifications(
    transport: &dyn Transport,
    connection: ConnectionId,
    source: DataSource,
    path: &ObjectPath,
) -> Result<(), BusError> {
    match source {
        DataSource::Characteristic { .. } => transport.stop_notify(connection, path),
        DataSource::Property { interface, property } => {
            transport.unwatch_property(connection, path, interface, property)
        }
    }
}

impl<D: Decoder> Drop for Sensor<D> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{button_device, char_path, device_path, Call, MockTransport, ADDRESS_A};
    use crate::BusConfig;
    use btzen_bus::Processed;
    use btzen_core::{decode, kinds, to_uuid, Configuration};
    use tokio::time::Duration;

    static TRIGGERED: SensorKind = SensorKind {
        name: "triggered",
        service: to_uuid(0xfff0),
        source: DataSource::Characteristic {
            uuid: to_uuid(0xfff1),
            size: 1,
        },
        configuration: Some(Configuration {
            uuid: to_uuid(0xfff2),
            on: Some(&[0x01]),
            on_notify: Some(&[0x03]),
            off: Some(&[0x00]),
        }),
        trigger: Some(to_uuid(0xfff3)),
        notify: true,
    };

    static POLL_ONLY: SensorKind = SensorKind {
        name: "poll-only",
        service: to_uuid(0xfff0),
        source: DataSource::Characteristic {
            uuid: to_uuid(0xfff1),
            size: 1,
        },
        configuration: None,
        trigger: None,
        notify: false,
    };

    fn triggered_device() -> MockTransport {
        MockTransport::new()
            .with_characteristic(char_path(ADDRESS_A, "service0010/char0011"), to_uuid(0xfff1))
            .with_characteristic(char_path(ADDRESS_A, "service0010/char0014"), to_uuid(0xfff2))
            .with_characteristic(char_path(ADDRESS_A, "service0010/char0016"), to_uuid(0xfff3))
    }

    fn address() -> Address {
        Address::parse(ADDRESS_A).unwrap()
    }

    fn resolve_polls(mock: &MockTransport) -> usize {
        mock.calls()
            .iter()
            .filter(|c| matches!(c, Call::PropertyBool(_, name) if name == "ServicesResolved"))
            .count()
    }

    fn teardown_calls(calls: &[Call]) -> Vec<Call> {
        calls
            .iter()
            .filter(|c| matches!(c, Call::Write(..) | Call::StopNotify(..) | Call::UnwatchProperty(..)))
            .cloned()
            .collect()
    }

    #[tokio::test]
    async fn test_enable_order_with_configuration_and_trigger() {
        let mock = Arc::new(triggered_device());
        let bus = Bus::new(mock.clone(), BusConfig::default());
        let sensor = bus
            .sensor(address(), &TRIGGERED, Mode::Notifying, decode::raw)
            .unwrap();
        sensor.set_trigger([0x01]);

        sensor.enable().await.unwrap();
        assert_eq!(sensor.state(), State::Enabled(Mode::Notifying));

        let switch_on: Vec<Call> = mock
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Write(..) | Call::StartNotify(..)))
            .collect();
        assert_eq!(
            switch_on,
            vec![
                Call::Write(char_path(ADDRESS_A, "service0010/char0014"), vec![0x03]),
                Call::StartNotify(sensor.connection(), char_path(ADDRESS_A, "service0010/char0011")),
                Call::Write(char_path(ADDRESS_A, "service0010/char0016"), vec![0x01]),
            ]
        );
    }

    #[tokio::test]
    async fn test_enable_polling_does_not_subscribe() {
        let mock = Arc::new(triggered_device());
        let bus = Bus::new(mock.clone(), BusConfig::default());
        let sensor = bus
            .sensor(address(), &TRIGGERED, Mode::Polling, decode::raw)
            .unwrap();

        sensor.enable().await.unwrap();

        let calls = mock.calls();
        assert_eq!(calls[0], Call::Connect(device_path(ADDRESS_A)));
        assert!(calls.contains(&Call::Write(char_path(ADDRESS_A, "service0010/char0014"), vec![0x01])));
        assert!(!calls.iter().any(|c| matches!(c, Call::StartNotify(..))));
    }

    #[tokio::test]
    async fn test_connect_failure_closes_session() {
        let mock = Arc::new(
            MockTransport::new().failing_connect(BusError::NoSuchObject("dev_AA_BB_CC_DD_EE_01".into())),
        );
        let bus = Bus::new(mock.clone(), BusConfig::default());
        let sensor = bus
            .sensor(address(), &kinds::BUTTON, Mode::Notifying, decode::button)
            .unwrap();
        assert_eq!(bus.sessions(), 1);

        let result = sensor.enable().await;

        assert!(matches!(result, Err(SensorError::Connection { .. })));
        assert_eq!(sensor.state(), State::Closed);
        assert_eq!(bus.sessions(), 0);
        assert!(matches!(
            sensor.enable().await,
            Err(SensorError::InvalidState { state: State::Closed, .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_characteristic_closes_session() {
        let mock = Arc::new(MockTransport::new());
        let bus = Bus::new(mock.clone(), BusConfig::default());
        let sensor = bus
            .sensor(address(), &kinds::TEMPERATURE, Mode::Polling, decode::temperature)
            .unwrap();

        let result = sensor.enable().await;

        assert!(matches!(result, Err(SensorError::CharacteristicNotFound { .. })));
        assert_eq!(sensor.state(), State::Closed);
        assert!(sensor.parameters().is_none());
    }

    #[tokio::test]
    async fn test_second_read_is_rejected_without_side_effects() {
        let mock = Arc::new(button_device(MockTransport::new(), ADDRESS_A));
        let bus = Bus::new(mock.clone(), BusConfig::default());
        let sensor = bus
            .sensor(address(), &kinds::BUTTON, Mode::Notifying, decode::button)
            .unwrap();
        sensor.enable().await.unwrap();

        let _first = sensor.request().unwrap();
        let calls = mock.calls().len();

        let second = sensor.request();
        assert!(matches!(second, Err(SensorError::Busy(_))));
        assert_eq!(mock.calls().len(), calls);
    }

    #[tokio::test]
    async fn test_polling_read_completes_with_reply() {
        let mock = Arc::new(button_device(MockTransport::new(), ADDRESS_A));
        let bus = Bus::new(mock.clone(), BusConfig::default());
        let sensor = bus
            .sensor(address(), &kinds::BUTTON, Mode::Polling, decode::button)
            .unwrap();
        sensor.enable().await.unwrap();
        let path = sensor.parameters().unwrap().data;

        let read = sensor.request().unwrap();
        assert!(matches!(sensor.request(), Err(SensorError::Busy(_))));
        assert_eq!(
            mock.calls().last(),
            Some(&Call::RequestRead(sensor.connection(), path.clone()))
        );

        mock.push(Processed::Traffic(Traffic {
            connection: sensor.connection(),
            path,
            kind: TrafficKind::ReadReply,
            payload: Ok(vec![0x02]),
        }));
        assert_eq!(bus.dispatch_ready(), 1);
        assert_eq!(read.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_read_reply_error_fails_read() {
        let mock = Arc::new(button_device(MockTransport::new(), ADDRESS_A));
        let bus = Bus::new(mock.clone(), BusConfig::default());
        let sensor = bus
            .sensor(address(), &kinds::BUTTON, Mode::Polling, decode::button)
            .unwrap();
        sensor.enable().await.unwrap();
        let path = sensor.parameters().unwrap().data;

        let read = sensor.request().unwrap();
        mock.push(Processed::Traffic(Traffic {
            connection: sensor.connection(),
            path,
            kind: TrafficKind::ReadReply,
            payload: Err(BusError::call("org.bluez.Error.Failed", "Not connected")),
        }));
        bus.dispatch_ready();

        assert!(matches!(read.await, Err(SensorError::Transport(BusError::Call { .. }))));
        assert_eq!(sensor.state(), State::Enabled(Mode::Polling));
    }

    #[tokio::test]
    async fn test_dropped_read_frees_slot() {
        let mock = Arc::new(button_device(MockTransport::new(), ADDRESS_A));
        let bus = Bus::new(mock.clone(), BusConfig::default());
        let sensor = bus
            .sensor(address(), &kinds::BUTTON, Mode::Notifying, decode::button)
            .unwrap();
        sensor.enable().await.unwrap();

        drop(sensor.request().unwrap());
        assert!(sensor.request().is_ok());
    }

    #[tokio::test]
    async fn test_close_cancels_pending_notify() {
        let mock = Arc::new(button_device(MockTransport::new(), ADDRESS_A));
        let bus = Bus::new(mock.clone(), BusConfig::default());
        let sensor = bus
            .sensor(address(), &kinds::BUTTON, Mode::Notifying, decode::button)
            .unwrap();
        sensor.enable().await.unwrap();

        let read = sensor.request().unwrap();
        sensor.close();

        assert!(matches!(read.await, Err(SensorError::Cancelled)));
        assert!(matches!(
            sensor.read().await,
            Err(SensorError::InvalidState { state: State::Closed, .. })
        ));
    }

    #[tokio::test]
    async fn test_close_twice_tears_down_once() {
        let mock = Arc::new(triggered_device());
        let bus = Bus::new(mock.clone(), BusConfig::default());
        let sensor = bus
            .sensor(address(), &TRIGGERED, Mode::Notifying, decode::raw)
            .unwrap();
        sensor.enable().await.unwrap();
        let before = mock.calls().len();

        sensor.close();
        sensor.close();

        let calls = mock.calls();
        assert_eq!(
            teardown_calls(&calls[before..]),
            vec![
                Call::StopNotify(sensor.connection(), char_path(ADDRESS_A, "service0010/char0011")),
                Call::Write(char_path(ADDRESS_A, "service0010/char0014"), vec![0x00]),
            ]
        );
        assert_eq!(bus.sessions(), 0);
    }

    #[tokio::test]
    async fn test_drop_closes_session() {
        let mock = Arc::new(triggered_device());
        let bus = Bus::new(mock.clone(), BusConfig::default());
        let sensor = bus
            .sensor(address(), &TRIGGERED, Mode::Polling, decode::raw)
            .unwrap();
        sensor.enable().await.unwrap();

        drop(sensor);

        assert_eq!(
            mock.calls().last(),
            Some(&Call::Write(char_path(ADDRESS_A, "service0010/char0014"), vec![0x00]))
        );
        assert_eq!(bus.sessions(), 0);
    }

    #[tokio::test]
    async fn test_battery_level_polling() {
        let mock = Arc::new(MockTransport::new().with_property(
            device_path(ADDRESS_A),
            "Percentage",
            vec![0x64],
        ));
        let bus = Bus::new(mock.clone(), BusConfig::default());
        let sensor = bus
            .sensor(address(), &kinds::BATTERY_LEVEL, Mode::Polling, decode::percent)
            .unwrap();
        sensor.enable().await.unwrap();

        assert_eq!(sensor.read().await.unwrap(), 100);
        assert_eq!(sensor.name(), Some(ADDRESS_A.to_string()));
    }

    #[tokio::test]
    async fn test_battery_level_notifying_watches_property() {
        let mock = Arc::new(MockTransport::new());
        let bus = Bus::new(mock.clone(), BusConfig::default());
        let sensor = bus
            .sensor(address(), &kinds::BATTERY_LEVEL, Mode::Notifying, decode::percent)
            .unwrap();
        sensor.enable().await.unwrap();
        assert!(mock.calls().contains(&Call::WatchProperty(
            sensor.connection(),
            device_path(ADDRESS_A),
            "Percentage".to_string()
        )));

        let read = sensor.request().unwrap();
        mock.push(Processed::Traffic(Traffic {
            connection: sensor.connection(),
            path: device_path(ADDRESS_A),
            kind: TrafficKind::NotifyValue,
            payload: Ok(vec![87]),
        }));
        bus.dispatch_ready();
        assert_eq!(read.await.unwrap(), 87);

        sensor.close();
        assert!(mock.calls().contains(&Call::UnwatchProperty(
            sensor.connection(),
            device_path(ADDRESS_A),
            "Percentage".to_string()
        )));
    }

    #[tokio::test]
    async fn test_trigger_without_characteristic_is_skipped() {
        let mock = Arc::new(button_device(MockTransport::new(), ADDRESS_A));
        let bus = Bus::new(mock.clone(), BusConfig::default());
        let sensor = bus
            .sensor(address(), &kinds::BUTTON, Mode::Notifying, decode::button)
            .unwrap();
        sensor.set_trigger(vec![0x01]);

        sensor.enable().await.unwrap();

        assert!(!mock.calls().iter().any(|c| matches!(c, Call::Write(..))));
    }

    #[tokio::test]
    async fn test_reenable_stops_previous_subscription() {
        let mock = Arc::new(button_device(MockTransport::new(), ADDRESS_A));
        let bus = Bus::new(mock.clone(), BusConfig::default());
        let sensor = bus
            .sensor(address(), &kinds::BUTTON, Mode::Notifying, decode::button)
            .unwrap();

        sensor.enable().await.unwrap();
        sensor.enable().await.unwrap();

        let subscriptions: Vec<Call> = mock
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::StartNotify(..) | Call::StopNotify(..)))
            .collect();
        assert_eq!(subscriptions.len(), 3);
        assert!(matches!(subscriptions[1], Call::StopNotify(..)));
    }

    #[test]
    fn test_notify_unsupported() {
        let bus = Bus::new(Arc::new(MockTransport::new()), BusConfig::default());
        let result = bus.sensor(address(), &POLL_ONLY, Mode::Notifying, decode::raw);
        assert!(matches!(result, Err(SensorError::NotifyUnsupported("poll-only"))));
        assert!(bus.sensor(address(), &POLL_ONLY, Mode::Polling, decode::raw).is_ok());
    }

    #[test]
    fn test_read_before_enable_rejected() {
        let bus = Bus::new(Arc::new(MockTransport::new()), BusConfig::default());
        let sensor = bus
            .sensor(address(), &kinds::BUTTON, Mode::Polling, decode::button)
            .unwrap();
        assert!(matches!(
            sensor.request(),
            Err(SensorError::InvalidState { state: State::Disconnected, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_waits_for_service_resolution() {
        let mock = Arc::new(button_device(MockTransport::new().resolved_after(3), ADDRESS_A));
        let bus = Bus::new(mock.clone(), BusConfig::default());
        let sensor = bus
            .sensor(address(), &kinds::BUTTON, Mode::Notifying, decode::button)
            .unwrap();

        sensor.enable().await.unwrap();

        assert_eq!(resolve_polls(&mock), 4);
        assert_eq!(sensor.state(), State::Enabled(Mode::Notifying));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_gives_up_on_unresolved_services() {
        let mock = Arc::new(button_device(MockTransport::new().never_resolved(), ADDRESS_A));
        let bus = Bus::new(mock.clone(), BusConfig::default());
        let sensor = bus
            .sensor(address(), &kinds::BUTTON, Mode::Notifying, decode::button)
            .unwrap();

        let result = sensor.enable().await;

        assert!(matches!(
            result,
            Err(SensorError::ResolutionTimeout { attempts: 10, .. })
        ));
        assert_eq!(resolve_polls(&mock), 10);
        assert_eq!(sensor.state(), State::Closed);
        assert_eq!(bus.sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_resolution_stops_polling() {
        let mock = Arc::new(button_device(MockTransport::new().never_resolved(), ADDRESS_A));
        let bus = Bus::new(mock.clone(), BusConfig::default());
        let sensor = Arc::new(
            bus.sensor(address(), &kinds::BUTTON, Mode::Notifying, decode::button)
                .unwrap(),
        );

        let enabling = tokio::spawn({
            let sensor = sensor.clone();
            async move { sensor.enable().await }
        });
        tokio::time::sleep(Duration::from_millis(1500)).await;
        sensor.close();

        assert!(matches!(enabling.await.unwrap(), Err(SensorError::Cancelled)));
        assert_eq!(sensor.state(), State::Closed);
        assert_eq!(bus.sessions(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(resolve_polls(&mock), 2);
    }
}
