//! Recording transport for tests

use btzen_bus::{
    BusError, Characteristic, ConnectionId, Processed, Transport, DEVICE_INTERFACE,
};
use btzen_core::{to_uuid, Address, ObjectPath, Uuid, DEFAULT_ADAPTER};
use std::collections::{HashMap, VecDeque};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Mutex;
use std::time::Duration;

use crate::lock;

pub const ADDRESS_A: &str = "AA:BB:CC:DD:EE:01";
pub const ADDRESS_B: &str = "AA:BB:CC:DD:EE:02";

/// Bus call as seen by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(ObjectPath),
    PropertyBool(ObjectPath, String),
    PropertyString(ObjectPath, String),
    PropertyBytes(ObjectPath, String),
    Characteristics,
    Write(ObjectPath, Vec<u8>),
    RequestRead(ConnectionId, ObjectPath),
    StartNotify(ConnectionId, ObjectPath),
    StopNotify(ConnectionId, ObjectPath),
    WatchProperty(ConnectionId, ObjectPath, String),
    UnwatchProperty(ConnectionId, ObjectPath, String),
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    /// `ServicesResolved` reads answered with false before the first true
    unresolved: u32,
    never_resolved: bool,
    resolve_polls: u32,
    connect_error: Option<BusError>,
    /// Time each connect call blocks the calling thread
    connect_delay: Option<Duration>,
    names: HashMap<ObjectPath, String>,
    characteristics: Vec<Characteristic>,
    properties: HashMap<(ObjectPath, String), Vec<u8>>,
    queue: VecDeque<Result<Processed, BusError>>,
}

pub struct MockTransport {
    state: Mutex<State>,
    socket: UnixStream,
    _peer: UnixStream,
}

pub fn device_path(address: &str) -> ObjectPath {
    Address::parse(address)
        .unwrap()
        .device_path(DEFAULT_ADAPTER)
}

pub fn char_path(address: &str, suffix: &str) -> ObjectPath {
    ObjectPath::new(format!("{}/{}", device_path(address), suffix))
}

/// Add the button characteristic of a SensorTag at `address`
pub fn button_device(mock: MockTransport, address: &str) -> MockTransport {
    mock.with_characteristic(char_path(address, "service000c/char000d"), to_uuid(0xffe1))
}

impl MockTransport {
    pub fn new() -> Self {
        let (socket, peer) = UnixStream::pair().unwrap();
        Self {
            state: Mutex::new(State::default()),
            socket,
            _peer: peer,
        }
    }

    pub fn resolved_after(mut self, polls: u32) -> Self {
        self.state.get_mut().unwrap().unresolved = polls;
        self
    }

    pub fn never_resolved(mut self) -> Self {
        self.state.get_mut().unwrap().never_resolved = true;
        self
    }

    pub fn failing_connect(mut self, error: BusError) -> Self {
        self.state.get_mut().unwrap().connect_error = Some(error);
        self
    }

    pub fn slow_connect(mut self, delay: Duration) -> Self {
        self.state.get_mut().unwrap().connect_delay = Some(delay);
        self
    }

    pub fn with_name(mut self, address: &str, name: &str) -> Self {
        self.state
            .get_mut()
            .unwrap()
            .names
            .insert(device_path(address), name.to_string());
        self
    }

    pub fn with_characteristic(mut self, path: ObjectPath, uuid: Uuid) -> Self {
        self.state
            .get_mut()
            .unwrap()
            .characteristics
            .push(Characteristic { path, uuid });
        self
    }

    pub fn with_property(mut self, path: ObjectPath, name: &str, value: Vec<u8>) -> Self {
        self.state
            .get_mut()
            .unwrap()
            .properties
            .insert((path, name.to_string()), value);
        self
    }

    pub fn push(&self, processed: Processed) {
        lock(&self.state).queue.push_back(Ok(processed));
    }

    pub fn push_error(&self, error: BusError) {
        lock(&self.state).queue.push_back(Err(error));
    }

    pub fn queued(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.state).calls.clone()
    }

    fn record(&self, call: Call) {
        lock(&self.state).calls.push(call);
    }
}

impl Transport for MockTransport {
    fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    fn connect(&self, device: &ObjectPath) -> Result<(), BusError> {
        let delay = lock(&self.state).connect_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut state = lock(&self.state);
        state.calls.push(Call::Connect(device.clone()));
        match &state.connect_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn property_bool(&self, path: &ObjectPath, interface: &str, name: &str) -> Result<bool, BusError> {
        let mut state = lock(&self.state);
        state.calls.push(Call::PropertyBool(path.clone(), name.to_string()));
        if interface != DEVICE_INTERFACE || name != "ServicesResolved" {
            return Err(BusError::call("org.freedesktop.DBus.Error.InvalidArgs", name));
        }
        state.resolve_polls += 1;
        Ok(!state.never_resolved && state.resolve_polls > state.unresolved)
    }

    fn property_string(&self, path: &ObjectPath, _interface: &str, name: &str) -> Result<String, BusError> {
        let mut state = lock(&self.state);
        state.calls.push(Call::PropertyString(path.clone(), name.to_string()));
        state
            .names
            .get(path)
            .cloned()
            .ok_or_else(|| BusError::call("org.freedesktop.DBus.Error.InvalidArgs", name))
    }

    fn property_bytes(&self, path: &ObjectPath, _interface: &str, name: &str) -> Result<Vec<u8>, BusError> {
        let mut state = lock(&self.state);
        state.calls.push(Call::PropertyBytes(path.clone(), name.to_string()));
        state
            .properties
            .get(&(path.clone(), name.to_string()))
            .cloned()
            .ok_or_else(|| BusError::NoSuchObject(path.to_string()))
    }

    fn characteristics(&self) -> Result<Vec<Characteristic>, BusError> {
        let mut state = lock(&self.state);
        state.calls.push(Call::Characteristics);
        Ok(state.characteristics.clone())
    }

    fn write(&self, path: &ObjectPath, data: &[u8]) -> Result<(), BusError> {
        self.record(Call::Write(path.clone(), data.to_vec()));
        Ok(())
    }

    fn request_read(&self, connection: ConnectionId, path: &ObjectPath) -> Result<(), BusError> {
        self.record(Call::RequestRead(connection, path.clone()));
        Ok(())
    }

    fn start_notify(&self, connection: ConnectionId, path: &ObjectPath) -> Result<(), BusError> {
        self.record(Call::StartNotify(connection, path.clone()));
        Ok(())
    }

    fn stop_notify(&self, connection: ConnectionId, path: &ObjectPath) -> Result<(), BusError> {
        self.record(Call::StopNotify(connection, path.clone()));
        Ok(())
    }

    fn watch_property(
        &self,
        connection: ConnectionId,
        path: &ObjectPath,
        _interface: &str,
        name: &str,
    ) -> Result<(), BusError> {
        self.record(Call::WatchProperty(connection, path.clone(), name.to_string()));
        Ok(())
    }

    fn unwatch_property(
        &self,
        connection: ConnectionId,
        path: &ObjectPath,
        _interface: &str,
        name: &str,
    ) -> Result<(), BusError> {
        self.record(Call::UnwatchProperty(connection, path.clone(), name.to_string()));
        Ok(())
    }

    fn process(&self) -> Result<Processed, BusError> {
        lock(&self.state).queue.pop_front().unwrap_or(Ok(Processed::Idle))
    }
}
