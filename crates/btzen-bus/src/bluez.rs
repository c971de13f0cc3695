//! BlueZ transport over the D-Bus system bus
//!
//! Synchronous primitives are blocking method calls on a private system bus
//! connection. Asynchronous reads are sent without waiting; their replies,
//! together with `PropertiesChanged` signals for subscribed characteristics
//! and watched properties, are matched back to connection identifiers when
//! the caller drains the connection with [`Transport::process`].

use btzen_core::{ObjectPath, Uuid};
use dbus::arg::{prop_cast, PropMap, RefArg, Variant};
use dbus::blocking::stdintf::org_freedesktop_dbus::{ObjectManager, Properties};
use dbus::blocking::Connection;
use dbus::message::{MatchRule, MessageType};
use dbus::Message;
use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::error::BusError;
use crate::transport::{
    Characteristic, ConnectionId, Processed, Traffic, TrafficKind, Transport, BLUEZ_SERVICE,
    DEVICE_INTERFACE, GATT_CHARACTERISTIC_INTERFACE, PROPERTIES_INTERFACE,
};

/// Timeout of blocking method calls
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// (object path, interface, property)
type WatchKey = (ObjectPath, String, String);

struct Inner {
    conn: Connection,
    /// Outstanding asynchronous reads by message serial
    reads: HashMap<u32, (ConnectionId, ObjectPath)>,
    /// Notification subscribers per characteristic
    notify: HashMap<ObjectPath, Vec<ConnectionId>>,
    watches: HashMap<WatchKey, Vec<ConnectionId>>,
    /// Traffic decoded from one message but not handed out yet
    queue: VecDeque<Traffic>,
}

/// Transport talking to the BlueZ daemon on the system bus
pub struct BluezTransport {
    inner: Mutex<Inner>,
    fd: RawFd,
    timeout: Duration,
}

impl BluezTransport {
    /// Open a private connection to the system bus
    pub fn system() -> Result<Self, BusError> {
        Self::with_timeout(DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, BusError> {
        let conn = Connection::new_system()?;
        let rule = MatchRule::new_signal(PROPERTIES_INTERFACE, "PropertiesChanged");
        conn.add_match_no_cb(&rule.match_str())?;
        let fd = conn.channel().watch().fd;

        info!(fd = fd, "Connected to system bus");

        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                reads: HashMap::new(),
                notify: HashMap::new(),
                watches: HashMap::new(),
                queue: VecDeque::new(),
            }),
            fd,
            timeout,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, BusError> {
        self.inner
            .lock()
            .map_err(|_| BusError::Unavailable("bus connection lock poisoned".to_string()))
    }
}

impl Drop for BluezTransport {
    fn drop(&mut self) {
        info!(fd = self.fd, "Releasing system bus connection");
    }
}

impl Transport for BluezTransport {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn connect(&self, device: &ObjectPath) -> Result<(), BusError> {
        let inner = self.lock()?;
        let proxy = inner
            .conn
            .with_proxy(BLUEZ_SERVICE, device.as_str(), self.timeout);
        let result: Result<(), dbus::Error> = proxy.method_call(DEVICE_INTERFACE, "Connect", ());
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.name() == Some("org.bluez.Error.AlreadyConnected") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn property_bool(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> Result<bool, BusError> {
        let inner = self.lock()?;
        let proxy = inner.conn.with_proxy(BLUEZ_SERVICE, path.as_str(), self.timeout);
        Ok(proxy.get::<bool>(interface, name)?)
    }

    fn property_string(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> Result<String, BusError> {
        let inner = self.lock()?;
        let proxy = inner.conn.with_proxy(BLUEZ_SERVICE, path.as_str(), self.timeout);
        Ok(proxy.get::<String>(interface, name)?)
    }

    fn property_bytes(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> Result<Vec<u8>, BusError> {
        let inner = self.lock()?;
        let proxy = inner.conn.with_proxy(BLUEZ_SERVICE, path.as_str(), self.timeout);
        let (value,): (Variant<Box<dyn RefArg>>,) =
            proxy.method_call(PROPERTIES_INTERFACE, "Get", (interface, name))?;
        value_bytes(&*value.0).ok_or_else(|| {
            BusError::Malformed(format!("{}.{} on {} is not a byte value", interface, name, path))
        })
    }

    fn characteristics(&self) -> Result<Vec<Characteristic>, BusError> {
        let inner = self.lock()?;
        let proxy = inner.conn.with_proxy(BLUEZ_SERVICE, "/", self.timeout);
        let objects = proxy.get_managed_objects()?;

        let mut found: Vec<Characteristic> = objects
            .iter()
            .filter_map(|(path, interfaces)| {
                let props = interfaces.get(GATT_CHARACTERISTIC_INTERFACE)?;
                let uuid = prop_cast::<String>(props, "UUID")?;
                let path: &str = path;
                match Uuid::parse_str(uuid) {
                    Ok(uuid) => Some(Characteristic {
                        path: ObjectPath::new(path),
                        uuid,
                    }),
                    Err(e) => {
                        debug!(path = %path, uuid = %uuid, error = %e, "Skipping characteristic with invalid UUID");
                        None
                    }
                }
            })
            .collect();
        found.sort_by(|a, b| a.path.cmp(&b.path));

        debug!(count = found.len(), "Enumerated GATT characteristics");
        Ok(found)
    }

    fn write(&self, path: &ObjectPath, data: &[u8]) -> Result<(), BusError> {
        let inner = self.lock()?;
        let proxy = inner.conn.with_proxy(BLUEZ_SERVICE, path.as_str(), self.timeout);
        let (): () = proxy.method_call(
            GATT_CHARACTERISTIC_INTERFACE,
            "WriteValue",
            (data.to_vec(), PropMap::new()),
        )?;
        Ok(())
    }

    fn request_read(&self, connection: ConnectionId, path: &ObjectPath) -> Result<(), BusError> {
        let mut inner = self.lock()?;
        let msg = Message::new_method_call(
            BLUEZ_SERVICE,
            path.as_str(),
            GATT_CHARACTERISTIC_INTERFACE,
            "ReadValue",
        )
        .map_err(BusError::Malformed)?
        .append1(PropMap::new());

        let serial = inner
            .conn
            .channel()
            .send(msg)
            .map_err(|()| BusError::Unavailable("cannot queue ReadValue call".to_string()))?;
        inner.conn.channel().flush();
        inner.reads.insert(serial, (connection, path.clone()));

        trace!(connection = %connection, path = %path, serial = serial, "Sent ReadValue");
        Ok(())
    }

    fn start_notify(&self, connection: ConnectionId, path: &ObjectPath) -> Result<(), BusError> {
        let mut inner = self.lock()?;
        let first = inner.notify.get(path).map_or(true, |c| c.is_empty());
        if first {
            let proxy = inner.conn.with_proxy(BLUEZ_SERVICE, path.as_str(), self.timeout);
            let (): () = proxy.method_call(GATT_CHARACTERISTIC_INTERFACE, "StartNotify", ())?;
        }
        inner.notify.entry(path.clone()).or_default().push(connection);
        Ok(())
    }

    fn stop_notify(&self, connection: ConnectionId, path: &ObjectPath) -> Result<(), BusError> {
        let mut inner = self.lock()?;
        let last = match inner.notify.get_mut(path) {
            Some(subscribers) => {
                subscribers.retain(|c| *c != connection);
                subscribers.is_empty()
            }
            None => return Ok(()),
        };
        if last {
            inner.notify.remove(path);
            let proxy = inner.conn.with_proxy(BLUEZ_SERVICE, path.as_str(), self.timeout);
            let (): () = proxy.method_call(GATT_CHARACTERISTIC_INTERFACE, "StopNotify", ())?;
        }
        Ok(())
    }

    fn watch_property(
        &self,
        connection: ConnectionId,
        path: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> Result<(), BusError> {
        let mut inner = self.lock()?;
        let key = (path.clone(), interface.to_string(), name.to_string());
        inner.watches.entry(key).or_default().push(connection);
        Ok(())
    }

    fn unwatch_property(
        &self,
        connection: ConnectionId,
        path: &ObjectPath,
        interface: &str,
        name: &str,
    ) -> Result<(), BusError> {
        let mut inner = self.lock()?;
        let key = (path.clone(), interface.to_string(), name.to_string());
        if let Some(watchers) = inner.watches.get_mut(&key) {
            watchers.retain(|c| *c != connection);
            if watchers.is_empty() {
                inner.watches.remove(&key);
            }
        }
        Ok(())
    }

    fn process(&self) -> Result<Processed, BusError> {
        let mut inner = match self.inner.try_lock() {
            Ok(inner) => inner,
            Err(TryLockError::WouldBlock) => {
                trace!("Connection busy with a blocking call");
                return Ok(Processed::Idle);
            }
            Err(TryLockError::Poisoned(_)) => {
                return Err(BusError::Unavailable("bus connection lock poisoned".to_string()))
            }
        };
        if let Some(traffic) = inner.queue.pop_front() {
            return Ok(Processed::Traffic(traffic));
        }

        inner
            .conn
            .channel()
            .read_write(Some(Duration::ZERO))
            .map_err(|()| BusError::Unavailable("system bus connection closed".to_string()))?;

        let msg = inner.conn.channel().pop_message();
        match msg {
            Some(msg) => Ok(inner.classify(msg)),
            None => Ok(Processed::Idle),
        }
    }
}

impl Inner {
    fn classify(&mut self, mut msg: Message) -> Processed {
        match msg.msg_type() {
            MessageType::MethodReturn | MessageType::Error => {
                let Some(serial) = msg.get_reply_serial() else {
                    return Processed::Discarded("reply without serial".to_string());
                };
                let Some((connection, path)) = self.reads.remove(&serial) else {
                    return Processed::Handled;
                };
                let payload = match msg.as_result() {
                    Ok(reply) => reply
                        .read1::<Vec<u8>>()
                        .map_err(|e| BusError::Malformed(e.to_string())),
                    Err(e) => Err(e.into()),
                };
                Processed::Traffic(Traffic {
                    connection,
                    path,
                    kind: TrafficKind::ReadReply,
                    payload,
                })
            }
            MessageType::Signal => self.classify_signal(&msg),
            _ => Processed::Handled,
        }
    }

    fn classify_signal(&mut self, msg: &Message) -> Processed {
        let is_change = msg.interface().as_deref() == Some(PROPERTIES_INTERFACE)
            && msg.member().as_deref() == Some("PropertiesChanged");
        if !is_change {
            return Processed::Handled;
        }
        let Some(path) = msg.path() else {
            return Processed::Discarded("PropertiesChanged without path".to_string());
        };
        let path = ObjectPath::new(&*path);

        let (interface, changed): (String, PropMap) = match msg.read2() {
            Ok(args) => args,
            Err(e) => {
                return Processed::Discarded(format!("malformed PropertiesChanged on {}: {}", path, e))
            }
        };

        let mut units = Vec::new();
        if interface == GATT_CHARACTERISTIC_INTERFACE {
            if let (Some(value), Some(subscribers)) =
                (prop_cast::<Vec<u8>>(&changed, "Value"), self.notify.get(&path))
            {
                units.extend(subscribers.iter().map(|connection| Traffic {
                    connection: *connection,
                    path: path.clone(),
                    kind: TrafficKind::NotifyValue,
                    payload: Ok(value.clone()),
                }));
            }
        }
        for ((watched, watched_interface, property), watchers) in &self.watches {
            if *watched != path || *watched_interface != interface {
                continue;
            }
            let Some(value) = changed.get(property) else {
                continue;
            };
            let payload = value_bytes(&*value.0).ok_or_else(|| {
                BusError::Malformed(format!("{}.{} is not a byte value", interface, property))
            });
            units.extend(watchers.iter().map(|connection| Traffic {
                connection: *connection,
                path: path.clone(),
                kind: TrafficKind::NotifyValue,
                payload: payload.clone(),
            }));
        }

        let mut units = units.into_iter();
        match units.next() {
            Some(first) => {
                self.queue.extend(units);
                Processed::Traffic(first)
            }
            None => Processed::Handled,
        }
    }
}

/// Interpret a property value as bytes: byte arrays as is, integers as a single byte
fn value_bytes(value: &(dyn RefArg + 'static)) -> Option<Vec<u8>> {
    if let Some(bytes) = value.as_any().downcast_ref::<Vec<u8>>() {
        return Some(bytes.clone());
    }
    if let Some(items) = value.as_iter() {
        return items
            .map(|item| item.as_u64().and_then(|v| u8::try_from(v).ok()))
            .collect();
    }
    value.as_u64().and_then(|v| u8::try_from(v).ok()).map(|b| vec![b])
}
