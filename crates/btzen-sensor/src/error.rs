//! Sensor session errors

use btzen_bus::{BusError, ConnectionId, TrafficKind};
use btzen_core::{Address, DecodeError, ObjectPath, Uuid};
use thiserror::Error;

use crate::session::State;

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Cannot connect {address}: {source}")]
    Connection { address: Address, source: BusError },

    #[error("Services of {address} not resolved after {attempts} attempts")]
    ResolutionTimeout { address: Address, attempts: u32 },

    #[error("Characteristic {uuid} not found on {address}")]
    CharacteristicNotFound { address: Address, uuid: Uuid },

    #[error("Bus error: {0}")]
    Transport(#[from] BusError),

    /// Traffic that matches no pending operation; logged, never returned to readers
    #[error("Unexpected {kind} traffic for {connection} on {path}")]
    ProtocolViolation {
        connection: ConnectionId,
        path: ObjectPath,
        kind: TrafficKind,
    },

    #[error("Operation already pending on {0}")]
    Busy(ObjectPath),

    #[error("Cannot {operation} sensor in state {state}")]
    InvalidState {
        operation: &'static str,
        state: State,
    },

    #[error("Sensor kind {0} cannot notify")]
    NotifyUnsupported(&'static str),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Bus call task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
