//! Pending operation table and completion handles
//!
//! Each sensor session owns one table. A slot is armed for a characteristic
//! path and traffic kind; the dispatch loop takes the slot when matching
//! traffic arrives and fulfills it exactly once. Dropping a slot's sender
//! resolves the reader with [`SensorError::Cancelled`].

use btzen_bus::TrafficKind;
use btzen_core::ObjectPath;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::error::SensorError;

pub(crate) type Slot<V> = oneshot::Sender<Result<V, SensorError>>;

pub(crate) struct PendingTable<V> {
    slots: HashMap<(ObjectPath, TrafficKind), Slot<V>>,
}

impl<V> PendingTable<V> {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }

    /// Arm a slot for `path`, rejecting the request if one is in flight
    ///
    /// Slots whose reader has gone away are released first.
    pub fn arm(
        &mut self,
        path: &ObjectPath,
        kind: TrafficKind,
    ) -> Result<Completion<V>, SensorError> {
        self.slots.retain(|_, slot| !slot.is_closed());
        if self.slots.keys().any(|(p, _)| p == path) {
            return Err(SensorError::Busy(path.clone()));
        }
        let (tx, rx) = oneshot::channel();
        self.slots.insert((path.clone(), kind), tx);
        Ok(Completion::pending(rx))
    }

    /// Remove the slot matching a unit of traffic
    pub fn take(&mut self, path: &ObjectPath, kind: TrafficKind) -> Option<Slot<V>> {
        self.slots.remove(&(path.clone(), kind))
    }

    /// Path of an operation still awaited by a reader
    pub fn in_flight(&self) -> Option<&ObjectPath> {
        self.slots
            .iter()
            .find(|(_, slot)| !slot.is_closed())
            .map(|((path, _), _)| path)
    }

    /// Drop every slot; waiting readers resolve with `Cancelled`
    pub fn cancel_all(&mut self) -> usize {
        let count = self.slots.len();
        self.slots.clear();
        count
    }
}

enum Inner<V> {
    Ready(Option<Result<V, SensorError>>),
    Pending(oneshot::Receiver<Result<V, SensorError>>),
}

/// Result of a sensor read, available now or once the dispatch loop routes it
///
/// Await it from async code or call [`Completion::blocking_wait`] from a
/// plain thread. Dropping it releases the pending slot.
pub struct Completion<V> {
    inner: Inner<V>,
}

impl<V> Completion<V> {
    pub(crate) fn ready(result: Result<V, SensorError>) -> Self {
        Self {
            inner: Inner::Ready(Some(result)),
        }
    }

    pub(crate) fn pending(rx: oneshot::Receiver<Result<V, SensorError>>) -> Self {
        Self {
            inner: Inner::Pending(rx),
        }
    }

    /// Block the current thread until the operation completes
    ///
    /// Panics when called from within an async runtime.
    pub fn blocking_wait(self) -> Result<V, SensorError> {
        match self.inner {
            Inner::Ready(result) => result.unwrap_or(Err(SensorError::Cancelled)),
            Inner::Pending(rx) => rx
                .blocking_recv()
                .unwrap_or_else(|_| Err(SensorError::Cancelled)),
        }
    }
}

impl<V> Unpin for Completion<V> {}

impl<V> Future for Completion<V> {
    type Output = Result<V, SensorError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            Inner::Ready(result) => Poll::Ready(result.take().unwrap_or(Err(SensorError::Cancelled))),
            Inner::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or_else(|_| Err(SensorError::Cancelled))),
        }
    }
}
