//! BTZen Sensor - Reading BLE sensors through the system bus
//!
//! This crate multiplexes one bus connection into many sensor sessions:
//! - [`Bus`] owns the transport, the device registry and the dispatch loop
//! - [`Sensor`] drives one device through connect, service resolution,
//!   enable, read and close
//! - Reads return a [`Completion`] fulfilled when the dispatch loop routes
//!   the matching bus traffic

pub mod bus;
pub mod config;
mod connect;
mod dispatch;
pub mod error;
pub mod pending;
mod registry;
pub mod session;

#[cfg(test)]
pub(crate) mod mock;

pub use bus::Bus;
pub use config::BusConfig;
pub use error::SensorError;
pub use pending::Completion;
pub use session::{Sensor, State};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
