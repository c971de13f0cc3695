//! Event dispatch loop

use btzen_bus::{Processed, Traffic};
use std::os::unix::io::{AsRawFd, RawFd};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tracing::{debug, info, trace, warn};

use crate::bus::Bus;
use crate::error::SensorError;

/// Bus descriptor registered with the runtime; owned by the transport
struct BusFd(RawFd);

impl AsRawFd for BusFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Bus {
    /// Drain all pending bus traffic and route it to the owning sessions
    ///
    /// Returns the number of operations completed. A drain error ends this
    /// pass; the next readiness edge starts a new one.
    pub fn dispatch_ready(&self) -> usize {
        let mut completed = 0;
        loop {
            match self.transport().process() {
                Ok(Processed::Traffic(traffic)) => {
                    if self.route(traffic) {
                        completed += 1;
                    }
                }
                Ok(Processed::Handled) => {}
                Ok(Processed::Discarded(reason)) => {
                    debug!(reason = %reason, "Discarded bus message");
                }
                Ok(Processed::Idle) => break,
                Err(e) => {
                    warn!(error = %e, "Draining bus traffic failed");
                    break;
                }
            }
        }
        completed
    }

    fn route(&self, traffic: Traffic) -> bool {
        trace!(
            connection = %traffic.connection,
            path = %traffic.path,
            kind = %traffic.kind,
            "Bus traffic"
        );
        match self.inner.registry.lookup(traffic.connection) {
            Some(session) => session.complete(traffic),
            None => {
                debug!(
                    connection = %traffic.connection,
                    path = %traffic.path,
                    "Dropping traffic for unknown connection"
                );
                false
            }
        }
    }

    /// Run the dispatch loop until [`Bus::shutdown`] is called
    ///
    /// The bus descriptor is registered for readiness when the loop starts
    /// and deregistered when it ends.
    pub async fn run(&self) -> Result<(), SensorError> {
        let fd = AsyncFd::with_interest(BusFd(self.transport().fd()), Interest::READABLE)?;
        info!(fd = fd.get_ref().0, "Dispatch loop started");

        self.dispatch_ready();
        loop {
            tokio::select! {
                ready = fd.readable() => {
                    let mut guard = ready?;
                    guard.clear_ready();
                    self.dispatch_ready();
                }
                _ = self.inner.wake.notified() => {
                    self.dispatch_ready();
                }
                _ = self.inner.shutdown.notified() => break,
            }
        }

        drop(fd);
        info!("Dispatch loop stopped");
        Ok(())
    }
}
