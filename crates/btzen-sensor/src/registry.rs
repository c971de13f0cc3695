//! Device registry: connection identifier to session lookup

use btzen_bus::{ConnectionId, Traffic};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::lock;

/// Receiver of traffic routed by the dispatch loop
pub(crate) trait Route: Send + Sync {
    /// Complete the pending operation matching `traffic`; false if it was dropped
    fn complete(&self, traffic: Traffic) -> bool;
}

/// Non-owning lookup from connection identifiers to sessions
///
/// Sessions are owned by their [`Sensor`](crate::Sensor) handles; entries are
/// removed when a session closes.
pub(crate) struct Registry {
    routes: Mutex<HashMap<ConnectionId, Weak<dyn Route>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, connection: ConnectionId, route: Weak<dyn Route>) {
        lock(&self.routes).insert(connection, route);
    }

    pub fn remove(&self, connection: ConnectionId) -> bool {
        lock(&self.routes).remove(&connection).is_some()
    }

    /// Session owning `connection`, if it is still alive
    pub fn lookup(&self, connection: ConnectionId) -> Option<Arc<dyn Route>> {
        let mut routes = lock(&self.routes);
        let route = routes.get(&connection)?.upgrade();
        if route.is_none() {
            routes.remove(&connection);
        }
        route
    }

    pub fn len(&self) -> usize {
        lock(&self.routes).len()
    }
}
