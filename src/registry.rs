use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

use crate::connection::{Connection, ConnectionId};

#[derive(Debug)]
pub(crate) struct Entry<C> {
    pub(crate) in_flight: usize,
    pub(crate) connection: Arc<C>,
}

#[derive(Debug)]
struct Table<C> {
    entries: HashMap<ConnectionId, Entry<C>>,
    draining: bool,
}

/// Side-table of live connections and their in-flight request counters.
#[derive(Debug)]
pub struct ConnectionRegistry<C> {
    table: Mutex<Table<C>>,
}

impl<C: Connection> Default for ConnectionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> ConnectionRegistry<C> {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                entries: HashMap::new(),
                draining: false,
            }),
        }
    }

    /// Add a connection with a zero counter. Returns true when the registry
    /// is already draining, in which case the caller should end it.
    pub fn register(&self, id: ConnectionId, connection: Arc<C>) -> bool {
        let mut table = self.table.lock().expect("lock not poisoned");
        table.entries.insert(
            id,
            Entry {
                in_flight: 0,
                connection,
            },
        );
        debug!(
            connection_id = %id,
            pending = table.entries.len(),
            draining = table.draining,
            "register connection"
        );
        table.draining
    }

    pub fn remove(&self, id: &ConnectionId) -> Option<usize> {
        let mut table = self.table.lock().expect("lock not poisoned");
        let entry = table.entries.remove(id)?;
        debug!(
            connection_id = %id,
            in_flight = entry.in_flight,
            pending = table.entries.len(),
            "remove connection"
        );
        Some(entry.in_flight)
    }

    pub fn len(&self) -> usize {
        self.table.lock().expect("lock not poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self, id: &ConnectionId) -> Option<usize> {
        self.table
            .lock()
            .expect("lock not poisoned")
            .entries
            .get(id)
            .map(|entry| entry.in_flight)
    }

    pub fn is_draining(&self) -> bool {
        self.table.lock().expect("lock not poisoned").draining
    }

    pub(crate) fn start_draining(&self) {
        let mut table = self.table.lock().expect("lock not poisoned");
        table.draining = true;
        trace!(pending = table.entries.len(), "registry draining");
    }

    pub(crate) fn with_entry<R>(
        &self,
        id: &ConnectionId,
        f: impl FnOnce(&mut Entry<C>, bool) -> R,
    ) -> Option<R> {
        let mut table = self.table.lock().expect("lock not poisoned");
        let draining = table.draining;
        table.entries.get_mut(id).map(|entry| f(entry, draining))
    }

    /// Visit a snapshot of the registered connections, lock released.
    pub fn for_each(&self, mut f: impl FnMut(ConnectionId, usize, &Arc<C>)) {
        let snapshot: Vec<_> = {
            let table = self.table.lock().expect("lock not poisoned");
            table
                .entries
                .iter()
                .map(|(id, entry)| (*id, entry.in_flight, entry.connection.clone()))
                .collect()
        };
        for (id, in_flight, connection) in snapshot.iter() {
            f(*id, *in_flight, connection);
        }
    }
}
