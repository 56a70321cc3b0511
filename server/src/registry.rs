//! Bounded registry of live connections with a coordinated-drain shutdown
//! protocol.
//!
//! One mutex guards the slot table, totally ordering register, unregister,
//! lookup, snapshot, and shutdown against each other. The drain barrier is a
//! separate watch channel carrying the live count, so waiters never hold the
//! table lock: registry operations stay possible while any number of callers
//! block in [`ConnectionRegistry::drain_wait`].

use crate::connection::Connection;
use crate::errors::RegistryError;
use crate::player::Player;
use log::{debug, info};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Default number of connection slots.
pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug)]
struct Table {
    slots: Vec<Option<Arc<Connection>>>,
    live: usize,
}

impl Table {
    fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

/// Bounded, concurrency-safe table of active connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    table: Mutex<Table>,
    // Holds the current live count; subscribers use it as the drain barrier.
    live_tx: watch::Sender<usize>,
}

impl ConnectionRegistry {
    pub fn new(capacity: usize) -> Self {
        let (live_tx, _) = watch::channel(0);
        Self {
            table: Mutex::new(Table {
                slots: vec![None; capacity],
                live: 0,
            }),
            live_tx,
        }
    }

    pub fn capacity(&self) -> usize {
        self.table.lock().unwrap().slots.len()
    }

    /// Number of currently registered connections.
    pub fn len(&self) -> usize {
        self.table.lock().unwrap().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Places a connection in the first free slot. The table keeps its own
    /// reference; on `CapacityExceeded` the table is left unchanged.
    pub fn register(&self, conn: &Arc<Connection>) -> Result<(), RegistryError> {
        let mut table = self.table.lock().unwrap();

        let Some(slot) = table.slots.iter_mut().find(|slot| slot.is_none()) else {
            return Err(RegistryError::CapacityExceeded);
        };
        *slot = Some(Arc::clone(conn));
        table.live += 1;
        debug_assert_eq!(table.live, table.occupied());

        debug!(
            "registered connection {} ({} live)",
            conn.descriptor(),
            table.live
        );
        self.live_tx.send_replace(table.live);
        Ok(())
    }

    /// Removes the slot whose connection has the same descriptor, releasing
    /// the registry's reference. When the last connection leaves, every
    /// drain waiter is released.
    pub fn unregister(&self, conn: &Connection) -> Result<(), RegistryError> {
        let mut table = self.table.lock().unwrap();

        let slot = table
            .slots
            .iter_mut()
            .find(|slot| {
                slot.as_ref()
                    .is_some_and(|occupant| occupant.descriptor() == conn.descriptor())
            })
            .ok_or(RegistryError::NotFound)?;
        *slot = None;
        table.live -= 1;
        debug_assert_eq!(table.live, table.occupied());

        debug!(
            "unregistered connection {} ({} live)",
            conn.descriptor(),
            table.live
        );
        self.live_tx.send_replace(table.live);
        Ok(())
    }

    /// Finds the connection logged in under `name` (byte-exact match). The
    /// returned handle is cloned under the table lock, so it stays valid
    /// even if the entry is unregistered immediately afterwards.
    pub fn lookup(&self, name: &str) -> Option<Arc<Connection>> {
        let table = self.table.lock().unwrap();
        table
            .slots
            .iter()
            .flatten()
            .find(|conn| {
                conn.player()
                    .is_some_and(|player| player.name() == name)
            })
            .map(Arc::clone)
    }

    /// Binds `player` to `conn` unless some registered connection is
    /// already logged in under the same name. Check and bind happen under
    /// the table lock, so two connections racing to claim one name cannot
    /// both win.
    pub fn claim_name(&self, conn: &Arc<Connection>, player: Arc<Player>) -> bool {
        let table = self.table.lock().unwrap();
        let name_taken = table.slots.iter().flatten().any(|occupant| {
            occupant
                .player()
                .is_some_and(|existing| existing.name() == player.name())
        });
        if name_taken {
            return false;
        }
        conn.login(player)
    }

    /// Snapshot of every logged-in player, each handle owned by the caller.
    pub fn players(&self) -> Vec<Arc<Player>> {
        let table = self.table.lock().unwrap();
        table
            .slots
            .iter()
            .flatten()
            .filter_map(|conn| conn.player())
            .collect()
    }

    /// Blocks until no connections remain registered; returns immediately
    /// if the table is already empty. Any number of callers may wait
    /// concurrently, and the table stays fully usable meanwhile.
    pub async fn drain_wait(&self) {
        let mut live_rx = self.live_tx.subscribe();
        live_rx
            .wait_for(|&live| live == 0)
            .await
            .expect("registry dropped while draining");
    }

    /// Half-closes the read side of every registered connection without
    /// removing it. The owning workers observe end-of-stream and unregister
    /// themselves, which is what eventually releases drain waiters.
    pub fn shutdown_all(&self) {
        let table = self.table.lock().unwrap();
        info!("shutting down {} live connections", table.live);
        for conn in table.slots.iter().flatten() {
            conn.shutdown_read();
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
