//! One accepted network session, owned by exactly one worker task.
//!
//! A `Connection` bundles the write half of the socket (the worker keeps the
//! read half), the login state, a cooperative read-shutdown signal, and the
//! connection's table of outstanding invitations. It is shared as
//! `Arc<Connection>` between the owning worker, the registry, and any
//! invitations that reference it.

use crate::invitation::Invitation;
use crate::player::Player;
use shared::{send_packet, PacketHeader, PacketKind, ProtocolError};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWrite;
use tokio::sync::Notify;

/// Write half of a connection's byte stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Default)]
struct InvitationTable {
    next_id: u8,
    entries: Vec<(u8, Arc<Invitation>)>,
}

impl InvitationTable {
    fn assign_id(&mut self) -> u8 {
        // Wraps at 256 outstanding invitations; skip ids still in use.
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if !self.entries.iter().any(|(existing, _)| *existing == id) {
                return id;
            }
        }
    }
}

/// One accepted session.
pub struct Connection {
    descriptor: u64,
    peer_addr: SocketAddr,
    writer: tokio::sync::Mutex<BoxedWriter>,
    player: Mutex<Option<Arc<Player>>>,
    invitations: Mutex<InvitationTable>,
    read_closed: AtomicBool,
    shutdown_notify: Notify,
}

impl Connection {
    /// Wraps an accepted transport. `descriptor` is the server-assigned
    /// identity the registry matches on.
    pub fn new(descriptor: u64, peer_addr: SocketAddr, writer: BoxedWriter) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            peer_addr,
            writer: tokio::sync::Mutex::new(writer),
            player: Mutex::new(None),
            invitations: Mutex::new(InvitationTable::default()),
            read_closed: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
        })
    }

    pub fn descriptor(&self) -> u64 {
        self.descriptor
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The logged-in player, if any.
    pub fn player(&self) -> Option<Arc<Player>> {
        self.player.lock().unwrap().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.player.lock().unwrap().is_some()
    }

    /// Binds a player to this connection. Returns false if the connection is
    /// already logged in; the existing binding is kept.
    pub fn login(&self, player: Arc<Player>) -> bool {
        let mut slot = self.player.lock().unwrap();
        if slot.is_some() {
            return false;
        }
        *slot = Some(player);
        true
    }

    /// Sends one framed packet, serializing concurrent senders on the write
    /// half. Safe to call from any task holding a reference.
    pub async fn send(
        &self,
        kind: PacketKind,
        aux: u8,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        let len = u16::try_from(payload.len()).map_err(|_| {
            ProtocolError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "payload exceeds the 16-bit wire length",
            ))
        })?;
        let hdr = PacketHeader::new(kind, aux, len);
        let mut writer = self.writer.lock().await;
        send_packet(&mut *writer, &hdr, payload).await
    }

    /// Signals a read-direction half-close. The owning worker observes this
    /// as end-of-stream and runs its normal disconnect path; nothing is torn
    /// down here. Idempotent.
    pub fn shutdown_read(&self) {
        self.read_closed.store(true, Ordering::Release);
        // notify_one leaves a permit if the worker is not yet waiting, so
        // the wakeup cannot be lost.
        self.shutdown_notify.notify_one();
    }

    pub fn is_read_shutdown(&self) -> bool {
        self.read_closed.load(Ordering::Acquire)
    }

    /// Resolves once [`Connection::shutdown_read`] has been called.
    pub async fn read_shutdown(&self) {
        if self.read_closed.load(Ordering::Acquire) {
            return;
        }
        self.shutdown_notify.notified().await;
    }

    /// Records an invitation in this connection's table, returning the
    /// connection-local id the peer will use to refer to it.
    pub fn add_invitation(&self, invitation: Arc<Invitation>) -> u8 {
        let mut table = self.invitations.lock().unwrap();
        let id = table.assign_id();
        table.entries.push((id, invitation));
        id
    }

    pub fn invitation(&self, id: u8) -> Option<Arc<Invitation>> {
        self.invitations
            .lock()
            .unwrap()
            .entries
            .iter()
            .find(|(existing, _)| *existing == id)
            .map(|(_, invitation)| Arc::clone(invitation))
    }

    pub fn remove_invitation(&self, id: u8) -> Option<Arc<Invitation>> {
        let mut table = self.invitations.lock().unwrap();
        let index = table
            .entries
            .iter()
            .position(|(existing, _)| *existing == id)?;
        Some(table.entries.remove(index).1)
    }

    /// Finds the local id under which `invitation` is recorded here. Used to
    /// address notifications to the peer in its own id space.
    pub fn find_invitation_id(&self, invitation: &Arc<Invitation>) -> Option<u8> {
        self.invitations
            .lock()
            .unwrap()
            .entries
            .iter()
            .find(|(_, existing)| Arc::ptr_eq(existing, invitation))
            .map(|(id, _)| *id)
    }

    /// Empties the invitation table, handing every outstanding invitation to
    /// the caller. Used on disconnect to forfeit or revoke them all.
    pub fn take_invitations(&self) -> Vec<(u8, Arc<Invitation>)> {
        std::mem::take(&mut self.invitations.lock().unwrap().entries)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("descriptor", &self.descriptor)
            .field("peer_addr", &self.peer_addr)
            .field("logged_in", &self.is_logged_in())
            .finish()
    }
}
