//! Accept loop and shutdown sequencing.
//!
//! The server owns the listener and the shared state. Each accepted stream
//! is split; the write half moves into a registered `Connection` and the
//! read half into a spawned session task. Shutdown stops accepting first,
//! then half-closes every registered connection and waits for the registry
//! to drain, so no worker is ever torn down mid-request.

use crate::connection::Connection;
use crate::player::PlayerDirectory;
use crate::registry::ConnectionRegistry;
use crate::session;
use log::{error, info, warn};
use shared::PacketKind;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// State shared by every session task.
pub struct ServerContext {
    pub registry: ConnectionRegistry,
    pub players: PlayerDirectory,
}

impl ServerContext {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            registry: ConnectionRegistry::new(capacity),
            players: PlayerDirectory::new(),
        })
    }
}

/// Listening server: accepts connections until told to shut down, then
/// drains its workers.
pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    next_descriptor: AtomicU64,
}

impl Server {
    pub async fn new(addr: &str, capacity: usize) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            ctx: ServerContext::new(capacity),
            next_descriptor: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    /// Runs until `shutdown` flips to true (or its sender drops), then
    /// completes the drain before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => self.admit(stream, peer_addr),
                        Err(err) => error!("accept failed: {}", err),
                    }
                }
            }
        }

        info!("shutdown: no longer accepting connections");
        self.ctx.registry.shutdown_all();
        self.ctx.registry.drain_wait().await;
        info!("all connection workers have drained");
    }

    fn admit(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let descriptor = self.next_descriptor.fetch_add(1, Ordering::Relaxed);
        let ctx = Arc::clone(&self.ctx);
        let (reader, writer) = stream.into_split();
        let conn = Connection::new(descriptor, peer_addr, Box::new(writer));

        // Register before spawning, still inside the accept-loop arm: every
        // registration is thereby sequenced ahead of a later shutdown
        // branch, so `shutdown_all` can never miss a just-accepted worker.
        if let Err(err) = ctx.registry.register(&conn) {
            warn!("rejecting connection from {}: {}", peer_addr, err);
            tokio::spawn(async move {
                let _ = conn
                    .send(PacketKind::Nack, 0, err.to_string().as_bytes())
                    .await;
            });
            return;
        }
        info!("connection {} accepted from {}", descriptor, peer_addr);
        tokio::spawn(async move {
            session::serve(ctx, conn, reader).await;
        });
    }
}
