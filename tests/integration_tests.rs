//! Integration tests for the match server
//!
//! These tests drive a real listening server over TCP sockets and validate
//! cross-component behavior: framing, login, the invitation lifecycle,
//! rating updates, and graceful shutdown.

use server::network::Server;
use shared::{recv_packet, send_packet, PacketHeader, PacketKind, ProtocolError, Role};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// WIRE PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Tests full request-reply framing over a real TCP connection
    #[tokio::test]
    async fn framed_login_roundtrip() {
        let harness = ServerHarness::start(4).await;

        let mut client = harness.connect().await;
        client.request(PacketKind::Login, 0, b"alice").await;
        let (kind, _, _) = client.reply().await;
        assert_eq!(kind, PacketKind::Ack);
    }

    /// Tests that an unexpected packet kind is refused, not fatal
    #[tokio::test]
    async fn unexpected_kind_gets_nack() {
        let harness = ServerHarness::start(4).await;

        let mut client = harness.connect().await;
        client.request(PacketKind::Login, 0, b"alice").await;
        let (kind, _, _) = client.reply().await;
        assert_eq!(kind, PacketKind::Ack);

        // Ack is a reply kind; sending it as a request is a client bug.
        client.request(PacketKind::Ack, 0, &[]).await;
        let (kind, _, _) = client.reply().await;
        assert_eq!(kind, PacketKind::Nack);

        // The session survives and keeps serving.
        client.request(PacketKind::Users, 0, &[]).await;
        let (kind, _, _) = client.reply().await;
        assert_eq!(kind, PacketKind::Ack);
    }

    /// Tests that a malformed header kind tears down only that session
    #[tokio::test]
    async fn unknown_kind_byte_closes_one_session() {
        let harness = ServerHarness::start(4).await;

        let mut healthy = harness.login("alice").await;
        let mut broken = harness.connect().await;

        // Hand-build a header with an out-of-range kind tag.
        let mut raw = PacketHeader::new(PacketKind::Login, 0, 0).encode();
        raw[0] = 0xFF;
        tokio::io::AsyncWriteExt::write_all(&mut broken.stream, &raw)
            .await
            .unwrap();

        // The broken session ends; the healthy one is untouched.
        assert!(matches!(
            recv_packet(&mut broken.stream).await,
            Err(ProtocolError::PeerClosed)
        ));
        healthy.request(PacketKind::Users, 0, &[]).await;
        let (kind, _, _) = healthy.reply().await;
        assert_eq!(kind, PacketKind::Ack);
    }
}

/// MATCH LIFECYCLE TESTS
mod match_lifecycle_tests {
    use super::*;

    /// Tests the full happy path: invite, accept, moves, resignation, ratings
    #[tokio::test]
    async fn invite_accept_play_resign() {
        let harness = ServerHarness::start(4).await;
        let mut alice = harness.login("alice").await;
        let mut bob = harness.login("bob").await;

        // Alice offers bob the second role, keeping the first for herself.
        alice
            .request(PacketKind::Invite, Role::Second as u8, b"bob")
            .await;
        let (kind, alice_id, _) = alice.reply().await;
        assert_eq!(kind, PacketKind::Ack);
        let (kind, bob_id, note) = bob.reply().await;
        assert_eq!(kind, PacketKind::Invited);
        assert_eq!(note, b"alice\t2");

        bob.request(PacketKind::Accept, bob_id, &[]).await;
        let (kind, _, _) = bob.reply().await;
        assert_eq!(kind, PacketKind::Ack);
        let (kind, accepted_id, _) = alice.reply().await;
        assert_eq!(kind, PacketKind::Accepted);
        assert_eq!(accepted_id, alice_id);

        // A couple of opaque moves relayed in each direction.
        alice.request(PacketKind::Move, alice_id, b"e2e4").await;
        let (kind, _, _) = alice.reply().await;
        assert_eq!(kind, PacketKind::Ack);
        let (kind, _, mv) = bob.reply().await;
        assert_eq!(kind, PacketKind::Moved);
        assert_eq!(mv, b"e2e4");

        bob.request(PacketKind::Move, bob_id, b"e7e5").await;
        let (kind, _, _) = bob.reply().await;
        assert_eq!(kind, PacketKind::Ack);
        let (kind, _, mv) = alice.reply().await;
        assert_eq!(kind, PacketKind::Moved);
        assert_eq!(mv, b"e7e5");

        // Bob resigns and alice takes the win.
        bob.request(PacketKind::Resign, bob_id, &[]).await;
        let (kind, _, _) = bob.reply().await;
        assert_eq!(kind, PacketKind::Ack);
        let (kind, _, winner) = bob.reply().await;
        assert_eq!(kind, PacketKind::Ended);
        assert_eq!(winner, b"alice");
        let (kind, _, _) = alice.reply().await;
        assert_eq!(kind, PacketKind::Resigned);
        let (kind, _, winner) = alice.reply().await;
        assert_eq!(kind, PacketKind::Ended);
        assert_eq!(winner, b"alice");

        // Equal ratings move by K/2 = 16 points.
        ratings_are(&mut alice, &[("alice", 1016), ("bob", 984)]).await;
    }

    /// Tests revocation by the source before acceptance
    #[tokio::test]
    async fn revoke_before_accept() {
        let harness = ServerHarness::start(4).await;
        let mut alice = harness.login("alice").await;
        let mut bob = harness.login("bob").await;

        alice
            .request(PacketKind::Invite, Role::First as u8, b"bob")
            .await;
        let (_, alice_id, _) = alice.reply().await;
        let (kind, bob_id, _) = bob.reply().await;
        assert_eq!(kind, PacketKind::Invited);

        alice.request(PacketKind::Revoke, alice_id, &[]).await;
        let (kind, _, _) = alice.reply().await;
        assert_eq!(kind, PacketKind::Ack);
        let (kind, revoked_id, _) = bob.reply().await;
        assert_eq!(kind, PacketKind::Revoked);
        assert_eq!(revoked_id, bob_id);

        // The invitation id is dead on bob's side.
        bob.request(PacketKind::Accept, bob_id, &[]).await;
        let (kind, _, _) = bob.reply().await;
        assert_eq!(kind, PacketKind::Nack);

        ratings_are(&mut alice, &[("alice", 1000), ("bob", 1000)]).await;
    }

    /// Tests that a dropped connection forfeits its in-progress match
    #[tokio::test]
    async fn disconnect_forfeits_match() {
        let harness = ServerHarness::start(4).await;
        let mut alice = harness.login("alice").await;
        let mut bob = harness.login("bob").await;

        alice
            .request(PacketKind::Invite, Role::Second as u8, b"bob")
            .await;
        let (_, _, _) = alice.reply().await;
        let (_, bob_id, _) = bob.reply().await;
        bob.request(PacketKind::Accept, bob_id, &[]).await;
        let (_, _, _) = bob.reply().await;
        let (_, _, _) = alice.reply().await;

        // Bob's connection dies; the server resigns on his behalf.
        drop(bob);

        let (kind, _, _) = alice.reply().await;
        assert_eq!(kind, PacketKind::Resigned);
        let (kind, _, winner) = alice.reply().await;
        assert_eq!(kind, PacketKind::Ended);
        assert_eq!(winner, b"alice");

        // The roster lists only registered connections, so bob's loss shows
        // up once he logs back in.
        ratings_are(&mut alice, &[("alice", 1016)]).await;
        let mut bob = harness.login("bob").await;
        ratings_are(&mut bob, &[("alice", 1016), ("bob", 984)]).await;
    }

    /// Tests that ratings survive reconnection under the same name
    #[tokio::test]
    async fn rating_persists_across_sessions() {
        let harness = ServerHarness::start(4).await;
        let mut alice = harness.login("alice").await;
        {
            let mut bob = harness.login("bob").await;
            alice
                .request(PacketKind::Invite, Role::Second as u8, b"bob")
                .await;
            let (_, _, _) = alice.reply().await;
            let (_, bob_id, _) = bob.reply().await;
            bob.request(PacketKind::Accept, bob_id, &[]).await;
            let (_, _, _) = bob.reply().await;
            let (_, _, _) = alice.reply().await;
            bob.request(PacketKind::Resign, bob_id, &[]).await;
            let (_, _, _) = bob.reply().await;
            let (_, _, _) = bob.reply().await;
            let (_, _, _) = alice.reply().await;
            let (_, _, _) = alice.reply().await;
        }

        // Bob logs back in; a fresh session, the same record.
        let mut bob = harness.login("bob").await;
        ratings_are(&mut bob, &[("alice", 1016), ("bob", 984)]).await;
    }
}

/// SHUTDOWN AND CAPACITY TESTS
mod lifecycle_tests {
    use super::*;

    /// Tests the graceful shutdown sequence end to end
    #[tokio::test]
    async fn shutdown_drains_all_sessions() {
        let harness = ServerHarness::start(8).await;
        let mut clients = Vec::new();
        for i in 0..5 {
            clients.push(harness.login(&format!("player{}", i)).await);
        }

        harness.shutdown_tx.send(true).unwrap();
        timeout(Duration::from_secs(3), harness.run_handle)
            .await
            .expect("run() should return once the registry drains")
            .unwrap();

        // Every client reads EOF after the drain.
        for client in &mut clients {
            assert!(matches!(
                recv_packet(&mut client.stream).await,
                Err(ProtocolError::PeerClosed)
            ));
        }
    }

    /// Tests that connections past capacity are refused without harming
    /// the ones already admitted
    #[tokio::test]
    async fn over_capacity_connection_is_refused() {
        let harness = ServerHarness::start(2).await;
        let mut alice = harness.login("alice").await;
        let _bob = harness.login("bob").await;

        let mut refused = harness.connect().await;
        let (kind, _, _) = refused.reply().await;
        assert_eq!(kind, PacketKind::Nack);

        alice.request(PacketKind::Users, 0, &[]).await;
        let (kind, _, roster) = alice.reply().await;
        assert_eq!(kind, PacketKind::Ack);
        let roster = String::from_utf8(roster).unwrap();
        assert!(roster.contains("alice"));
        assert!(roster.contains("bob"));
    }

    /// Tests many concurrent clients logging in and listing the roster
    #[tokio::test]
    async fn concurrent_client_stress() {
        let harness = ServerHarness::start(32).await;
        let addr = harness.addr;

        let mut handles = Vec::new();
        for i in 0..16 {
            handles.push(tokio::spawn(async move {
                let stream = TcpStream::connect(addr).await.unwrap();
                let mut client = TestClient { stream };
                let name = format!("player{}", i);
                client.request(PacketKind::Login, 0, name.as_bytes()).await;
                let (kind, _, _) = client.reply().await;
                assert_eq!(kind, PacketKind::Ack);
                client.request(PacketKind::Users, 0, &[]).await;
                let (kind, _, _) = client.reply().await;
                assert_eq!(kind, PacketKind::Ack);
                client
            }));
        }
        // Keep every connection alive until the observer has looked: the
        // roster covers registered connections only.
        let mut clients = Vec::new();
        for handle in handles {
            clients.push(handle.await.unwrap());
        }

        let mut observer = harness.login("observer").await;
        observer.request(PacketKind::Users, 0, &[]).await;
        let (_, _, roster) = observer.reply().await;
        let roster = String::from_utf8(roster).unwrap();
        assert_eq!(roster.matches("player").count(), 16);
        drop(clients);
    }
}

// HELPER TYPES AND FUNCTIONS

struct ServerHarness {
    addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    run_handle: JoinHandle<()>,
}

impl ServerHarness {
    async fn start(capacity: usize) -> Self {
        let server = Server::new("127.0.0.1:0", capacity).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run_handle = tokio::spawn(async move { server.run(shutdown_rx).await });
        Self {
            addr,
            shutdown_tx,
            run_handle,
        }
    }

    async fn connect(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr).await.unwrap();
        TestClient { stream }
    }

    async fn login(&self, name: &str) -> TestClient {
        let mut client = self.connect().await;
        client.request(PacketKind::Login, 0, name.as_bytes()).await;
        let (kind, _, _) = client.reply().await;
        assert_eq!(kind, PacketKind::Ack);
        client
    }
}

struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    async fn request(&mut self, kind: PacketKind, aux: u8, payload: &[u8]) {
        let hdr = PacketHeader::new(kind, aux, payload.len() as u16);
        send_packet(&mut self.stream, &hdr, payload).await.unwrap();
    }

    async fn reply(&mut self) -> (PacketKind, u8, Vec<u8>) {
        let (hdr, payload) = timeout(Duration::from_secs(3), recv_packet(&mut self.stream))
            .await
            .expect("timed out waiting for a packet")
            .expect("stream closed while waiting for a packet");
        (hdr.kind, hdr.aux, payload.unwrap_or_default())
    }
}

/// Fetches the roster through `client` and asserts the listed ratings.
async fn ratings_are(client: &mut TestClient, expected: &[(&str, i32)]) {
    client.request(PacketKind::Users, 0, &[]).await;
    let (kind, _, roster) = client.reply().await;
    assert_eq!(kind, PacketKind::Ack);
    let roster = String::from_utf8(roster).unwrap();
    for (name, rating) in expected {
        let line = format!("{}\t{}\n", name, rating);
        assert!(
            roster.contains(&line),
            "roster {:?} missing {:?}",
            roster,
            line
        );
    }
}
