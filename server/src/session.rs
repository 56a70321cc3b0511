//! Per-connection dispatch: the body of each connection's worker task.
//!
//! A session loops on framed receive until the peer disconnects, the
//! transport fails, or shutdown half-closes the read side. Every exit path
//! runs the same teardown: outstanding invitations are revoked or forfeited
//! (posting ratings for matches that conclude), peers are notified
//! best-effort, and the connection unregisters — which is what lets a
//! pending drain complete. One connection's failure never touches another.

use crate::connection::Connection;
use crate::game::{Match, MatchResult};
use crate::invitation::{Invitation, InvitationPhase};
use crate::network::ServerContext;
use crate::player::{self, GameOutcome};
use log::{debug, info, warn};
use shared::{recv_packet, PacketKind, ProtocolError, Role};
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Serves one connection to completion. The connection must already be
/// registered; it is unregistered before this returns.
pub async fn serve<R>(ctx: Arc<ServerContext>, conn: Arc<Connection>, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    loop {
        let received = tokio::select! {
            _ = conn.read_shutdown() => {
                debug!("connection {}: read side half-closed", conn.descriptor());
                break;
            }
            received = recv_packet(&mut reader) => received,
        };

        match received {
            Ok((hdr, payload)) => {
                if let Err(err) = dispatch(&ctx, &conn, hdr.kind, hdr.aux, payload.as_deref()).await
                {
                    // A failed reply means our own transport is gone.
                    warn!("connection {}: send failed: {}", conn.descriptor(), err);
                    break;
                }
            }
            Err(ProtocolError::PeerClosed) => {
                debug!("connection {}: peer closed", conn.descriptor());
                break;
            }
            Err(err) => {
                warn!("connection {}: receive failed: {}", conn.descriptor(), err);
                break;
            }
        }
    }

    teardown(&ctx, &conn).await;
}

async fn dispatch(
    ctx: &Arc<ServerContext>,
    conn: &Arc<Connection>,
    kind: PacketKind,
    aux: u8,
    payload: Option<&[u8]>,
) -> Result<(), ProtocolError> {
    match kind {
        PacketKind::Login => login(ctx, conn, payload).await,
        PacketKind::Users => users(ctx, conn).await,
        PacketKind::Invite => invite(ctx, conn, aux, payload).await,
        PacketKind::Revoke => withdraw(conn, aux, true, PacketKind::Revoked).await,
        PacketKind::Decline => withdraw(conn, aux, false, PacketKind::Declined).await,
        PacketKind::Accept => accept_invitation(conn, aux).await,
        PacketKind::Move => relay_move(conn, aux, payload).await,
        PacketKind::Resign => resign(conn, aux).await,
        PacketKind::Ended => conclude(conn, aux, payload).await,
        other => {
            debug!(
                "connection {}: unexpected {:?} request",
                conn.descriptor(),
                other
            );
            nack(conn, "unexpected packet kind").await
        }
    }
}

async fn nack(conn: &Connection, reason: &str) -> Result<(), ProtocolError> {
    conn.send(PacketKind::Nack, 0, reason.as_bytes()).await
}

async fn login(
    ctx: &Arc<ServerContext>,
    conn: &Arc<Connection>,
    payload: Option<&[u8]>,
) -> Result<(), ProtocolError> {
    let Some(name) = payload.and_then(|bytes| std::str::from_utf8(bytes).ok()) else {
        return nack(conn, "login requires a valid username").await;
    };
    if conn.is_logged_in() {
        return nack(conn, "already logged in").await;
    }

    // The claim checks the name and binds it in one step, so concurrent
    // logins under the same name cannot both succeed.
    let player = ctx.players.get_or_create(name);
    if !ctx.registry.claim_name(conn, player) {
        return nack(conn, "username already in use").await;
    }
    info!("connection {} logged in as {}", conn.descriptor(), name);
    conn.send(PacketKind::Ack, 0, &[]).await
}

async fn users(ctx: &Arc<ServerContext>, conn: &Arc<Connection>) -> Result<(), ProtocolError> {
    if !conn.is_logged_in() {
        return nack(conn, "log in first").await;
    }

    let mut roster = String::new();
    for player in ctx.registry.players() {
        roster.push_str(player.name());
        roster.push('\t');
        roster.push_str(&player.rating().to_string());
        roster.push('\n');
    }
    conn.send(PacketKind::Ack, 0, roster.as_bytes()).await
}

/// Opens an invitation. `aux` carries the role offered to the target; the
/// source plays the opposite one.
async fn invite(
    ctx: &Arc<ServerContext>,
    conn: &Arc<Connection>,
    role_tag: u8,
    payload: Option<&[u8]>,
) -> Result<(), ProtocolError> {
    if !conn.is_logged_in() {
        return nack(conn, "log in first").await;
    }
    let Some(target_name) = payload.and_then(|bytes| std::str::from_utf8(bytes).ok()) else {
        return nack(conn, "invite requires a target username").await;
    };
    let Ok(target_role) = Role::from_tag(role_tag) else {
        return nack(conn, "unknown role").await;
    };
    if target_role == Role::None {
        return nack(conn, "invite requires a concrete role").await;
    }
    let Some(target) = ctx.registry.lookup(target_name) else {
        return nack(conn, "no such player").await;
    };

    let invitation =
        match Invitation::create(conn, &target, target_role.opponent(), target_role) {
            Ok(invitation) => invitation,
            Err(err) => return nack(conn, &err.to_string()).await,
        };

    let source_id = conn.add_invitation(Arc::clone(&invitation));
    let target_id = target.add_invitation(Arc::clone(&invitation));

    let source_name = conn
        .player()
        .map(|player| player.name().to_string())
        .unwrap_or_default();
    let note = format!("{}\t{}", source_name, target_role as u8);
    if let Err(err) = target
        .send(PacketKind::Invited, target_id, note.as_bytes())
        .await
    {
        // The target may be mid-disconnect; its teardown settles the
        // invitation and notifies us.
        debug!(
            "connection {}: could not notify target {}: {}",
            conn.descriptor(),
            target.descriptor(),
            err
        );
    }
    conn.send(PacketKind::Ack, source_id, &[]).await
}

/// Revoke (by the source) or decline (by the target) a still-open
/// invitation, notifying the peer with `peer_kind`.
async fn withdraw(
    conn: &Arc<Connection>,
    id: u8,
    by_source: bool,
    peer_kind: PacketKind,
) -> Result<(), ProtocolError> {
    let Some(invitation) = conn.invitation(id) else {
        return nack(conn, "no such invitation").await;
    };
    if Arc::ptr_eq(invitation.source(), conn) != by_source {
        return nack(conn, "wrong side of the invitation").await;
    }
    if invitation.phase() != InvitationPhase::Open {
        return nack(conn, "invitation is no longer open").await;
    }

    match invitation.close(Role::None) {
        Ok(game) => {
            // The accepted-and-finished case can only be hit through a
            // race with the peer; settle the ratings all the same.
            if let Some(game) = &game {
                post_ratings(&invitation, game);
            }
            conn.remove_invitation(id);
            let peer = invitation.peer_of(conn);
            if let Some(peer_id) = peer.find_invitation_id(&invitation) {
                peer.remove_invitation(peer_id);
                let _ = peer.send(peer_kind, peer_id, &[]).await;
            }
            conn.send(PacketKind::Ack, id, &[]).await
        }
        Err(err) => nack(conn, &err.to_string()).await,
    }
}

async fn accept_invitation(conn: &Arc<Connection>, id: u8) -> Result<(), ProtocolError> {
    let Some(invitation) = conn.invitation(id) else {
        return nack(conn, "no such invitation").await;
    };
    if !Arc::ptr_eq(invitation.target(), conn) {
        return nack(conn, "only the target may accept").await;
    }

    match invitation.accept() {
        Ok(_game) => {
            let source = invitation.source();
            if let Some(source_id) = source.find_invitation_id(&invitation) {
                let _ = source.send(PacketKind::Accepted, source_id, &[]).await;
            }
            conn.send(PacketKind::Ack, id, &[]).await
        }
        Err(err) => nack(conn, &err.to_string()).await,
    }
}

/// Relays a move to the peer without inspecting it; legality belongs to the
/// rules layer on the other end.
async fn relay_move(
    conn: &Arc<Connection>,
    id: u8,
    payload: Option<&[u8]>,
) -> Result<(), ProtocolError> {
    let Some(invitation) = conn.invitation(id) else {
        return nack(conn, "no such invitation").await;
    };
    let in_progress = invitation
        .game()
        .map(|game| !game.is_finished())
        .unwrap_or(false);
    if !in_progress {
        return nack(conn, "no match in progress").await;
    }

    let peer = invitation.peer_of(conn);
    if let Some(peer_id) = peer.find_invitation_id(&invitation) {
        let _ = peer
            .send(PacketKind::Moved, peer_id, payload.unwrap_or(&[]))
            .await;
    }
    conn.send(PacketKind::Ack, id, &[]).await
}

async fn resign(conn: &Arc<Connection>, id: u8) -> Result<(), ProtocolError> {
    let Some(invitation) = conn.invitation(id) else {
        return nack(conn, "no such invitation").await;
    };

    match invitation.close(invitation.role_of(conn)) {
        Ok(game) => {
            conn.remove_invitation(id);
            if let Some(game) = &game {
                post_ratings(&invitation, game);
            }

            conn.send(PacketKind::Ack, id, &[]).await?;
            let peer = invitation.peer_of(conn);
            if let Some(peer_id) = peer.find_invitation_id(&invitation) {
                peer.remove_invitation(peer_id);
                let _ = peer.send(PacketKind::Resigned, peer_id, &[]).await;
                if let Some(game) = &game {
                    let _ = peer
                        .send(
                            PacketKind::Ended,
                            peer_id,
                            ended_payload(&invitation, game).as_bytes(),
                        )
                        .await;
                }
            }
            if let Some(game) = &game {
                conn.send(
                    PacketKind::Ended,
                    id,
                    ended_payload(&invitation, game).as_bytes(),
                )
                .await?;
            }
            Ok(())
        }
        Err(err) => nack(conn, &err.to_string()).await,
    }
}

/// Records a result reported by a participant, closing the invitation and
/// posting ratings. The rules live in the clients, so the server takes the
/// report at face value; the single payload byte is the winner's role tag,
/// with `None` meaning a draw.
async fn conclude(
    conn: &Arc<Connection>,
    id: u8,
    payload: Option<&[u8]>,
) -> Result<(), ProtocolError> {
    let Some(invitation) = conn.invitation(id) else {
        return nack(conn, "no such invitation").await;
    };
    let Some(game) = invitation.game() else {
        return nack(conn, "no match in progress").await;
    };
    let outcome = match payload {
        Some(&[tag]) => match Role::from_tag(tag) {
            Ok(Role::None) => MatchResult::Draw,
            Ok(role) => MatchResult::Winner(role),
            Err(_) => return nack(conn, "unknown role").await,
        },
        _ => return nack(conn, "result report requires a single role byte").await,
    };
    if let Err(err) = game.record_outcome(outcome) {
        return nack(conn, &err.to_string()).await;
    }

    // The game is finished, so no resigning role is needed to close.
    match invitation.close(Role::None) {
        Ok(game) => {
            conn.remove_invitation(id);
            if let Some(game) = &game {
                post_ratings(&invitation, game);
            }

            conn.send(PacketKind::Ack, id, &[]).await?;
            let peer = invitation.peer_of(conn);
            if let Some(peer_id) = peer.find_invitation_id(&invitation) {
                peer.remove_invitation(peer_id);
                if let Some(game) = &game {
                    let _ = peer
                        .send(
                            PacketKind::Ended,
                            peer_id,
                            ended_payload(&invitation, game).as_bytes(),
                        )
                        .await;
                }
            }
            if let Some(game) = &game {
                conn.send(
                    PacketKind::Ended,
                    id,
                    ended_payload(&invitation, game).as_bytes(),
                )
                .await?;
            }
            Ok(())
        }
        // The close race went to the other side; the result stands.
        Err(err) => nack(conn, &err.to_string()).await,
    }
}

/// Settles everything a disconnecting worker still holds, then unregisters.
async fn teardown(ctx: &Arc<ServerContext>, conn: &Arc<Connection>) {
    for (local_id, invitation) in conn.take_invitations() {
        let result = match invitation.phase() {
            InvitationPhase::Open => invitation.close(Role::None),
            InvitationPhase::Accepted => invitation.close(invitation.role_of(conn)),
            // Already settled by the other side.
            InvitationPhase::Closed => continue,
        };
        let game = match result {
            Ok(game) => game,
            Err(_) if invitation.phase() == InvitationPhase::Closed => continue,
            Err(err) => {
                warn!(
                    "connection {}: could not settle invitation {}: {}",
                    conn.descriptor(),
                    local_id,
                    err
                );
                continue;
            }
        };
        if let Some(game) = &game {
            post_ratings(&invitation, game);
        }

        let peer = invitation.peer_of(conn);
        if let Some(peer_id) = peer.find_invitation_id(&invitation) {
            peer.remove_invitation(peer_id);
            let kind = if game.is_some() {
                PacketKind::Resigned
            } else if Arc::ptr_eq(invitation.source(), conn) {
                PacketKind::Revoked
            } else {
                PacketKind::Declined
            };
            let _ = peer.send(kind, peer_id, &[]).await;
            if let Some(game) = &game {
                let _ = peer
                    .send(
                        PacketKind::Ended,
                        peer_id,
                        ended_payload(&invitation, game).as_bytes(),
                    )
                    .await;
            }
        }
    }

    match ctx.registry.unregister(conn) {
        Ok(()) => info!("connection {} unregistered", conn.descriptor()),
        Err(err) => warn!(
            "connection {}: unregister failed: {}",
            conn.descriptor(),
            err
        ),
    }
}

/// Applies the rating update for a concluded match, once. The caller that
/// won the close transition is the only one that reaches this.
fn post_ratings(invitation: &Invitation, game: &Match) {
    let (Some(player1), Some(player2)) =
        (invitation.source().player(), invitation.target().player())
    else {
        return;
    };
    let outcome = match game.result() {
        Some(MatchResult::Draw) => GameOutcome::Draw,
        Some(MatchResult::Winner(role)) if role == invitation.source_role() => {
            GameOutcome::Player1Wins
        }
        Some(MatchResult::Winner(_)) => GameOutcome::Player2Wins,
        None => return,
    };
    player::post_result(&player1, &player2, outcome);
}

fn ended_payload(invitation: &Invitation, game: &Match) -> String {
    match game.result() {
        Some(MatchResult::Draw) => "draw".to_string(),
        Some(MatchResult::Winner(role)) => {
            let winner = if role == invitation.source_role() {
                invitation.source()
            } else {
                invitation.target()
            };
            winner
                .player()
                .map(|player| player.name().to_string())
                .unwrap_or_else(|| "unknown".to_string())
        }
        None => "unresolved".to_string(),
    }
}
