//! The invitation state machine pairing two connections into a match.
//!
//! An invitation moves monotonically through `Open -> Accepted -> Closed`
//! (or straight `Open -> Closed`), holds a reference on each participant
//! connection for its whole life, and owns a [`Match`] from the moment it is
//! accepted. Each invitation carries its own lock; transitions observed by
//! concurrent callers are linearized per invitation, and a failed call
//! never leaves a partial mutation behind.

use crate::connection::Connection;
use crate::errors::{InvitationError, MatchError};
use crate::game::Match;
use shared::Role;
use std::sync::{Arc, Mutex};

/// Lifecycle phase of an invitation. Transitions are monotone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationPhase {
    Open,
    Accepted,
    Closed,
}

#[derive(Debug)]
struct InvitationState {
    phase: InvitationPhase,
    // Present iff the phase has passed through Accepted.
    game: Option<Arc<Match>>,
}

/// A pending or resolved proposal pairing two connections into a match.
#[derive(Debug)]
pub struct Invitation {
    source: Arc<Connection>,
    target: Arc<Connection>,
    source_role: Role,
    target_role: Role,
    state: Mutex<InvitationState>,
}

impl Invitation {
    /// Opens an invitation from `source` to `target`, taking a reference on
    /// each. The two must be distinct connections.
    pub fn create(
        source: &Arc<Connection>,
        target: &Arc<Connection>,
        source_role: Role,
        target_role: Role,
    ) -> Result<Arc<Self>, InvitationError> {
        if source.descriptor() == target.descriptor() {
            return Err(InvitationError::SelfInvitation);
        }
        Ok(Arc::new(Self {
            source: Arc::clone(source),
            target: Arc::clone(target),
            source_role,
            target_role,
            state: Mutex::new(InvitationState {
                phase: InvitationPhase::Open,
                game: None,
            }),
        }))
    }

    /// The inviting connection. Valid while the invitation is alive; take a
    /// clone for anything longer-lived.
    pub fn source(&self) -> &Arc<Connection> {
        &self.source
    }

    /// The invited connection.
    pub fn target(&self) -> &Arc<Connection> {
        &self.target
    }

    pub fn source_role(&self) -> Role {
        self.source_role
    }

    pub fn target_role(&self) -> Role {
        self.target_role
    }

    pub fn phase(&self) -> InvitationPhase {
        self.state.lock().unwrap().phase
    }

    /// The match, present iff the invitation has been accepted.
    pub fn game(&self) -> Option<Arc<Match>> {
        self.state.lock().unwrap().game.clone()
    }

    /// Given one participant, returns the other. Panics if `conn` is not a
    /// participant; callers resolve invitations through a participant's own
    /// table, so a stranger here is a programming error.
    pub fn peer_of(&self, conn: &Arc<Connection>) -> &Arc<Connection> {
        if Arc::ptr_eq(&self.source, conn) {
            &self.target
        } else {
            assert!(Arc::ptr_eq(&self.target, conn));
            &self.source
        }
    }

    /// The role `conn` plays in this invitation.
    pub fn role_of(&self, conn: &Arc<Connection>) -> Role {
        if Arc::ptr_eq(&self.source, conn) {
            self.source_role
        } else {
            assert!(Arc::ptr_eq(&self.target, conn));
            self.target_role
        }
    }

    /// Accepts an open invitation, creating the match. Succeeds exactly once
    /// per invitation; any other starting phase fails with no state change.
    pub fn accept(&self) -> Result<Arc<Match>, InvitationError> {
        let mut state = self.state.lock().unwrap();
        if state.phase != InvitationPhase::Open {
            return Err(InvitationError::InvalidTransition);
        }
        let game = Match::new();
        state.game = Some(Arc::clone(&game));
        state.phase = InvitationPhase::Accepted;
        Ok(game)
    }

    /// Closes an open or accepted invitation.
    ///
    /// Without a match, `resigning_role` must be [`Role::None`]. With a
    /// match still in progress, `resigning_role` must name a participant,
    /// whose resignation is recorded before the transition; omitting it is
    /// [`InvitationError::ResignationRequired`]. A match that has already
    /// concluded closes directly.
    ///
    /// On success the concluded match (if any) is returned so the caller
    /// can post ratings; close succeeds exactly once per invitation, which
    /// is what makes that posting exactly-once. On failure the state is
    /// left unchanged.
    pub fn close(&self, resigning_role: Role) -> Result<Option<Arc<Match>>, InvitationError> {
        let mut state = self.state.lock().unwrap();
        if state.phase == InvitationPhase::Closed {
            return Err(InvitationError::InvalidTransition);
        }

        match state.game.clone() {
            None => {
                if resigning_role != Role::None {
                    return Err(InvitationError::InvalidTransition);
                }
                state.phase = InvitationPhase::Closed;
                Ok(None)
            }
            Some(game) => {
                if !game.is_finished() {
                    if resigning_role == Role::None {
                        return Err(InvitationError::ResignationRequired);
                    }
                    if resigning_role != self.source_role && resigning_role != self.target_role {
                        return Err(InvitationError::InvalidTransition);
                    }
                    match game.resign(resigning_role) {
                        // A conclusion that races ahead of the resignation
                        // is the same as closing a finished match.
                        Ok(()) | Err(MatchError::AlreadyFinished) => {}
                        Err(MatchError::RoleRequired) => {
                            return Err(InvitationError::InvalidTransition);
                        }
                    }
                }
                state.phase = InvitationPhase::Closed;
                Ok(Some(game))
            }
        }
    }
}
