//! Error types for the registry, invitation, and match subsystems.
//!
//! Every operation that can fail is all-or-nothing: a returned error means
//! the guarded state was left exactly as it was found.

use thiserror::Error;

/// Failures of connection registry operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// Every slot in the bounded connection table is occupied.
    #[error("connection table is at capacity")]
    CapacityExceeded,
    /// No registered connection matches the given descriptor.
    #[error("connection is not registered")]
    NotFound,
}

/// Failures of invitation state-machine operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationError {
    /// An invitation cannot pair a connection with itself.
    #[error("invitation source and target are the same connection")]
    SelfInvitation,
    /// The requested transition is not legal from the current state.
    #[error("invalid invitation state transition")]
    InvalidTransition,
    /// Closing an invitation with a live match requires a resigning role.
    #[error("a resigning role is required to close an in-progress match")]
    ResignationRequired,
}

/// Failures of match operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchError {
    /// The match has already concluded and cannot be mutated.
    #[error("the match has already finished")]
    AlreadyFinished,
    /// The operation needs a concrete participant role, not `Role::None`.
    #[error("a concrete participant role is required")]
    RoleRequired,
}
