//! The match object created when an invitation is accepted.
//!
//! Board rules and move legality live outside this crate; the server core
//! only needs to know whether a match has concluded and how to force a
//! conclusion when a participant resigns or disconnects. A finished match
//! is immutable.

use crate::errors::MatchError;
use shared::Role;
use std::sync::{Arc, Mutex};

/// How a match came out, in terms of roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Draw,
    Winner(Role),
}

/// A game in progress between the two participants of an accepted
/// invitation. Guarded by its own lock; unrelated matches never contend.
#[derive(Debug)]
pub struct Match {
    result: Mutex<Option<MatchResult>>,
}

impl Match {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(None),
        })
    }

    /// True once the match has concluded, by resignation or otherwise.
    pub fn is_finished(&self) -> bool {
        self.result.lock().unwrap().is_some()
    }

    /// The conclusion, if any.
    pub fn result(&self) -> Option<MatchResult> {
        *self.result.lock().unwrap()
    }

    /// Records a resignation by `role`, concluding the match with a win for
    /// the opponent.
    pub fn resign(&self, role: Role) -> Result<(), MatchError> {
        if role == Role::None {
            return Err(MatchError::RoleRequired);
        }
        let mut result = self.result.lock().unwrap();
        if result.is_some() {
            return Err(MatchError::AlreadyFinished);
        }
        *result = Some(MatchResult::Winner(role.opponent()));
        Ok(())
    }

    /// Records a conclusion adjudicated by an outer rules layer (a win on
    /// the board, an agreed draw). Fails if the match already concluded.
    pub fn record_outcome(&self, outcome: MatchResult) -> Result<(), MatchError> {
        let mut result = self.result.lock().unwrap();
        if result.is_some() {
            return Err(MatchError::AlreadyFinished);
        }
        *result = Some(outcome);
        Ok(())
    }
}
