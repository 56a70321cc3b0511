//! Player identities, ratings, and the rating update applied when a match
//! concludes.
//!
//! Each player carries its own lock, so result postings touching different
//! players proceed independently while postings touching the same player
//! serialize. Ratings follow the Elo system with K = 32: expected scores are
//! computed with real-valued arithmetic and only the final stored rating is
//! rounded.

use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Rating assigned to a freshly created player.
pub const INITIAL_RATING: i32 = 1000;

const K_FACTOR: f64 = 32.0;

/// How a concluded match came out, from player1's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    Draw,
    Player1Wins,
    Player2Wins,
}

impl GameOutcome {
    /// Actual scores (S1, S2) awarded to the two players.
    fn scores(self) -> (f64, f64) {
        match self {
            GameOutcome::Draw => (0.5, 0.5),
            GameOutcome::Player1Wins => (1.0, 0.0),
            GameOutcome::Player2Wins => (0.0, 1.0),
        }
    }
}

/// One player: an immutable username and a rating guarded by the player's
/// own lock. Shared between the registry, invitations, and lookups as
/// `Arc<Player>`.
#[derive(Debug)]
pub struct Player {
    name: String,
    rating: Mutex<i32>,
}

impl Player {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            rating: Mutex::new(INITIAL_RATING),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rating(&self) -> i32 {
        *self.rating.lock().unwrap()
    }
}

/// Probability of a player rated `rating` beating one rated `opponent`.
fn expected_score(rating: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf(f64::from(opponent - rating) / 400.0))
}

/// Posts the result of a match between two players, updating both ratings.
///
/// Both player locks are taken in a stable order so that concurrent postings
/// involving the same players cannot deadlock. The update is applied to the
/// shared records themselves, never to copies.
pub fn post_result(player1: &Arc<Player>, player2: &Arc<Player>, outcome: GameOutcome) {
    debug_assert!(!Arc::ptr_eq(player1, player2));

    let (s1, s2) = outcome.scores();

    // Lock in address order; remember whether the order was swapped so the
    // scores still line up with the right player.
    let swapped = Arc::as_ptr(player1) > Arc::as_ptr(player2);
    let (lo, hi) = if swapped {
        (player2, player1)
    } else {
        (player1, player2)
    };
    let mut lo_rating = lo.rating.lock().unwrap();
    let mut hi_rating = hi.rating.lock().unwrap();

    let (r1, r2) = if swapped {
        (*hi_rating, *lo_rating)
    } else {
        (*lo_rating, *hi_rating)
    };

    let e1 = expected_score(r1, r2);
    let e2 = expected_score(r2, r1);
    let new_r1 = (f64::from(r1) + K_FACTOR * (s1 - e1)).round() as i32;
    let new_r2 = (f64::from(r2) + K_FACTOR * (s2 - e2)).round() as i32;

    debug!(
        "rating update: {} {} -> {}, {} {} -> {}",
        player1.name(),
        r1,
        new_r1,
        player2.name(),
        r2,
        new_r2
    );

    if swapped {
        *hi_rating = new_r1;
        *lo_rating = new_r2;
    } else {
        *lo_rating = new_r1;
        *hi_rating = new_r2;
    }
}

/// Process-scoped directory mapping usernames to their single `Player`
/// record.
///
/// Enforces the ledger invariant that no two `Player` instances represent
/// the same username: every login for a name yields the same shared record,
/// so a returning player keeps their rating for the life of the process.
#[derive(Debug, Default)]
pub struct PlayerDirectory {
    players: Mutex<HashMap<String, Arc<Player>>>,
}

impl PlayerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the player registered under `name`, creating one at the
    /// initial rating if none exists yet.
    pub fn get_or_create(&self, name: &str) -> Arc<Player> {
        let mut players = self.players.lock().unwrap();
        if let Some(player) = players.get(name) {
            return Arc::clone(player);
        }
        let player = Player::new(name);
        players.insert(name.to_string(), Arc::clone(&player));
        player
    }

    pub fn len(&self) -> usize {
        self.players.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
