//! Roles and Results
//!
//! Identity types shared by the referee and every game implementation:
//! which side a session plays, per-side bookkeeping, and match outcomes.

use std::fmt;
use std::ops::{Index, IndexMut};

// =============================================================================
// SIDES AND ROLES
// =============================================================================

/// One of the two competing sides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Side {
    /// First player.
    P1,
    /// Second player.
    P2,
}

impl Side {
    /// Both sides, P1 first.
    pub const ALL: [Side; 2] = [Side::P1, Side::P2];

    /// The opposing side.
    pub fn other(self) -> Side {
        match self {
            Side::P1 => Side::P2,
            Side::P2 => Side::P1,
        }
    }

    /// Wire name of the side.
    pub fn as_str(self) -> &'static str {
        match self {
            Side::P1 => "P1",
            Side::P2 => "P2",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A session's fixed identity within a match.
///
/// A session without a role is unassigned (not yet authenticated).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Competing player.
    Player(Side),
    /// Observer; receives broadcasts, never moves.
    Spectator,
}

impl Role {
    /// Side played, if any.
    pub fn side(self) -> Option<Side> {
        match self {
            Role::Player(side) => Some(side),
            Role::Spectator => None,
        }
    }

    /// Wire name of the role, as sent in `LOGIN/SUCCESS`.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Player(side) => side.as_str(),
            Role::Spectator => "Spectator",
        }
    }

    /// Parse a wire role name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "P1" => Some(Role::Player(Side::P1)),
            "P2" => Some(Role::Player(Side::P2)),
            "Spectator" => Some(Role::Spectator),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PER-SIDE VALUES
// =============================================================================

/// A value held for each side.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PerSide<T> {
    /// P1's value.
    pub p1: T,
    /// P2's value.
    pub p2: T,
}

impl<T> PerSide<T> {
    /// Create from both values.
    pub const fn new(p1: T, p2: T) -> Self {
        Self { p1, p2 }
    }
}

impl<T> Index<Side> for PerSide<T> {
    type Output = T;

    fn index(&self, side: Side) -> &T {
        match side {
            Side::P1 => &self.p1,
            Side::P2 => &self.p2,
        }
    }
}

impl<T> IndexMut<Side> for PerSide<T> {
    fn index_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::P1 => &mut self.p1,
            Side::P2 => &mut self.p2,
        }
    }
}

/// Which sides must submit a move this turn.
pub type ToMove = PerSide<bool>;

/// Moves submitted this turn, keyed by side.
pub type Moves = PerSide<Option<String>>;

impl ToMove {
    /// Exactly one side to move.
    pub fn only(side: Side) -> Self {
        let mut to_move = PerSide::new(false, false);
        to_move[side] = true;
        to_move
    }

    /// Check whether a side may move.
    pub fn allows(&self, side: Side) -> bool {
        self[side]
    }
}

impl Moves {
    /// Sides that were allowed to move but have not.
    pub fn missing(&self, to_move: &ToMove) -> Vec<Side> {
        Side::ALL
            .into_iter()
            .filter(|&side| to_move[side] && self[side].is_none())
            .collect()
    }

    /// Check whether every side allowed to move has moved.
    pub fn is_complete(&self, to_move: &ToMove) -> bool {
        self.missing(to_move).is_empty()
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Final score of a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// P1 wins (`1-0`).
    P1Wins,
    /// P2 wins (`0-1`).
    P2Wins,
    /// Drawn (`1/2-1/2`).
    Draw,
}

impl Outcome {
    /// Outcome in which `side` wins.
    pub fn win_for(side: Side) -> Self {
        match side {
            Side::P1 => Outcome::P1Wins,
            Side::P2 => Outcome::P2Wins,
        }
    }

    /// Outcome in which `side` loses.
    pub fn loss_for(side: Side) -> Self {
        Self::win_for(side.other())
    }

    /// Wire form of the outcome.
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::P1Wins => "1-0",
            Outcome::P2Wins => "0-1",
            Outcome::Draw => "1/2-1/2",
        }
    }

    /// Parse a wire outcome.
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "1-0" => Some(Outcome::P1Wins),
            "0-1" => Some(Outcome::P2Wins),
            "1/2-1/2" => Some(Outcome::Draw),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of a match: outcome plus human-readable reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameResult {
    /// Final score.
    pub outcome: Outcome,
    /// Why the match ended.
    pub reason: String,
}

impl GameResult {
    /// Create a result.
    pub fn new(outcome: Outcome, reason: impl Into<String>) -> Self {
        Self {
            outcome,
            reason: reason.into(),
        }
    }

    /// `side` loses for `reason`.
    pub fn loss_for(side: Side, reason: impl Into<String>) -> Self {
        Self::new(Outcome::loss_for(side), reason)
    }
}

impl fmt::Display for GameResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.outcome, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_wire_strings() {
        assert_eq!(Outcome::P1Wins.as_str(), "1-0");
        assert_eq!(Outcome::P2Wins.as_str(), "0-1");
        assert_eq!(Outcome::Draw.as_str(), "1/2-1/2");
        assert_eq!(Outcome::parse("1/2-1/2"), Some(Outcome::Draw));
        assert_eq!(Outcome::parse("1-1"), None);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::Player(Side::P2).as_str(), "P2");
        assert_eq!(Role::parse("Spectator"), Some(Role::Spectator));
        assert_eq!(Role::parse("P1"), Some(Role::Player(Side::P1)));
        assert_eq!(Role::parse("p1"), None);
    }

    #[test]
    fn test_win_and_loss_are_opposite() {
        assert_eq!(Outcome::loss_for(Side::P1), Outcome::P2Wins);
        assert_eq!(Outcome::loss_for(Side::P2), Outcome::P1Wins);
        assert_eq!(Outcome::win_for(Side::P1), Outcome::P1Wins);
    }

    #[test]
    fn test_missing_moves() {
        let to_move = PerSide::new(true, true);
        let mut moves: Moves = PerSide::default();
        assert_eq!(moves.missing(&to_move), vec![Side::P1, Side::P2]);

        moves[Side::P2] = Some("1,1".to_string());
        assert_eq!(moves.missing(&to_move), vec![Side::P1]);
        assert!(!moves.is_complete(&to_move));

        // A side not allowed to move is never missing
        assert!(moves.is_complete(&ToMove::only(Side::P2)));
    }

    #[test]
    fn test_role_names() {
        assert_eq!(Role::Player(Side::P1).to_string(), "P1");
        assert_eq!(Role::Spectator.to_string(), "Spectator");
        assert_eq!(Role::Spectator.side(), None);
    }

    #[test]
    fn test_result_display() {
        let result = GameResult::loss_for(Side::P2, "P2 disconnected");
        assert_eq!(result.to_string(), "1-0 (P2 disconnected)");
    }
}
