//! Game Contract
//!
//! The narrow interface through which the referee drives a two-sided,
//! turn-based game, plus the startup registry that selects an implementation
//! by name.

use std::collections::BTreeMap;
use thiserror::Error;

use super::outcome::{GameResult, Moves, ToMove};
use super::tictactoe::TicTacToe;

/// Result of applying one turn's moves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Game continues; these sides move next.
    Continue(ToMove),
    /// Game is over.
    Finished(GameResult),
}

/// Rules for one turn-based, two-sided game.
pub trait Game: Send {
    /// Begin play and report which sides move first.
    ///
    /// Fails if the game was constructed in a terminal position.
    fn start(&mut self) -> Result<ToMove, GameError>;

    /// Apply the moves collected this turn.
    ///
    /// Sides that were not allowed to move have `None`. Rejected moves end
    /// the game with a loss for the offending side.
    fn apply_moves(&mut self, moves: &Moves) -> TurnOutcome;

    /// Serialized current state.
    fn state(&self) -> String;

    /// Terminal result, once the game has finished.
    fn result(&self) -> Option<&GameResult>;
}

/// Game construction and lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// No game registered under this name.
    #[error("Game module not found: {0}")]
    UnknownGame(String),

    /// Serialized state failed validation.
    #[error("{0}")]
    InvalidState(String),

    /// `start` called on a finished game.
    #[error("Game has ended")]
    AlreadyFinished,
}

/// Builds a game, optionally from serialized state.
pub type GameConstructor = fn(Option<&str>) -> Result<Box<dyn Game>, GameError>;

/// Name-to-constructor table for the games this binary can referee.
#[derive(Clone, Default)]
pub struct GameRegistry {
    games: BTreeMap<String, GameConstructor>,
}

impl GameRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every bundled game.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("tictactoe", TicTacToe::construct);
        registry
    }

    /// Register a constructor, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, constructor: GameConstructor) {
        self.games.insert(name.into(), constructor);
    }

    /// Look up a constructor.
    pub fn constructor(&self, name: &str) -> Result<GameConstructor, GameError> {
        self.games
            .get(name)
            .copied()
            .ok_or_else(|| GameError::UnknownGame(name.to_string()))
    }

    /// Construct a game by name.
    pub fn create(&self, name: &str, state: Option<&str>) -> Result<Box<dyn Game>, GameError> {
        (self.constructor(name)?)(state)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.games.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::outcome::Side;

    #[test]
    fn test_builtin_registry_has_tictactoe() {
        let registry = GameRegistry::builtin();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["tictactoe"]);

        let mut game = registry.create("tictactoe", None).unwrap();
        assert_eq!(game.state(), "...\n...\n...");
        assert_eq!(game.start().unwrap(), ToMove::only(Side::P1));
    }

    #[test]
    fn test_unknown_game() {
        let registry = GameRegistry::builtin();
        let err = registry.constructor("chess").unwrap_err();
        assert_eq!(err, GameError::UnknownGame("chess".to_string()));
        assert_eq!(err.to_string(), "Game module not found: chess");
    }

    #[test]
    fn test_create_from_state() {
        let registry = GameRegistry::builtin();
        let game = registry.create("tictactoe", Some("X..\n.O.\n...")).unwrap();
        assert_eq!(game.state(), "X..\n.O.\n...");

        assert!(registry.create("tictactoe", Some("...")).is_err());
    }
}
