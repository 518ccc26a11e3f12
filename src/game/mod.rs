//! Game Module
//!
//! Everything the referee knows about the game being played.
//!
//! ## Module Structure
//!
//! - `outcome`: Sides, roles, per-side bookkeeping, match results
//! - `contract`: The `Game` trait and the startup registry
//! - `tictactoe`: Bundled tic-tac-toe rules

pub mod contract;
pub mod outcome;
pub mod tictactoe;

// Re-export key types
pub use contract::{Game, GameConstructor, GameError, GameRegistry, TurnOutcome};
pub use outcome::{GameResult, Moves, Outcome, PerSide, Role, Side, ToMove};
pub use tictactoe::TicTacToe;
