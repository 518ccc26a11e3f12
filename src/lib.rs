//! # Grebe Game Server
//!
//! Referee for two-player, turn-based games played over TCP.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       GREBE SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/           - Game rules (no I/O)                       │
//! │  ├── outcome.rs  - Sides, roles, results                     │
//! │  ├── contract.rs - Game trait and registry                   │
//! │  └── tictactoe.rs- Bundled tic-tac-toe                       │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── frame.rs    - Length-prefixed frame codec               │
//! │  ├── protocol.rs - TYPE:csv messages and router              │
//! │  ├── session.rs  - Per-connection login state                │
//! │  ├── referee.rs  - Match state machine and deadlines         │
//! │  ├── server.rs   - TCP listener and control loop             │
//! │  └── client.rs   - Reference client                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Protocol
//!
//! Every message is a 2-byte big-endian length followed by a UTF-8 body of
//! 1 to 510 bytes, `TYPE:arg1,arg2,...` with CSV-encoded arguments.
//!
//! Clients send `LOGIN:username,password` and `MOVE:text`. The server sends
//! `LOGIN/SUCCESS`, `LOGIN/FAILURE`, `START`, `NEXT`, `END` and `INVALID`.
//!
//! ## Single Writer
//!
//! All match state is owned by one [`network::Referee`] driven from one
//! task. Connection tasks and deadline timers only send it events.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;

// Re-export commonly used types
pub use game::{Game, GameRegistry, GameResult, Outcome, Role, Side};
pub use network::{Client, GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default listening port
pub const DEFAULT_PORT: u16 = 13579;

/// Default time allowed per move, in milliseconds
pub const DEFAULT_MOVE_TIME_MS: u64 = 1000;
