//! Network Layer
//!
//! Everything between the socket and the game: framing, message parsing,
//! per-connection sessions, the match referee and the TCP server.
//! Game rules live in `game/`.

pub mod client;
pub mod frame;
pub mod protocol;
pub mod referee;
pub mod server;
pub mod session;

pub use client::{Client, ClientError, GameEnd, GameStart};
pub use frame::{FrameCodec, FrameError, MAX_BODY_LEN};
pub use protocol::{ClientMessage, Message, ProtocolError, Router};
pub use referee::{MatchPhase, MatchState, Referee, RefereeConfig, RefereeError, ServerEvent};
pub use server::{ConfigError, GameServer, GameServerError, ServerConfig};
pub use session::{ClientSession, ConnectionId, Outbound, SessionError, SessionEvent};
