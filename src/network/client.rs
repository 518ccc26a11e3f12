//! Reference Client
//!
//! The protocol seen from the other side of the socket. Used by the
//! integration tests and as a starting point for bots.
//!
//! `END` and `INVALID` can arrive in place of any expected reply, so the
//! typed helpers surface them as [`ClientError::GameEnd`] and
//! [`ClientError::InvalidMessageSent`].

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use tracing::debug;

use crate::game::outcome::{GameResult, Moves, Outcome, PerSide, Role};
use crate::network::frame::{FrameCodec, FrameError};
use crate::network::protocol::{
    Message, ProtocolError, END, INVALID, LOGIN, LOGIN_FAILURE, LOGIN_SUCCESS, MOVE, NEXT, START,
};
use crate::network::referee::USER_ALREADY_LOGGED_IN;
use crate::network::session::CLIENT_ALREADY_LOGGED_IN;

/// The match result as announced by `END`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameEnd {
    /// Outcome and reason.
    pub result: GameResult,
    /// Moves of the final turn.
    pub last_moves: Moves,
}

impl fmt::Display for GameEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.result, f)
    }
}

/// What `START` tells a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameStart {
    /// Serialized initial game state.
    pub initial_state: String,
    /// Time allowed per move.
    pub move_time: Duration,
}

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not connect.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing failure on the connection.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Server sent something unparseable, or a message could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Server rejected something we sent.
    #[error("Invalid message sent: {0}")]
    InvalidMessageSent(String),

    /// This connection already logged in.
    #[error("Client already logged in")]
    ClientAlreadyLoggedIn,

    /// Another connection holds the username.
    #[error("User already logged in")]
    UserAlreadyLoggedIn,

    /// Login refused for another reason.
    #[error("Login failed: {0}")]
    LoginFailed(String),

    /// The match is over.
    #[error("Game ended: {0}")]
    GameEnd(GameEnd),

    /// Well-formed message of the wrong type or shape.
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    /// Server closed the connection.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// A connection to a game server.
pub struct Client {
    framed: Framed<TcpStream, FrameCodec>,
    role: Option<Role>,
}

impl Client {
    /// Connect to a server.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, FrameCodec::new()),
            role: None,
        })
    }

    /// Role granted at login.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Log in and wait for the match to start.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(Role, GameStart), ClientError> {
        let role = self.authenticate(username, password).await?;
        let start = self.wait_for_start().await?;
        Ok((role, start))
    }

    /// Send `LOGIN` and wait for the verdict.
    pub async fn authenticate(&mut self, username: &str, password: &str) -> Result<Role, ClientError> {
        self.send(&Message::new(LOGIN, [username, password])).await?;

        let reply = self.receive().await?;
        match (reply.kind.as_str(), reply.args.as_slice()) {
            (LOGIN_SUCCESS, [name]) => {
                let role = Role::parse(name).ok_or_else(|| unexpected(&reply))?;
                self.role = Some(role);
                Ok(role)
            }
            (LOGIN_FAILURE, [reason]) => Err(match reason.as_str() {
                CLIENT_ALREADY_LOGGED_IN => ClientError::ClientAlreadyLoggedIn,
                USER_ALREADY_LOGGED_IN => ClientError::UserAlreadyLoggedIn,
                _ => ClientError::LoginFailed(reason.clone()),
            }),
            _ => Err(unexpected(&reply)),
        }
    }

    /// Wait for `START`.
    pub async fn wait_for_start(&mut self) -> Result<GameStart, ClientError> {
        let reply = self.receive().await?;
        match (reply.kind.as_str(), reply.args.as_slice()) {
            (START, [state, move_time]) => {
                let ms = move_time.parse::<u64>().map_err(|_| unexpected(&reply))?;
                Ok(GameStart {
                    initial_state: state.clone(),
                    move_time: Duration::from_millis(ms),
                })
            }
            _ => Err(unexpected(&reply)),
        }
    }

    /// Submit a move without waiting.
    pub async fn send_move(&mut self, text: &str) -> Result<(), ClientError> {
        self.send(&Message::new(MOVE, [text])).await
    }

    /// Submit a move and wait for the turn to complete.
    pub async fn make_move(&mut self, text: &str) -> Result<Moves, ClientError> {
        self.send_move(text).await?;
        self.wait_for_next_turn().await
    }

    /// Wait for `NEXT` and return the moves that completed the turn.
    pub async fn wait_for_next_turn(&mut self) -> Result<Moves, ClientError> {
        let reply = self.receive().await?;
        match (reply.kind.as_str(), reply.args.as_slice()) {
            (NEXT, [p1, p2]) => Ok(PerSide::new(move_from_field(p1), move_from_field(p2))),
            _ => Err(unexpected(&reply)),
        }
    }

    /// Send an already-encoded body, bypassing message construction.
    pub async fn send_raw(&mut self, body: Bytes) -> Result<(), ClientError> {
        self.framed.send(body).await?;
        Ok(())
    }

    /// Next message, whatever its type.
    pub async fn recv(&mut self) -> Result<Message, ClientError> {
        match self.framed.next().await {
            Some(frame) => Ok(Message::parse(&frame?)?),
            None => Err(ClientError::ConnectionClosed),
        }
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.framed.close().await?;
        Ok(())
    }

    async fn send(&mut self, message: &Message) -> Result<(), ClientError> {
        self.send_raw(message.to_body()?).await
    }

    /// Next message, with `END` and `INVALID` turned into errors.
    async fn receive(&mut self) -> Result<Message, ClientError> {
        let message = self.recv().await?;
        debug!(kind = %message.kind, args = ?message.args, "Received");

        match (message.kind.as_str(), message.args.as_slice()) {
            (END, [outcome, reason, p1, p2]) => {
                let outcome = Outcome::parse(outcome).ok_or_else(|| unexpected(&message))?;
                Err(ClientError::GameEnd(GameEnd {
                    result: GameResult::new(outcome, reason.clone()),
                    last_moves: PerSide::new(move_from_field(p1), move_from_field(p2)),
                }))
            }
            (INVALID, [reason]) => Err(ClientError::InvalidMessageSent(reason.clone())),
            (END | INVALID, _) => Err(unexpected(&message)),
            _ => Ok(message),
        }
    }
}

fn move_from_field(field: &str) -> Option<String> {
    (!field.is_empty()).then(|| field.to_string())
}

fn unexpected(message: &Message) -> ClientError {
    ClientError::UnexpectedMessage(format!("{}:{}", message.kind, message.args.join(",")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// A scripted server: replies to each frame with the next canned body.
    async fn scripted(replies: Vec<&'static [u8]>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, FrameCodec::new());
            for reply in replies {
                framed.next().await.unwrap().unwrap();
                framed.send(Bytes::from_static(reply)).await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_login_failure_reasons() {
        let addr = scripted(vec![b"LOGIN/FAILURE:User already logged in"]).await;
        let mut client = Client::connect(addr).await.unwrap();
        assert!(matches!(
            client.authenticate("A", "").await,
            Err(ClientError::UserAlreadyLoggedIn)
        ));

        let addr = scripted(vec![b"LOGIN/FAILURE:Bad username"]).await;
        let mut client = Client::connect(addr).await.unwrap();
        match client.authenticate(" A", "").await {
            Err(ClientError::LoginFailed(reason)) => assert_eq!(reason, "Bad username"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_end_surfaces_as_error() {
        let addr = scripted(vec![b"LOGIN/SUCCESS:P2", b"END:1-0,Three in a row,\"3,3\","]).await;
        let mut client = Client::connect(addr).await.unwrap();
        assert_eq!(client.authenticate("B", "").await.unwrap(), Role::Player(crate::game::Side::P2));

        match client.make_move("1,1").await {
            Err(ClientError::GameEnd(end)) => {
                assert_eq!(end.result, GameResult::new(Outcome::P1Wins, "Three in a row"));
                assert_eq!(end.last_moves, PerSide::new(Some("3,3".to_string()), None));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_surfaces_as_error() {
        let addr = scripted(vec![b"INVALID:Not logged in"]).await;
        let mut client = Client::connect(addr).await.unwrap();
        match client.send_move("1,1").await.and(client.wait_for_next_turn().await) {
            Err(ClientError::InvalidMessageSent(reason)) => assert_eq!(reason, "Not logged in"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let addr = scripted(vec![]).await;
        let mut client = Client::connect(addr).await.unwrap();
        assert!(matches!(client.recv().await, Err(ClientError::ConnectionClosed)));
    }
}
