//! Client Session
//!
//! One connection's view of the protocol: authentication state, role, and
//! outbound message formatting. Raw frames come in; at most one
//! [`SessionEvent`] per frame goes out to the referee.
//!
//! Transport and protocol failures are settled here. The session replies with
//! `INVALID` or `LOGIN/FAILURE`, closes the connection, and only escalates what
//! can affect the match.

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::game::outcome::{GameResult, Moves, Role};
use crate::network::frame::{FrameCodec, FrameError};
use crate::network::protocol::{ClientMessage, Message, ProtocolError, Router};

/// Connection identifier, assigned on accept.
pub type ConnectionId = Uuid;

/// Instruction for a connection's I/O task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Write these bytes (a complete frame).
    Frame(Bytes),
    /// Flush and close the connection.
    Close,
}

/// High-level events a session reports to the referee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Well-formed login with a valid username.
    AuthRequest {
        /// Claimed username.
        username: String,
        /// Supplied password.
        password: String,
    },
    /// Move submitted.
    Move(String),
    /// Peer violated the protocol; the connection is already closed.
    InvalidMessage {
        /// Diagnostic sent to the peer.
        reason: String,
    },
    /// Connection closed.
    Disconnect,
}

/// Session errors. All of them are programming errors, fatal to the server.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Outbound message could not be serialized.
    #[error("Failed to encode message: {0}")]
    Encode(#[from] ProtocolError),

    /// Outbound message does not fit in a frame.
    #[error("Failed to frame message: {0}")]
    Frame(#[from] FrameError),

    /// Role reassigned after authentication.
    #[error("Session already authenticated")]
    AlreadyAuthenticated,
}

/// Login failure reasons.
pub const BAD_USERNAME: &str = "Bad username";
/// Sent when an authenticated session tries to log in again.
pub const CLIENT_ALREADY_LOGGED_IN: &str = "Client already logged in";

/// Check a username: non-empty, no surrounding whitespace, `[A-Za-z0-9 ]+`.
pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username.trim() == username
        && username.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ')
}

/// A connected client.
#[derive(Debug)]
pub struct ClientSession {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Outbound>,
    codec: FrameCodec,
    username: Option<String>,
    role: Option<Role>,
    authenticated: bool,
    disconnected: bool,
}

impl ClientSession {
    /// Create a session writing to `outbound`.
    pub fn new(id: ConnectionId, outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id,
            outbound,
            codec: FrameCodec::new(),
            username: None,
            role: None,
            authenticated: false,
            disconnected: false,
        }
    }

    /// Connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Username claimed by the last well-formed login.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Role, once authenticated.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Check whether login succeeded.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Check whether the connection is closed or closing.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Handle one decoded frame body.
    pub fn handle_frame(
        &mut self,
        router: &Router<ClientMessage>,
        body: &[u8],
    ) -> Result<Option<SessionEvent>, SessionError> {
        if self.disconnected {
            return Ok(None);
        }

        match router.dispatch(body) {
            Ok(ClientMessage::Login { username, password }) => self.handle_login(username, password),
            Ok(ClientMessage::Move(text)) => Ok(Some(SessionEvent::Move(text))),
            Err(err) => {
                debug!(connection = %self.id, error = %err, "Protocol violation");
                self.reject(&err.to_string())
            }
        }
    }

    /// Handle a framing failure reported by the transport.
    pub fn handle_frame_error(&mut self, err: &FrameError) -> Result<Option<SessionEvent>, SessionError> {
        if self.disconnected {
            return Ok(None);
        }
        debug!(connection = %self.id, error = %err, "Framing violation");
        self.reject("Invalid length prefix")
    }

    /// Handle the connection closing, for any reason.
    pub fn handle_closed(&mut self) -> SessionEvent {
        self.disconnected = true;
        SessionEvent::Disconnect
    }

    fn handle_login(
        &mut self,
        username: String,
        password: String,
    ) -> Result<Option<SessionEvent>, SessionError> {
        if !is_valid_username(&username) {
            self.fail_login(BAD_USERNAME)?;
            return Ok(None);
        }
        if self.authenticated {
            self.fail_login(CLIENT_ALREADY_LOGGED_IN)?;
            return Ok(None);
        }

        self.username = Some(username.clone());
        Ok(Some(SessionEvent::AuthRequest { username, password }))
    }

    fn reject(&mut self, reason: &str) -> Result<Option<SessionEvent>, SessionError> {
        self.send_invalid_and_disconnect(reason)?;
        Ok(Some(SessionEvent::InvalidMessage {
            reason: reason.to_string(),
        }))
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Accept the login and bind the role.
    pub fn authenticate(&mut self, role: Role) -> Result<(), SessionError> {
        if self.authenticated {
            return Err(SessionError::AlreadyAuthenticated);
        }
        self.role = Some(role);
        self.authenticated = true;
        self.send(&Message::login_success(role))
    }

    /// Refuse the login and close the connection.
    pub fn deny_authentication(&mut self, reason: &str) -> Result<(), SessionError> {
        self.fail_login(reason)
    }

    /// Announce the start of the match.
    pub fn send_game_start(&mut self, state: &str, move_time: Duration) -> Result<(), SessionError> {
        self.send(&Message::start(state, move_time.as_millis()))
    }

    /// Announce the moves that completed the previous turn.
    pub fn send_next_turn(&mut self, last_moves: &Moves) -> Result<(), SessionError> {
        self.send(&Message::next(last_moves))
    }

    /// Announce the result, then close the connection.
    pub fn send_game_end_and_disconnect(
        &mut self,
        result: &GameResult,
        last_moves: &Moves,
    ) -> Result<(), SessionError> {
        self.send(&Message::end(result, last_moves))?;
        self.disconnect();
        Ok(())
    }

    /// Report a protocol violation, then close the connection.
    pub fn send_invalid_and_disconnect(&mut self, reason: &str) -> Result<(), SessionError> {
        self.send(&Message::invalid(reason))?;
        self.disconnect();
        Ok(())
    }

    /// Close the connection without a final message.
    pub fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;
        // Receiver gone means the I/O task already finished
        let _ = self.outbound.send(Outbound::Close);
    }

    fn fail_login(&mut self, reason: &str) -> Result<(), SessionError> {
        self.send(&Message::login_failure(reason))?;
        self.disconnect();
        Ok(())
    }

    fn send(&mut self, message: &Message) -> Result<(), SessionError> {
        if self.disconnected {
            return Ok(());
        }

        let frame = self.codec.frame(message.to_body()?)?;
        if self.outbound.send(Outbound::Frame(frame)).is_err() {
            // Peer already gone; the close event settles the bookkeeping
            warn!(connection = %self.id, kind = %message.kind, "Dropped message for closed connection");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::outcome::{Outcome, PerSide, Side};

    fn session() -> (ClientSession, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ClientSession::new(Uuid::new_v4(), tx), rx)
    }

    /// Drain everything queued so far as parsed messages, plus whether a close was queued.
    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> (Vec<Message>, bool) {
        let mut messages = Vec::new();
        let mut closed = false;
        while let Ok(out) = rx.try_recv() {
            match out {
                Outbound::Frame(frame) => messages.push(Message::parse(&frame[2..]).unwrap()),
                Outbound::Close => closed = true,
            }
        }
        (messages, closed)
    }

    #[test]
    fn test_username_rules() {
        assert!(is_valid_username("Alice"));
        assert!(is_valid_username("player 2"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username(" Alice"));
        assert!(!is_valid_username("Alice "));
        assert!(!is_valid_username("al!ce"));
        assert!(!is_valid_username("ålice"));
    }

    #[test]
    fn test_login_emits_auth_request() {
        let (mut session, mut rx) = session();
        let router = ClientMessage::router();

        let event = session.handle_frame(&router, b"LOGIN:A,pw").unwrap();
        assert_eq!(
            event,
            Some(SessionEvent::AuthRequest {
                username: "A".to_string(),
                password: "pw".to_string(),
            })
        );
        assert_eq!(session.username(), Some("A"));
        assert!(!session.is_authenticated());
        assert_eq!(drain(&mut rx), (vec![], false));
    }

    #[test]
    fn test_bad_username_fails_without_event() {
        let (mut session, mut rx) = session();
        let router = ClientMessage::router();

        let event = session.handle_frame(&router, b"LOGIN: A,pw").unwrap();
        assert_eq!(event, None);
        assert!(session.is_disconnected());
        assert_eq!(drain(&mut rx), (vec![Message::login_failure(BAD_USERNAME)], true));
    }

    #[test]
    fn test_second_login_fails() {
        let (mut session, mut rx) = session();
        let router = ClientMessage::router();

        session.handle_frame(&router, b"LOGIN:A,").unwrap();
        session.authenticate(Role::Player(Side::P1)).unwrap();
        let event = session.handle_frame(&router, b"LOGIN:A,").unwrap();

        assert_eq!(event, None);
        let (messages, closed) = drain(&mut rx);
        assert_eq!(
            messages,
            vec![
                Message::login_success(Role::Player(Side::P1)),
                Message::login_failure(CLIENT_ALREADY_LOGGED_IN),
            ]
        );
        assert!(closed);
    }

    #[test]
    fn test_parse_error_sends_invalid_and_escalates() {
        let (mut session, mut rx) = session();
        let router = ClientMessage::router();

        let event = session.handle_frame(&router, b"FOO:").unwrap();
        assert_eq!(
            event,
            Some(SessionEvent::InvalidMessage {
                reason: "Invalid message type".to_string()
            })
        );
        assert_eq!(drain(&mut rx), (vec![Message::invalid("Invalid message type")], true));

        // Nothing further is processed or sent
        assert_eq!(session.handle_frame(&router, b"MOVE:x").unwrap(), None);
        session.send_next_turn(&PerSide::default()).unwrap();
        assert_eq!(drain(&mut rx), (vec![], false));
    }

    #[test]
    fn test_frame_error_sends_invalid() {
        let (mut session, mut rx) = session();
        let event = session.handle_frame_error(&FrameError::InvalidLength(0)).unwrap();
        assert!(matches!(event, Some(SessionEvent::InvalidMessage { .. })));
        assert_eq!(drain(&mut rx), (vec![Message::invalid("Invalid length prefix")], true));
    }

    #[test]
    fn test_role_is_immutable() {
        let (mut session, _rx) = session();
        session.authenticate(Role::Spectator).unwrap();
        assert!(matches!(
            session.authenticate(Role::Player(Side::P1)),
            Err(SessionError::AlreadyAuthenticated)
        ));
        assert_eq!(session.role(), Some(Role::Spectator));
    }

    #[test]
    fn test_game_end_closes_once() {
        let (mut session, mut rx) = session();
        let result = GameResult::new(Outcome::Draw, "Out of squares");
        session.send_game_end_and_disconnect(&result, &PerSide::default()).unwrap();
        session.send_game_end_and_disconnect(&result, &PerSide::default()).unwrap();

        let (messages, closed) = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].args, vec!["1/2-1/2", "Out of squares", "", ""]);
        assert!(closed);
    }

    #[test]
    fn test_send_to_dropped_connection_is_swallowed() {
        let (mut session, rx) = session();
        drop(rx);
        session.send_game_start("...", Duration::from_millis(500)).unwrap();
        session.disconnect();
        assert!(session.is_disconnected());
    }

    #[test]
    fn test_oversized_message_is_fatal() {
        let (mut session, _rx) = session();
        let state = "x".repeat(600);
        assert!(matches!(
            session.send_game_start(&state, Duration::from_millis(1000)),
            Err(SessionError::Frame(FrameError::BodyTooLong { .. }))
        ));
    }
}
