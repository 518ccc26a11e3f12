//! Protocol Messages
//!
//! A frame body is `TYPE:args`, where `args` is a single CSV record.
//! The [`Router`] maps registered type names to handlers; anything else is a
//! parse error and never reaches a handler.

use std::collections::BTreeMap;

use bytes::Bytes;
use thiserror::Error;

use crate::game::outcome::{GameResult, Moves, Role};
use crate::network::frame::MAX_BODY_LEN;

// =============================================================================
// MESSAGE TYPES
// =============================================================================

/// Client login request: `[username, password]`.
pub const LOGIN: &str = "LOGIN";
/// Client move: `[moveText]`.
pub const MOVE: &str = "MOVE";
/// Login accepted: `[role]`.
pub const LOGIN_SUCCESS: &str = "LOGIN/SUCCESS";
/// Login refused: `[reason]`.
pub const LOGIN_FAILURE: &str = "LOGIN/FAILURE";
/// Match started: `[initialState, moveTimeMs]`.
pub const START: &str = "START";
/// Turn completed: `[p1Move, p2Move]`.
pub const NEXT: &str = "NEXT";
/// Match over: `[result, reason, p1Move, p2Move]`.
pub const END: &str = "END";
/// Peer sent something unacceptable: `[reason]`.
pub const INVALID: &str = "INVALID";

/// Longest result reason an `END` is sized for.
pub const MAX_REASON_LEN: usize = 64;

/// `END:` plus the widest outcome, three separators and the longest reason.
const END_OVERHEAD: usize = END.len() + 1 + "1/2-1/2".len() + 3 + MAX_REASON_LEN;

/// Longest CSV-encoded move that can be echoed for both sides in one `END`.
pub const MAX_MOVE_FIELD_LEN: usize = (MAX_BODY_LEN - END_OVERHEAD) / 2;

// =============================================================================
// ERRORS
// =============================================================================

/// Errors turning a body into a message, or a message into a body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Body bytes are not UTF-8.
    #[error("Body is not valid UTF-8")]
    NotUtf8,

    /// No `:` separating type from arguments.
    #[error("Body has invalid format - no colon.")]
    MissingColon,

    /// Type not registered with the router.
    #[error("Invalid message type")]
    UnknownType(String),

    /// Registered type with the wrong number of arguments.
    #[error("Incorrect number of arguments for {kind}")]
    WrongArity {
        /// Message type.
        kind: &'static str,
        /// Arguments required.
        expected: usize,
        /// Arguments received.
        actual: usize,
    },

    /// Move text too long to be echoed back in `NEXT` or `END`.
    #[error("Move text too long")]
    MoveTooLong {
        /// Encoded length of the move field.
        len: usize,
        /// Longest accepted encoding.
        max: usize,
    },

    /// Argument list is not a single CSV record.
    #[error("Arguments are not a single CSV record")]
    MultipleRecords,

    /// CSV reader or writer failure.
    #[error("Invalid CSV arguments: {0}")]
    Csv(String),
}

impl From<csv::Error> for ProtocolError {
    fn from(err: csv::Error) -> Self {
        ProtocolError::Csv(err.to_string())
    }
}

// =============================================================================
// MESSAGE
// =============================================================================

/// A decoded message: type plus ordered string arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type, e.g. `MOVE`.
    pub kind: String,
    /// Arguments in order.
    pub args: Vec<String>,
}

impl Message {
    /// Create a message.
    pub fn new<S: Into<String>>(kind: impl Into<String>, args: impl IntoIterator<Item = S>) -> Self {
        Self {
            kind: kind.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse any body, without checking the type against a router.
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        let (kind, rest) = split_body(body)?;
        Ok(Self {
            kind: kind.to_string(),
            args: parse_args(rest)?,
        })
    }

    /// Serialize to a frame body.
    pub fn to_body(&self) -> Result<Bytes, ProtocolError> {
        let mut body = String::with_capacity(self.kind.len() + 1);
        body.push_str(&self.kind);
        body.push(':');
        body.push_str(&encode_args(&self.args)?);
        Ok(Bytes::from(body))
    }

    /// `LOGIN/SUCCESS:role`
    pub fn login_success(role: Role) -> Self {
        Self::new(LOGIN_SUCCESS, [role.as_str()])
    }

    /// `LOGIN/FAILURE:reason`
    pub fn login_failure(reason: &str) -> Self {
        Self::new(LOGIN_FAILURE, [reason])
    }

    /// `START:state,moveTimeMs`
    pub fn start(state: &str, move_time_ms: u128) -> Self {
        Self::new(START, [state.to_string(), move_time_ms.to_string()])
    }

    /// `NEXT:p1Move,p2Move`; a side that did not move sends an empty field.
    pub fn next(moves: &Moves) -> Self {
        Self::new(NEXT, [move_field(&moves.p1), move_field(&moves.p2)])
    }

    /// `END:result,reason,p1Move,p2Move`
    pub fn end(result: &GameResult, moves: &Moves) -> Self {
        Self::new(
            END,
            [
                result.outcome.as_str(),
                result.reason.as_str(),
                move_field(&moves.p1),
                move_field(&moves.p2),
            ],
        )
    }

    /// `INVALID:reason`
    pub fn invalid(reason: &str) -> Self {
        Self::new(INVALID, [reason])
    }
}

fn move_field(text: &Option<String>) -> &str {
    text.as_deref().unwrap_or("")
}

/// Split a body on its first colon.
fn split_body(body: &[u8]) -> Result<(&str, &str), ProtocolError> {
    let text = std::str::from_utf8(body).map_err(|_| ProtocolError::NotUtf8)?;
    text.split_once(':').ok_or(ProtocolError::MissingColon)
}

/// Parse exactly one CSV record. An empty argument string has no arguments.
fn parse_args(text: &str) -> Result<Vec<String>, ProtocolError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut records = reader.records();

    let args = match records.next() {
        Some(record) => record?.iter().map(str::to_owned).collect(),
        None => Vec::new(),
    };
    if records.next().is_some() {
        return Err(ProtocolError::MultipleRecords);
    }

    Ok(args)
}

/// Encode arguments as one CSV record without a trailing terminator.
fn encode_args(args: &[String]) -> Result<String, ProtocolError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(args)?;

    let bytes = writer
        .into_inner()
        .map_err(|err| ProtocolError::Csv(err.to_string()))?;
    let mut text = String::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?;
    if text.ends_with('\n') {
        text.pop();
    }
    Ok(text)
}

// =============================================================================
// ROUTER
// =============================================================================

/// Turns the arguments of one message type into a typed value.
pub type Handler<T> = fn(Vec<String>) -> Result<T, ProtocolError>;

/// Dispatch table from message type to handler.
pub struct Router<T> {
    handlers: BTreeMap<&'static str, Handler<T>>,
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }
}

impl<T> Router<T> {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a message type.
    pub fn route(mut self, kind: &'static str, handler: Handler<T>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Check whether a type is registered.
    pub fn handles(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Parse a body and run its handler.
    pub fn dispatch(&self, body: &[u8]) -> Result<T, ProtocolError> {
        let (kind, rest) = split_body(body)?;
        let handler = self
            .handlers
            .get(kind)
            .ok_or_else(|| ProtocolError::UnknownType(kind.to_string()))?;
        handler(parse_args(rest)?)
    }
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Authenticate as a user.
    Login {
        /// Claimed username.
        username: String,
        /// Password (not checked).
        password: String,
    },
    /// Submit a move for the current turn.
    Move(String),
}

impl ClientMessage {
    /// Router for every inbound message type.
    pub fn router() -> Router<ClientMessage> {
        Router::new()
            .route(LOGIN, Self::decode_login)
            .route(MOVE, Self::decode_move)
    }

    fn decode_login(args: Vec<String>) -> Result<Self, ProtocolError> {
        let [username, password] = exact_args::<2>(LOGIN, args)?;
        Ok(ClientMessage::Login { username, password })
    }

    fn decode_move(args: Vec<String>) -> Result<Self, ProtocolError> {
        let [text] = exact_args::<1>(MOVE, args)?;

        // Quoting can lengthen the text, so measure it as it will be echoed
        let len = encode_args(std::slice::from_ref(&text))?.len();
        if len > MAX_MOVE_FIELD_LEN {
            return Err(ProtocolError::MoveTooLong {
                len,
                max: MAX_MOVE_FIELD_LEN,
            });
        }
        Ok(ClientMessage::Move(text))
    }
}

fn exact_args<const N: usize>(
    kind: &'static str,
    args: Vec<String>,
) -> Result<[String; N], ProtocolError> {
    args.try_into().map_err(|args: Vec<String>| ProtocolError::WrongArity {
        kind,
        expected: N,
        actual: args.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::outcome::{Outcome, PerSide, Side};

    fn body(message: &Message) -> String {
        String::from_utf8(message.to_body().unwrap().to_vec()).unwrap()
    }

    #[test]
    fn test_routes_login_and_move() {
        let router = ClientMessage::router();

        assert_eq!(
            router.dispatch(b"LOGIN:alice,secret").unwrap(),
            ClientMessage::Login {
                username: "alice".to_string(),
                password: "secret".to_string(),
            }
        );
        assert_eq!(
            router.dispatch(b"MOVE:\"2,2\"").unwrap(),
            ClientMessage::Move("2,2".to_string())
        );
        assert_eq!(
            router.dispatch(b"LOGIN:alice,").unwrap(),
            ClientMessage::Login {
                username: "alice".to_string(),
                password: String::new(),
            }
        );
    }

    #[test]
    fn test_missing_colon() {
        let router = ClientMessage::router();
        assert_eq!(router.dispatch(b"LOGIN"), Err(ProtocolError::MissingColon));
        assert_eq!(
            ProtocolError::MissingColon.to_string(),
            "Body has invalid format - no colon."
        );
    }

    #[test]
    fn test_unknown_type_never_reaches_handler() {
        let router = ClientMessage::router();
        let err = router.dispatch(b"FOO:").unwrap_err();
        assert_eq!(err, ProtocolError::UnknownType("FOO".to_string()));
        assert_eq!(err.to_string(), "Invalid message type");

        // Server-to-client types are not accepted inbound
        assert!(!router.handles(START));
        assert!(router.dispatch(b"START:x,1").is_err());
    }

    #[test]
    fn test_wrong_arity() {
        let router = ClientMessage::router();
        let err = router.dispatch(b"MOVE:a,b").unwrap_err();
        assert_eq!(
            err,
            ProtocolError::WrongArity { kind: MOVE, expected: 1, actual: 2 }
        );
        assert_eq!(err.to_string(), "Incorrect number of arguments for MOVE");

        assert!(matches!(
            router.dispatch(b"LOGIN:alice"),
            Err(ProtocolError::WrongArity { kind: LOGIN, expected: 2, actual: 1 })
        ));
        assert!(matches!(
            router.dispatch(b"MOVE:"),
            Err(ProtocolError::WrongArity { actual: 0, .. })
        ));
    }

    #[test]
    fn test_type_splits_on_first_colon() {
        let message = Message::parse(b"MOVE:a:b").unwrap();
        assert_eq!(message.kind, "MOVE");
        assert_eq!(message.args, vec!["a:b"]);
    }

    #[test]
    fn test_rejects_non_utf8_and_multiple_records() {
        let router = ClientMessage::router();
        assert_eq!(router.dispatch(b"MOVE:\xff"), Err(ProtocolError::NotUtf8));
        assert_eq!(router.dispatch(b"MOVE:a\nb"), Err(ProtocolError::MultipleRecords));
    }

    #[test]
    fn test_outbound_bodies() {
        assert_eq!(body(&Message::login_success(Role::Player(Side::P2))), "LOGIN/SUCCESS:P2");
        assert_eq!(body(&Message::login_failure("Bad username")), "LOGIN/FAILURE:Bad username");
        assert_eq!(body(&Message::start("...\n...\n...", 1000)), "START:\"...\n...\n...\",1000");

        let moves = PerSide::new(Some("2,2".to_string()), None);
        assert_eq!(body(&Message::next(&moves)), "NEXT:\"2,2\",");

        let result = GameResult::new(Outcome::P1Wins, "Three in a row");
        assert_eq!(
            body(&Message::end(&result, &moves)),
            "END:1-0,Three in a row,\"2,2\","
        );
    }

    #[test]
    fn test_move_length_is_capped_by_echo() {
        let router = ClientMessage::router();

        let longest = "x".repeat(MAX_MOVE_FIELD_LEN);
        assert_eq!(
            router.dispatch(format!("MOVE:{}", longest).as_bytes()).unwrap(),
            ClientMessage::Move(longest.clone())
        );

        let err = router
            .dispatch(format!("MOVE:{}", "x".repeat(500)).as_bytes())
            .unwrap_err();
        assert_eq!(err, ProtocolError::MoveTooLong { len: 500, max: MAX_MOVE_FIELD_LEN });
        assert_eq!(err.to_string(), "Move text too long");

        // Each embedded quote doubles and the field gains surrounding quotes
        let quoted = "\"".repeat(MAX_MOVE_FIELD_LEN / 2);
        let body = format!("MOVE:{}", encode_args(&[quoted]).unwrap());
        assert!(matches!(
            router.dispatch(body.as_bytes()),
            Err(ProtocolError::MoveTooLong { .. })
        ));
    }

    #[test]
    fn test_longest_end_fits_in_a_frame() {
        let longest = Some("\"".repeat((MAX_MOVE_FIELD_LEN - 2) / 2));
        let moves = PerSide::new(longest.clone(), longest);
        let result = GameResult::new(Outcome::Draw, "r".repeat(MAX_REASON_LEN));

        let end = Message::end(&result, &moves).to_body().unwrap();
        assert!(end.len() <= MAX_BODY_LEN, "END is {} bytes", end.len());
        let next = Message::next(&moves).to_body().unwrap();
        assert!(next.len() <= MAX_BODY_LEN);
    }

    #[test]
    fn test_quoted_arguments_survive_round_trip() {
        let message = Message::new(END, ["0-1", "P1 said \"hi\"", "", "1,1"]);
        let parsed = Message::parse(&message.to_body().unwrap()).unwrap();
        assert_eq!(parsed, message);
    }
}
