//! Match Referee
//!
//! The match state machine: `WaitingForPlayers → InProgress → Ended`.
//!
//! Every input (frame received, connection closed, deadline fired) arrives as
//! a [`ServerEvent`] and runs to completion on one task, so `MatchState` is
//! never mutated concurrently.
//!
//! Turn deadlines are not cancelled when a turn completes early. Each one is
//! tagged with the turn it was armed for and ignored if the match has moved on.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::game::contract::{Game, GameConstructor, GameError, TurnOutcome};
use crate::game::outcome::{GameResult, Moves, Outcome, PerSide, Role, Side, ToMove};
use crate::network::frame::FrameError;
use crate::network::protocol::{ClientMessage, Router};
use crate::network::session::{ClientSession, ConnectionId, Outbound, SessionError, SessionEvent};

/// Sent when a username is already bound to a live session.
pub const USER_ALREADY_LOGGED_IN: &str = "User already logged in";
/// Sent when a login arrives after the result.
pub const MATCH_ENDED: &str = "Match has ended";
/// Sent for a move from a session that never logged in.
pub const NOT_LOGGED_IN: &str = "Not logged in";
/// Sent for a move before both players are present.
pub const GAME_NOT_STARTED: &str = "Game has not started";
/// Sent for a move from a spectator.
pub const SPECTATORS_CANNOT_MOVE: &str = "Spectators cannot move";
/// Reason given when neither side moved before the deadline.
pub const BOTH_EXCEEDED_MOVE_TIME: &str = "Both players exceeded move time limit";

// =============================================================================
// EVENTS AND STATE
// =============================================================================

/// Everything the referee reacts to.
#[derive(Debug)]
pub enum ServerEvent {
    /// A complete frame body arrived.
    Frame {
        /// Source connection.
        connection: ConnectionId,
        /// Frame body.
        body: Bytes,
    },
    /// The peer sent an unacceptable length prefix; reading has stopped.
    FrameError {
        /// Source connection.
        connection: ConnectionId,
        /// What was wrong.
        error: FrameError,
    },
    /// The connection closed.
    Closed {
        /// Closed connection.
        connection: ConnectionId,
    },
    /// Writing failed for a reason other than the peer going away.
    WriteFailed {
        /// Failed connection.
        connection: ConnectionId,
        /// Underlying error.
        error: io::Error,
    },
    /// A turn deadline elapsed.
    Deadline {
        /// Turn the deadline was armed for.
        turn: u32,
    },
}

/// Match lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Waiting for both players to log in.
    WaitingForPlayers,
    /// Turns are being played.
    InProgress,
    /// Result reached; terminal.
    Ended,
}

/// The single match this process referees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchState {
    /// Session bound to each side.
    pub players: PerSide<Option<ConnectionId>>,
    /// Spectators in join order.
    pub spectators: Vec<ConnectionId>,
    /// Lifecycle phase.
    pub phase: MatchPhase,
    /// Current turn; starts at 1 when the match starts and only increases.
    pub turn_number: u32,
    /// Sides that must move this turn.
    pub to_move: ToMove,
    /// Moves received this turn.
    pub pending_moves: Moves,
    /// Final result, once ended.
    pub result: Option<GameResult>,
}

impl Default for MatchState {
    fn default() -> Self {
        Self {
            players: PerSide::default(),
            spectators: Vec::new(),
            phase: MatchPhase::WaitingForPlayers,
            turn_number: 0,
            to_move: PerSide::default(),
            pending_moves: PerSide::default(),
            result: None,
        }
    }
}

impl MatchState {
    /// Check whether the match has ended.
    pub fn is_ended(&self) -> bool {
        self.phase == MatchPhase::Ended
    }

    /// Side a connection is bound to, if any.
    pub fn side_of(&self, connection: ConnectionId) -> Option<Side> {
        Side::ALL
            .into_iter()
            .find(|&side| self.players[side] == Some(connection))
    }
}

/// Referee settings.
#[derive(Debug, Clone)]
pub struct RefereeConfig {
    /// Username that plays P1.
    pub p1_username: String,
    /// Username that plays P2.
    pub p2_username: String,
    /// Time each side has to submit a move.
    pub move_time: Duration,
}

/// Referee errors. Each one is fatal to the server.
#[derive(Debug, Error)]
pub enum RefereeError {
    /// Outbound message could not be produced.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Game could not be constructed or started.
    #[error("Game error: {0}")]
    Game(#[from] GameError),

    /// Unexpected transport failure.
    #[error("Transport error on {connection}: {source}")]
    Transport {
        /// Failed connection.
        connection: ConnectionId,
        /// Underlying error.
        source: io::Error,
    },

    /// Internal invariant violated.
    #[error("Internal error: {0}")]
    Invariant(String),
}

// =============================================================================
// REFEREE
// =============================================================================

/// Drives one match from login to result.
pub struct Referee {
    config: RefereeConfig,
    state: MatchState,
    sessions: BTreeMap<ConnectionId, ClientSession>,
    logged_in: BTreeSet<String>,
    router: Router<ClientMessage>,
    new_game: GameConstructor,
    game: Option<Box<dyn Game>>,
    rng: StdRng,
    events: mpsc::UnboundedSender<ServerEvent>,
    started_at: Option<Instant>,
}

impl Referee {
    /// Create a referee. Deadlines are delivered back through `events`.
    pub fn new(
        config: RefereeConfig,
        new_game: GameConstructor,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        Self {
            config,
            state: MatchState::default(),
            sessions: BTreeMap::new(),
            logged_in: BTreeSet::new(),
            router: ClientMessage::router(),
            new_game,
            game: None,
            rng: StdRng::from_entropy(),
            events,
            started_at: None,
        }
    }

    /// Replace the broadcast-order RNG.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Current match state.
    pub fn state(&self) -> &MatchState {
        &self.state
    }

    /// Check whether the match has ended.
    pub fn is_ended(&self) -> bool {
        self.state.is_ended()
    }

    /// Final result, once ended.
    pub fn result(&self) -> Option<&GameResult> {
        self.state.result.as_ref()
    }

    /// Look up a session.
    pub fn session(&self, connection: ConnectionId) -> Option<&ClientSession> {
        self.sessions.get(&connection)
    }

    /// Register a newly accepted connection.
    pub fn connect(&mut self, connection: ConnectionId, outbound: mpsc::UnboundedSender<Outbound>) {
        let mut session = ClientSession::new(connection, outbound);
        if self.is_ended() {
            session.disconnect();
            return;
        }
        self.sessions.insert(connection, session);
    }

    /// Apply one event.
    pub fn handle_event(&mut self, event: ServerEvent) -> Result<(), RefereeError> {
        match event {
            ServerEvent::Frame { connection, body } => {
                let Some(session) = self.sessions.get_mut(&connection) else {
                    return Ok(());
                };
                match session.handle_frame(&self.router, &body)? {
                    Some(event) => self.on_session_event(connection, event),
                    None => Ok(()),
                }
            }
            ServerEvent::FrameError { connection, error } => {
                let Some(session) = self.sessions.get_mut(&connection) else {
                    return Ok(());
                };
                match session.handle_frame_error(&error)? {
                    Some(event) => self.on_session_event(connection, event),
                    None => Ok(()),
                }
            }
            ServerEvent::Closed { connection } => {
                let Some(session) = self.sessions.get_mut(&connection) else {
                    return Ok(());
                };
                let event = session.handle_closed();
                self.on_session_event(connection, event)
            }
            ServerEvent::WriteFailed { connection, error } => Err(RefereeError::Transport {
                connection,
                source: error,
            }),
            ServerEvent::Deadline { turn } => self.on_deadline(turn),
        }
    }

    fn on_session_event(&mut self, connection: ConnectionId, event: SessionEvent) -> Result<(), RefereeError> {
        match event {
            SessionEvent::AuthRequest { username, .. } => self.on_auth_request(connection, username),
            SessionEvent::Move(text) => self.on_move(connection, text),
            SessionEvent::InvalidMessage { reason } => self.on_invalid_message(connection, &reason),
            SessionEvent::Disconnect => self.on_disconnect(connection),
        }
    }

    // =========================================================================
    // LOGIN
    // =========================================================================

    fn on_auth_request(&mut self, connection: ConnectionId, username: String) -> Result<(), RefereeError> {
        if self.is_ended() {
            return Ok(self.session_mut(connection)?.deny_authentication(MATCH_ENDED)?);
        }
        if self.logged_in.contains(&username) {
            debug!(%connection, %username, "Duplicate login refused");
            return Ok(self.session_mut(connection)?.deny_authentication(USER_ALREADY_LOGGED_IN)?);
        }

        let role = if username == self.config.p1_username {
            Role::Player(Side::P1)
        } else if username == self.config.p2_username {
            Role::Player(Side::P2)
        } else {
            Role::Spectator
        };

        match role {
            Role::Player(side) => {
                // A previous session for this side is necessarily disconnected
                if let Some(previous) = self.state.players[side].replace(connection) {
                    self.sessions.remove(&previous);
                }
                info!(%connection, "{} logged in", side);
            }
            Role::Spectator => {
                self.state.spectators.push(connection);
                info!(%connection, %username, "Spectator logged in");
            }
        }

        self.logged_in.insert(username);
        self.session_mut(connection)?.authenticate(role)?;

        if self.state.phase == MatchPhase::WaitingForPlayers && self.players_connected() {
            self.start_match()?;
        }
        Ok(())
    }

    fn players_connected(&self) -> bool {
        Side::ALL.into_iter().all(|side| {
            self.state.players[side]
                .and_then(|id| self.sessions.get(&id))
                .is_some_and(|session| !session.is_disconnected())
        })
    }

    // =========================================================================
    // TURNS
    // =========================================================================

    fn start_match(&mut self) -> Result<(), RefereeError> {
        info!("Starting game");
        self.state.phase = MatchPhase::InProgress;
        self.started_at = Some(Instant::now());

        let mut game = (self.new_game)(None)?;
        self.state.to_move = game.start()?;
        let initial_state = game.state();
        self.game = Some(game);

        self.state.turn_number += 1;
        info!(elapsed_ms = self.elapsed_ms(), "Turn {}", self.state.turn_number);

        let move_time = self.config.move_time;
        for id in self.fair_order() {
            if let Some(session) = self.sessions.get_mut(&id) {
                session.send_game_start(&initial_state, move_time)?;
            }
        }

        self.arm_deadline();
        Ok(())
    }

    fn on_move(&mut self, connection: ConnectionId, text: String) -> Result<(), RefereeError> {
        let role = self.sessions.get(&connection).and_then(ClientSession::role);

        let side = match (role, self.state.phase) {
            (_, MatchPhase::Ended) => return Ok(()),
            (Some(Role::Player(side)), MatchPhase::InProgress) => side,
            (None, _) => return self.reject_move(connection, NOT_LOGGED_IN),
            (Some(_), MatchPhase::WaitingForPlayers) => {
                return self.reject_move(connection, GAME_NOT_STARTED)
            }
            (Some(Role::Spectator), MatchPhase::InProgress) => {
                return self.reject_move(connection, SPECTATORS_CANNOT_MOVE)
            }
        };

        info!(elapsed_ms = self.elapsed_ms(), "{} {}", side, text);

        // A side that already moved this turn is no longer allowed to
        if !self.state.to_move.allows(side) || self.state.pending_moves[side].is_some() {
            return self.end_match(GameResult::loss_for(
                side,
                format!("{} moved when not allowed to", side),
            ));
        }

        self.state.pending_moves[side] = Some(text);

        if self.state.pending_moves.is_complete(&self.state.to_move) {
            self.advance_turn()?;
        }
        Ok(())
    }

    fn reject_move(&mut self, connection: ConnectionId, reason: &str) -> Result<(), RefereeError> {
        debug!(%connection, reason, "Move rejected");
        Ok(self.session_mut(connection)?.send_invalid_and_disconnect(reason)?)
    }

    fn advance_turn(&mut self) -> Result<(), RefereeError> {
        let game = self
            .game
            .as_mut()
            .ok_or_else(|| RefereeError::Invariant("turn completed without a game".to_string()))?;

        match game.apply_moves(&self.state.pending_moves) {
            TurnOutcome::Finished(result) => self.end_match(result),
            TurnOutcome::Continue(to_move) => {
                self.state.turn_number += 1;
                self.state.to_move = to_move;
                let last_moves = std::mem::take(&mut self.state.pending_moves);

                info!(elapsed_ms = self.elapsed_ms(), "Turn {}", self.state.turn_number);

                for id in self.fair_order() {
                    if let Some(session) = self.sessions.get_mut(&id) {
                        session.send_next_turn(&last_moves)?;
                    }
                }

                self.arm_deadline();
                Ok(())
            }
        }
    }

    fn arm_deadline(&self) {
        let turn = self.state.turn_number;
        let move_time = self.config.move_time;
        let events = self.events.clone();

        tokio::spawn(async move {
            tokio::time::sleep(move_time).await;
            // Receiver gone means the server loop has exited
            let _ = events.send(ServerEvent::Deadline { turn });
        });
    }

    /// Handle an elapsed turn deadline.
    pub fn on_deadline(&mut self, turn: u32) -> Result<(), RefereeError> {
        if self.state.phase != MatchPhase::InProgress || turn != self.state.turn_number {
            debug!(turn, current = self.state.turn_number, "Ignoring stale deadline");
            return Ok(());
        }

        let missing = self.state.pending_moves.missing(&self.state.to_move);
        let result = match missing.as_slice() {
            [side] => GameResult::loss_for(*side, format!("{} exceeded move time limit", side)),
            [_, _] => GameResult::new(Outcome::Draw, BOTH_EXCEEDED_MOVE_TIME),
            _ => {
                return Err(RefereeError::Invariant(format!(
                    "deadline for turn {} fired but no side was disqualified",
                    turn
                )))
            }
        };

        self.end_match(result)
    }

    // =========================================================================
    // PENALTIES
    // =========================================================================

    fn on_invalid_message(&mut self, connection: ConnectionId, reason: &str) -> Result<(), RefereeError> {
        if self.is_ended() {
            return Ok(());
        }

        match self.state.side_of(connection) {
            Some(side) => {
                warn!(%connection, reason, "{} sent an invalid message", side);
                self.end_match(GameResult::loss_for(
                    side,
                    format!("{} sent an invalid message", side),
                ))
            }
            None => Ok(()),
        }
    }

    fn on_disconnect(&mut self, connection: ConnectionId) -> Result<(), RefereeError> {
        if self.is_ended() {
            return Ok(());
        }
        let Some(session) = self.sessions.get(&connection) else {
            return Ok(());
        };

        let role = session.role();
        if session.is_authenticated() {
            if let Some(username) = session.username() {
                self.logged_in.remove(username);
            }
            if let Some(role) = role {
                info!(%connection, "{} disconnected", role);
            }
        }

        match role {
            Some(Role::Player(side)) if self.state.players[side] == Some(connection) => {
                if self.state.phase == MatchPhase::InProgress {
                    return self.end_match(GameResult::loss_for(side, format!("{} disconnected", side)));
                }
            }
            Some(Role::Spectator) => {
                self.state.spectators.retain(|&id| id != connection);
                self.sessions.remove(&connection);
            }
            _ => {
                self.sessions.remove(&connection);
            }
        }
        Ok(())
    }

    // =========================================================================
    // TERMINATION
    // =========================================================================

    /// End the match. Only the first call has any effect.
    fn end_match(&mut self, result: GameResult) -> Result<(), RefereeError> {
        if self.is_ended() {
            return Ok(());
        }
        self.state.phase = MatchPhase::Ended;
        info!(elapsed_ms = self.elapsed_ms(), "Result {}", result);
        self.state.result = Some(result.clone());

        let last_moves = self.state.pending_moves.clone();
        for id in self.fair_order() {
            if let Some(session) = self.sessions.get_mut(&id) {
                session.send_game_end_and_disconnect(&result, &last_moves)?;
            }
        }
        for session in self.sessions.values_mut() {
            session.disconnect();
        }
        Ok(())
    }

    /// Broadcast order: players in a random order, then spectators by join order.
    fn fair_order(&mut self) -> Vec<ConnectionId> {
        let sides = if self.rng.gen::<bool>() {
            [Side::P1, Side::P2]
        } else {
            [Side::P2, Side::P1]
        };

        sides
            .into_iter()
            .filter_map(|side| self.state.players[side])
            .chain(self.state.spectators.iter().copied())
            .collect()
    }

    fn session_mut(&mut self, connection: ConnectionId) -> Result<&mut ClientSession, RefereeError> {
        self.sessions
            .get_mut(&connection)
            .ok_or_else(|| RefereeError::Invariant(format!("no session for connection {}", connection)))
    }

    fn elapsed_ms(&self) -> u128 {
        self.started_at.map_or(0, |t| t.elapsed().as_millis())
    }
}
