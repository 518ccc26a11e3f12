//! TCP Game Server
//!
//! Accepts connections, runs one I/O task per connection, and feeds every
//! inbound frame, close and deadline into a single control loop that owns
//! the [`Referee`]. The loop exits when the match ends.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::game::contract::{GameConstructor, GameError};
use crate::game::outcome::GameResult;
use crate::network::frame::{FrameCodec, FrameError};
use crate::network::referee::{Referee, RefereeConfig, RefereeError, ServerEvent};
use crate::network::session::{is_valid_username, ConnectionId, Outbound};
use crate::{DEFAULT_MOVE_TIME_MS, DEFAULT_PORT};

/// How long shutdown waits for connections to flush their last frames.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// First pause after a failed accept; doubles per consecutive failure.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);

/// Longest pause between accept attempts.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// How long a closing connection keeps draining input so its final frames
/// are not lost to a reset.
const CLOSE_LINGER: Duration = Duration::from_secs(1);

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Registered name of the game being played.
    pub game: String,
    /// Username that plays P1.
    pub p1_username: String,
    /// Username that plays P2.
    pub p2_username: String,
    /// Time each side has to submit a move.
    pub move_time: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            game: "tictactoe".to_string(),
            p1_username: "P1".to_string(),
            p2_username: "P2".to_string(),
            move_time: Duration::from_millis(DEFAULT_MOVE_TIME_MS),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Move time of zero.
    #[error("Move time must be at least 1 ms")]
    ZeroMoveTime,

    /// Configured username would fail the login rules.
    #[error("Invalid username: {0:?}")]
    InvalidUsername(String),

    /// Both sides configured with the same username.
    #[error("P1 and P2 must have different usernames, both are {0:?}")]
    SameUsername(String),
}

impl ServerConfig {
    /// Check the configuration before binding.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.move_time.is_zero() {
            return Err(ConfigError::ZeroMoveTime);
        }
        for username in [&self.p1_username, &self.p2_username] {
            if !is_valid_username(username) {
                return Err(ConfigError::InvalidUsername(username.clone()));
            }
        }
        if self.p1_username == self.p2_username {
            return Err(ConfigError::SameUsername(self.p1_username.clone()));
        }
        Ok(())
    }

    fn referee_config(&self) -> RefereeConfig {
        RefereeConfig {
            p1_username: self.p1_username.clone(),
            p2_username: self.p2_username.clone(),
            move_time: self.move_time,
        }
    }
}

/// Server errors.
#[derive(Debug, Error)]
pub enum GameServerError {
    /// Another process holds the address.
    #[error("Port already in use")]
    PortInUse(#[source] io::Error),

    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[source] io::Error),

    /// Rejected configuration.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Game could not be set up.
    #[error("Game error: {0}")]
    Game(#[from] GameError),

    /// Fatal error while refereeing.
    #[error(transparent)]
    Referee(#[from] RefereeError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// SERVER
// =============================================================================

/// A bound server for a single match.
pub struct GameServer {
    config: ServerConfig,
    listener: TcpListener,
    referee: Referee,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl GameServer {
    /// Validate the configuration and bind the listener.
    pub async fn bind(config: ServerConfig, new_game: GameConstructor) -> Result<Self, GameServerError> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_addr).await.map_err(|e| {
            if e.kind() == io::ErrorKind::AddrInUse {
                GameServerError::PortInUse(e)
            } else {
                GameServerError::BindFailed(e)
            }
        })?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let referee = Referee::new(config.referee_config(), new_game, events_tx.clone());

        Ok(Self {
            config,
            listener,
            referee,
            events_tx,
            events_rx,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Referee the match to completion and return its result.
    #[instrument(skip(self), fields(game = %self.config.game))]
    pub async fn run(self) -> Result<GameResult, GameServerError> {
        let Self {
            config,
            listener,
            mut referee,
            events_tx,
            mut events_rx,
        } = self;

        info!(
            "Game server listening on {} (P1: {}, P2: {}, move time: {} ms)",
            listener.local_addr().map_err(GameServerError::BindFailed)?,
            config.p1_username,
            config.p2_username,
            config.move_time.as_millis()
        );

        let mut connections = JoinSet::new();
        let mut accept_failures = 0u32;

        while !referee.is_ended() {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        accept_failures = 0;
                        let id = Uuid::new_v4();
                        info!(connection = %id, "New connection from {}", addr);

                        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                        referee.connect(id, outbound_tx);
                        connections.spawn(run_connection(id, stream, outbound_rx, events_tx.clone()));
                    }
                    Err(e) => {
                        accept_failures = accept_failures.saturating_add(1);
                        let pause = accept_backoff(accept_failures);
                        error!(failures = accept_failures, "Accept error: {}, retrying in {:?}", e, pause);
                        tokio::time::sleep(pause).await;
                    }
                },
                Some(event) = events_rx.recv() => {
                    referee.handle_event(event)?;
                }
            }
        }

        // No new connections; every session was closed when the match ended
        drop(listener);
        info!("Match over, waiting for {} connection(s) to close", connections.len());

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = connections.len(), "Connections still open after grace period");
            connections.abort_all();
        }

        referee
            .result()
            .cloned()
            .ok_or_else(|| GameServerError::Internal("match ended without a result".to_string()))
    }
}

// =============================================================================
// CONNECTION TASK
// =============================================================================

/// Pump one connection: decoded frames go to the control loop, queued
/// [`Outbound`] instructions go to the socket.
async fn run_connection(
    id: ConnectionId,
    stream: TcpStream,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut frames = FramedRead::new(reader, FrameCodec::new());
    let mut reading = true;

    // Receiver gone means the control loop has exited; nothing left to tell
    let notify = |event: ServerEvent| {
        let _ = events.send(event);
    };

    loop {
        tokio::select! {
            frame = frames.next(), if reading => match frame {
                Some(Ok(body)) => notify(ServerEvent::Frame { connection: id, body }),
                Some(Err(FrameError::Io(e))) => {
                    debug!(connection = %id, error = %e, "Read failed");
                    notify(ServerEvent::Closed { connection: id });
                    return;
                }
                Some(Err(error)) => {
                    // Stream position is lost; keep writing so the INVALID goes out
                    reading = false;
                    notify(ServerEvent::FrameError { connection: id, error });
                }
                None => {
                    debug!(connection = %id, "Peer closed connection");
                    notify(ServerEvent::Closed { connection: id });
                    return;
                }
            },
            instruction = outbound.recv() => match instruction {
                Some(Outbound::Frame(bytes)) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        if is_peer_gone(&e) {
                            debug!(connection = %id, error = %e, "Peer gone during write");
                            notify(ServerEvent::Closed { connection: id });
                        } else {
                            notify(ServerEvent::WriteFailed { connection: id, error: e });
                        }
                        return;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = writer.shutdown().await;
                    notify(ServerEvent::Closed { connection: id });
                    linger(frames.into_inner()).await;
                    return;
                }
            },
        }
    }
}

/// Discard input until the peer closes, so unread bytes do not turn our
/// close into a reset that destroys frames still in flight.
async fn linger(mut reader: OwnedReadHalf) {
    let mut scratch = [0u8; 512];
    let _ = tokio::time::timeout(CLOSE_LINGER, async {
        while let Ok(n) = reader.read(&mut scratch).await {
            if n == 0 {
                break;
            }
        }
    })
    .await;
}

/// Pause before the next accept after `failures` consecutive errors.
fn accept_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1 << exponent)
        .min(ACCEPT_BACKOFF_MAX)
}

fn is_peer_gone(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}
