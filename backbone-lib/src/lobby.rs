//! The star-topology lobby state machine — host admission, approval, kick,
//! presence, and the authority/freshness/rate-limit checks every inbound
//! message is subject to.
//!
//! Like a game backend's command drain, [`HostLobby`] and [`GuestLobby`]
//! never touch a transport directly; they only ever *return*
//! [`LobbyCommand`]s describing what the caller (the session orchestrator)
//! should do with one. That keeps the whole admission and authority state
//! machine testable with nothing but plain values.

use crate::error::ProtocolViolation;
use crate::rate_limit::RateLimiter;
use crate::timer::Timer;
use protocol::{
    JoinRejectReason, JoinRequestPayload, LobbySettings, Message, Player, SessionToken,
};
use protocol::{Envelope, PeerId};

const RECONNECT_WINDOW_SECONDS: f32 = 5.0;
const PRE_CLOSE_GRACE_SECONDS: f32 = 0.5;
const FRESHNESS_CEILING_MS: i64 = 30_000;

/// Logs and wraps a protocol violation. Every violation is dropped after
/// this point; nothing here ever escalates to tearing the connection down.
fn warn_violation(violation: ProtocolViolation) -> LobbyEvent {
    tracing::warn!(%violation, "dropping message");
    LobbyEvent::Violation(violation)
}

/// Opaque handle for one physical transport connection, distinct from the
/// logical id it may or may not yet be bound to. Owned by the orchestrator;
/// the lobby manager only ever compares and stores these.
pub type ConnectionId = u64;

/// An action the caller must perform against a transport or timer.
#[derive(Debug, Clone)]
pub enum LobbyCommand {
    SendTo {
        connection: ConnectionId,
        envelope: Envelope,
    },
    Broadcast {
        envelope: Envelope,
        except: Option<ConnectionId>,
    },
    /// Close `connection` after [`PRE_CLOSE_GRACE_SECONDS`] so a terminal
    /// reply is not raced by the socket teardown.
    CloseAfterGrace { connection: ConnectionId },
    TearDown { reason: String },
}

/// An observable change the UI collaborator (or tests) can react to.
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyEvent {
    PlayerJoined(Player),
    PlayerLeft(PeerId),
    PlayerReady { logical_id: PeerId, is_ready: bool },
    PlayerKicked(PeerId),
    PendingRequest { logical_id: PeerId, display_name: String },
    PendingDenied(PeerId),
    SettingsChanged(LobbySettings),
    GameSelected(String),
    GameStarted,
    /// A `game-message` that passed every authority/structural/freshness/
    /// rate-limit check. The orchestrator routes this into the consensus
    /// engine; the lobby layer never interprets it.
    GameMessage {
        sender: PeerId,
        payload: protocol::GameMessagePayload,
    },
    Violation(ProtocolViolation),
    TornDown(String),
}

type Outcome = (Vec<LobbyCommand>, Vec<LobbyEvent>);

fn outcome() -> Outcome {
    (Vec::new(), Vec::new())
}

struct PendingJoinRequest {
    logical_id: PeerId,
    display_name: String,
    connection: ConnectionId,
}

/// Host-side lobby state: the full roster, settings, and admission
/// bookkeeping the host alone keeps.
pub struct HostLobby {
    pub code: String,
    pub selected_game_id: Option<String>,
    pub settings: LobbySettings,
    pub players: Vec<Player>,
    pub is_game_started: bool,
    max_players: usize,
    pending_requests: Vec<PendingJoinRequest>,
    session_tokens: std::collections::HashMap<PeerId, SessionToken>,
    connection_of: std::collections::HashMap<PeerId, ConnectionId>,
    logical_of: std::collections::HashMap<ConnectionId, PeerId>,
    reconnect_timers: Timer<PeerId>,
    rate_limiter: RateLimiter,
}

impl HostLobby {
    pub fn new(code: String, host_id: PeerId, host_display_name: String, max_players: usize) -> Self {
        HostLobby {
            code,
            selected_game_id: None,
            settings: LobbySettings::default(),
            players: vec![Player {
                logical_id: host_id,
                display_name: host_display_name,
                is_host: true,
                is_ready: false,
                is_connected: true,
            }],
            is_game_started: false,
            max_players,
            pending_requests: Vec::new(),
            session_tokens: std::collections::HashMap::new(),
            connection_of: std::collections::HashMap::new(),
            logical_of: std::collections::HashMap::new(),
            reconnect_timers: Timer::new(),
            rate_limiter: RateLimiter::new(),
        }
    }

    fn player_mut(&mut self, logical_id: &PeerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| &p.logical_id == logical_id)
    }

    fn has_player(&self, logical_id: &PeerId) -> bool {
        self.players.iter().any(|p| &p.logical_id == logical_id)
    }

    fn gen_token(&self) -> SessionToken {
        use rand::Rng;
        let mut rng = rand::rng();
        (0..32)
            .map(|_| {
                let n: u8 = rng.random_range(0..62);
                match n {
                    0..=25 => (b'a' + n) as char,
                    26..=51 => (b'A' + n - 26) as char,
                    _ => (b'0' + n - 52) as char,
                }
            })
            .collect()
    }

    /// Full view of lobby state carried in a `join-accepted` payload.
    fn join_accepted_for(&self, token: SessionToken) -> Message {
        Message::JoinAccepted(protocol::JoinAcceptedPayload {
            players: self.players.clone(),
            selected_game_id: self.selected_game_id.clone(),
            settings: self.settings.clone(),
            is_game_started: Some(self.is_game_started),
            session_token: Some(token),
        })
    }

    /// Entry point for every message arriving on a host-side connection.
    /// Applies the authority table, then structural/sender/freshness/rate
    /// checks, before dispatch.
    pub fn handle_message(
        &mut self,
        connection: ConnectionId,
        envelope: Envelope,
        now_ms: u64,
    ) -> Outcome {
        let claimed_sender = envelope.sender_id.clone();

        if !self.rate_limiter.check(&claimed_sender, envelope.timestamp) {
            return (Vec::new(), vec![warn_violation(ProtocolViolation::RateLimited {
                sender: claimed_sender,
            })]);
        }

        let skew = now_ms as i64 - envelope.timestamp as i64;
        if skew.abs() > FRESHNESS_CEILING_MS {
            return (Vec::new(), vec![warn_violation(ProtocolViolation::StaleTimestamp {
                sender: claimed_sender,
                skew_ms: skew,
            })]);
        }

        if matches!(envelope.message, Message::JoinRequest(_)) {
            return self.handle_join_request(connection, claimed_sender, envelope);
        }

        // Ping/pong is accepted unconditionally, even from a connection not
        // yet bound to a logical id (e.g. a still-pending join request).
        if matches!(envelope.message, Message::Ping | Message::Pong) {
            return outcome();
        }

        // Every other message requires the connection to already be bound
        // to the logical id it claims to speak for.
        let bound_id = self.logical_of.get(&connection).cloned();
        match bound_id {
            Some(id) if id == claimed_sender => {}
            Some(id) => {
                return (
                    Vec::new(),
                    vec![warn_violation(ProtocolViolation::SenderMismatch {
                        claimed: claimed_sender,
                        actual: id,
                    })],
                );
            }
            None => {
                return (
                    Vec::new(),
                    vec![warn_violation(ProtocolViolation::Unauthorized {
                        sender: claimed_sender,
                    })],
                );
            }
        }

        match envelope.message {
            Message::PlayerReady(payload) if payload.logical_id == claimed_sender => {
                if let Some(p) = self.player_mut(&claimed_sender) {
                    p.is_ready = payload.is_ready;
                }
                let ev = LobbyEvent::PlayerReady {
                    logical_id: claimed_sender.clone(),
                    is_ready: payload.is_ready,
                };
                let broadcast = LobbyCommand::Broadcast {
                    envelope: Envelope::new(
                        Message::PlayerReady(protocol::PlayerReadyPayload {
                            logical_id: claimed_sender,
                            is_ready: payload.is_ready,
                        }),
                        self.host_id(),
                        now_ms,
                    ),
                    except: None,
                };
                (vec![broadcast], vec![ev])
            }
            Message::GameMessage(payload) => (
                Vec::new(),
                vec![LobbyEvent::GameMessage {
                    sender: claimed_sender,
                    payload,
                }],
            ),
            Message::PlayerLeft(payload) if payload.logical_id == claimed_sender => {
                self.remove_player(&claimed_sender, connection)
            }
            _ => (
                Vec::new(),
                vec![warn_violation(ProtocolViolation::Unauthorized {
                    sender: claimed_sender,
                })],
            ),
        }
    }

    fn host_id(&self) -> PeerId {
        self.players
            .iter()
            .find(|p| p.is_host)
            .map(|p| p.logical_id.clone())
            .expect("host is always players[0]")
    }

    fn handle_join_request(
        &mut self,
        connection: ConnectionId,
        claimed_sender: PeerId,
        envelope: Envelope,
    ) -> Outcome {
        let Message::JoinRequest(JoinRequestPayload {
            display_name,
            logical_id,
            session_token,
        }) = envelope.message
        else {
            unreachable!()
        };
        if logical_id != claimed_sender {
            return (
                Vec::new(),
                vec![warn_violation(ProtocolViolation::SenderMismatch {
                    claimed: claimed_sender,
                    actual: logical_id,
                })],
            );
        }

        if self.has_player(&logical_id) {
            return self.handle_reconnect(connection, logical_id, session_token);
        }

        if self.is_game_started {
            return self.reject(connection, JoinRejectReason::InGame);
        }
        if self.players.len() >= self.max_players {
            return self.reject(connection, JoinRejectReason::CapacityReached);
        }
        if self.settings.requires_request {
            self.pending_requests.push(PendingJoinRequest {
                logical_id: logical_id.clone(),
                display_name: display_name.clone(),
                connection,
            });
            let cmd = LobbyCommand::SendTo {
                connection,
                envelope: Envelope::new(Message::JoinPending, self.host_id(), envelope.timestamp),
            };
            let ev = LobbyEvent::PendingRequest {
                logical_id,
                display_name,
            };
            return (vec![cmd], vec![ev]);
        }

        self.admit(connection, logical_id, display_name, envelope.timestamp)
    }

    fn admit(
        &mut self,
        connection: ConnectionId,
        logical_id: PeerId,
        display_name: String,
        now_ms: u64,
    ) -> Outcome {
        let token = self.gen_token();
        self.session_tokens.insert(logical_id.clone(), token.clone());
        self.connection_of.insert(logical_id.clone(), connection);
        self.logical_of.insert(connection, logical_id.clone());
        let player = Player {
            logical_id: logical_id.clone(),
            display_name,
            is_host: false,
            is_ready: false,
            is_connected: true,
        };
        self.players.push(player.clone());

        let accept = LobbyCommand::SendTo {
            connection,
            envelope: Envelope::new(self.join_accepted_for(token), self.host_id(), now_ms),
        };
        let announce = LobbyCommand::Broadcast {
            envelope: Envelope::new(
                Message::PlayerJoined(protocol::PlayerJoinedPayload {
                    player: player.clone(),
                }),
                self.host_id(),
                now_ms,
            ),
            except: Some(connection),
        };
        (vec![accept, announce], vec![LobbyEvent::PlayerJoined(player)])
    }

    fn reject(&mut self, connection: ConnectionId, reason: JoinRejectReason) -> Outcome {
        let cmd = LobbyCommand::SendTo {
            connection,
            envelope: Envelope::new(
                Message::JoinRejected(protocol::JoinRejectedPayload { reason }),
                self.host_id(),
                0,
            ),
        };
        let close = LobbyCommand::CloseAfterGrace { connection };
        (vec![cmd, close], Vec::new())
    }

    fn handle_reconnect(
        &mut self,
        connection: ConnectionId,
        logical_id: PeerId,
        session_token: Option<SessionToken>,
    ) -> Outcome {
        let expected = self.session_tokens.get(&logical_id).cloned();
        if expected.is_some() && expected != session_token {
            return self.reject(connection, JoinRejectReason::Denied);
        }

        self.reconnect_timers.cancel_timer(&logical_id);
        if let Some(old_connection) = self.connection_of.get(&logical_id) {
            self.logical_of.remove(old_connection);
        }
        self.connection_of.insert(logical_id.clone(), connection);
        self.logical_of.insert(connection, logical_id.clone());
        if let Some(p) = self.player_mut(&logical_id) {
            p.is_connected = true;
        }

        let token = expected.unwrap_or_default();
        let accept = LobbyCommand::SendTo {
            connection,
            envelope: Envelope::new(self.join_accepted_for(token), self.host_id(), 0),
        };
        let player = self
            .players
            .iter()
            .find(|p| p.logical_id == logical_id)
            .cloned()
            .expect("just confirmed present");
        let announce = LobbyCommand::Broadcast {
            envelope: Envelope::new(
                Message::PlayerJoined(protocol::PlayerJoinedPayload { player: player.clone() }),
                self.host_id(),
                0,
            ),
            except: Some(connection),
        };
        (vec![accept, announce], vec![LobbyEvent::PlayerJoined(player)])
    }

    /// Host user action: admit a pending join request.
    pub fn approve(&mut self, logical_id: &PeerId, now_ms: u64) -> Outcome {
        let Some(pos) = self.pending_requests.iter().position(|r| &r.logical_id == logical_id) else {
            return outcome();
        };
        if self.players.len() >= self.max_players {
            let request = self.pending_requests.remove(pos);
            return self.reject(request.connection, JoinRejectReason::CapacityReached);
        }
        let request = self.pending_requests.remove(pos);
        let (mut commands, mut events) =
            self.admit(request.connection, request.logical_id, request.display_name, now_ms);

        if self.players.len() >= self.max_players && !self.pending_requests.is_empty() {
            let overflow = std::mem::take(&mut self.pending_requests);
            for request in overflow {
                let (more_commands, _) = self.reject(request.connection, JoinRejectReason::CapacityReached);
                commands.extend(more_commands);
                events.push(LobbyEvent::PendingDenied(request.logical_id));
            }
        }
        (commands, events)
    }

    /// Host user action: deny a pending join request.
    pub fn deny(&mut self, logical_id: &PeerId) -> Outcome {
        let Some(pos) = self.pending_requests.iter().position(|r| &r.logical_id == logical_id) else {
            return outcome();
        };
        let request = self.pending_requests.remove(pos);
        let cmd = LobbyCommand::SendTo {
            connection: request.connection,
            envelope: Envelope::new(Message::JoinDenied, self.host_id(), 0),
        };
        let close = LobbyCommand::CloseAfterGrace {
            connection: request.connection,
        };
        (vec![cmd, close], vec![LobbyEvent::PendingDenied(request.logical_id)])
    }

    /// Host user action: forcibly remove an admitted player.
    pub fn kick(&mut self, logical_id: &PeerId, now_ms: u64) -> Outcome {
        let Some(connection) = self.connection_of.get(logical_id).copied() else {
            return outcome();
        };
        self.players.retain(|p| &p.logical_id != logical_id);
        self.connection_of.remove(logical_id);
        self.logical_of.remove(&connection);
        self.reconnect_timers.cancel_timer(logical_id);

        let to_victim = LobbyCommand::SendTo {
            connection,
            envelope: Envelope::new(
                Message::PlayerKicked(protocol::PlayerKickedPayload {
                    logical_id: logical_id.clone(),
                }),
                self.host_id(),
                now_ms,
            ),
        };
        let broadcast = LobbyCommand::Broadcast {
            envelope: Envelope::new(
                Message::PlayerKicked(protocol::PlayerKickedPayload {
                    logical_id: logical_id.clone(),
                }),
                self.host_id(),
                now_ms,
            ),
            except: Some(connection),
        };
        let close = LobbyCommand::CloseAfterGrace { connection };
        (
            vec![to_victim, broadcast, close],
            vec![LobbyEvent::PlayerKicked(logical_id.clone())],
        )
    }

    /// A departing player's own `player-left`: unlike disconnect/timeout,
    /// this is a deliberate, clean exit, so it removes the player and closes
    /// the connection immediately instead of starting a reconnect timer.
    fn remove_player(&mut self, logical_id: &PeerId, connection: ConnectionId) -> Outcome {
        self.players.retain(|p| &p.logical_id != logical_id);
        self.connection_of.remove(logical_id);
        self.logical_of.remove(&connection);
        self.reconnect_timers.cancel_timer(logical_id);

        let broadcast = LobbyCommand::Broadcast {
            envelope: Envelope::new(
                Message::PlayerLeft(protocol::PlayerLeftPayload {
                    logical_id: logical_id.clone(),
                }),
                self.host_id(),
                0,
            ),
            except: Some(connection),
        };
        let close = LobbyCommand::CloseAfterGrace { connection };
        (
            vec![broadcast, close],
            vec![LobbyEvent::PlayerLeft(logical_id.clone())],
        )
    }

    /// A guest connection's transport reported close.
    pub fn on_connection_closed(&mut self, connection: ConnectionId) -> Outcome {
        let Some(logical_id) = self.logical_of.get(&connection).cloned() else {
            // Either a stale close for an id that has since moved to a new
            // connection, or a still-pending request's socket — either way,
            // drop it without mutating player presence.
            if let Some(pos) = self.pending_requests.iter().position(|r| r.connection == connection) {
                self.pending_requests.remove(pos);
            }
            return outcome();
        };
        if self.connection_of.get(&logical_id) != Some(&connection) {
            return outcome();
        }

        self.logical_of.remove(&connection);
        if let Some(p) = self.player_mut(&logical_id) {
            p.is_connected = false;
        }
        self.reconnect_timers
            .start_timer(logical_id.clone(), RECONNECT_WINDOW_SECONDS);

        let player = self
            .players
            .iter()
            .find(|p| p.logical_id == logical_id)
            .cloned()
            .expect("mutated above");
        let broadcast = LobbyCommand::Broadcast {
            envelope: Envelope::new(
                Message::PlayerJoined(protocol::PlayerJoinedPayload { player: player.clone() }),
                self.host_id(),
                0,
            ),
            except: None,
        };
        (vec![broadcast], vec![LobbyEvent::PlayerJoined(player)])
    }

    /// Advances reconnection timers; call once per tick with the elapsed
    /// seconds since the previous call.
    pub fn update(&mut self, delta_seconds: f32) -> Outcome {
        let expired = self.reconnect_timers.update_and_get_list(delta_seconds);
        let mut commands = Vec::new();
        let mut events = Vec::new();
        for logical_id in expired {
            let still_disconnected = self
                .players
                .iter()
                .find(|p| p.logical_id == logical_id)
                .map(|p| !p.is_connected)
                .unwrap_or(false);
            if !still_disconnected {
                continue;
            }

            let connected_count = self.players.iter().filter(|p| p.is_connected).count();
            if self.is_game_started && connected_count <= 1 {
                commands.push(LobbyCommand::TearDown {
                    reason: "not enough players".to_string(),
                });
                events.push(LobbyEvent::TornDown("not enough players".to_string()));
                continue;
            }

            self.players.retain(|p| p.logical_id != logical_id);
            self.connection_of.remove(&logical_id);
            commands.push(LobbyCommand::Broadcast {
                envelope: Envelope::new(
                    Message::PlayerLeft(protocol::PlayerLeftPayload {
                        logical_id: logical_id.clone(),
                    }),
                    self.host_id(),
                    0,
                ),
                except: None,
            });
            events.push(LobbyEvent::PlayerLeft(logical_id));
        }
        (commands, events)
    }

    /// Host user action: the host itself leaves. Terminal; no failover.
    pub fn depart(&mut self) -> Outcome {
        self.is_game_started = false;
        let broadcast = LobbyCommand::Broadcast {
            envelope: Envelope::new(Message::HostLeft, self.host_id(), 0),
            except: None,
        };
        (
            vec![broadcast, LobbyCommand::TearDown { reason: "host left".to_string() }],
            vec![LobbyEvent::TornDown("host left".to_string())],
        )
    }

    pub fn start_game(&mut self, game_id: String, now_ms: u64) -> Outcome {
        self.selected_game_id = Some(game_id.clone());
        self.is_game_started = true;
        let broadcast = LobbyCommand::Broadcast {
            envelope: Envelope::new(
                Message::GameStart(protocol::GameStartPayload {
                    game_id,
                    players: self.players.clone(),
                }),
                self.host_id(),
                now_ms,
            ),
            except: None,
        };
        (vec![broadcast], vec![LobbyEvent::GameStarted])
    }
}

/// Which stage of the join handshake a guest is in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinStatus {
    Connecting,
    Pending,
    Accepted,
    Rejected(JoinRejectReason),
}

/// Guest-side lobby state: the mirror image of [`HostLobby`], trusting only
/// messages that arrive on the single host connection.
pub struct GuestLobby {
    pub code: String,
    pub selected_game_id: Option<String>,
    pub settings: LobbySettings,
    pub players: Vec<Player>,
    pub is_game_started: bool,
    pub my_logical_id: PeerId,
    pub my_session_token: Option<SessionToken>,
    pub join_status: JoinStatus,
    pub error: Option<String>,
}

impl GuestLobby {
    pub fn new(code: String, my_logical_id: PeerId, prior_token: Option<SessionToken>) -> Self {
        GuestLobby {
            code,
            selected_game_id: None,
            settings: LobbySettings::default(),
            players: Vec::new(),
            is_game_started: false,
            my_logical_id,
            my_session_token: prior_token,
            join_status: JoinStatus::Connecting,
            error: None,
        }
    }

    pub fn join_request(&self, display_name: String, now_ms: u64) -> Envelope {
        Envelope::new(
            Message::JoinRequest(JoinRequestPayload {
                display_name,
                logical_id: self.my_logical_id.clone(),
                session_token: self.my_session_token.clone(),
            }),
            self.my_logical_id.clone(),
            now_ms,
        )
    }

    /// Entry point for every message arriving from the host connection.
    pub fn handle_message(&mut self, envelope: Envelope, now_ms: u64) -> Outcome {
        let skew = now_ms as i64 - envelope.timestamp as i64;
        if skew.abs() > FRESHNESS_CEILING_MS {
            return (Vec::new(), vec![warn_violation(ProtocolViolation::StaleTimestamp {
                sender: envelope.sender_id,
                skew_ms: skew,
            })]);
        }

        match envelope.message {
            Message::JoinAccepted(payload) => {
                self.players = payload.players;
                self.selected_game_id = payload.selected_game_id;
                self.settings = payload.settings;
                self.is_game_started = payload.is_game_started.unwrap_or(false);
                if let Some(token) = payload.session_token {
                    self.my_session_token = Some(token);
                }
                self.join_status = JoinStatus::Accepted;
                outcome()
            }
            Message::JoinRejected(payload) => {
                self.join_status = JoinStatus::Rejected(payload.reason);
                outcome()
            }
            Message::JoinPending => {
                self.join_status = JoinStatus::Pending;
                outcome()
            }
            Message::JoinDenied => {
                self.join_status = JoinStatus::Rejected(JoinRejectReason::Denied);
                outcome()
            }
            Message::PlayerJoined(payload) => {
                if let Some(existing) = self
                    .players
                    .iter_mut()
                    .find(|p| p.logical_id == payload.player.logical_id)
                {
                    *existing = payload.player.clone();
                } else {
                    self.players.push(payload.player.clone());
                }
                (Vec::new(), vec![LobbyEvent::PlayerJoined(payload.player)])
            }
            Message::PlayerLeft(payload) => {
                self.players.retain(|p| p.logical_id != payload.logical_id);
                (Vec::new(), vec![LobbyEvent::PlayerLeft(payload.logical_id)])
            }
            Message::PlayerReady(payload) => {
                if let Some(p) = self.players.iter_mut().find(|p| p.logical_id == payload.logical_id) {
                    p.is_ready = payload.is_ready;
                }
                (
                    Vec::new(),
                    vec![LobbyEvent::PlayerReady {
                        logical_id: payload.logical_id,
                        is_ready: payload.is_ready,
                    }],
                )
            }
            Message::PlayerKicked(payload) => {
                self.players.retain(|p| p.logical_id != payload.logical_id);
                if payload.logical_id == self.my_logical_id {
                    self.error = Some("kicked".to_string());
                }
                (Vec::new(), vec![LobbyEvent::PlayerKicked(payload.logical_id)])
            }
            Message::HostLeft => {
                if self.error.is_none() {
                    self.error = Some("host disconnected".to_string());
                }
                (
                    Vec::new(),
                    vec![LobbyEvent::TornDown(
                        self.error.clone().unwrap_or_default(),
                    )],
                )
            }
            Message::LobbySettings(payload) => {
                self.settings = payload.settings.clone();
                (Vec::new(), vec![LobbyEvent::SettingsChanged(payload.settings)])
            }
            Message::GameSelected(payload) => {
                self.selected_game_id = Some(payload.game_id.clone());
                (Vec::new(), vec![LobbyEvent::GameSelected(payload.game_id)])
            }
            Message::GameStart(payload) => {
                self.is_game_started = true;
                self.players = payload.players;
                (Vec::new(), vec![LobbyEvent::GameStarted])
            }
            Message::GameMessage(payload) => (
                Vec::new(),
                vec![LobbyEvent::GameMessage {
                    sender: payload.sender_id.clone().unwrap_or(envelope.sender_id),
                    payload,
                }],
            ),
            Message::Ping | Message::Pong => outcome(),
            Message::JoinRequest(_) | Message::JoinApproved => outcome(),
        }
    }

    /// Guest user action: depart deliberately rather than drop the
    /// connection. Sets the terminal state locally first, so the transport
    /// close that follows sending this is reported as a clean exit rather
    /// than "host disconnected" by [`Self::on_host_connection_closed`].
    pub fn leave(&mut self, now_ms: u64) -> Envelope {
        self.error = Some("left-intentionally".to_string());
        Envelope::new(
            Message::PlayerLeft(protocol::PlayerLeftPayload {
                logical_id: self.my_logical_id.clone(),
            }),
            self.my_logical_id.clone(),
            now_ms,
        )
    }

    /// The host connection closed without an explicit terminal message
    /// already having been recorded.
    pub fn on_host_connection_closed(&mut self) -> Outcome {
        if self.error.is_some() {
            return (Vec::new(), vec![LobbyEvent::TornDown(self.error.clone().unwrap())]);
        }
        self.error = Some("host disconnected".to_string());
        (
            Vec::new(),
            vec![LobbyEvent::TornDown("host disconnected".to_string())],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(display_name: &str, logical_id: &str, token: Option<&str>, ts: u64) -> Envelope {
        Envelope::new(
            Message::JoinRequest(JoinRequestPayload {
                display_name: display_name.to_string(),
                logical_id: logical_id.to_string(),
                session_token: token.map(|t| t.to_string()),
            }),
            logical_id.to_string(),
            ts,
        )
    }

    #[test]
    fn happy_path_admission() {
        let mut host = HostLobby::new("A1B2C3".into(), "h1".into(), "H".into(), 4);
        let (commands, events) = host.handle_message(1, req("G", "g1", None, 1000), 1000);

        assert_eq!(host.players.len(), 2);
        assert!(host.players.iter().any(|p| p.logical_id == "g1"));
        assert!(matches!(events[0], LobbyEvent::PlayerJoined(_)));
        assert!(commands
            .iter()
            .any(|c| matches!(c, LobbyCommand::SendTo { connection: 1, .. })));
        assert!(host.session_tokens.contains_key("g1"));
    }

    #[test]
    fn reconnection_with_correct_token_restores_presence() {
        let mut host = HostLobby::new("A1B2C3".into(), "h1".into(), "H".into(), 4);
        host.handle_message(1, req("G", "g1", None, 0), 0);
        let token = host.session_tokens.get("g1").cloned().unwrap();

        host.on_connection_closed(1);
        assert!(!host.players.iter().find(|p| p.logical_id == "g1").unwrap().is_connected);

        let (_, events) = host.handle_message(2, req("G", "g1", Some(&token), 0), 0);
        assert!(host.players.iter().find(|p| p.logical_id == "g1").unwrap().is_connected);
        assert!(matches!(events[0], LobbyEvent::PlayerJoined(_)));
    }

    #[test]
    fn reconnection_with_wrong_token_is_denied() {
        let mut host = HostLobby::new("A1B2C3".into(), "h1".into(), "H".into(), 4);
        host.handle_message(1, req("G", "g1", None, 0), 0);
        host.on_connection_closed(1);

        let (commands, _) = host.handle_message(2, req("G", "g1", Some("wrong"), 0), 0);
        assert!(matches!(
            commands[0],
            LobbyCommand::SendTo {
                envelope: Envelope {
                    message: Message::JoinRejected(protocol::JoinRejectedPayload {
                        reason: JoinRejectReason::Denied
                    }),
                    ..
                },
                ..
            }
        ));
        assert!(!host.players.iter().find(|p| p.logical_id == "g1").unwrap().is_connected);
    }

    #[test]
    fn capacity_race_denies_the_second_pending_request() {
        let mut host = HostLobby::new("A1B2C3".into(), "h1".into(), "H".into(), 2);
        host.settings.requires_request = true;
        host.handle_message(1, req("P1", "p1", None, 0), 0);
        host.handle_message(2, req("P2", "p2", None, 0), 0);

        let (commands, events) = host.approve(&"p1".to_string(), 0);
        assert!(host.players.iter().any(|p| p.logical_id == "p1"));
        assert!(commands.iter().any(|c| matches!(
            c,
            LobbyCommand::SendTo {
                envelope: Envelope { message: Message::JoinRejected(_), .. },
                connection: 2
            }
        )));
        assert!(events.iter().any(|e| matches!(e, LobbyEvent::PendingDenied(id) if id == "p2")));
    }

    #[test]
    fn capacity_reached_rejects_new_joiner() {
        let mut host = HostLobby::new("A1B2C3".into(), "h1".into(), "H".into(), 1);
        let (commands, _) = host.handle_message(1, req("G", "g1", None, 0), 0);
        assert!(commands.iter().any(|c| matches!(
            c,
            LobbyCommand::SendTo {
                envelope: Envelope {
                    message: Message::JoinRejected(protocol::JoinRejectedPayload {
                        reason: JoinRejectReason::CapacityReached
                    }),
                    ..
                },
                ..
            }
        )));
    }

    #[test]
    fn stale_close_does_not_mutate_presence() {
        let mut host = HostLobby::new("A1B2C3".into(), "h1".into(), "H".into(), 4);
        host.handle_message(1, req("G", "g1", None, 0), 0);
        // g1 reconnects on a new connection id without the old one closing
        // first — connection 1 is now stale.
        let token = host.session_tokens.get("g1").cloned().unwrap();
        host.handle_message(2, req("G", "g1", Some(&token), 0), 0);

        let (commands, events) = host.on_connection_closed(1);
        assert!(commands.is_empty());
        assert!(events.is_empty());
        assert!(host.players.iter().find(|p| p.logical_id == "g1").unwrap().is_connected);
    }

    #[test]
    fn disconnect_liveness_tears_down_when_in_game() {
        let mut host = HostLobby::new("A1B2C3".into(), "h1".into(), "H".into(), 2);
        host.handle_message(1, req("G", "g1", None, 0), 0);
        host.is_game_started = true;
        host.on_connection_closed(1);

        let (commands, events) = host.update(RECONNECT_WINDOW_SECONDS + 0.1);
        assert!(commands
            .iter()
            .any(|c| matches!(c, LobbyCommand::TearDown { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, LobbyEvent::TornDown(reason) if reason == "not enough players")));
    }

    #[test]
    fn disconnect_without_reconnect_removes_player_after_window() {
        let mut host = HostLobby::new("A1B2C3".into(), "h1".into(), "H".into(), 4);
        host.handle_message(1, req("G", "g1", None, 0), 0);
        host.handle_message(2, req("G2", "g2", None, 0), 0);
        host.on_connection_closed(1);

        let (_, events) = host.update(RECONNECT_WINDOW_SECONDS + 0.1);
        assert!(!host.players.iter().any(|p| p.logical_id == "g1"));
        assert!(events.iter().any(|e| matches!(e, LobbyEvent::PlayerLeft(id) if id == "g1")));
    }

    #[test]
    fn deliberate_leave_removes_the_player_immediately_without_a_reconnect_window() {
        let mut host = HostLobby::new("A1B2C3".into(), "h1".into(), "H".into(), 4);
        host.handle_message(1, req("G", "g1", None, 0), 0);

        let leave = Envelope::new(
            Message::PlayerLeft(protocol::PlayerLeftPayload { logical_id: "g1".into() }),
            "g1".into(),
            0,
        );
        let (commands, events) = host.handle_message(1, leave, 0);
        assert!(!host.players.iter().any(|p| p.logical_id == "g1"));
        assert!(events.iter().any(|e| matches!(e, LobbyEvent::PlayerLeft(id) if id == "g1")));
        assert!(commands
            .iter()
            .any(|c| matches!(c, LobbyCommand::CloseAfterGrace { connection: 1 })));

        // No lingering reconnect timer: a later tick produces nothing for g1.
        let (commands, events) = host.update(RECONNECT_WINDOW_SECONDS + 0.1);
        assert!(commands.is_empty());
        assert!(events.is_empty());
    }

    #[test]
    fn a_mismatched_player_left_sender_is_rejected() {
        let mut host = HostLobby::new("A1B2C3".into(), "h1".into(), "H".into(), 4);
        host.handle_message(1, req("G", "g1", None, 0), 0);

        let spoofed = Envelope::new(
            Message::PlayerLeft(protocol::PlayerLeftPayload { logical_id: "someone-else".into() }),
            "g1".into(),
            0,
        );
        let (_, events) = host.handle_message(1, spoofed, 0);
        assert!(matches!(
            events[0],
            LobbyEvent::Violation(ProtocolViolation::Unauthorized { .. })
        ));
        assert!(host.players.iter().any(|p| p.logical_id == "g1"));
    }

    #[test]
    fn ping_from_an_unbound_connection_is_accepted() {
        let mut host = HostLobby::new("A1B2C3".into(), "h1".into(), "H".into(), 4);
        let ping = Envelope::new(Message::Ping, "nobody".into(), 0);
        let (commands, events) = host.handle_message(99, ping, 0);
        assert!(commands.is_empty());
        assert!(events.is_empty());
    }

    #[test]
    fn guest_leave_sets_left_intentionally_and_host_close_preserves_it() {
        let mut guest = GuestLobby::new("A1B2C3".into(), "g1".into(), None);
        let envelope = guest.leave(0);
        assert!(matches!(envelope.message, Message::PlayerLeft(_)));
        assert_eq!(guest.error, Some("left-intentionally".to_string()));

        let (_, events) = guest.on_host_connection_closed();
        assert!(matches!(events[0], LobbyEvent::TornDown(ref reason) if reason == "left-intentionally"));
    }

    #[test]
    fn rate_limited_sender_is_dropped() {
        let mut host = HostLobby::new("A1B2C3".into(), "h1".into(), "H".into(), 4);
        for i in 0..30 {
            host.handle_message(1, req("G", "g1", None, i), i as u64);
        }
        let (_, events) = host.handle_message(1, req("G", "g1", None, 5), 5);
        assert!(events
            .iter()
            .any(|e| matches!(e, LobbyEvent::Violation(ProtocolViolation::RateLimited { .. }))));
    }

    #[test]
    fn stale_timestamp_is_dropped() {
        let mut host = HostLobby::new("A1B2C3".into(), "h1".into(), "H".into(), 4);
        let (_, events) = host.handle_message(1, req("G", "g1", None, 0), 40_000);
        assert!(matches!(
            events[0],
            LobbyEvent::Violation(ProtocolViolation::StaleTimestamp { .. })
        ));
    }

    #[test]
    fn guest_accepts_join_accepted_and_stores_token() {
        let mut guest = GuestLobby::new("A1B2C3".into(), "g1".into(), None);
        let envelope = Envelope::new(
            Message::JoinAccepted(protocol::JoinAcceptedPayload {
                players: vec![],
                selected_game_id: None,
                settings: LobbySettings::default(),
                is_game_started: Some(false),
                session_token: Some("tok".into()),
            }),
            "h1".into(),
            0,
        );
        guest.handle_message(envelope, 0);
        assert_eq!(guest.join_status, JoinStatus::Accepted);
        assert_eq!(guest.my_session_token, Some("tok".to_string()));
    }

    #[test]
    fn guest_host_left_without_prior_terminal_state_reports_disconnect() {
        let mut guest = GuestLobby::new("A1B2C3".into(), "g1".into(), None);
        let (_, events) = guest.on_host_connection_closed();
        assert_eq!(guest.error, Some("host disconnected".to_string()));
        assert!(matches!(events[0], LobbyEvent::TornDown(_)));
    }

    #[test]
    fn guest_preserves_terminal_state_set_before_host_closed() {
        let mut guest = GuestLobby::new("A1B2C3".into(), "g1".into(), None);
        guest.handle_message(Envelope::new(Message::JoinDenied, "h1".into(), 0), 0);
        guest.on_host_connection_closed();
        assert_eq!(guest.join_status, JoinStatus::Rejected(JoinRejectReason::Denied));
    }
}
