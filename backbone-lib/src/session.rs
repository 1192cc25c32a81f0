//! The core entry point, tying [`HostLobby`]/[`GuestLobby`], the
//! [`ConsensusEngine`], and a caller-supplied [`Transport`] into one
//! frame-driven object: a host needs a star of connections (one
//! [`Transport`] per guest), while a guest needs exactly one, to the host.
//!
//! Nothing here touches the wall clock or blocks: `update` is driven once
//! per frame with the caller's own delta time, and every transport is
//! drained by polling, never by awaiting.

use crate::consensus::{ConsensusEngine, ConsensusEvent};
use crate::error::TransportError;
use crate::game_adapter::GameAdapter;
use crate::identity::{SessionStore, StoredIdentity};
use crate::lobby::{ConnectionId, GuestLobby, HostLobby, JoinStatus, LobbyCommand, LobbyEvent};
use crate::rate_limit::RateLimiter;
use crate::timer::Timer;
use crate::transport::{Transport, TransportEvent};
use protocol::{Envelope, Message, PeerId};
use std::collections::HashMap;

/// Surfaced once per `update` call; the UI collaborator reacts to these.
pub enum SessionEvent<State> {
    Lobby(LobbyEvent),
    Consensus(ConsensusEvent<State>),
    TransportError(TransportError),
}

/// Host side: owns one connection per guest plus the authoritative lobby
/// and (once a game is selected) the consensus engine.
pub struct HostSession<G: GameAdapter, T: Transport> {
    pub lobby: HostLobby,
    adapter: Option<G>,
    consensus: Option<ConsensusEngine<G>>,
    transports: HashMap<ConnectionId, T>,
    next_connection_id: ConnectionId,
    close_timers: Timer<ConnectionId>,
}

impl<G: GameAdapter, T: Transport> HostSession<G, T> {
    pub fn new(
        code: String,
        host_id: PeerId,
        host_display_name: String,
        max_players: usize,
        adapter: G,
    ) -> Self {
        HostSession {
            lobby: HostLobby::new(code, host_id, host_display_name, max_players),
            adapter: Some(adapter),
            consensus: None,
            transports: HashMap::new(),
            next_connection_id: 0,
            close_timers: Timer::new(),
        }
    }

    /// Registers a newly-opened guest transport and returns its handle.
    pub fn add_connection(&mut self, transport: T) -> ConnectionId {
        let id = self.next_connection_id;
        self.next_connection_id += 1;
        self.transports.insert(id, transport);
        id
    }

    pub fn approve(&mut self, logical_id: &PeerId, now_ms: u64) -> Vec<SessionEvent<G::State>> {
        let (commands, events) = self.lobby.approve(logical_id, now_ms);
        self.drain(commands, events)
    }

    pub fn deny(&mut self, logical_id: &PeerId) -> Vec<SessionEvent<G::State>> {
        let (commands, events) = self.lobby.deny(logical_id);
        self.drain(commands, events)
    }

    pub fn kick(&mut self, logical_id: &PeerId, now_ms: u64) -> Vec<SessionEvent<G::State>> {
        let (commands, events) = self.lobby.kick(logical_id, now_ms);
        self.drain(commands, events)
    }

    pub fn start_game(&mut self, game_id: String, now_ms: u64) -> Vec<SessionEvent<G::State>> {
        let (commands, events) = self.lobby.start_game(game_id, now_ms);
        let players: Vec<PeerId> = self.lobby.players.iter().map(|p| p.logical_id.clone()).collect();
        if let Some(adapter) = self.adapter.take() {
            let host_id = players.first().cloned().unwrap_or_default();
            self.consensus = Some(ConsensusEngine::new(adapter, &players, host_id, true));
        }
        self.drain(commands, events)
    }

    pub fn propose_move(&mut self, mv: G::Move, now_ms: u64) -> Vec<SessionEvent<G::State>> {
        let Some(consensus) = &mut self.consensus else {
            return Vec::new();
        };
        let Ok(payload) = consensus.propose_move(mv) else {
            return Vec::new();
        };
        let host_id = self
            .lobby
            .players
            .iter()
            .find(|p| p.is_host)
            .map(|p| p.logical_id.clone())
            .unwrap_or_default();
        let envelope = Envelope::new(Message::GameMessage(payload), host_id, now_ms);
        self.broadcast(&envelope, None);
        Vec::new()
    }

    /// Drains every transport, drives lobby/consensus timers, returns the
    /// events the caller should react to this tick.
    pub fn update(&mut self, delta_seconds: f32, now_ms: u64) -> Vec<SessionEvent<G::State>> {
        let mut events = Vec::new();
        let connection_ids: Vec<ConnectionId> = self.transports.keys().copied().collect();
        for id in connection_ids {
            loop {
                let Some(transport) = self.transports.get_mut(&id) else {
                    break;
                };
                match transport.poll() {
                    None => break,
                    Some(TransportEvent::Opened) => {}
                    Some(TransportEvent::Message(envelope)) => {
                        events.extend(self.handle_inbound(id, envelope, now_ms));
                    }
                    Some(TransportEvent::Closed) => {
                        let (commands, lobby_events) = self.lobby.on_connection_closed(id);
                        self.transports.remove(&id);
                        events.extend(self.drain(commands, lobby_events));
                        break;
                    }
                    Some(TransportEvent::Error(e)) => {
                        events.push(SessionEvent::TransportError(e));
                    }
                }
            }
        }

        let (commands, lobby_events) = self.lobby.update(delta_seconds);
        events.extend(self.drain(commands, lobby_events));

        for id in self.close_timers.update_and_get_list(delta_seconds) {
            if let Some(mut transport) = self.transports.remove(&id) {
                transport.close();
            }
        }

        events
    }

    fn handle_inbound(
        &mut self,
        connection: ConnectionId,
        envelope: Envelope,
        now_ms: u64,
    ) -> Vec<SessionEvent<G::State>> {
        let (commands, lobby_events) = self.lobby.handle_message(connection, envelope, now_ms);
        let mut events = self.drain(commands, lobby_events.clone());

        for lobby_event in lobby_events {
            if let LobbyEvent::GameMessage { sender, payload } = lobby_event {
                events.extend(self.route_game_message(connection, &sender, payload, now_ms));
            }
        }
        events
    }

    /// Relays one inbound `game-message` to every other connection — the
    /// host is the sole hub a guest's proposal/approval reaches the rest of
    /// the lobby through — then feeds it through the consensus engine for
    /// its own local bookkeeping.
    fn route_game_message(
        &mut self,
        from_connection: ConnectionId,
        sender: &PeerId,
        payload: protocol::GameMessagePayload,
        now_ms: u64,
    ) -> Vec<SessionEvent<G::State>> {
        let relayed = Envelope::new(Message::GameMessage(payload.clone()), sender.clone(), now_ms);
        self.broadcast(&relayed, Some(from_connection));

        let Some(consensus) = &mut self.consensus else {
            return Vec::new();
        };
        let connected: Vec<PeerId> = self
            .lobby
            .players
            .iter()
            .filter(|p| p.is_connected)
            .map(|p| p.logical_id.clone())
            .collect();
        let (outgoing, consensus_events) =
            consensus.handle_game_message(sender, payload, &connected);

        let host_id = self
            .lobby
            .players
            .iter()
            .find(|p| p.is_host)
            .map(|p| p.logical_id.clone())
            .unwrap_or_default();
        for out in outgoing {
            let envelope = Envelope::new(Message::GameMessage(out), host_id.clone(), now_ms);
            self.broadcast(&envelope, None);
        }
        consensus_events.into_iter().map(SessionEvent::Consensus).collect()
    }

    fn drain(&mut self, commands: Vec<LobbyCommand>, events: Vec<LobbyEvent>) -> Vec<SessionEvent<G::State>> {
        for command in commands {
            self.execute(command);
        }
        events.into_iter().map(SessionEvent::Lobby).collect()
    }

    fn execute(&mut self, command: LobbyCommand) {
        match command {
            LobbyCommand::SendTo { connection, envelope } => {
                if let Some(transport) = self.transports.get_mut(&connection) {
                    let _ = transport.send(&envelope);
                }
            }
            LobbyCommand::Broadcast { envelope, except } => {
                self.broadcast(&envelope, except);
            }
            LobbyCommand::CloseAfterGrace { connection } => {
                self.close_timers.start_timer(connection, 0.5);
            }
            LobbyCommand::TearDown { .. } => {
                for (_, mut transport) in self.transports.drain() {
                    transport.close();
                }
            }
        }
    }

    fn broadcast(&mut self, envelope: &Envelope, except: Option<ConnectionId>) {
        for (id, transport) in self.transports.iter_mut() {
            if Some(*id) == except {
                continue;
            }
            let _ = transport.send(envelope);
        }
    }
}

/// Guest side: a single connection to the host, the mirrored lobby state,
/// and the consensus engine once the game has started.
pub struct GuestSession<G: GameAdapter, T: Transport> {
    pub lobby: GuestLobby,
    adapter: Option<G>,
    consensus: Option<ConsensusEngine<G>>,
    transport: T,
    rate_limiter: RateLimiter,
    session_store: Box<dyn SessionStore>,
    my_display_name: String,
}

impl<G: GameAdapter, T: Transport> GuestSession<G, T> {
    /// `session_store` is consulted once up front: a prior identity found
    /// there overrides `my_id`/`prior_token`, so a guest reopening the same
    /// tab rejoins as the player it already was rather than a fresh one.
    pub fn new(
        code: String,
        my_id: PeerId,
        prior_token: Option<protocol::SessionToken>,
        adapter: G,
        transport: T,
        session_store: Box<dyn SessionStore>,
    ) -> Self {
        let (my_id, prior_token, my_display_name) = match session_store.load() {
            Some(identity) => (identity.logical_id, Some(identity.session_token), identity.display_name),
            None => (my_id, prior_token, String::new()),
        };
        GuestSession {
            lobby: GuestLobby::new(code, my_id, prior_token),
            adapter: Some(adapter),
            consensus: None,
            transport,
            rate_limiter: RateLimiter::new(),
            session_store,
            my_display_name,
        }
    }

    pub fn send_join_request(&mut self, display_name: String, now_ms: u64) -> Result<(), TransportError> {
        self.my_display_name = display_name.clone();
        let envelope = self.lobby.join_request(display_name, now_ms);
        self.transport.send(&envelope)
    }

    /// Depart deliberately: sends `player-left`, clears the terminal state
    /// locally, and forgets the now-useless reconnection token so a later
    /// rejoin under this identity starts fresh rather than presenting a
    /// token the host has already discarded.
    pub fn leave(&mut self, now_ms: u64) -> Result<(), TransportError> {
        let envelope = self.lobby.leave(now_ms);
        self.session_store.clear();
        self.transport.send(&envelope)
    }

    pub fn propose_move(&mut self, mv: G::Move, now_ms: u64) -> Result<(), TransportError> {
        let Some(consensus) = &mut self.consensus else {
            return Ok(());
        };
        let Ok(payload) = consensus.propose_move(mv) else {
            return Ok(());
        };
        let envelope = Envelope::new(Message::GameMessage(payload), self.lobby.my_logical_id.clone(), now_ms);
        self.transport.send(&envelope)
    }

    pub fn update(&mut self, _delta_seconds: f32, now_ms: u64) -> Vec<SessionEvent<G::State>> {
        let mut events = Vec::new();
        loop {
            match self.transport.poll() {
                None => break,
                Some(TransportEvent::Opened) => {}
                Some(TransportEvent::Message(envelope)) => {
                    if !self
                        .rate_limiter
                        .check(&envelope.sender_id, envelope.timestamp)
                    {
                        continue;
                    }
                    if matches!(envelope.message, Message::GameStart(_)) && self.consensus.is_none() {
                        if let Some(adapter) = self.adapter.take() {
                            let players: Vec<PeerId> =
                                self.lobby.players.iter().map(|p| p.logical_id.clone()).collect();
                            self.consensus = Some(ConsensusEngine::new(
                                adapter,
                                &players,
                                self.lobby.my_logical_id.clone(),
                                false,
                            ));
                        }
                    }
                    let is_game_message = matches!(envelope.message, Message::GameMessage(_));
                    let is_join_accepted = matches!(envelope.message, Message::JoinAccepted(_));
                    let (_, lobby_events) = self.lobby.handle_message(envelope, now_ms);
                    if is_join_accepted {
                        self.persist_identity();
                    }
                    for lobby_event in lobby_events {
                        if let LobbyEvent::GameMessage { sender, payload } = lobby_event {
                            events.extend(self.route_game_message(&sender, payload, now_ms));
                        } else {
                            events.push(SessionEvent::Lobby(lobby_event));
                        }
                    }
                    let _ = is_game_message;
                }
                Some(TransportEvent::Closed) => {
                    let (_, lobby_events) = self.lobby.on_host_connection_closed();
                    events.extend(lobby_events.into_iter().map(SessionEvent::Lobby));
                }
                Some(TransportEvent::Error(e)) => {
                    events.push(SessionEvent::TransportError(e));
                }
            }
        }
        events
    }

    fn route_game_message(
        &mut self,
        sender: &PeerId,
        payload: protocol::GameMessagePayload,
        now_ms: u64,
    ) -> Vec<SessionEvent<G::State>> {
        let Some(consensus) = &mut self.consensus else {
            return Vec::new();
        };
        let (outgoing, consensus_events) = consensus.handle_game_message(sender, payload, &[]);
        for out in outgoing {
            let envelope = Envelope::new(Message::GameMessage(out), self.lobby.my_logical_id.clone(), now_ms);
            let _ = self.transport.send(&envelope);
        }
        consensus_events.into_iter().map(SessionEvent::Consensus).collect()
    }

    pub fn join_status(&self) -> &JoinStatus {
        &self.lobby.join_status
    }

    /// The host just (re)issued a token for this identity; remember it so a
    /// dropped transport or page reload can present it on rejoin.
    fn persist_identity(&mut self) {
        let Some(session_token) = self.lobby.my_session_token.clone() else {
            return;
        };
        self.session_store.save(&StoredIdentity {
            logical_id: self.lobby.my_logical_id.clone(),
            display_name: self.my_display_name.clone(),
            session_token,
        });
    }
}
