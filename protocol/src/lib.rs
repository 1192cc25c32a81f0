//! The wire protocol shared between every peer and the relay server.
//!
//! Everything here is data: the tagged envelope, its message variants, and
//! the lobby-code text helpers. None of it knows about lobbies, consensus,
//! or transports — those live in `backbone-lib` and are built on top of
//! these types.

pub mod lobby_code;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A participant's stable logical identifier. Survives transport reconnects
/// within one lobby session; see `backbone-lib`'s `SessionStore`.
pub type PeerId = String;

/// A host-issued secret bound to a [`PeerId`], required to resume that
/// identity after a disconnect.
pub type SessionToken = String;

/// Freshly-random identifier for one proposed move, stable for the lifetime
/// of that proposal.
pub type MoveId = String;

/// Milliseconds since the Unix epoch, as carried on every [`Envelope`].
pub type Timestamp = u64;

/// The wire envelope every message is carried in:
/// `{ type, payload, sender_id, timestamp }`.
///
/// `message` flattens into `type`/`payload` via [`Message`]'s internal
/// tagging; `sender_id` and `timestamp` are always present regardless of
/// variant. Structural validation is strict: an unrecognized `type` or
/// missing/extra fields cause the whole message to be dropped.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub message: Message,
    /// Never empty; the logical id the sender claims to be.
    pub sender_id: PeerId,
    /// Millis since epoch at the moment the sender constructed the message.
    pub timestamp: Timestamp,
}

impl Envelope {
    pub fn new(message: Message, sender_id: PeerId, timestamp: Timestamp) -> Self {
        Envelope {
            message,
            sender_id,
            timestamp,
        }
    }
}

/// Why a join attempt was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinRejectReason {
    NotFound,
    CapacityReached,
    InGame,
    Denied,
}

/// A participant as seen by the lobby: one entry per admitted player, in
/// turn order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub logical_id: PeerId,
    pub display_name: String,
    pub is_host: bool,
    pub is_ready: bool,
    pub is_connected: bool,
}

/// Host-controlled lobby configuration, shared verbatim with every guest.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LobbySettings {
    pub requires_request: bool,
    /// Opaque per-game key/value settings; the core never interprets these.
    #[serde(default)]
    pub per_game_settings: HashMap<String, HashMap<String, serde_json::Value>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinRequestPayload {
    pub display_name: String,
    pub logical_id: PeerId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_token: Option<SessionToken>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinAcceptedPayload {
    pub players: Vec<Player>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub selected_game_id: Option<String>,
    pub settings: LobbySettings,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub is_game_started: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_token: Option<SessionToken>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinRejectedPayload {
    pub reason: JoinRejectReason,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerJoinedPayload {
    pub player: Player,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerLeftPayload {
    pub logical_id: PeerId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerReadyPayload {
    pub logical_id: PeerId,
    pub is_ready: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerKickedPayload {
    pub logical_id: PeerId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LobbySettingsPayload {
    pub settings: LobbySettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameSelectedPayload {
    pub game_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameStartPayload {
    pub game_id: String,
    pub players: Vec<Player>,
}

/// A consensus-engine (or pass-through) message, relayed by the host.
///
/// `inner_type`/`data` are opaque to the lobby layer; only the consensus
/// engine (or, for unrecognized `inner_type`s, the game adapter) interprets
/// them. `sender_id` here is optional: once the host relays a guest's
/// `game-message` onward to the others, it fills this in with the original
/// sender while the envelope's own `sender_id` becomes the host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameMessagePayload {
    pub inner_type: String,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sender_id: Option<PeerId>,
}

/// Every message variant the wire protocol defines. Tagged as
/// `{ "type": "...", "payload": ... }` so that, flattened into [`Envelope`],
/// the whole message forms a single flat JSON object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum Message {
    JoinRequest(JoinRequestPayload),
    JoinAccepted(JoinAcceptedPayload),
    JoinRejected(JoinRejectedPayload),
    JoinPending,
    JoinApproved,
    JoinDenied,
    PlayerJoined(PlayerJoinedPayload),
    PlayerLeft(PlayerLeftPayload),
    PlayerReady(PlayerReadyPayload),
    PlayerKicked(PlayerKickedPayload),
    HostLeft,
    LobbySettings(LobbySettingsPayload),
    GameSelected(GameSelectedPayload),
    GameStart(GameStartPayload),
    GameMessage(GameMessagePayload),
    Ping,
    Pong,
}

impl Message {
    /// A short, stable name for logging — matches the wire `type` tag.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Message::JoinRequest(_) => "join-request",
            Message::JoinAccepted(_) => "join-accepted",
            Message::JoinRejected(_) => "join-rejected",
            Message::JoinPending => "join-pending",
            Message::JoinApproved => "join-approved",
            Message::JoinDenied => "join-denied",
            Message::PlayerJoined(_) => "player-joined",
            Message::PlayerLeft(_) => "player-left",
            Message::PlayerReady(_) => "player-ready",
            Message::PlayerKicked(_) => "player-kicked",
            Message::HostLeft => "host-left",
            Message::LobbySettings(_) => "lobby-settings",
            Message::GameSelected(_) => "game-selected",
            Message::GameStart(_) => "game-start",
            Message::GameMessage(_) => "game-message",
            Message::Ping => "ping",
            Message::Pong => "pong",
        }
    }
}
