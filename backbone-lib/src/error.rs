//! The observable error taxonomy, expressed as dedicated enums rather than
//! stringly-typed `Result<T, String>` errors.

use protocol::{JoinRejectReason, MoveId, PeerId};
use thiserror::Error;

/// Failures while establishing or maintaining a [`crate::transport::Transport`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// A transient condition (DNS hiccup, socket reset); worth retrying.
    #[error("recoverable transport error: {0}")]
    Recoverable(String),
    /// Not worth retrying: bad id, peer gone, incompatible endpoint.
    #[error("fatal transport error: {0}")]
    Fatal(String),
    /// The remote end closed the channel.
    #[error("connection closed")]
    Closed,
}

/// Why a join attempt did not result in an admitted player.
///
/// Mirrors [`JoinRejectReason`] but is the Rust-side error a caller of the
/// lobby manager's join API observes directly.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("join rejected: {0:?}")]
pub struct JoinRejected(pub JoinRejectReason);

/// A single inbound message failed one of the host/guest authority or
/// structural checks and was dropped. Never fatal to the connection on its
/// own (token mismatch is handled separately, as a [`TransportError`]-driving
/// kick).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("malformed message from {sender}")]
    Malformed { sender: PeerId },
    #[error("{sender} is not authorized to send this message")]
    Unauthorized { sender: PeerId },
    #[error("sender_id {claimed} does not match connection identity {actual}")]
    SenderMismatch { claimed: PeerId, actual: PeerId },
    #[error("message from {sender} is stale by {skew_ms}ms")]
    StaleTimestamp { sender: PeerId, skew_ms: i64 },
    #[error("{sender} exceeded the per-second rate limit")]
    RateLimited { sender: PeerId },
}

/// A consensus-engine refusal. Discards one move; the session continues.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("move {move_id} rejected by local validation")]
    InvalidMove { move_id: MoveId },
    #[error("finalize for {move_id} arrived without matching local approval")]
    UnapprovedFinalize { move_id: MoveId },
    #[error("a proposal is already pending; cannot originate a new one")]
    ProposalInFlight,
    #[error("sync-state already applied once this session")]
    AlreadySynced,
}

/// A condition severe enough to tear the lobby or game session down.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LiveError {
    #[error("reconnection window for {logical_id} expired")]
    ReconnectWindowExpired { logical_id: PeerId },
    #[error("not enough connected players remain ({connected} <= 1)")]
    NotEnoughPlayers { connected: usize },
    #[error("host left the lobby")]
    HostLeft,
}
