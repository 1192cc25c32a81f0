//! The lobby and consensus substrate for browser-resident, peer-to-peer
//! turn-based matches: a host-centered star topology with reconnection
//! credentials, and a propose/approve/finalize protocol over it that keeps
//! any single compromised peer from fabricating a move.
//!
//! `protocol` owns the wire types this crate speaks; `relay-server` is one
//! signaling/transport substrate a [`transport::WebSocketTransport`] can run
//! over, not a dependency of this crate. Concrete games implement
//! [`game_adapter::GameAdapter`] and drive a [`session::HostSession`] or
//! [`session::GuestSession`].

pub mod consensus;
pub mod error;
pub mod game_adapter;
pub mod identity;
pub mod lobby;
pub mod rate_limit;
pub mod session;
pub mod timer;
pub mod transport;

pub use consensus::{ConsensusEngine, ConsensusEvent};
pub use error::{ConsensusError, JoinRejected, LiveError, ProtocolViolation, TransportError};
pub use game_adapter::{GameAdapter, GameOutcome};
pub use identity::{InMemorySessionStore, SessionStore, StoredIdentity};
pub use lobby::{ConnectionId, GuestLobby, HostLobby, JoinStatus, LobbyCommand, LobbyEvent};
pub use session::{GuestSession, HostSession, SessionEvent};
pub use transport::{LoopbackTransport, Transport, TransportEvent, WebSocketTransport};
