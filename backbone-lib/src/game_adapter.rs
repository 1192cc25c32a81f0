//! The contract between a concrete game and the consensus engine.
//!
//! A server-authoritative design would let only the host run game logic and
//! have everyone else trust its deltas. Here it's the opposite: every peer,
//! host included, runs the same pure functions and only advances a move once
//! every other peer has independently agreed it is legal. That symmetry
//! means the trait below has no player-arrival, drain-commands, or timer
//! hooks at all: a [`GameAdapter`] is not a state machine that emits
//! commands, it is a pair of pure functions the consensus engine calls.
//!
//! # Implementing a game
//!
//! ```ignore
//! impl GameAdapter for TicTacToe {
//!     type State = Board;
//!     type Move = Placement;
//!
//!     fn initial_state(&self, players: &[PeerId]) -> Board { Board::empty(players) }
//!     fn validate_move(&self, state: &Board, mv: &Placement, proposer: &PeerId) -> bool {
//!         state.turn_of() == *proposer && state.cell(mv.x, mv.y).is_none()
//!     }
//!     fn apply_move(&self, state: &Board, mv: &Placement) -> Board {
//!         state.place(mv.x, mv.y)
//!     }
//! }
//! ```
//!
//! # Determinism requirement
//!
//! `validate_move` and `apply_move` must be pure and must agree across every
//! peer given the same `state` and `mv` — the whole safety property (every
//! peer reaches the same state without ever trusting the proposer) depends
//! on it. Do not read wall-clock time, randomness, or any field not present
//! in `State`/`Move` from inside either method.

/// How a game ended, surfaced through the consensus engine's game-end hook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GameOutcome {
    Win(protocol::PeerId),
    Draw,
}

pub trait GameAdapter {
    /// The complete, serializable game state shared by every peer.
    type State: Clone + PartialEq + serde::Serialize + serde::de::DeserializeOwned;
    /// One player action, serializable so it can ride inside a
    /// `game-message` payload.
    type Move: Clone + serde::Serialize + serde::de::DeserializeOwned;

    /// Builds the starting state once the player roster is fixed, in the
    /// same join order used for turn rotation.
    fn initial_state(&self, players: &[protocol::PeerId]) -> Self::State;

    /// True if `mv`, proposed by `proposer`, is legal against `state`.
    ///
    /// Called independently by every peer before it approves a proposal;
    /// never trust the proposer's own judgment.
    fn validate_move(
        &self,
        state: &Self::State,
        mv: &Self::Move,
        proposer: &protocol::PeerId,
    ) -> bool;

    /// Produces the state that results from applying an already-validated
    /// `mv` to `state`. Only called after every required approval is in;
    /// implementations may assume `mv` is legal.
    fn apply_move(&self, state: &Self::State, mv: &Self::Move) -> Self::State;

    /// `Some` once `state` is a terminal position (win or draw). The default
    /// never ends the game, for adapters with no terminal condition.
    fn terminal(&self, _state: &Self::State) -> Option<GameOutcome> {
        None
    }
}
