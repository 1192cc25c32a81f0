//! The turn consensus engine: propose → per-peer validate → host-collected
//! approve → broadcast finalize, with the dual-approval check that keeps a
//! compromised host from fabricating a move.
//!
//! The engine is parameterized over an opaque state plus a small capability
//! set rather than built by inheritance, echoing how
//! [`crate::game_adapter::GameAdapter`] itself is structured.

use crate::error::ConsensusError;
use crate::game_adapter::{GameAdapter, GameOutcome};
use protocol::{GameMessagePayload, MoveId, PeerId};
use std::collections::HashSet;

const PROPOSE_MOVE: &str = "propose-move";
const APPROVE_MOVE: &str = "approve-move";
const FINALIZE_MOVE: &str = "finalize-move";
const REQUEST_STATE: &str = "request-state";
const SYNC_STATE: &str = "sync-state";

#[derive(serde::Serialize, serde::Deserialize)]
struct ProposeMoveData<M> {
    move_id: MoveId,
    mv: M,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct ApproveMoveData {
    move_id: MoveId,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct FinalizeMoveData {
    move_id: MoveId,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct SyncStateData<S> {
    state: S,
}

struct PendingMove<M> {
    move_id: MoveId,
    mv: M,
    #[allow(dead_code)]
    proposer_id: PeerId,
    approvals: HashSet<PeerId>,
    locally_approved: bool,
}

/// Observable results of feeding one `game-message` through the engine.
pub enum ConsensusEvent<State> {
    MoveApplied { state: State },
    GameEnded(GameOutcome),
    InvalidMoveDiscarded { move_id: MoveId },
    FinalizeRefused { move_id: MoveId },
    StateSynced { state: State },
    /// An inner type the engine does not reserve; hand to the game adapter.
    PassThrough(GameMessagePayload),
}

/// Drives one game session's moves to agreement. `my_id`/`is_host` are
/// fixed for the engine's lifetime; a new session gets a new engine.
pub struct ConsensusEngine<G: GameAdapter> {
    adapter: G,
    game_state: G::State,
    pending: Option<PendingMove<G::Move>>,
    has_received_initial_sync: bool,
    my_id: PeerId,
    is_host: bool,
    move_id_rng: rand::rngs::ThreadRng,
}

fn fresh_move_id(rng: &mut impl rand::Rng) -> MoveId {
    use rand::Rng as _;
    (0..16).map(|_| rng.random_range('a'..='z')).collect()
}

impl<G: GameAdapter> ConsensusEngine<G> {
    pub fn new(adapter: G, players: &[PeerId], my_id: PeerId, is_host: bool) -> Self {
        let game_state = adapter.initial_state(players);
        ConsensusEngine {
            adapter,
            game_state,
            pending: None,
            has_received_initial_sync: is_host,
            my_id,
            is_host,
            move_id_rng: rand::rng(),
        }
    }

    pub fn game_state(&self) -> &G::State {
        &self.game_state
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Originates a new proposal. Refuses while one is already in flight;
    /// liveness then depends on that move being approved or its proposer
    /// being declared disconnected by the lobby layer.
    pub fn propose_move(&mut self, mv: G::Move) -> Result<GameMessagePayload, ConsensusError> {
        if self.pending.is_some() {
            return Err(ConsensusError::ProposalInFlight);
        }
        let move_id = fresh_move_id(&mut self.move_id_rng);
        let mut approvals = HashSet::new();
        approvals.insert(self.my_id.clone());
        self.pending = Some(PendingMove {
            move_id: move_id.clone(),
            mv: mv.clone(),
            proposer_id: self.my_id.clone(),
            approvals,
            locally_approved: true,
        });
        Ok(GameMessagePayload {
            inner_type: PROPOSE_MOVE.to_string(),
            data: serde_json::to_value(ProposeMoveData { move_id, mv }).expect("serializable"),
            sender_id: None,
        })
    }

    pub fn request_state(&self) -> GameMessagePayload {
        GameMessagePayload {
            inner_type: REQUEST_STATE.to_string(),
            data: serde_json::Value::Null,
            sender_id: None,
        }
    }

    /// Feeds one `game-message`, originally sent by `sender`, through the
    /// engine. `connected_players` drives the host's "covers everyone"
    /// check for finalize eligibility.
    pub fn handle_game_message(
        &mut self,
        sender: &PeerId,
        payload: GameMessagePayload,
        connected_players: &[PeerId],
    ) -> (Vec<GameMessagePayload>, Vec<ConsensusEvent<G::State>>) {
        match payload.inner_type.as_str() {
            PROPOSE_MOVE => self.on_propose(sender, payload, connected_players),
            APPROVE_MOVE => self.on_approve(sender, payload, connected_players),
            FINALIZE_MOVE => self.on_finalize(payload),
            REQUEST_STATE => self.on_request_state(sender),
            SYNC_STATE => self.on_sync_state(payload),
            _ => (Vec::new(), vec![ConsensusEvent::PassThrough(payload)]),
        }
    }

    fn on_propose(
        &mut self,
        sender: &PeerId,
        payload: GameMessagePayload,
        connected_players: &[PeerId],
    ) -> (Vec<GameMessagePayload>, Vec<ConsensusEvent<G::State>>) {
        let Ok(data) = serde_json::from_value::<ProposeMoveData<G::Move>>(payload.data) else {
            return (Vec::new(), Vec::new());
        };
        if !self.adapter.validate_move(&self.game_state, &data.mv, sender) {
            return (
                Vec::new(),
                vec![ConsensusEvent::InvalidMoveDiscarded {
                    move_id: data.move_id,
                }],
            );
        }

        let is_proposer = sender == &self.my_id;
        match &mut self.pending {
            Some(existing) if existing.move_id == data.move_id => {
                existing.approvals.insert(sender.clone());
                existing.approvals.insert(self.my_id.clone());
                existing.locally_approved = true;
            }
            _ => {
                let mut approvals = HashSet::new();
                approvals.insert(sender.clone());
                approvals.insert(self.my_id.clone());
                self.pending = Some(PendingMove {
                    move_id: data.move_id.clone(),
                    mv: data.mv,
                    proposer_id: sender.clone(),
                    approvals,
                    locally_approved: true,
                });
            }
        }

        if is_proposer {
            return (Vec::new(), Vec::new());
        }

        // The host is the sole approval collector: it never needs to mail
        // itself an approve-move, it just checks whether validating this
        // proposal already covers every connected player.
        if self.is_host {
            let pending = self.pending.as_ref().expect("set above");
            let covers_everyone = connected_players
                .iter()
                .all(|p| pending.approvals.contains(p));
            if covers_everyone {
                let finalize = GameMessagePayload {
                    inner_type: FINALIZE_MOVE.to_string(),
                    data: serde_json::to_value(FinalizeMoveData {
                        move_id: data.move_id,
                    })
                    .expect("serializable"),
                    sender_id: None,
                };
                let (_, events) = self.finalize_pending(&finalize);
                return (vec![finalize], events);
            }
            return (Vec::new(), Vec::new());
        }

        let outgoing = GameMessagePayload {
            inner_type: APPROVE_MOVE.to_string(),
            data: serde_json::to_value(ApproveMoveData {
                move_id: data.move_id,
            })
            .expect("serializable"),
            sender_id: None,
        };
        (vec![outgoing], Vec::new())
    }

    fn on_approve(
        &mut self,
        sender: &PeerId,
        payload: GameMessagePayload,
        connected_players: &[PeerId],
    ) -> (Vec<GameMessagePayload>, Vec<ConsensusEvent<G::State>>) {
        if !self.is_host {
            return (Vec::new(), Vec::new());
        }
        let Ok(data) = serde_json::from_value::<ApproveMoveData>(payload.data) else {
            return (Vec::new(), Vec::new());
        };
        let Some(pending) = &mut self.pending else {
            return (Vec::new(), Vec::new());
        };
        if pending.move_id != data.move_id {
            return (Vec::new(), Vec::new());
        }
        pending.approvals.insert(sender.clone());

        let covers_everyone = connected_players
            .iter()
            .all(|p| pending.approvals.contains(p));
        if !covers_everyone {
            return (Vec::new(), Vec::new());
        }

        let finalize = GameMessagePayload {
            inner_type: FINALIZE_MOVE.to_string(),
            data: serde_json::to_value(FinalizeMoveData {
                move_id: data.move_id,
            })
            .expect("serializable"),
            sender_id: None,
        };
        let (_, events) = self.finalize_pending(&finalize);
        (vec![finalize], events)
    }

    fn on_finalize(
        &mut self,
        payload: GameMessagePayload,
    ) -> (Vec<GameMessagePayload>, Vec<ConsensusEvent<G::State>>) {
        self.finalize_pending(&payload)
    }

    fn finalize_pending(
        &mut self,
        payload: &GameMessagePayload,
    ) -> (Vec<GameMessagePayload>, Vec<ConsensusEvent<G::State>>) {
        let Ok(data) = serde_json::from_value::<FinalizeMoveData>(payload.data.clone()) else {
            return (Vec::new(), Vec::new());
        };

        let Some(pending) = &self.pending else {
            // Already finalized (or never proposed locally); re-delivery is
            // a no-op.
            return (Vec::new(), Vec::new());
        };
        if pending.move_id != data.move_id {
            return (Vec::new(), Vec::new());
        }
        if !pending.locally_approved {
            self.pending = None;
            return (
                Vec::new(),
                vec![ConsensusEvent::FinalizeRefused {
                    move_id: data.move_id,
                }],
            );
        }

        let pending = self.pending.take().expect("checked above");
        self.game_state = self.adapter.apply_move(&self.game_state, &pending.mv);
        let mut events = vec![ConsensusEvent::MoveApplied {
            state: self.game_state.clone(),
        }];
        if let Some(outcome) = self.adapter.terminal(&self.game_state) {
            events.push(ConsensusEvent::GameEnded(outcome));
        }
        (Vec::new(), events)
    }

    fn on_request_state(
        &self,
        _sender: &PeerId,
    ) -> (Vec<GameMessagePayload>, Vec<ConsensusEvent<G::State>>) {
        if !self.is_host {
            return (Vec::new(), Vec::new());
        }
        let sync = GameMessagePayload {
            inner_type: SYNC_STATE.to_string(),
            data: serde_json::to_value(SyncStateData {
                state: self.game_state.clone(),
            })
            .expect("serializable"),
            sender_id: None,
        };
        (vec![sync], Vec::new())
    }

    fn on_sync_state(
        &mut self,
        payload: GameMessagePayload,
    ) -> (Vec<GameMessagePayload>, Vec<ConsensusEvent<G::State>>) {
        if self.has_received_initial_sync {
            return (Vec::new(), Vec::new());
        }
        let Ok(data) = serde_json::from_value::<SyncStateData<G::State>>(payload.data) else {
            return (Vec::new(), Vec::new());
        };
        self.has_received_initial_sync = true;
        self.game_state = data.state.clone();
        (Vec::new(), vec![ConsensusEvent::StateSynced { state: data.state }])
    }
}
