//! Full admission → ready → start → consensus scenarios driven through
//! [`HostSession`]/[`GuestSession`] over an in-memory [`LoopbackTransport`]
//! pair, exercising the whole orchestrator rather than the lobby or
//! consensus state machines in isolation.

use backbone_lib::{
    ConsensusEvent, GameAdapter, GameOutcome, HostSession, InMemorySessionStore, JoinStatus,
    LoopbackTransport, SessionEvent,
};
use protocol::PeerId;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
struct CounterState {
    value: i32,
    turn: usize,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
struct Increment;

struct CounterGame {
    players: Vec<PeerId>,
}

impl GameAdapter for CounterGame {
    type State = CounterState;
    type Move = Increment;

    fn initial_state(&self, _players: &[PeerId]) -> CounterState {
        CounterState { value: 0, turn: 0 }
    }

    fn validate_move(&self, state: &CounterState, _mv: &Increment, proposer: &PeerId) -> bool {
        self.players.get(state.turn) == Some(proposer)
    }

    fn apply_move(&self, state: &CounterState, _mv: &Increment) -> CounterState {
        CounterState {
            value: state.value + 1,
            turn: (state.turn + 1) % self.players.len().max(1),
        }
    }

    fn terminal(&self, state: &CounterState) -> Option<GameOutcome> {
        if state.value >= 3 {
            Some(GameOutcome::Win(self.players[0].clone()))
        } else {
            None
        }
    }
}

fn new_game(players: &[&str]) -> CounterGame {
    CounterGame {
        players: players.iter().map(|s| s.to_string()).collect(),
    }
}

type Host = HostSession<CounterGame, LoopbackTransport>;
type Guest = backbone_lib::GuestSession<CounterGame, LoopbackTransport>;

fn admitted_pair() -> (Host, Guest) {
    let (host_transport, guest_transport) = LoopbackTransport::pair();

    let mut host = HostSession::new(
        "A1B2C3".to_string(),
        "host".to_string(),
        "Host".to_string(),
        2,
        new_game(&["host", "guest"]),
    );
    host.add_connection(host_transport);

    let mut guest = backbone_lib::GuestSession::new(
        "A1B2C3".to_string(),
        "guest".to_string(),
        None,
        new_game(&["host", "guest"]),
        guest_transport,
        Box::new(InMemorySessionStore::new()),
    );

    guest.send_join_request("Guest".to_string(), 1_000).unwrap();
    host.update(0.0, 1_000);
    guest.update(0.0, 1_000);

    (host, guest)
}

#[test]
fn guest_is_admitted_and_sees_its_own_acceptance() {
    let (host, guest) = admitted_pair();
    assert_eq!(host.lobby.players.len(), 2);
    assert_eq!(*guest.join_status(), JoinStatus::Accepted);
}

#[test]
fn starting_the_game_propagates_to_the_guest() {
    let (mut host, mut guest) = admitted_pair();
    host.start_game("counter".to_string(), 1_000);
    let events = guest.update(0.0, 1_000);
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::Lobby(backbone_lib::LobbyEvent::GameStarted))));
    assert!(guest.lobby.is_game_started);
}

#[test]
fn a_proposed_move_reaches_dual_approval_on_both_peers() {
    let (mut host, mut guest) = admitted_pair();
    host.start_game("counter".to_string(), 1_000);
    guest.update(0.0, 1_000);

    // It is host's turn. Host proposes, guest validates and mails its
    // approval back, host collects it and finalizes, then broadcasts the
    // finalize for guest to apply in turn.
    host.propose_move(Increment, 1_000);
    guest.update(0.0, 1_000);

    let host_events = host.update(0.0, 1_000);
    assert!(host_events
        .iter()
        .any(|e| matches!(e, SessionEvent::Consensus(ConsensusEvent::MoveApplied { state }) if state.value == 1)));

    let guest_events = guest.update(0.0, 1_000);
    assert!(guest_events
        .iter()
        .any(|e| matches!(e, SessionEvent::Consensus(ConsensusEvent::MoveApplied { state }) if state.value == 1)));
}

#[test]
fn out_of_turn_proposals_never_reach_consensus() {
    let (mut host, mut guest) = admitted_pair();
    host.start_game("counter".to_string(), 1_000);
    guest.update(0.0, 1_000);

    // It is host's turn; a guest-originated move should be discarded once
    // the host's consensus engine validates it.
    guest.propose_move(Increment, 1_000).unwrap();
    let host_events = host.update(0.0, 1_000);
    assert!(host_events.iter().any(|e| matches!(
        e,
        SessionEvent::Consensus(ConsensusEvent::InvalidMoveDiscarded { .. })
    )));
}

fn admitted_trio() -> (Host, Guest, Guest) {
    let (host_t1, guest1_transport) = LoopbackTransport::pair();
    let (host_t2, guest2_transport) = LoopbackTransport::pair();

    let mut host = HostSession::new(
        "A1B2C3".to_string(),
        "host".to_string(),
        "Host".to_string(),
        3,
        new_game(&["host", "guest1", "guest2"]),
    );
    host.add_connection(host_t1);
    host.add_connection(host_t2);

    let mut guest1 = backbone_lib::GuestSession::new(
        "A1B2C3".to_string(),
        "guest1".to_string(),
        None,
        new_game(&["host", "guest1", "guest2"]),
        guest1_transport,
        Box::new(InMemorySessionStore::new()),
    );
    let mut guest2 = backbone_lib::GuestSession::new(
        "A1B2C3".to_string(),
        "guest2".to_string(),
        None,
        new_game(&["host", "guest1", "guest2"]),
        guest2_transport,
        Box::new(InMemorySessionStore::new()),
    );

    guest1.send_join_request("Guest1".to_string(), 1_000).unwrap();
    host.update(0.0, 1_000);
    guest1.update(0.0, 1_000);

    guest2.send_join_request("Guest2".to_string(), 1_000).unwrap();
    host.update(0.0, 1_000);
    guest2.update(0.0, 1_000);
    guest1.update(0.0, 1_000);

    (host, guest1, guest2)
}

#[test]
fn a_guest_proposal_is_relayed_to_the_third_peer_and_reaches_consensus() {
    let (mut host, mut guest1, mut guest2) = admitted_trio();
    assert_eq!(host.lobby.players.len(), 3);

    host.start_game("counter".to_string(), 1_000);
    guest1.update(0.0, 1_000);
    guest2.update(0.0, 1_000);

    // Turn 0 is host's. Host proposes; both guests validate and approve,
    // host collects both approvals and finalizes, advancing to guest1's turn.
    host.propose_move(Increment, 1_000);
    guest1.update(0.0, 1_000);
    guest2.update(0.0, 1_000);
    let host_events = host.update(0.0, 1_000);
    assert!(host_events.iter().any(|e| matches!(
        e,
        SessionEvent::Consensus(ConsensusEvent::MoveApplied { state }) if state.value == 1
    )));
    guest1.update(0.0, 1_000);
    guest2.update(0.0, 1_000);

    // Turn 1 is guest1's. guest1's propose-move reaches the host only
    // directly — the host must relay it to guest2 so guest2 can validate
    // and mail back its own approve-move, without which consensus would
    // deadlock since the host alone can never cover every connected player.
    guest1.propose_move(Increment, 1_000).unwrap();
    host.update(0.0, 1_000); // relays propose-move to guest2, records guest1's implicit approval
    let guest2_events = guest2.update(0.0, 1_000); // validates, mails approve-move back
    assert!(!guest2_events.iter().any(|e| matches!(
        e,
        SessionEvent::Consensus(ConsensusEvent::InvalidMoveDiscarded { .. })
    )));
    let host_events = host.update(0.0, 1_000); // collects guest2's approval, covers everyone, finalizes
    assert!(host_events.iter().any(|e| matches!(
        e,
        SessionEvent::Consensus(ConsensusEvent::MoveApplied { state }) if state.value == 2
    )));

    let guest1_events = guest1.update(0.0, 1_000);
    let guest2_events = guest2.update(0.0, 1_000);
    assert!(guest1_events.iter().any(|e| matches!(
        e,
        SessionEvent::Consensus(ConsensusEvent::MoveApplied { state }) if state.value == 2
    )));
    assert!(guest2_events.iter().any(|e| matches!(
        e,
        SessionEvent::Consensus(ConsensusEvent::MoveApplied { state }) if state.value == 2
    )));
}

#[test]
fn repeated_moves_eventually_end_the_game() {
    let (mut host, mut guest) = admitted_pair();
    host.start_game("counter".to_string(), 1_000);
    guest.update(0.0, 1_000);

    let mut all_events: Vec<SessionEvent<CounterState>> = Vec::new();

    // Turn 1: host proposes, guest approves, host finalizes, guest applies.
    host.propose_move(Increment, 1_000);
    guest.update(0.0, 1_000);
    all_events.extend(host.update(0.0, 1_000));
    all_events.extend(guest.update(0.0, 1_000));

    // Turn 2: guest proposes. With only two players, host's own validation
    // already covers everyone, so host finalizes without a separate
    // approve-move round trip.
    guest.propose_move(Increment, 1_000).unwrap();
    all_events.extend(host.update(0.0, 1_000));
    all_events.extend(guest.update(0.0, 1_000));

    // Turn 3: host proposes again; this third increment crosses the
    // adapter's win threshold.
    host.propose_move(Increment, 1_000);
    all_events.extend(guest.update(0.0, 1_000));
    all_events.extend(host.update(0.0, 1_000));
    all_events.extend(guest.update(0.0, 1_000));

    assert!(all_events.iter().any(|e| matches!(
        e,
        SessionEvent::Consensus(ConsensusEvent::GameEnded(GameOutcome::Win(winner))) if winner == "host"
    )));
}
