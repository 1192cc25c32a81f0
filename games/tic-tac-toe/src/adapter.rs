//! The [`backbone_lib::game_adapter::GameAdapter`] implementation: pure,
//! symmetric rules every peer evaluates identically before approving a move.

use crate::board::{Board, Mark, Placement};
use backbone_lib::game_adapter::{GameAdapter, GameOutcome};
use protocol::PeerId;

pub struct TicTacToe;

impl GameAdapter for TicTacToe {
    type State = Board;
    type Move = Placement;

    fn initial_state(&self, players: &[PeerId]) -> Board {
        Board::empty(players)
    }

    fn validate_move(&self, state: &Board, mv: &Placement, proposer: &PeerId) -> bool {
        if self.terminal(state).is_some() {
            return false;
        }
        if !Board::in_bounds(mv.row, mv.col) {
            return false;
        }
        if state.players.get(state.turn) != Some(proposer) {
            return false;
        }
        state.cells[mv.row][mv.col].is_none()
    }

    fn apply_move(&self, state: &Board, mv: &Placement) -> Board {
        let mut next = state.clone();
        next.cells[mv.row][mv.col] = Some(state.mark_of(state.turn));
        next.turn = (state.turn + 1) % state.players.len().max(1);
        next
    }

    fn terminal(&self, state: &Board) -> Option<GameOutcome> {
        if let Some(mark) = state.winning_mark() {
            let winner_index = match mark {
                Mark::X => 0,
                Mark::O => 1,
            };
            return state
                .players
                .get(winner_index)
                .cloned()
                .map(GameOutcome::Win);
        }
        if state.is_full() {
            return Some(GameOutcome::Draw);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn players() -> Vec<PeerId> {
        vec!["host".to_string(), "guest".to_string()]
    }

    #[test]
    fn only_the_player_whose_turn_it_is_may_move() {
        let adapter = TicTacToe;
        let state = adapter.initial_state(&players());
        let mv = Placement { row: 0, col: 0 };
        assert!(adapter.validate_move(&state, &mv, &"host".to_string()));
        assert!(!adapter.validate_move(&state, &mv, &"guest".to_string()));
    }

    #[test]
    fn cannot_place_on_an_occupied_cell() {
        let adapter = TicTacToe;
        let state = adapter.initial_state(&players());
        let mv = Placement { row: 0, col: 0 };
        let after = adapter.apply_move(&state, &mv);
        assert!(!adapter.validate_move(&after, &mv, &"guest".to_string()));
    }

    #[test]
    fn out_of_bounds_move_is_rejected() {
        let adapter = TicTacToe;
        let state = adapter.initial_state(&players());
        let mv = Placement { row: 5, col: 0 };
        assert!(!adapter.validate_move(&state, &mv, &"host".to_string()));
    }

    #[test]
    fn turn_alternates_after_every_move() {
        let adapter = TicTacToe;
        let state = adapter.initial_state(&players());
        let after = adapter.apply_move(&state, &Placement { row: 0, col: 0 });
        assert_eq!(after.turn, 1);
    }

    #[test]
    fn a_completed_row_ends_the_game_for_its_owner() {
        let adapter = TicTacToe;
        let mut state = adapter.initial_state(&players());
        let moves = [(0, 0), (1, 0), (0, 1), (1, 1), (0, 2)];
        for (row, col) in moves {
            let mv = Placement { row, col };
            state = adapter.apply_move(&state, &mv);
        }
        assert_eq!(
            adapter.terminal(&state),
            Some(GameOutcome::Win("host".to_string()))
        );
    }

    #[test]
    fn no_moves_are_legal_once_the_game_is_terminal() {
        let adapter = TicTacToe;
        let mut state = adapter.initial_state(&players());
        for (row, col) in [(0, 0), (1, 0), (0, 1), (1, 1), (0, 2)] {
            state = adapter.apply_move(&state, &Placement { row, col });
        }
        assert!(!adapter.validate_move(&state, &Placement { row: 2, col: 2 }, &"guest".to_string()));
    }
}
