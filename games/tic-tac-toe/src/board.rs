//! The game board: nine cells, two marks, turn order fixed by join order.

use protocol::PeerId;
use serde::{Deserialize, Serialize};

/// A placed stone. `X` belongs to whichever peer joined first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mark {
    X,
    O,
}

/// One cell coordinate to place a stone at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub row: usize,
    pub col: usize,
}

/// The complete shared state: the board, the fixed two-player roster in
/// turn order, and whose turn it is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub cells: [[Option<Mark>; 3]; 3],
    pub players: Vec<PeerId>,
    pub turn: usize,
}

impl Board {
    pub fn empty(players: &[PeerId]) -> Board {
        Board {
            cells: [[None; 3]; 3],
            players: players.to_vec(),
            turn: 0,
        }
    }

    pub fn mark_of(&self, player_index: usize) -> Mark {
        if player_index == 0 {
            Mark::X
        } else {
            Mark::O
        }
    }

    pub fn in_bounds(row: usize, col: usize) -> bool {
        row < 3 && col < 3
    }

    fn all_marked(&self, probe: Mark) -> bool {
        let line = |cells: [Option<Mark>; 3]| cells.iter().all(|c| *c == Some(probe));
        (0..3).any(|r| line(self.cells[r]))
            || (0..3).any(|c| line([self.cells[0][c], self.cells[1][c], self.cells[2][c]]))
            || line([self.cells[0][0], self.cells[1][1], self.cells[2][2]])
            || line([self.cells[0][2], self.cells[1][1], self.cells[2][0]])
    }

    /// The mark that has completed a line, if any.
    pub fn winning_mark(&self) -> Option<Mark> {
        if self.all_marked(Mark::X) {
            Some(Mark::X)
        } else if self.all_marked(Mark::O) {
            Some(Mark::O)
        } else {
            None
        }
    }

    pub fn is_full(&self) -> bool {
        self.cells.iter().flatten().all(|c| c.is_some())
    }
}
