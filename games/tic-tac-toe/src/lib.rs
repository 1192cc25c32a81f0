//! A minimal, pure-logic `GameAdapter` implementation used as a worked
//! example and as the target of consensus-engine integration tests.

pub mod adapter;
pub mod board;

pub use adapter::TicTacToe;
pub use board::{Board, Mark, Placement};
