//! Default root filter.
//!
//! Moves the search must never consider at the root. The stock filter
//! prunes moves that put a substantial own group into self-atari, the
//! cheapest class of tactical blunders that random playouts are too noisy
//! to punish reliably at the root.

use goban_core::{Board, Move};
use tracing::debug;

use uct::RootFilter;

use crate::board::GoBoard;

/// Filters self-ataris of groups of at least `min_stones` stones.
#[derive(Debug, Clone)]
pub struct DefaultRootFilter {
    min_stones: usize,
}

impl DefaultRootFilter {
    pub fn new() -> Self {
        DefaultRootFilter { min_stones: 3 }
    }

    pub fn with_min_stones(min_stones: usize) -> Self {
        DefaultRootFilter { min_stones }
    }

    fn is_bad_self_atari(&self, board: &GoBoard, mv: Move) -> bool {
        let mut scratch = board.clone();
        if scratch.play(mv).is_err() {
            return false;
        }
        let (stones, liberties) = scratch.group_info(mv.index());
        liberties == 1 && stones >= self.min_stones
    }
}

impl Default for DefaultRootFilter {
    fn default() -> Self {
        DefaultRootFilter::new()
    }
}

impl RootFilter<GoBoard> for DefaultRootFilter {
    fn filtered_moves(&mut self, board: &GoBoard) -> Vec<Move> {
        let mut legal = Vec::new();
        board.legal_moves(&mut legal);
        let filtered: Vec<Move> = legal
            .into_iter()
            .filter(|&mv| self.is_bad_self_atari(board, mv))
            .collect();
        if !filtered.is_empty() {
            debug!(count = filtered.len(), "root filter pruned self-ataris");
        }
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goban_core::Color;

    #[test]
    fn test_empty_board_filters_nothing() {
        let board = GoBoard::new(5, 0.0);
        let mut filter = DefaultRootFilter::new();
        assert!(filter.filtered_moves(&board).is_empty());
    }

    #[test]
    fn test_filters_big_self_atari() {
        let size = 5;
        let mut board = GoBoard::new(size, 0.0);
        // A black chain of three on the edge with white pressing on it;
        // extending at (3,0) would leave the grown chain in self-atari.
        for (row, col) in [(0usize, 0usize), (1, 0), (2, 0)] {
            board.play(Move::from_coords(row, col, size)).unwrap();
            board.set_to_play(Color::Black);
        }
        for (row, col) in [(0usize, 1usize), (1, 1), (2, 1), (3, 1)] {
            board.set_to_play(Color::White);
            board.play(Move::from_coords(row, col, size)).unwrap();
        }
        board.set_to_play(Color::Black);

        let mut filter = DefaultRootFilter::new();
        let filtered = filter.filtered_moves(&board);
        assert!(filtered.contains(&Move::from_coords(3, 0, size)));

        // With a higher stone threshold the move survives.
        let mut lenient = DefaultRootFilter::with_min_stones(6);
        assert!(!lenient
            .filtered_moves(&board)
            .contains(&Move::from_coords(3, 0, size)));
    }
}
