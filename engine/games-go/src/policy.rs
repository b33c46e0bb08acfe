//! Uniform-random playout policy.
//!
//! Picks a random legal point that does not fill one of the mover's own
//! simple eyes, and passes when none is left. This is the baseline policy
//! the search's convergence properties are stated against; stronger
//! pattern-based policies plug in at the same seam.

use goban_core::{Board, Color, Move};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::board::GoBoard;

#[derive(Debug, Clone)]
pub struct RandomPolicy {
    rng: ChaCha20Rng,
    candidates: Vec<usize>,
}

impl RandomPolicy {
    pub fn new(seed: u64) -> Self {
        RandomPolicy {
            rng: ChaCha20Rng::seed_from_u64(seed),
            candidates: Vec::new(),
        }
    }

    /// Generate a playout move for the side to play. Returns `Move::PASS`
    /// when no acceptable point move exists.
    pub fn generate(&mut self, board: &GoBoard) -> Move {
        let to_play = board.to_play();
        self.candidates.clear();
        for p in 0..board.num_points() {
            if board.is_empty_point(p)
                && !board.is_simple_eye(p, to_play)
                && board.is_legal(Move::from_index(p))
            {
                self.candidates.push(p);
            }
        }
        if self.candidates.is_empty() {
            return Move::PASS;
        }
        let i = self.rng.gen_range(0..self.candidates.len());
        Move::from_index(self.candidates[i])
    }

    /// Moves the policy would consider at the current position; used by
    /// the prior-knowledge heuristic.
    pub fn candidates(&mut self, board: &GoBoard, out: &mut Vec<Move>) {
        let to_play = board.to_play();
        out.clear();
        for p in 0..board.num_points() {
            if board.is_empty_point(p)
                && !board.is_simple_eye(p, to_play)
                && board.is_legal(Move::from_index(p))
            {
                out.push(Move::from_index(p));
            }
        }
    }
}

/// Eye-filling check reused by move generation: a point move is acceptable
/// when legal and not a simple own eye.
pub fn acceptable_point(board: &GoBoard, p: usize, to_play: Color) -> bool {
    board.is_empty_point(p)
        && !board.is_simple_eye(p, to_play)
        && board.is_legal(Move::from_index(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generates_legal_moves() {
        let board = GoBoard::new(5, 0.0);
        let mut policy = RandomPolicy::new(1);
        for _ in 0..20 {
            let mv = policy.generate(&board);
            assert!(mv.is_point());
            assert!(board.is_legal(mv));
        }
    }

    #[test]
    fn test_passes_when_only_eyes_remain() {
        let size = 3;
        let mut board = GoBoard::new(size, 0.0);
        // Black fills everything except the corner eyes (0,0) and (2,2).
        let black = [(0usize, 1usize), (1, 0), (1, 1), (1, 2), (2, 1), (0, 2), (2, 0)];
        for (row, col) in black {
            board.play(Move::from_coords(row, col, size)).unwrap();
            board.set_to_play(Color::Black);
        }
        let mut policy = RandomPolicy::new(2);
        assert_eq!(policy.generate(&board), Move::PASS);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let board = GoBoard::new(9, 0.0);
        let mut a = RandomPolicy::new(7);
        let mut b = RandomPolicy::new(7);
        for _ in 0..10 {
            assert_eq!(a.generate(&board), b.generate(&board));
        }
    }
}
