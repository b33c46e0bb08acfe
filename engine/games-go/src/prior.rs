//! Prior knowledge for freshly expanded nodes.
//!
//! Seeds every child with a value and a virtual visit count before the
//! first real simulation arrives. The default heuristic is cheap and
//! local: captures look good, moves near the previous stone look decent,
//! the pass move looks bad until the endgame.

use goban_core::{Board, Move};
use uct::state::MoveInfo;

use crate::board::GoBoard;

/// Virtual visits behind every even prior.
pub const EVEN_PRIOR_COUNT: f32 = 30.0;
/// Virtual visits behind the default heuristic priors.
pub const DEFAULT_PRIOR_COUNT: f32 = 18.0;

const CAPTURE_VALUE: f32 = 0.7;
const NEAR_LAST_MOVE_VALUE: f32 = 0.6;
const NEUTRAL_VALUE: f32 = 0.5;
const PASS_VALUE: f32 = 0.1;

/// Every move starts as an even fifty-fifty guess.
pub fn even_priors(moves: &mut [MoveInfo]) {
    for info in moves {
        *info = MoveInfo::with_prior(info.mv, NEUTRAL_VALUE, EVEN_PRIOR_COUNT);
    }
}

/// The default local heuristic.
pub fn default_priors(board: &GoBoard, moves: &mut [MoveInfo]) {
    let last = board.last_point();
    let size = board.size();
    for info in moves {
        let value = if info.mv.is_pass() {
            PASS_VALUE
        } else if board.would_capture(info.mv) {
            CAPTURE_VALUE
        } else if last.is_some_and(|l| is_near(l, info.mv.index(), size)) {
            NEAR_LAST_MOVE_VALUE
        } else {
            NEUTRAL_VALUE
        };
        *info = MoveInfo::with_prior(info.mv, value, DEFAULT_PRIOR_COUNT);
    }
}

/// Chebyshev distance at most one.
fn is_near(a: usize, b: usize, size: usize) -> bool {
    let (ar, ac) = (a / size, a % size);
    let (br, bc) = (b / size, b % size);
    ar.abs_diff(br) <= 1 && ac.abs_diff(bc) <= 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_priors() {
        let mut moves = vec![
            MoveInfo::new(Move::from_index(0)),
            MoveInfo::new(Move::PASS),
        ];
        even_priors(&mut moves);
        for info in &moves {
            assert_eq!(info.count, EVEN_PRIOR_COUNT);
            assert_eq!(info.value, NEUTRAL_VALUE);
            assert_eq!(info.rave_count, EVEN_PRIOR_COUNT);
        }
    }

    #[test]
    fn test_default_priors_rank_moves() {
        let size = 3;
        let mut board = GoBoard::new(size, 0.0);
        board.play(Move::from_coords(0, 0, size)).unwrap(); // B
        board.play(Move::from_coords(2, 2, size)).unwrap(); // W
        board.play(Move::from_coords(1, 2, size)).unwrap(); // B
        // White to move; (1,1) is adjacent to the last stone (1,2).
        let mut moves = vec![
            MoveInfo::new(Move::from_coords(1, 1, size)),
            MoveInfo::new(Move::PASS),
        ];
        default_priors(&board, &mut moves);
        assert_eq!(moves[0].value, NEAR_LAST_MOVE_VALUE);
        assert_eq!(moves[1].value, PASS_VALUE);
        assert!(moves.iter().all(|m| m.count == DEFAULT_PRIOR_COUNT));
    }

    #[test]
    fn test_capture_prior() {
        let size = 3;
        let mut board = GoBoard::new(size, 0.0);
        board.play(Move::from_coords(0, 0, size)).unwrap(); // B
        board.play(Move::from_coords(1, 0, size)).unwrap(); // W
        board.play(Move::from_coords(2, 0, size)).unwrap(); // B
        board.play(Move::from_coords(2, 2, size)).unwrap(); // W
        // Black capturing at (1,1)? No: white (1,0) has liberty (1,1) only,
        // so black playing (1,1) captures it.
        let mut moves = vec![MoveInfo::new(Move::from_coords(1, 1, size))];
        default_priors(&board, &mut moves);
        assert_eq!(moves[0].value, CAPTURE_VALUE);
    }
}
