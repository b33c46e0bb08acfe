//! Per-worker search state.
//!
//! Every worker owns one `SearchState`: a board clone, an RNG, a playout
//! policy and whatever scratch the game needs. The driver drives it through
//! the trait below (generate moves at a leaf, execute moves down the tree,
//! run playouts, evaluate the final position) and records the visit in a
//! `GameInfo`.
//!
//! The prior-knowledge oracle is a method on the state (`apply_priors`)
//! rather than a separate object, because every useful oracle needs the
//! state's board anyway. It is only consulted at expansion.

use goban_core::{Color, IllegalMove, Move};

use crate::stats::TerritoryStats;

/// A generated move plus optional prior-knowledge seeding.
///
/// `count == 0.0` means "no prior"; the child starts cold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveInfo {
    pub mv: Move,
    pub value: f32,
    pub count: f32,
    pub rave_value: f32,
    pub rave_count: f32,
}

impl MoveInfo {
    pub fn new(mv: Move) -> Self {
        MoveInfo {
            mv,
            value: 0.0,
            count: 0.0,
            rave_value: 0.0,
            rave_count: 0.0,
        }
    }

    /// A move seeded with a prior value and count for both the move and the
    /// RAVE statistics.
    pub fn with_prior(mv: Move, value: f32, count: f32) -> Self {
        MoveInfo {
            mv,
            value,
            count,
            rave_value: value,
            rave_count: count,
        }
    }
}

/// One playout-policy decision.
#[derive(Debug, Clone, Copy)]
pub struct PlayoutMove {
    /// `None` ends the playout (two passes, mercy rule).
    pub mv: Option<Move>,
    /// Suppress RAVE updates for this move (e.g. playout passes).
    pub skip_rave: bool,
}

impl PlayoutMove {
    pub fn play(mv: Move) -> Self {
        PlayoutMove {
            mv: Some(mv),
            skip_rave: false,
        }
    }

    pub fn play_skip_rave(mv: Move) -> Self {
        PlayoutMove {
            mv: Some(mv),
            skip_rave: true,
        }
    }

    pub fn finish() -> Self {
        PlayoutMove {
            mv: None,
            skip_rave: false,
        }
    }
}

/// The game-side collaborator of one search worker.
///
/// `execute`/`take_back_in_tree` operate on the in-tree board,
/// `execute_playout`/`take_back_playout` on the playout phase; for a simple
/// state both can share one board. Within one visit the driver guarantees
/// the usual bracketing: `game_start`, in-tree moves, `start_playouts`,
/// then per playout `start_playout` .. `end_playout`, then the take-backs
/// in reverse order.
pub trait SearchState: Send {
    /// A new search begins on the state's current position.
    fn start_search(&mut self);

    /// A new visit begins at the root.
    fn game_start(&mut self);

    /// Generate the legal moves of the current in-tree position. An empty
    /// list marks a terminal position.
    fn generate_moves(&mut self, out: &mut Vec<MoveInfo>);

    /// Seed prior knowledge onto freshly generated moves. Called once per
    /// expansion; must be side-effect-free with respect to the tree.
    fn apply_priors(&mut self, moves: &mut [MoveInfo]);

    /// Play a move during descent.
    fn execute(&mut self, mv: Move) -> Result<(), IllegalMove>;

    fn take_back_in_tree(&mut self, n: usize);

    /// All playouts of this visit are about to run.
    fn start_playouts(&mut self) {}

    fn start_playout(&mut self) {}

    fn generate_playout_move(&mut self) -> PlayoutMove;

    fn execute_playout(&mut self, mv: Move) -> Result<(), IllegalMove>;

    fn take_back_playout(&mut self, n: usize);

    fn end_playout(&mut self) {}

    /// Evaluate the current position in [0,1] from the perspective of the
    /// player to move.
    fn evaluate(&mut self) -> f32;

    /// Side to play at the current position.
    fn to_play(&self) -> Color;

    /// Per-point ownership statistics, when the state collects them.
    fn territory_statistics(&self) -> Option<&TerritoryStats> {
        None
    }
}

/// Creates one `SearchState` per worker thread.
pub trait StateFactory {
    type State: SearchState;

    fn create(&self, thread_id: usize) -> Self::State;
}

/// States that can re-synchronise to an external board between searches.
/// The player wrapper uses this to push its position into every worker.
pub trait PositionSync<B>: SearchState {
    fn synchronize(&mut self, board: &B);
}

/// Record of one visit: the in-tree path and the playout sequences hanging
/// off its leaf.
#[derive(Debug, Default)]
pub struct GameInfo {
    /// Nodes touched during descent, root first.
    pub nodes: Vec<crate::node::NodeRef>,
    /// Moves of the in-tree path; `nodes.len() == in_tree_sequence.len() + 1`.
    pub in_tree_sequence: Vec<Move>,
    /// Full move sequence (in-tree prefix plus playout) per playout.
    pub sequences: Vec<Vec<Move>>,
    /// RAVE suppression flags, aligned with `sequences`.
    pub skip_rave: Vec<Vec<bool>>,
    /// Result per playout, in [0,1] from the root side-to-move perspective;
    /// `None` when the playout was aborted and must not update statistics.
    pub evals: Vec<Option<f32>>,
}

impl GameInfo {
    pub fn clear(&mut self, num_playouts: usize) {
        self.nodes.clear();
        self.in_tree_sequence.clear();
        self.sequences.resize(num_playouts, Vec::new());
        self.skip_rave.resize(num_playouts, Vec::new());
        self.evals.resize(num_playouts, None);
        for seq in &mut self.sequences {
            seq.clear();
        }
        for skip in &mut self.skip_rave {
            skip.clear();
        }
        for eval in &mut self.evals {
            *eval = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_info_prior() {
        let info = MoveInfo::with_prior(Move::from_index(4), 0.6, 20.0);
        assert_eq!(info.count, 20.0);
        assert_eq!(info.rave_count, 20.0);
        assert!((info.rave_value - 0.6).abs() < 1e-6);

        let cold = MoveInfo::new(Move::PASS);
        assert_eq!(cold.count, 0.0);
    }

    #[test]
    fn test_game_info_clear_resizes() {
        let mut info = GameInfo::default();
        info.clear(2);
        assert_eq!(info.sequences.len(), 2);
        assert_eq!(info.evals.len(), 2);

        info.sequences[0].push(Move::PASS);
        info.evals[0] = Some(1.0);
        info.clear(1);
        assert_eq!(info.sequences.len(), 1);
        assert!(info.sequences[0].is_empty());
        assert!(info.evals[0].is_none());
    }
}
