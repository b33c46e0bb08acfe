//! Per-worker search state over a Go board.
//!
//! Implements the search core's `SearchState`: one board clone walked up
//! and down by the in-tree phase and the playout phase, a random playout
//! policy, the mercy rule, score-modified terminal evaluation and optional
//! per-point territory statistics.

use goban_core::{Board, Color, IllegalMove, Move, Ownership};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use uct::settings::PlayoutSettings;
use uct::state::{MoveInfo, PlayoutMove, PositionSync, SearchState, StateFactory};
use uct::stats::TerritoryStats;
use uct::PriorMode;

use crate::board::GoBoard;
use crate::policy::RandomPolicy;
use crate::prior;

/// Playout and evaluation knobs.
#[derive(Debug, Clone)]
pub struct GoStateParam {
    /// End a playout once one side is ahead by 30% of the board.
    pub mercy_rule: bool,
    /// Collect per-point ownership statistics.
    pub territory_statistics: bool,
    /// Weight of the score magnitude in terminal evaluations: 0 gives pure
    /// win/loss, larger values reward bigger wins.
    pub score_modification: f32,
}

impl Default for GoStateParam {
    fn default() -> Self {
        GoStateParam {
            mercy_rule: true,
            territory_statistics: false,
            score_modification: 0.02,
        }
    }
}

impl From<&PlayoutSettings> for GoStateParam {
    fn from(settings: &PlayoutSettings) -> Self {
        GoStateParam {
            mercy_rule: settings.mercy_rule,
            territory_statistics: settings.territory_statistics,
            score_modification: settings.score_modification,
        }
    }
}

/// One worker's Go state.
pub struct GoSearchState {
    base: GoBoard,
    board: GoBoard,
    policy: RandomPolicy,
    rng: ChaCha20Rng,
    param: GoStateParam,
    prior_mode: PriorMode,
    /// Consecutive passes generated in the current playout.
    playout_passes: u8,
    /// Black minus white stones, tracked during playouts for the mercy
    /// rule.
    stone_diff: i32,
    mercy_threshold: i32,
    mercy_triggered: bool,
    mercy_result: f32,
    inv_max_score: f32,
    territory: Option<TerritoryStats>,
    territory_scratch: Vec<Ownership>,
}

impl GoSearchState {
    pub fn new(board: GoBoard, param: GoStateParam, prior_mode: PriorMode, seed: u64) -> Self {
        let size = board.size();
        let territory = param
            .territory_statistics
            .then(|| TerritoryStats::new(size));
        GoSearchState {
            base: board.clone(),
            board,
            policy: RandomPolicy::new(seed),
            rng: ChaCha20Rng::seed_from_u64(seed ^ 0x706c_6179),
            param,
            prior_mode,
            playout_passes: 0,
            stone_diff: 0,
            mercy_threshold: 0,
            mercy_triggered: false,
            mercy_result: 0.5,
            inv_max_score: 1.0,
            territory,
            territory_scratch: vec![Ownership::Shared; size * size],
        }
    }

    pub fn board(&self) -> &GoBoard {
        &self.board
    }

    fn count_stone_diff(&self) -> i32 {
        let mut diff = 0;
        for p in 0..self.board.num_points() {
            match self.board.stone_at(p) {
                Some(Color::Black) => diff += 1,
                Some(Color::White) => diff -= 1,
                None => {}
            }
        }
        diff
    }

    fn check_mercy(&mut self) -> bool {
        if self.stone_diff >= self.mercy_threshold {
            self.mercy_triggered = true;
            self.mercy_result = if self.board.to_play().is_black() { 1.0 } else { 0.0 };
        } else if self.stone_diff <= -self.mercy_threshold {
            self.mercy_triggered = true;
            self.mercy_result = if self.board.to_play().is_black() { 0.0 } else { 1.0 };
        }
        self.mercy_triggered
    }
}

impl SearchState for GoSearchState {
    fn start_search(&mut self) {
        self.board = self.base.clone();
        let size = self.board.size();
        let max_score = (size * size) as f32 + self.board.komi().abs();
        self.inv_max_score = 1.0 / max_score;
        self.mercy_threshold = (0.3 * (size * size) as f32) as i32;
        if self.param.territory_statistics {
            match &mut self.territory {
                Some(territory) if territory.size() == size => territory.clear(),
                slot => *slot = Some(TerritoryStats::new(size)),
            }
            self.territory_scratch = vec![Ownership::Shared; size * size];
        }
    }

    fn game_start(&mut self) {
        self.mercy_triggered = false;
    }

    fn generate_moves(&mut self, out: &mut Vec<MoveInfo>) {
        if self.board.two_passes() {
            // Terminal; evaluated by area scoring.
            return;
        }
        let to_play = self.board.to_play();
        for p in 0..self.board.num_points() {
            if crate::policy::acceptable_point(&self.board, p, to_play) {
                out.push(MoveInfo::new(Move::from_index(p)));
            }
        }
        // A random move up front; the first point of a board scan is often
        // a bad corner move and would otherwise win every tie-break.
        if out.len() > 1 {
            let i = self.rng.gen_range(0..out.len());
            out.swap(0, i);
        }
        out.push(MoveInfo::new(Move::PASS));
    }

    fn apply_priors(&mut self, moves: &mut [MoveInfo]) {
        match self.prior_mode {
            PriorMode::None => {}
            PriorMode::Even => prior::even_priors(moves),
            PriorMode::Default => prior::default_priors(&self.board, moves),
        }
    }

    fn execute(&mut self, mv: Move) -> Result<(), IllegalMove> {
        self.board.play(mv)
    }

    fn take_back_in_tree(&mut self, n: usize) {
        for _ in 0..n {
            self.board.undo();
        }
    }

    fn start_playout(&mut self) {
        self.playout_passes = 0;
        self.mercy_triggered = false;
        self.stone_diff = self.count_stone_diff();
    }

    fn generate_playout_move(&mut self) -> PlayoutMove {
        if self.param.mercy_rule && self.check_mercy() {
            return PlayoutMove::finish();
        }
        let mv = self.policy.generate(&self.board);
        if mv.is_pass() {
            if self.playout_passes >= 2 {
                return PlayoutMove::finish();
            }
            self.playout_passes += 1;
            // Pass carries no positional information for RAVE.
            PlayoutMove::play_skip_rave(mv)
        } else {
            self.playout_passes = 0;
            PlayoutMove::play(mv)
        }
    }

    fn execute_playout(&mut self, mv: Move) -> Result<(), IllegalMove> {
        let mover = self.board.to_play();
        self.board.play(mv)?;
        if mv.is_point() {
            let captured = self.board.last_capture_count() as i32;
            if mover.is_black() {
                self.stone_diff += 1 + captured;
            } else {
                self.stone_diff -= 1 + captured;
            }
        }
        Ok(())
    }

    fn take_back_playout(&mut self, n: usize) {
        for _ in 0..n {
            self.board.undo();
        }
    }

    fn evaluate(&mut self) -> f32 {
        if self.param.mercy_rule && self.mercy_triggered {
            return self.mercy_result;
        }
        let territory = if self.param.territory_statistics {
            Some(&mut self.territory_scratch[..])
        } else {
            None
        };
        let mut score = self.board.score(territory);
        if let (true, Some(stats)) = (self.param.territory_statistics, &mut self.territory) {
            for (p, ownership) in self.territory_scratch.iter().enumerate() {
                let value = match ownership {
                    Ownership::Black => 1.0,
                    Ownership::White => 0.0,
                    Ownership::Shared => 0.5,
                };
                stats.add(p, value);
            }
        }
        if !self.board.to_play().is_black() {
            score = -score;
        }
        // Mostly win/loss, with a small slope towards bigger scores so the
        // search prefers clean wins.
        let s = self.param.score_modification;
        if score > 0.0 {
            (1.0 - s) + s * score * self.inv_max_score
        } else {
            s + s * score * self.inv_max_score
        }
    }

    fn to_play(&self) -> Color {
        self.board.to_play()
    }

    fn territory_statistics(&self) -> Option<&TerritoryStats> {
        self.territory.as_ref()
    }
}

impl PositionSync<GoBoard> for GoSearchState {
    fn synchronize(&mut self, board: &GoBoard) {
        self.base = board.clone();
    }
}

/// Creates one `GoSearchState` per worker, with decorrelated RNG streams.
#[derive(Debug, Clone)]
pub struct GoStateFactory {
    board: GoBoard,
    param: GoStateParam,
    prior_mode: PriorMode,
    seed: u64,
}

impl GoStateFactory {
    pub fn new(board: GoBoard, param: GoStateParam, prior_mode: PriorMode, seed: u64) -> Self {
        GoStateFactory {
            board,
            param,
            prior_mode,
            seed,
        }
    }
}

impl StateFactory for GoStateFactory {
    type State = GoSearchState;

    fn create(&self, thread_id: usize) -> GoSearchState {
        let seed = self
            .seed
            .wrapping_add((thread_id as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
        GoSearchState::new(self.board.clone(), self.param.clone(), self.prior_mode, seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state(size: usize) -> GoSearchState {
        GoSearchState::new(
            GoBoard::new(size, 6.5),
            GoStateParam::default(),
            PriorMode::None,
            11,
        )
    }

    #[test]
    fn test_generate_moves_has_pass_last() {
        let mut state = test_state(5);
        state.start_search();
        state.game_start();
        let mut moves = Vec::new();
        state.generate_moves(&mut moves);
        assert_eq!(moves.len(), 26);
        assert_eq!(moves.last().unwrap().mv, Move::PASS);
        assert!(moves[..25].iter().all(|m| m.mv.is_point()));
    }

    #[test]
    fn test_terminal_after_two_passes() {
        let mut state = test_state(5);
        state.start_search();
        state.game_start();
        state.execute(Move::PASS).unwrap();
        state.execute(Move::PASS).unwrap();
        let mut moves = Vec::new();
        state.generate_moves(&mut moves);
        assert!(moves.is_empty());
        state.take_back_in_tree(2);
    }

    #[test]
    fn test_evaluate_in_unit_range() {
        let mut state = test_state(5);
        state.start_search();
        state.game_start();
        state.start_playouts();
        state.start_playout();
        for _ in 0..40 {
            let decision = state.generate_playout_move();
            let Some(mv) = decision.mv else { break };
            state.execute_playout(mv).unwrap();
        }
        let eval = state.evaluate();
        assert!((0.0..=1.0).contains(&eval), "eval {eval} out of range");
    }

    #[test]
    fn test_playout_finishes() {
        let mut state = test_state(5);
        state.start_search();
        state.game_start();
        state.start_playouts();
        state.start_playout();
        let mut moves = 0;
        loop {
            let decision = state.generate_playout_move();
            let Some(mv) = decision.mv else { break };
            state.execute_playout(mv).unwrap();
            moves += 1;
            assert!(moves < 500, "playout did not terminate");
        }
    }

    #[test]
    fn test_mercy_rule_triggers() {
        let size = 5;
        let mut board = GoBoard::new(size, 0.0);
        // Black owns 9 stones, well past 30% of 25.
        for p in 0..9 {
            board.play(Move::from_index(p)).unwrap();
            board.set_to_play(Color::Black);
        }
        let mut state = GoSearchState::new(
            board,
            GoStateParam::default(),
            PriorMode::None,
            3,
        );
        state.start_search();
        state.game_start();
        state.start_playouts();
        state.start_playout();
        let decision = state.generate_playout_move();
        assert!(decision.mv.is_none(), "mercy rule should end the playout");
        let eval = state.evaluate();
        // Black is hopelessly ahead; the result is decided for black, and
        // black is the side to move.
        assert_eq!(eval, 1.0);
    }

    #[test]
    fn test_territory_statistics_collected() {
        let param = GoStateParam {
            territory_statistics: true,
            ..GoStateParam::default()
        };
        let mut state =
            GoSearchState::new(GoBoard::new(3, 0.0), param, PriorMode::None, 5);
        state.start_search();
        state.game_start();
        state.start_playouts();
        state.start_playout();
        for _ in 0..30 {
            let decision = state.generate_playout_move();
            let Some(mv) = decision.mv else { break };
            state.execute_playout(mv).unwrap();
        }
        state.evaluate();
        let territory = state.territory_statistics().unwrap();
        assert!(territory.point(0).is_defined());
    }

    #[test]
    fn test_synchronize_changes_base() {
        let mut state = test_state(5);
        let mut board = GoBoard::new(5, 6.5);
        board.play(Move::from_coords(2, 2, 5)).unwrap();
        state.synchronize(&board);
        state.start_search();
        assert_eq!(state.board().move_number(), 1);
    }

    #[test]
    fn test_even_priors_applied() {
        let mut state = GoSearchState::new(
            GoBoard::new(5, 6.5),
            GoStateParam::default(),
            PriorMode::Even,
            11,
        );
        state.start_search();
        state.game_start();
        let mut moves = Vec::new();
        state.generate_moves(&mut moves);
        state.apply_priors(&mut moves);
        assert!(moves.iter().all(|m| m.count > 0.0));
        assert!(moves.iter().all(|m| (m.value - 0.5).abs() < 1e-6));
    }
}
