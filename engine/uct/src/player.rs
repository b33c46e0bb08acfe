//! The player wrapper: one-shot "pick a move for the current position".
//!
//! Owns the game board and the search driver. Handles the time budget,
//! subtree reuse across consecutive moves, pondering, the resignation
//! threshold and the early-pass shortcut, and keeps per-player statistics.

use goban_core::{Board, Color, IllegalMove, Move};
use tracing::{debug, warn};

use crate::config::{ConfigError, EarlyAbortParam, PlayerConfig, SearchConfig, SearchMode};
use crate::search::{SearchStats, UctSearch};
use crate::state::{PositionSync, StateFactory};
use crate::stats::{RunningMean, Timer};
use crate::tree::UctTree;

/// Pass child must look at least this winning for an early pass.
const EARLY_PASS_VALUE: f32 = 0.9;
/// Ownership margin within which a point counts as settled.
const EARLY_PASS_TERRITORY_MARGIN: f32 = 0.25;
/// Wall-clock bound for a pondering search, seconds.
const PONDER_TIME: f64 = 3600.0;
/// Early-abort band used when early pass is enabled.
const EARLY_ABORT_REDUCTION: u64 = 3;

/// Outcome of `generate_move`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratedMove {
    Play(Move),
    Resign,
}

/// Statistics kept across `generate_move` calls.
#[derive(Debug, Default, Clone)]
pub struct PlayerStats {
    pub num_gen_move: u64,
    /// Fraction of the previous tree carried over per reuse attempt.
    pub reuse: RunningMean,
    pub games_per_second: RunningMean,
}

impl PlayerStats {
    pub fn clear(&mut self) {
        *self = PlayerStats::default();
    }

    pub fn log(&self) {
        debug!(
            num_gen_move = self.num_gen_move,
            reuse = %self.reuse,
            games_per_second = %self.games_per_second,
            "player statistics"
        );
    }
}

/// Moves the search must never consider at the root of the current
/// position (losing ladders, forbidden tactical blunders).
pub trait RootFilter<B>: Send {
    fn filtered_moves(&mut self, board: &B) -> Vec<Move>;
}

/// Player driving a `UctSearch` over its own board.
pub struct UctPlayer<B, F>
where
    B: Board,
    F: StateFactory,
    F::State: PositionSync<B>,
{
    board: B,
    search: UctSearch<F>,
    config: PlayerConfig,
    root_filter: Option<Box<dyn RootFilter<B>>>,
    /// Sibling tree used as the extraction target for subtree reuse. Kept
    /// as a member to avoid reallocating the arenas every move.
    init_tree: Option<UctTree>,
    /// A search tree exists and `pending_moves` leads from its root to the
    /// current position.
    tree_valid: bool,
    pending_moves: Vec<Move>,
    stats: PlayerStats,
}

impl<B, F> UctPlayer<B, F>
where
    B: Board,
    F: StateFactory,
    F::State: PositionSync<B>,
{
    pub fn new(
        board: B,
        factory: F,
        search_config: SearchConfig,
        config: PlayerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(UctPlayer {
            board,
            search: UctSearch::new(factory, search_config)?,
            config,
            root_filter: None,
            init_tree: None,
            tree_valid: false,
            pending_moves: Vec::new(),
            stats: PlayerStats::default(),
        })
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: PlayerConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if self.config.reuse_subtree && !config.reuse_subtree {
            // Free the extraction tree, it will not be used again.
            self.init_tree = None;
        }
        self.config = config;
        Ok(())
    }

    pub fn search(&self) -> &UctSearch<F> {
        &self.search
    }

    pub fn search_mut(&mut self) -> &mut UctSearch<F> {
        &mut self.search
    }

    pub fn set_root_filter(&mut self, filter: Box<dyn RootFilter<B>>) {
        self.root_filter = Some(filter);
    }

    pub fn stats(&self) -> &PlayerStats {
        &self.stats
    }

    pub fn clear_stats(&mut self) {
        self.stats.clear();
    }

    /// Advance the player's board by an externally played move.
    pub fn play_move(&mut self, mv: Move) -> Result<(), IllegalMove> {
        self.board.play(mv)?;
        if self.tree_valid {
            self.pending_moves.push(mv);
        }
        Ok(())
    }

    /// The board position changed in a way the tree cannot follow
    /// (new game, takeback, setup stones).
    pub fn on_board_change(&mut self) {
        self.tree_valid = false;
        self.pending_moves.clear();
    }

    /// Pick a move for `to_play`. `time_left` is the remaining clock time
    /// in seconds, ignored when `ignore_clock` is set.
    pub fn generate_move(&mut self, to_play: Color, time_left: Option<f64>) -> GeneratedMove {
        self.stats.num_gen_move += 1;
        self.board.set_to_play(to_play);
        let budget = self.time_budget(time_left);

        match self.config.search_mode {
            SearchMode::PlayoutPolicy => {
                self.search.synchronize_states(&self.board);
                match self.search.generate_policy_move() {
                    Some(mv) => GeneratedMove::Play(mv),
                    None => {
                        debug!("playout policy generated no move");
                        GeneratedMove::Play(Move::PASS)
                    }
                }
            }
            SearchMode::OnePly => {
                self.search.synchronize_states(&self.board);
                let (mv, value) = self.search.search_one_ply(self.config.max_games, budget);
                self.answer(mv, value, false)
            }
            SearchMode::Uct => {
                let (mv, value) = self.do_search(budget);
                self.answer(mv, value, true)
            }
        }
    }

    /// Search in the background on the opponent's time. Stopped from the
    /// outside by raising the search's abort flag; the grown tree is picked
    /// up by the next `generate_move` through subtree reuse.
    pub fn ponder(&mut self) {
        if !self.config.ponder || self.config.search_mode != SearchMode::Uct {
            return;
        }
        if !self.config.reuse_subtree {
            // The result could never be used.
            warn!("pondering needs reuse_subtree enabled");
            return;
        }
        debug!("ponder start");
        self.do_search(PONDER_TIME);
        debug!("ponder end");
    }

    fn answer(&self, mv: Option<Move>, value: f32, allow_early_pass: bool) -> GeneratedMove {
        let Some(mv) = mv else {
            warn!("search generated no move");
            return GeneratedMove::Play(Move::PASS);
        };
        if value < self.config.resign_threshold {
            return GeneratedMove::Resign;
        }
        if allow_early_pass && self.config.early_pass && mv != Move::PASS && self.can_pass_early() {
            debug!("early pass: board settled and pass looks winning");
            return GeneratedMove::Play(Move::PASS);
        }
        GeneratedMove::Play(mv)
    }

    /// Run the tree search for the current position, reusing the previous
    /// subtree when configured.
    fn do_search(&mut self, mut budget: f64) -> (Option<Move>, f32) {
        let use_init = if self.config.reuse_subtree {
            let timer = Timer::start();
            let found = self.find_init_tree(budget);
            budget = (budget - timer.elapsed()).max(0.0);
            found
        } else {
            false
        };

        self.search.synchronize_states(&self.board);
        let filter = if self.config.use_root_filter {
            match &mut self.root_filter {
                Some(filter) => filter.filtered_moves(&self.board),
                None => Vec::new(),
            }
        } else {
            Vec::new()
        };
        let early_abort = self.config.early_pass.then(|| EarlyAbortParam {
            threshold: EARLY_PASS_VALUE,
            min_games: (self.config.max_games / 20).max(1) as f32,
            reduction_factor: EARLY_ABORT_REDUCTION,
        });

        let mut sequence = Vec::new();
        let init_tree = if use_init { self.init_tree.as_mut() } else { None };
        let value = self.search.search(
            self.config.max_games,
            budget,
            &mut sequence,
            &filter,
            init_tree,
            early_abort,
        );
        self.stats
            .games_per_second
            .add(self.search.stats().games_per_second as f32);
        self.tree_valid = true;
        self.pending_moves.clear();
        (sequence.first().copied(), value)
    }

    /// Extract the subtree reached by the moves played since the previous
    /// search into the reuse tree. Returns whether a non-trivial subtree
    /// was found.
    fn find_init_tree(&mut self, max_time: f64) -> bool {
        if !self.tree_valid {
            debug!("no tree to reuse exists");
            return false;
        }
        let search_tree = self.search.tree();
        let init_tree = match &mut self.init_tree {
            Some(tree)
                if tree.max_nodes() == search_tree.max_nodes()
                    && tree.num_allocators() == search_tree.num_allocators() =>
            {
                tree
            }
            slot => slot.insert(self.search.create_sibling_tree()),
        };

        let abort = self.search.abort_flag();
        let found = search_tree.extract_for_moves(
            init_tree,
            &self.pending_moves,
            max_time,
            Some(abort.as_ref()),
        );
        if !found {
            debug!("cannot reuse tree (position not in previous tree)");
            self.stats.reuse.add(0.0);
            return false;
        }
        let reused = init_tree.num_nodes();
        let total = search_tree.num_nodes();
        if reused <= 1 || total <= 1 {
            debug!("subtree to reuse is empty");
            self.stats.reuse.add(0.0);
            return false;
        }
        let ratio = reused as f32 / total as f32;
        debug!(
            reused,
            total,
            percent = (ratio * 100.0) as u32,
            "reusing subtree"
        );
        self.stats.reuse.add(ratio);
        true
    }

    /// Pass is justified: the pass child looks clearly winning and every
    /// point is settled in the territory statistics.
    fn can_pass_early(&self) -> bool {
        let tree = self.search.tree();
        let Some(pass_child) = tree.find_child(tree.root(), Move::PASS) else {
            return false;
        };
        if !pass_child.has_mean() || pass_child.mean() < EARLY_PASS_VALUE {
            return false;
        }
        self.search
            .territory_statistics()
            .is_some_and(|t| t.all_decided(EARLY_PASS_TERRITORY_MARGIN))
    }

    fn time_budget(&self, time_left: Option<f64>) -> f64 {
        match time_left {
            Some(remaining) if !self.config.ignore_clock => {
                let size = self.board.size();
                let vacant = (size * size).saturating_sub(self.board.move_number());
                // Expect to play about half the vacant points, never fewer
                // than ten more moves.
                let estimated_moves = (vacant / 2).max(10) as f64;
                (remaining / estimated_moves).min(self.config.max_time)
            }
            _ => self.config.max_time,
        }
    }

    /// Statistics of the most recent search.
    pub fn search_stats(&self) -> &SearchStats {
        self.search.stats()
    }
}
