//! Search and player configuration.
//!
//! `SearchConfig` collects the knobs of the search driver, `PlayerConfig`
//! those of the move-generation wrapper. Both deserialize from the settings
//! file (see `settings.rs`) and validate at set-time: an inconsistent
//! combination is rejected before a search ever starts.

use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;

/// Rejected parameter combinations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be at least 1")]
    ZeroValue { name: &'static str },

    #[error("{name} must be non-negative")]
    Negative { name: &'static str },

    #[error("{name} must be within [0, 1], got {value}")]
    OutOfUnitRange { name: &'static str, value: f64 },

    #[error("rave_weight_final ({final_weight}) must be at least rave_weight_initial ({initial_weight})")]
    RaveWeights {
        initial_weight: f32,
        final_weight: f32,
    },

    #[error("unknown {kind} `{value}`")]
    UnknownVariant { kind: &'static str, value: String },
}

/// How the player picks the move to answer with after a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveSelect {
    /// Highest mean value.
    Value,
    /// Highest visit count (the default; robust against value noise).
    #[default]
    Count,
    /// Highest selection bound.
    Bound,
    /// Highest RAVE-blended value estimate.
    Estimate,
}

impl FromStr for MoveSelect {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "value" => Ok(MoveSelect::Value),
            "count" => Ok(MoveSelect::Count),
            "bound" => Ok(MoveSelect::Bound),
            "estimate" => Ok(MoveSelect::Estimate),
            _ => Err(ConfigError::UnknownVariant {
                kind: "move_select",
                value: s.to_string(),
            }),
        }
    }
}

/// How the player generates a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Full tree search.
    #[default]
    Uct,
    /// Ask the playout policy directly, no tree.
    PlayoutPolicy,
    /// One-ply Monte-Carlo sampling of every root move.
    OnePly,
}

impl FromStr for SearchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uct" => Ok(SearchMode::Uct),
            "playout_policy" => Ok(SearchMode::PlayoutPolicy),
            "one_ply" => Ok(SearchMode::OnePly),
            _ => Err(ConfigError::UnknownVariant {
                kind: "search_mode",
                value: s.to_string(),
            }),
        }
    }
}

/// Which prior-knowledge oracle seeds freshly expanded children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorMode {
    /// No seeding; children start cold.
    None,
    /// Every move starts at 0.5 with a fixed count.
    Even,
    /// The game crate's heuristic oracle.
    #[default]
    Default,
}

impl FromStr for PriorMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(PriorMode::None),
            "even" => Ok(PriorMode::Even),
            "default" => Ok(PriorMode::Default),
            _ => Err(ConfigError::UnknownVariant {
                kind: "prior_knowledge",
                value: s.to_string(),
            }),
        }
    }
}

/// Live-progress emission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveGfxMode {
    #[default]
    None,
    /// Per-move values and counts at the root.
    Counts,
    /// The current principal variation.
    Sequence,
}

impl FromStr for LiveGfxMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(LiveGfxMode::None),
            "counts" => Ok(LiveGfxMode::Counts),
            "sequence" => Ok(LiveGfxMode::Sequence),
            _ => Err(ConfigError::UnknownVariant {
                kind: "live_gfx",
                value: s.to_string(),
            }),
        }
    }
}

/// Stop-early band supplied by the player: once the root mean exceeds
/// `threshold` after `min_games`, the remaining game and time budgets are
/// divided by `reduction_factor`.
#[derive(Debug, Clone, Copy)]
pub struct EarlyAbortParam {
    pub threshold: f32,
    pub min_games: f32,
    pub reduction_factor: u64,
}

impl Default for EarlyAbortParam {
    fn default() -> Self {
        EarlyAbortParam {
            threshold: 0.85,
            min_games: 1000.0,
            reduction_factor: 3,
        }
    }
}

/// Driver configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Cumulative simulation budget per search.
    pub max_games: u64,
    /// Node budget, split evenly across the worker allocators.
    pub max_nodes: usize,
    /// Wall-clock budget per search, seconds.
    pub max_time: f64,
    pub num_threads: usize,
    /// Simulations per visit; results are averaged.
    pub num_playouts: usize,
    /// Visits a leaf needs before it is expanded.
    pub expand_threshold: u32,
    /// Score assigned to unvisited children, forcing one trial each.
    pub first_play_urgency: f32,
    /// Exploration coefficient; 0 disables the bias term.
    pub bias_constant: f32,
    pub no_bias_term: bool,
    pub rave: bool,
    /// Skip a RAVE update when the opponent played the same point earlier.
    pub rave_check_same: bool,
    pub rave_weight_initial: f32,
    pub rave_weight_final: f32,
    /// Weight RAVE updates by how early the move occurred.
    pub rave_weight_updates: bool,
    /// Relaxed-memory tree updates; false serialises tree access with a
    /// global lock released around playouts.
    pub lock_free: bool,
    pub virtual_loss: bool,
    pub move_select: MoveSelect,
    /// In-tree plus playout move cap per simulation.
    pub max_game_length: usize,
    pub live_gfx: LiveGfxMode,
    /// Games between live-progress snapshots.
    pub live_gfx_interval: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            max_games: 100_000,
            max_nodes: 4_000_000,
            max_time: 1e10,
            num_threads: 1,
            num_playouts: 1,
            expand_threshold: 1,
            first_play_urgency: 1.0,
            bias_constant: 0.7,
            no_bias_term: false,
            rave: true,
            rave_check_same: false,
            rave_weight_initial: 1.0,
            rave_weight_final: 5000.0,
            rave_weight_updates: true,
            lock_free: false,
            virtual_loss: false,
            move_select: MoveSelect::Count,
            max_game_length: usize::MAX,
            live_gfx: LiveGfxMode::None,
            live_gfx_interval: 5000,
        }
    }
}

impl SearchConfig {
    /// Defaults tuned for a given board size. The bias term helps on small
    /// boards and hurts on large ones.
    pub fn for_board_size(size: usize) -> Self {
        let mut config = SearchConfig {
            max_game_length: 3 * size * size,
            ..SearchConfig::default()
        };
        if size <= 13 {
            config.no_bias_term = false;
            config.bias_constant = 0.02;
        } else {
            config.no_bias_term = true;
        }
        config
    }

    /// Small budgets for unit tests.
    pub fn for_testing() -> Self {
        SearchConfig {
            max_games: 1000,
            max_nodes: 20_000,
            max_game_length: 400,
            ..SearchConfig::default()
        }
    }

    pub fn with_max_games(mut self, n: u64) -> Self {
        self.max_games = n;
        self
    }

    pub fn with_max_nodes(mut self, n: usize) -> Self {
        self.max_nodes = n;
        self
    }

    pub fn with_threads(mut self, n: usize) -> Self {
        self.num_threads = n;
        self
    }

    pub fn with_expand_threshold(mut self, n: u32) -> Self {
        self.expand_threshold = n;
        self
    }

    pub fn with_rave(mut self, enable: bool) -> Self {
        self.rave = enable;
        self
    }

    pub fn with_move_select(mut self, move_select: MoveSelect) -> Self {
        self.move_select = move_select;
        self
    }

    pub fn with_lock_free(mut self, enable: bool) -> Self {
        self.lock_free = enable;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_threads == 0 {
            return Err(ConfigError::ZeroValue { name: "num_threads" });
        }
        if self.max_nodes == 0 {
            return Err(ConfigError::ZeroValue { name: "max_nodes" });
        }
        if self.num_playouts == 0 {
            return Err(ConfigError::ZeroValue { name: "num_playouts" });
        }
        if self.expand_threshold == 0 {
            return Err(ConfigError::ZeroValue {
                name: "expand_threshold",
            });
        }
        if self.live_gfx_interval == 0 {
            return Err(ConfigError::ZeroValue {
                name: "live_gfx_interval",
            });
        }
        if self.max_time < 0.0 {
            return Err(ConfigError::Negative { name: "max_time" });
        }
        if self.bias_constant < 0.0 {
            return Err(ConfigError::Negative {
                name: "bias_constant",
            });
        }
        if self.rave_weight_initial <= 0.0 {
            return Err(ConfigError::ZeroValue {
                name: "rave_weight_initial",
            });
        }
        if self.rave_weight_final < self.rave_weight_initial {
            return Err(ConfigError::RaveWeights {
                initial_weight: self.rave_weight_initial,
                final_weight: self.rave_weight_final,
            });
        }
        Ok(())
    }
}

/// Player-wrapper configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub search_mode: SearchMode,
    pub prior_knowledge: PriorMode,
    /// Use the fixed `max_time` budget and ignore the game clock.
    pub ignore_clock: bool,
    /// Think on the opponent's time. Needs `reuse_subtree`.
    pub ponder: bool,
    /// Carry the subtree under the played moves into the next search.
    pub reuse_subtree: bool,
    pub use_root_filter: bool,
    /// Resign when the root value drops below this, from the side to play.
    pub resign_threshold: f32,
    /// Pass early when the pass move looks winning and the territory
    /// statistics show a settled board.
    pub early_pass: bool,
    pub max_games: u64,
    pub max_time: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            search_mode: SearchMode::Uct,
            prior_knowledge: PriorMode::Default,
            ignore_clock: true,
            ponder: false,
            reuse_subtree: false,
            use_root_filter: true,
            resign_threshold: 0.03,
            early_pass: false,
            max_games: 100_000,
            max_time: 1e10,
        }
    }
}

impl PlayerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.resign_threshold) {
            return Err(ConfigError::OutOfUnitRange {
                name: "resign_threshold",
                value: self.resign_threshold as f64,
            });
        }
        if self.max_time < 0.0 {
            return Err(ConfigError::Negative { name: "max_time" });
        }
        Ok(())
    }
}
