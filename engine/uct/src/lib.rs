//! Monte-Carlo tree search core for the goban engine.
//!
//! This crate is game-agnostic over the board: it drives any collaborator
//! implementing the `SearchState` trait (a board clone plus a playout
//! policy and an optional prior-knowledge oracle) and any board
//! implementing `goban_core::Board` for the player wrapper.
//!
//! # Overview
//!
//! A search runs visits in parallel worker threads. Each visit descends
//! from the shared root along the highest selection bound, expands a leaf
//! once it has enough visits, plays one or more simulations with the
//! playout policy and backs the result up the recorded path, optionally
//! updating the RAVE statistics of every sibling move seen in the
//! simulation.
//!
//! Workers share the tree without per-node locks: statistics are atomics
//! updated with relaxed ordering and child blocks are published with a
//! single release store. Each worker appends to its own bounded arena, so
//! node memory is sharded and capped.
//!
//! # Usage
//!
//! ```rust,ignore
//! use uct::{SearchConfig, UctSearch};
//!
//! let config = SearchConfig::for_board_size(9).with_threads(4);
//! let mut search = UctSearch::new(factory, config)?;
//! let mut sequence = Vec::new();
//! let value = search.search(100_000, 10.0, &mut sequence, &[], None, None);
//! println!("best {:?} value {value:.3}", sequence.first());
//! ```
//!
//! The `UctPlayer` wrapper adds time budgeting, subtree reuse between
//! consecutive moves, pondering, resignation and the early-pass rule.

pub mod config;
pub mod dump;
pub mod node;
pub mod player;
pub mod progress;
pub mod record;
pub mod search;
pub mod settings;
pub mod state;
pub mod stats;
pub mod tree;

pub use config::{
    ConfigError, EarlyAbortParam, LiveGfxMode, MoveSelect, PlayerConfig, PriorMode, SearchConfig,
    SearchMode,
};
pub use dump::{dump_tree, parse_dump, DumpError, DumpNode};
pub use node::{NodeRef, UctNode};
pub use player::{GeneratedMove, PlayerStats, RootFilter, UctPlayer};
pub use record::GameRecorder;
pub use search::{SearchStats, UctSearch};
pub use settings::{load_settings, PlayoutSettings, RecordSettings, Settings};
pub use state::{GameInfo, MoveInfo, PlayoutMove, PositionSync, SearchState, StateFactory};
pub use stats::{RunningMean, TerritoryStats};
pub use tree::{NodeArena, UctTree};
