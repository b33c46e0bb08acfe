//! Go game implementation for the goban search engine.
//!
//! Provides the concrete collaborators the search core is polymorphic
//! over: a compact Go board with capture, suicide ban, simple ko and area
//! scoring; a uniform-random playout policy; the default prior-knowledge
//! heuristic; and the default root filter.
//!
//! # Usage
//!
//! ```rust,ignore
//! use games_go::{GoBoard, GoStateFactory, GoStateParam};
//! use uct::{PriorMode, SearchConfig, UctSearch};
//!
//! let board = GoBoard::new(9, 6.5);
//! let factory = GoStateFactory::new(board, GoStateParam::default(), PriorMode::Default, 42);
//! let mut search = UctSearch::new(factory, SearchConfig::for_board_size(9))?;
//! ```

pub mod board;
pub mod filter;
pub mod policy;
pub mod prior;
pub mod state;

pub use board::GoBoard;
pub use filter::DefaultRootFilter;
pub use policy::RandomPolicy;
pub use state::{GoSearchState, GoStateFactory, GoStateParam};
