//! Core traits and types for the goban search engine
//!
//! This crate provides the narrow interfaces the search core consumes:
//! - `Move` / `Color`: compact move and player identifiers
//! - `Board`: capability trait for the rules collaborator (play, undo,
//!   legality, scoring)
//! - `IllegalMove`: the error a board signals when asked to play an
//!   illegal move
//!
//! The search itself lives in the `uct` crate; concrete boards live in game
//! crates such as `games-go`.

pub mod board;
pub mod moves;

pub use board::{Board, IllegalMove, Ownership};
pub use moves::{Color, Move, MAX_BOARD_SIZE};
