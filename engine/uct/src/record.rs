//! Auto-save of simulated games.
//!
//! When enabled, every finished simulation is written as an independent
//! SGF-style record for offline training. Files are numbered
//! `{prefix}-{number}.sgf` inside the configured directory. The first move
//! of a record is always labelled `B`: sequences are stored from the
//! root side to move.

use std::fs;
use std::io::{self, Write as _};
use std::path::PathBuf;

use goban_core::Move;

#[derive(Debug)]
pub struct GameRecorder {
    dir: PathBuf,
    prefix: String,
    board_size: usize,
    counter: u64,
}

impl GameRecorder {
    /// Creates the target directory if needed.
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, board_size: usize) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(GameRecorder {
            dir,
            prefix: prefix.into(),
            board_size,
            counter: 0,
        })
    }

    pub fn games_recorded(&self) -> u64 {
        self.counter
    }

    /// Write one finished simulation. `eval` is the result in [0,1] from
    /// the perspective of the side that moves first in `sequence`.
    pub fn record(&mut self, sequence: &[Move], eval: f32) -> io::Result<()> {
        let path = self
            .dir
            .join(format!("{}-{:06}.sgf", self.prefix, self.counter));
        let mut file = fs::File::create(path)?;
        write!(
            file,
            "(;GM[1]FF[4]SZ[{}]RE[{:.3}]",
            self.board_size, eval
        )?;
        for (i, mv) in sequence.iter().enumerate() {
            let color = if i % 2 == 0 { 'B' } else { 'W' };
            write!(file, ";{}[{}]", color, sgf_coords(*mv, self.board_size))?;
        }
        writeln!(file, ")")?;
        self.counter += 1;
        Ok(())
    }
}

fn sgf_coords(mv: Move, size: usize) -> String {
    if mv.is_pass() || mv.is_null() {
        return String::new();
    }
    let (row, col) = mv.coords(size);
    let col_char = (b'a' + col as u8) as char;
    let row_char = (b'a' + row as u8) as char;
    format!("{col_char}{row_char}")
}
