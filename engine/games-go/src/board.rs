//! A compact Go board.
//!
//! Supports capture, the suicide ban, simple ko and area scoring, which is
//! everything the search core consumes. Undo restores the position exactly
//! from a history stack, so a search worker can walk up and down one clone
//! of the board. Positional superko is not tracked; playouts terminate on
//! two passes, the move cap or the mercy rule before cycles matter.

use std::sync::Arc;

use goban_core::{Board, Color, IllegalMove, Move, Ownership, MAX_BOARD_SIZE};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

const EMPTY: u8 = 0;
const BLACK: u8 = 1;
const WHITE: u8 = 2;

fn color_bits(color: Color) -> u8 {
    match color {
        Color::Black => BLACK,
        Color::White => WHITE,
    }
}

/// Position hashing keys, shared between all clones of a board.
#[derive(Debug)]
struct Zobrist {
    black: Vec<u64>,
    white: Vec<u64>,
    white_to_play: u64,
}

impl Zobrist {
    fn new(num_points: usize) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(0x676f_6261_6e5f_6862);
        Zobrist {
            black: (0..num_points).map(|_| rng.gen()).collect(),
            white: (0..num_points).map(|_| rng.gen()).collect(),
            white_to_play: rng.gen(),
        }
    }

    fn stone(&self, p: usize, color: u8) -> u64 {
        match color {
            BLACK => self.black[p],
            _ => self.white[p],
        }
    }
}

#[derive(Debug, Clone)]
struct Undo {
    mv: Move,
    to_play: Color,
    captured: Vec<u16>,
    ko_point: Option<u16>,
    passes: u8,
    hash: u64,
}

/// A Go position with move history.
#[derive(Debug, Clone)]
pub struct GoBoard {
    size: usize,
    komi: f32,
    points: Vec<u8>,
    to_play: Color,
    ko_point: Option<u16>,
    passes: u8,
    hash: u64,
    zobrist: Arc<Zobrist>,
    history: Vec<Undo>,
}

impl GoBoard {
    pub fn new(size: usize, komi: f32) -> Self {
        assert!(
            (2..=MAX_BOARD_SIZE).contains(&size),
            "board size {size} out of range"
        );
        let num_points = size * size;
        GoBoard {
            size,
            komi,
            points: vec![EMPTY; num_points],
            to_play: Color::Black,
            ko_point: None,
            passes: 0,
            hash: 0,
            zobrist: Arc::new(Zobrist::new(num_points)),
            history: Vec::new(),
        }
    }

    pub fn komi(&self) -> f32 {
        self.komi
    }

    pub fn num_points(&self) -> usize {
        self.size * self.size
    }

    /// Stone at a point, `None` when empty.
    pub fn stone_at(&self, p: usize) -> Option<Color> {
        match self.points[p] {
            BLACK => Some(Color::Black),
            WHITE => Some(Color::White),
            _ => None,
        }
    }

    pub fn is_empty_point(&self, p: usize) -> bool {
        self.points[p] == EMPTY
    }

    /// The most recent non-pass move, if any.
    pub fn last_point(&self) -> Option<usize> {
        self.history
            .iter()
            .rev()
            .map(|u| u.mv)
            .find(|mv| mv.is_point())
            .map(|mv| mv.index())
    }

    fn neighbors(&self, p: usize) -> impl Iterator<Item = usize> {
        let size = self.size;
        let row = p / size;
        let col = p % size;
        let mut out = [usize::MAX; 4];
        let mut n = 0;
        if row > 0 {
            out[n] = p - size;
            n += 1;
        }
        if row + 1 < size {
            out[n] = p + size;
            n += 1;
        }
        if col > 0 {
            out[n] = p - 1;
            n += 1;
        }
        if col + 1 < size {
            out[n] = p + 1;
            n += 1;
        }
        out.into_iter().take(n)
    }

    fn diagonals(&self, p: usize) -> impl Iterator<Item = usize> {
        let size = self.size;
        let row = p / size;
        let col = p % size;
        let mut out = [usize::MAX; 4];
        let mut n = 0;
        for (dr, dc) in [(-1isize, -1isize), (-1, 1), (1, -1), (1, 1)] {
            let r = row as isize + dr;
            let c = col as isize + dc;
            if (0..size as isize).contains(&r) && (0..size as isize).contains(&c) {
                out[n] = (r * size as isize + c) as usize;
                n += 1;
            }
        }
        out.into_iter().take(n)
    }

    /// Stones and distinct liberties of the group containing `p`.
    pub fn group_info(&self, p: usize) -> (usize, usize) {
        debug_assert!(self.points[p] != EMPTY);
        let color = self.points[p];
        let mut stones = vec![p];
        let mut seen = vec![false; self.num_points()];
        let mut liberties = vec![false; self.num_points()];
        seen[p] = true;
        let mut num_liberties = 0;
        let mut i = 0;
        while i < stones.len() {
            let q = stones[i];
            i += 1;
            for n in self.neighbors(q) {
                if self.points[n] == EMPTY {
                    if !liberties[n] {
                        liberties[n] = true;
                        num_liberties += 1;
                    }
                } else if self.points[n] == color && !seen[n] {
                    seen[n] = true;
                    stones.push(n);
                }
            }
        }
        (stones.len(), num_liberties)
    }

    fn collect_group(&self, p: usize, stones: &mut Vec<usize>) {
        let color = self.points[p];
        stones.clear();
        stones.push(p);
        let mut seen = vec![false; self.num_points()];
        seen[p] = true;
        let mut i = 0;
        while i < stones.len() {
            let q = stones[i];
            i += 1;
            for n in self.neighbors(q) {
                if self.points[n] == color && !seen[n] {
                    seen[n] = true;
                    stones.push(n);
                }
            }
        }
    }

    /// The group containing `p` has a liberty other than `except`.
    fn has_liberty_besides(&self, p: usize, except: usize) -> bool {
        let color = self.points[p];
        let mut stones = vec![p];
        let mut seen = vec![false; self.num_points()];
        seen[p] = true;
        let mut i = 0;
        while i < stones.len() {
            let q = stones[i];
            i += 1;
            for n in self.neighbors(q) {
                if self.points[n] == EMPTY && n != except {
                    return true;
                }
                if self.points[n] == color && !seen[n] {
                    seen[n] = true;
                    stones.push(n);
                }
            }
        }
        false
    }

    /// Playing `mv` would capture at least one opponent stone.
    pub fn would_capture(&self, mv: Move) -> bool {
        if !mv.is_point() {
            return false;
        }
        let p = mv.index();
        if p >= self.num_points() || self.points[p] != EMPTY {
            return false;
        }
        let opponent = color_bits(self.to_play.opponent());
        self.neighbors(p)
            .any(|n| self.points[n] == opponent && !self.has_liberty_besides(n, p))
    }

    /// `p` is a one-point eye of `color`: all neighbors are own stones and
    /// the diagonals do not let the opponent spoil it.
    pub fn is_simple_eye(&self, p: usize, color: Color) -> bool {
        if self.points[p] != EMPTY {
            return false;
        }
        let own = color_bits(color);
        let opponent = color_bits(color.opponent());
        if self.neighbors(p).any(|n| self.points[n] != own) {
            return false;
        }
        let mut opponent_diagonals = 0;
        let mut diagonals = 0;
        for d in self.diagonals(p) {
            diagonals += 1;
            if self.points[d] == opponent {
                opponent_diagonals += 1;
            }
        }
        if diagonals < 4 {
            // Edge or corner: every diagonal must be safe.
            opponent_diagonals == 0
        } else {
            opponent_diagonals <= 1
        }
    }

    /// Stones of the mover captured by the most recent move.
    pub fn last_capture_count(&self) -> usize {
        self.history.last().map_or(0, |u| u.captured.len())
    }

    fn capture_group(&mut self, p: usize, captured: &mut Vec<u16>) {
        let mut stones = Vec::new();
        self.collect_group(p, &mut stones);
        let color = self.points[p];
        for &q in &stones {
            self.points[q] = EMPTY;
            self.hash ^= self.zobrist.stone(q, color);
            captured.push(q as u16);
        }
    }
}

impl Board for GoBoard {
    fn size(&self) -> usize {
        self.size
    }

    fn to_play(&self) -> Color {
        self.to_play
    }

    fn set_to_play(&mut self, color: Color) {
        if self.to_play != color {
            self.to_play = color;
            self.hash ^= self.zobrist.white_to_play;
        }
    }

    fn play(&mut self, mv: Move) -> Result<(), IllegalMove> {
        if !self.is_legal(mv) {
            return Err(IllegalMove {
                mv,
                to_play: self.to_play,
            });
        }
        let mut undo = Undo {
            mv,
            to_play: self.to_play,
            captured: Vec::new(),
            ko_point: self.ko_point,
            passes: self.passes,
            hash: self.hash,
        };

        if mv.is_pass() {
            self.passes = (self.passes + 1).min(2);
            self.ko_point = None;
        } else {
            let p = mv.index();
            let own = color_bits(self.to_play);
            let opponent = color_bits(self.to_play.opponent());
            self.points[p] = own;
            self.hash ^= self.zobrist.stone(p, own);
            let neighbors: Vec<usize> = self.neighbors(p).collect();
            for n in neighbors {
                if self.points[n] == opponent && !self.has_liberty_besides(n, usize::MAX) {
                    self.capture_group(n, &mut undo.captured);
                }
            }
            // Simple ko: a single-stone capture by a stone that now has
            // exactly that point as its only liberty.
            self.ko_point = None;
            if undo.captured.len() == 1 {
                let captured_point = undo.captured[0] as usize;
                let (stones, liberties) = self.group_info(p);
                if stones == 1 && liberties == 1 {
                    self.ko_point = Some(captured_point as u16);
                }
            }
            self.passes = 0;
        }

        self.to_play = self.to_play.opponent();
        self.hash ^= self.zobrist.white_to_play;
        self.history.push(undo);
        Ok(())
    }

    fn undo(&mut self) {
        let Some(undo) = self.history.pop() else {
            return;
        };
        if undo.mv.is_point() {
            let p = undo.mv.index();
            self.points[p] = EMPTY;
            let opponent = color_bits(undo.to_play.opponent());
            for &q in &undo.captured {
                self.points[q as usize] = opponent;
            }
        }
        self.to_play = undo.to_play;
        self.ko_point = undo.ko_point;
        self.passes = undo.passes;
        self.hash = undo.hash;
    }

    fn move_number(&self) -> usize {
        self.history.len()
    }

    fn is_legal(&self, mv: Move) -> bool {
        if mv.is_pass() {
            return true;
        }
        if !mv.is_point() {
            return false;
        }
        let p = mv.index();
        if p >= self.num_points() || self.points[p] != EMPTY {
            return false;
        }
        if self.ko_point == Some(p as u16) {
            return false;
        }
        // A direct liberty makes the move trivially legal.
        if self.neighbors(p).any(|n| self.points[n] == EMPTY) {
            return true;
        }
        let own = color_bits(self.to_play);
        let opponent = color_bits(self.to_play.opponent());
        // Capturing something creates a liberty.
        let captures = self
            .neighbors(p)
            .any(|n| self.points[n] == opponent && !self.has_liberty_besides(n, p));
        if captures {
            return true;
        }
        // Joining a group that keeps a spare liberty avoids suicide.
        self.neighbors(p)
            .any(|n| self.points[n] == own && self.has_liberty_besides(n, p))
    }

    fn legal_moves(&self, out: &mut Vec<Move>) {
        for p in 0..self.num_points() {
            let mv = Move::from_index(p);
            if self.is_legal(mv) {
                out.push(mv);
            }
        }
    }

    fn hash(&self) -> u64 {
        self.hash
    }

    fn two_passes(&self) -> bool {
        self.passes >= 2
    }

    fn score(&self, territory: Option<&mut [Ownership]>) -> f32 {
        let num_points = self.num_points();
        let mut ownership = vec![Ownership::Shared; num_points];
        let mut visited = vec![false; num_points];
        let mut black = 0f32;
        let mut white = 0f32;

        for p in 0..num_points {
            match self.points[p] {
                BLACK => {
                    black += 1.0;
                    ownership[p] = Ownership::Black;
                }
                WHITE => {
                    white += 1.0;
                    ownership[p] = Ownership::White;
                }
                _ => {}
            }
        }

        // Empty regions score for a color only when they touch just that
        // color.
        for start in 0..num_points {
            if self.points[start] != EMPTY || visited[start] {
                continue;
            }
            let mut region = vec![start];
            visited[start] = true;
            let mut touches_black = false;
            let mut touches_white = false;
            let mut i = 0;
            while i < region.len() {
                let q = region[i];
                i += 1;
                for n in self.neighbors(q) {
                    match self.points[n] {
                        BLACK => touches_black = true,
                        WHITE => touches_white = true,
                        _ => {
                            if !visited[n] {
                                visited[n] = true;
                                region.push(n);
                            }
                        }
                    }
                }
            }
            let owner = match (touches_black, touches_white) {
                (true, false) => Some(Ownership::Black),
                (false, true) => Some(Ownership::White),
                _ => None,
            };
            if let Some(owner) = owner {
                for &q in &region {
                    ownership[q] = owner;
                }
                match owner {
                    Ownership::Black => black += region.len() as f32,
                    Ownership::White => white += region.len() as f32,
                    Ownership::Shared => {}
                }
            }
        }

        if let Some(out) = territory {
            out.copy_from_slice(&ownership);
        }
        black - white - self.komi
    }
}
