//! Human-readable tree dump.
//!
//! One line per node: the move, the visit count, the mean value and the
//! RAVE statistics, children nested by indentation. The format parses back
//! (`parse_dump`) so dumped trees can be analysed offline; values are
//! rounded to the printed precision, not bit-exact.
//!
//! ```text
//! root 1000 0.531 0 0.000
//!   12 620 0.585 644 0.571
//!     40 311 0.600 298 0.588
//!   pass 14 0.214 22 0.200
//! ```

use std::fmt::Write as _;

use goban_core::{Move, MAX_BOARD_SIZE};
use thiserror::Error;

use crate::node::UctNode;
use crate::tree::UctTree;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("line {line}: expected `<move> <count> <mean> <rave_count> <rave_mean>`")]
    Malformed { line: usize },

    #[error("line {line}: bad move token `{token}`")]
    BadMove { line: usize, token: String },

    #[error("line {line}: bad number `{token}`")]
    BadNumber { line: usize, token: String },

    #[error("line {line}: indentation skips a level")]
    BadIndent { line: usize },

    #[error("empty dump")]
    Empty,
}

/// A parsed dump node.
#[derive(Debug, Clone, PartialEq)]
pub struct DumpNode {
    pub mv: Move,
    pub count: f32,
    pub mean: f32,
    pub rave_count: f32,
    pub rave_mean: f32,
    pub children: Vec<DumpNode>,
}

fn format_move(mv: Move) -> String {
    if mv.is_null() {
        "root".to_string()
    } else if mv.is_pass() {
        "pass".to_string()
    } else {
        mv.index().to_string()
    }
}

fn parse_move(token: &str, line: usize) -> Result<Move, DumpError> {
    match token {
        "root" => Ok(Move::NULL),
        "pass" => Ok(Move::PASS),
        _ => token
            .parse::<usize>()
            .ok()
            .filter(|&i| i < MAX_BOARD_SIZE * MAX_BOARD_SIZE)
            .map(Move::from_index)
            .ok_or_else(|| DumpError::BadMove {
                line,
                token: token.to_string(),
            }),
    }
}

/// Serialise the tree, depth-limited; `max_depth` 0 dumps only the root.
pub fn dump_tree(tree: &UctTree, max_depth: usize) -> String {
    let mut out = String::new();
    dump_node(tree, tree.root(), 0, max_depth, &mut out);
    out
}

fn dump_node(tree: &UctTree, node: &UctNode, depth: usize, max_depth: usize, out: &mut String) {
    let _ = writeln!(
        out,
        "{:indent$}{} {:.0} {:.3} {:.0} {:.3}",
        "",
        format_move(node.mv()),
        node.move_count(),
        node.mean(),
        node.rave_count(),
        node.rave_value(),
        indent = depth * 2,
    );
    if depth >= max_depth {
        return;
    }
    for child in tree.children(node) {
        dump_node(tree, child, depth + 1, max_depth, out);
    }
}

/// Parse a dump back into a node hierarchy.
pub fn parse_dump(text: &str) -> Result<DumpNode, DumpError> {
    // (depth, node) stack of the current ancestor chain.
    let mut stack: Vec<(usize, DumpNode)> = Vec::new();
    for (line_no, raw) in text.lines().enumerate() {
        let line = line_no + 1;
        if raw.trim().is_empty() {
            continue;
        }
        let indent = raw.len() - raw.trim_start().len();
        if indent % 2 != 0 {
            return Err(DumpError::BadIndent { line });
        }
        let depth = indent / 2;

        let tokens: Vec<&str> = raw.split_whitespace().collect();
        if tokens.len() != 5 {
            return Err(DumpError::Malformed { line });
        }
        let number = |token: &str| -> Result<f32, DumpError> {
            token.parse().map_err(|_| DumpError::BadNumber {
                line,
                token: token.to_string(),
            })
        };
        let node = DumpNode {
            mv: parse_move(tokens[0], line)?,
            count: number(tokens[1])?,
            mean: number(tokens[2])?,
            rave_count: number(tokens[3])?,
            rave_mean: number(tokens[4])?,
            children: Vec::new(),
        };

        if let Some((top_depth, _)) = stack.last() {
            if depth > top_depth + 1 {
                return Err(DumpError::BadIndent { line });
            }
        } else if depth != 0 {
            return Err(DumpError::BadIndent { line });
        }
        // Fold completed subtrees into their parents.
        while let Some((top_depth, _)) = stack.last() {
            if *top_depth < depth {
                break;
            }
            let (_, done) = stack.pop().expect("stack checked non-empty");
            match stack.last_mut() {
                Some((_, parent)) => parent.children.push(done),
                None => return Err(DumpError::BadIndent { line }),
            }
        }
        stack.push((depth, node));
    }

    let mut root = None;
    while let Some((_, done)) = stack.pop() {
        match stack.last_mut() {
            Some((_, parent)) => parent.children.push(done),
            None => root = Some(done),
        }
    }
    root.ok_or(DumpError::Empty)
}
