//! Live-progress snapshots.
//!
//! Pure observers: at fixed game-count intervals the driver renders a small
//! snapshot of the root statistics (or the current principal variation) and
//! emits it through the logging sink. Nothing here mutates the tree.

use std::fmt::Write as _;

use goban_core::Move;
use tracing::info;

use crate::config::LiveGfxMode;
use crate::stats::TerritoryStats;
use crate::tree::UctTree;

fn move_label(mv: Move) -> String {
    if mv.is_pass() {
        "pass".to_string()
    } else if mv.is_null() {
        "null".to_string()
    } else {
        mv.index().to_string()
    }
}

pub(crate) fn emit(
    mode: LiveGfxMode,
    games: u64,
    tree: &UctTree,
    sequence: &[Move],
    territory: Option<&TerritoryStats>,
) {
    let text = match mode {
        LiveGfxMode::None => return,
        LiveGfxMode::Counts => render_counts(games, tree, sequence, territory),
        LiveGfxMode::Sequence => render_sequence(games, tree, sequence),
    };
    info!(target: "uct::live", "{text}");
}

/// Root-child values and counts, plus settled territory when available.
pub fn render_counts(
    games: u64,
    tree: &UctTree,
    sequence: &[Move],
    territory: Option<&TerritoryStats>,
) -> String {
    let root = tree.root();
    let mut out = format!("games {games} value {:.3}", root.mean());
    if let Some(best) = sequence.first() {
        let _ = write!(out, " best {}", move_label(*best));
    }
    let mut children: Vec<_> = tree.children(root).iter().collect();
    children.sort_by(|a, b| {
        b.move_count()
            .partial_cmp(&a.move_count())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for child in children {
        if !child.has_mean() {
            continue;
        }
        let _ = write!(
            out,
            "\n  {} {:.3} {:.0}",
            move_label(child.mv()),
            child.mean(),
            child.move_count()
        );
        if child.has_rave_value() {
            let _ = write!(out, " rave {:.3} {:.0}", child.rave_value(), child.rave_count());
        }
    }
    if let Some(territory) = territory {
        let decided = (0..territory.size() * territory.size())
            .filter(|&p| {
                let point = territory.point(p);
                point.is_defined() && (point.mean() <= 0.25 || point.mean() >= 0.75)
            })
            .count();
        let _ = write!(
            out,
            "\n  territory settled {decided}/{}",
            territory.size() * territory.size()
        );
    }
    out
}

/// The current principal variation.
pub fn render_sequence(games: u64, tree: &UctTree, sequence: &[Move]) -> String {
    let root = tree.root();
    let mut out = format!("games {games} value {:.3} sequence", root.mean());
    for mv in sequence {
        let _ = write!(out, " {}", move_label(*mv));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MoveInfo;

    fn sample_tree() -> UctTree {
        let mut tree = UctTree::new();
        tree.create_allocators(1);
        tree.set_max_nodes(10);
        let moves = [
            MoveInfo::new(Move::from_index(3)),
            MoveInfo::new(Move::PASS),
        ];
        tree.create_children(0, tree.root(), &moves);
        let children = tree.children(tree.root());
        for _ in 0..3 {
            children[0].add_game_result(0.8);
            tree.root().add_game_result(0.7);
        }
        children[1].add_game_result(0.1);
        tree
    }

    #[test]
    fn test_render_counts_orders_by_visits() {
        let tree = sample_tree();
        let text = render_counts(100, &tree, &[Move::from_index(3)], None);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].contains("games 100"));
        assert!(lines[0].contains("best 3"));
        assert!(lines[1].trim_start().starts_with("3 "));
        assert!(lines[2].trim_start().starts_with("pass "));
    }

    #[test]
    fn test_render_counts_includes_territory() {
        let tree = sample_tree();
        let mut territory = TerritoryStats::new(2);
        for p in 0..4 {
            territory.add(p, 1.0);
        }
        let text = render_counts(1, &tree, &[], Some(&territory));
        assert!(text.contains("territory settled 4/4"));
    }

    #[test]
    fn test_render_sequence() {
        let tree = sample_tree();
        let text = render_sequence(7, &tree, &[Move::from_index(3), Move::PASS]);
        assert!(text.contains("sequence 3 pass"));
    }
}
