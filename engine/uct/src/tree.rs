//! Search tree with per-worker arena allocation.
//!
//! The tree is the root node plus one fixed-capacity allocator per worker.
//! During a search each allocator is appended to only by its owning worker,
//! so appends are single-writer; every other access goes through atomic
//! node fields. Node capacity is reserved up front by `set_max_nodes`, so
//! slots never move and `NodeRef`s stay valid until the next `clear`.
//!
//! Between searches the surviving subtree can be copied into a sibling tree
//! (`extract_subtree`); children are distributed round-robin over the
//! destination allocators to keep them evenly loaded, and the copy
//! truncates cleanly on capacity, deadline or abort.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use goban_core::Move;
use tracing::{debug, warn};

use crate::node::{NodeRef, UctNode};
use crate::state::MoveInfo;
use crate::stats::Timer;

/// How many copied nodes between deadline/abort polls during extraction.
const EXTRACT_POLL_INTERVAL: usize = 1024;

/// A bounded arena of nodes owned by one worker.
#[derive(Debug)]
pub struct NodeArena {
    nodes: Box<[UctNode]>,
    len: AtomicUsize,
}

impl NodeArena {
    fn with_capacity(capacity: usize) -> Self {
        NodeArena {
            nodes: std::iter::repeat_with(UctNode::default)
                .take(capacity)
                .collect(),
            len: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    pub fn has_capacity(&self, n: usize) -> bool {
        self.len() + n <= self.capacity()
    }

    fn clear(&mut self) {
        *self.len.get_mut() = 0;
    }

    /// Append `n` fresh null-move nodes and return the index of the first.
    ///
    /// Only the owning worker appends during a search; the block becomes
    /// visible to other workers through the parent's child-word publish.
    fn alloc_block(&self, n: usize) -> u32 {
        let first = self.len.load(Ordering::Relaxed);
        debug_assert!(first + n <= self.capacity());
        for slot in &self.nodes[first..first + n] {
            slot.init(Move::NULL);
        }
        self.len.store(first + n, Ordering::Release);
        first as u32
    }

    fn node(&self, index: u32) -> &UctNode {
        &self.nodes[index as usize]
    }
}

/// The search tree: root plus one allocator per worker.
#[derive(Debug)]
pub struct UctTree {
    root: UctNode,
    arenas: Vec<NodeArena>,
    max_nodes: usize,
}

impl Default for UctTree {
    fn default() -> Self {
        UctTree::new()
    }
}

impl UctTree {
    pub fn new() -> Self {
        UctTree {
            root: UctNode::new(Move::NULL),
            arenas: Vec::new(),
            max_nodes: 0,
        }
    }

    /// Replace the allocators with `n` empty ones. Clears the tree; call
    /// `set_max_nodes` afterwards to give them capacity.
    pub fn create_allocators(&mut self, n: usize) {
        self.root.init(Move::NULL);
        self.arenas = (0..n).map(|_| NodeArena::with_capacity(0)).collect();
    }

    /// Set the node budget. Clears the tree and gives every allocator
    /// `max_nodes / n_allocators` slots; the real total can be one higher
    /// (the root lives outside the allocators) or lower (rounding).
    pub fn set_max_nodes(&mut self, max_nodes: usize) {
        debug_assert!(!self.arenas.is_empty(), "create_allocators first");
        self.root.init(Move::NULL);
        self.max_nodes = max_nodes;
        if self.arenas.is_empty() {
            debug!("set_max_nodes: no allocators registered");
            return;
        }
        let per_allocator = max_nodes / self.arenas.len();
        self.arenas = (0..self.arenas.len())
            .map(|_| NodeArena::with_capacity(per_allocator))
            .collect();
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    pub fn num_allocators(&self) -> usize {
        self.arenas.len()
    }

    /// Total nodes: the root plus the contents of every allocator.
    pub fn num_nodes(&self) -> usize {
        1 + self.arenas.iter().map(|a| a.len()).sum::<usize>()
    }

    pub fn nodes_in_allocator(&self, allocator_id: usize) -> usize {
        self.arenas[allocator_id].len()
    }

    pub fn has_capacity(&self, allocator_id: usize, n: usize) -> bool {
        self.arenas[allocator_id].has_capacity(n)
    }

    /// Reset all allocators and the root.
    pub fn clear(&mut self) {
        for arena in &mut self.arenas {
            arena.clear();
        }
        self.root.init(Move::NULL);
    }

    pub fn root(&self) -> &UctNode {
        &self.root
    }

    pub fn node(&self, r: NodeRef) -> &UctNode {
        if r.is_root() {
            &self.root
        } else {
            self.arenas[r.arena as usize].node(r.index)
        }
    }

    /// The child block published on `node`, empty if unexpanded.
    pub fn children(&self, node: &UctNode) -> &[UctNode] {
        let (first, count) = node.children_info();
        self.child_slice(first, count)
    }

    /// Resolve a (first_child, count) pair to a node slice.
    ///
    /// The end is clamped to the allocator capacity so that even a pair
    /// whose block was superseded by a concurrent expansion stays in
    /// bounds; clamped entries are valid (initialised) nodes.
    pub fn child_slice(&self, first: NodeRef, count: usize) -> &[UctNode] {
        if count == 0 {
            return &[];
        }
        let arena = &self.arenas[first.arena as usize];
        let start = (first.index as usize).min(arena.capacity());
        let end = (start + count).min(arena.capacity());
        &arena.nodes[start..end]
    }

    /// Reference to the `i`-th child of a published block.
    pub fn child_ref(first: NodeRef, i: usize) -> NodeRef {
        NodeRef {
            arena: first.arena,
            index: first.index + i as u32,
        }
    }

    /// Child carrying `mv`, if the node has one.
    pub fn find_child<'a>(&'a self, node: &UctNode, mv: Move) -> Option<&'a UctNode> {
        self.children(node).iter().find(|c| c.mv() == mv)
    }

    /// Create and publish children of `node` in the given allocator.
    ///
    /// Requires capacity for `moves.len()` nodes (checked by the caller via
    /// `has_capacity`) and a non-empty move list. Prior-seeded counts are
    /// added to the parent's position count so that it keeps dominating the
    /// sum of the children's move counts.
    pub fn create_children(&self, allocator_id: usize, node: &UctNode, moves: &[MoveInfo]) {
        debug_assert!(!moves.is_empty());
        debug_assert!(self.has_capacity(allocator_id, moves.len()));
        let arena = &self.arenas[allocator_id];
        let first_index = arena.alloc_block(moves.len());
        let first = NodeRef {
            arena: allocator_id as u16,
            index: first_index,
        };
        let mut prior_count = 0.0;
        for (i, info) in moves.iter().enumerate() {
            let child = arena.node(first_index + i as u32);
            child.init(info.mv);
            if info.count > 0.0 {
                child.init_value(info.value, info.count);
                prior_count += info.count;
            }
            if info.rave_count > 0.0 {
                child.init_rave_value(info.rave_value, info.rave_count);
            }
        }
        if prior_count > 0.0 {
            node.add_pos_count(prior_count);
        }
        node.set_children(first, moves.len());
    }

    /// Rebuild `node`'s child block without the filtered moves, keeping the
    /// statistics and subtrees of the surviving children.
    ///
    /// Requires capacity for the current child count. Idempotent: applying
    /// the same filter twice yields the same child set.
    pub fn apply_filter(&self, allocator_id: usize, node: &UctNode, filter: &[Move]) {
        if !node.has_children() {
            return;
        }
        let (old_first, old_count) = node.children_info();
        debug_assert!(self.has_capacity(allocator_id, old_count));
        let arena = &self.arenas[allocator_id];
        let first_index = arena.alloc_block(old_count);
        let mut survivors = 0usize;
        for child in self.child_slice(old_first, old_count) {
            if filter.contains(&child.mv()) {
                continue;
            }
            let copy = arena.node(first_index + survivors as u32);
            copy.copy_data_from(child);
            copy.copy_children_from(child);
            survivors += 1;
        }
        let first = NodeRef {
            arena: allocator_id as u16,
            index: first_index,
        };
        if survivors > 0 {
            node.set_children(first, survivors);
        } else {
            node.clear_children();
        }
    }

    /// One game result along an edge: bumps the father's position count and
    /// folds `eval` into the node's mean.
    pub fn add_game_result(&self, node: &UctNode, father: Option<&UctNode>, eval: f32) {
        if let Some(father) = father {
            father.inc_pos_count();
        }
        node.add_game_result(eval);
    }

    /// Bias every node of an in-flight path towards a loss so that parallel
    /// workers spread over different subtrees. Undone by
    /// `remove_virtual_loss` at backup.
    pub fn add_virtual_loss(&self, path: &[NodeRef]) {
        for i in 0..path.len() {
            let node = self.node(path[i]);
            if i > 0 {
                self.node(path[i - 1]).inc_pos_count();
            }
            node.add_game_result(0.0);
            node.add_rave_value(0.0, 1.0);
        }
    }

    pub fn remove_virtual_loss(&self, path: &[NodeRef]) {
        for i in 0..path.len() {
            let node = self.node(path[i]);
            if i > 0 {
                self.node(path[i - 1]).add_pos_count(-1.0);
            }
            node.remove_game_result(0.0);
            node.remove_rave_value(0.0, 1.0);
        }
    }

    /// Copy the subtree under `node` into `target`. `target` is cleared
    /// first and should have the same node budget.
    ///
    /// The copy truncates if a destination allocator fills up (possible
    /// even with an equal budget, because nodes are reassigned round-robin),
    /// if `max_time` elapses, or if `abort` is raised. The node where
    /// truncation strikes keeps its data but loses its children and has its
    /// position count reset to zero, so it looks unvisited-in-depth on
    /// resumption. One warning is emitted per extraction.
    pub fn extract_subtree(
        &self,
        target: &mut UctTree,
        node: &UctNode,
        max_time: f64,
        abort: Option<&AtomicBool>,
    ) {
        target.clear();
        let mut ctx = CopyCtx {
            allocator_id: 0,
            timer: Timer::start(),
            max_time,
            abort,
            polls: 0,
            aborted: false,
            warned: false,
        };
        let target = &*target;
        self.copy_subtree(target, &target.root, node, &mut ctx);
    }

    /// Extract the subtree reached from the root by `sequence`.
    ///
    /// Returns false (leaving `target` cleared) when the tree has no node
    /// for the sequence.
    pub fn extract_for_moves(
        &self,
        target: &mut UctTree,
        sequence: &[Move],
        max_time: f64,
        abort: Option<&AtomicBool>,
    ) -> bool {
        let mut node = &self.root;
        for &mv in sequence {
            match self.find_child(node, mv) {
                Some(child) => node = child,
                None => {
                    target.clear();
                    return false;
                }
            }
        }
        self.extract_subtree(target, node, max_time, abort);
        true
    }

    fn copy_subtree(
        &self,
        target: &UctTree,
        target_node: &UctNode,
        node: &UctNode,
        ctx: &mut CopyCtx<'_>,
    ) {
        target_node.copy_data_from(node);
        let (first, count) = node.children_info();
        if count == 0 {
            return;
        }

        if !ctx.aborted {
            let arena = &target.arenas[ctx.allocator_id];
            if !arena.has_capacity(count) {
                ctx.truncate("allocator capacity");
            } else if ctx.poll_deadline() {
                ctx.truncate("max time");
            } else if ctx.abort.is_some_and(|a| a.load(Ordering::Relaxed)) {
                ctx.truncate("aborted");
            }
        }
        if ctx.aborted {
            // Without its children the position count would overstate the
            // subtree; zero it so the node reads as unvisited in depth.
            target_node.set_pos_count(0.0);
            return;
        }

        let arena_id = ctx.allocator_id;
        let first_index = target.arenas[arena_id].alloc_block(count);
        let target_first = NodeRef {
            arena: arena_id as u16,
            index: first_index,
        };
        target_node.set_children(target_first, count);

        let children = self.child_slice(first, count);
        let target_children = target.child_slice(target_first, count);
        for (child, target_child) in children.iter().zip(target_children) {
            ctx.allocator_id = (ctx.allocator_id + 1) % target.arenas.len();
            self.copy_subtree(target, target_child, child, ctx);
        }
    }

    /// Walk every reachable node checking the structural invariants.
    /// Intended for tests and debug builds.
    pub fn check_consistency(&self) -> Result<(), String> {
        let mut stack: Vec<&UctNode> = vec![&self.root];
        while let Some(node) = stack.pop() {
            let (first, count) = node.children_info();
            if count == 0 {
                continue;
            }
            let arena_id = first.arena as usize;
            if arena_id >= self.arenas.len() {
                return Err(format!("child block in unknown allocator {arena_id}"));
            }
            let arena = &self.arenas[arena_id];
            let end = first.index as usize + count;
            if end > arena.len() {
                return Err(format!(
                    "child block {}..{} beyond allocator {} length {}",
                    first.index,
                    end,
                    arena_id,
                    arena.len()
                ));
            }
            for child in self.child_slice(first, count) {
                if child.mv().is_null() {
                    return Err("reachable child carries the null move".to_string());
                }
                stack.push(child);
            }
        }
        Ok(())
    }
}

struct CopyCtx<'a> {
    allocator_id: usize,
    timer: Timer,
    max_time: f64,
    abort: Option<&'a AtomicBool>,
    polls: usize,
    aborted: bool,
    warned: bool,
}

impl CopyCtx<'_> {
    fn poll_deadline(&mut self) -> bool {
        self.polls += 1;
        if self.polls % EXTRACT_POLL_INTERVAL != 0 {
            return false;
        }
        self.timer.elapsed() > self.max_time
    }

    fn truncate(&mut self, reason: &str) {
        self.aborted = true;
        if !self.warned {
            self.warned = true;
            warn!("extract_subtree: truncated ({reason})");
        }
    }
}
