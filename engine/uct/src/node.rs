//! Tree node representation.
//!
//! Every field of a node is atomic so the tree can be read and written by
//! several workers without locks. Statistical fields (counts and means) use
//! relaxed ordering throughout; briefly stale reads only produce slightly
//! stale selection scores, which later visits correct.
//!
//! The structural fields (first child and child count) are packed into one
//! 64-bit word. Publishing a child block is a single release store of that
//! word, performed after the child slots have been initialised; a reader
//! that acquires the word and sees a non-zero count therefore sees fully
//! initialised children, and can never observe a first-child pointer from
//! one expansion paired with a child count from another. Two workers may
//! still expand the same node concurrently; the later publish wins and the
//! earlier block stays allocated but unreachable.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use goban_core::Move;

use crate::stats::AtomicF32;

/// Location of a node: which allocator it lives in and at what offset.
///
/// References stay valid for the lifetime of the tree's allocators; nodes
/// are never moved or freed individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub arena: u16,
    pub index: u32,
}

impl NodeRef {
    /// The root node, which lives outside any allocator.
    pub const ROOT: NodeRef = NodeRef {
        arena: u16::MAX,
        index: u32::MAX,
    };

    pub fn is_root(self) -> bool {
        self == NodeRef::ROOT
    }
}

/// Packed (first_child, num_children) word.
///
/// Layout: bits 0..32 child index, 32..48 allocator id, 48..64 child count.
fn pack_children(first: NodeRef, count: u16) -> u64 {
    (count as u64) << 48 | (first.arena as u64) << 32 | first.index as u64
}

fn unpack_children(word: u64) -> (NodeRef, u16) {
    (
        NodeRef {
            arena: (word >> 32) as u16,
            index: word as u32,
        },
        (word >> 48) as u16,
    )
}

/// A node of the search tree.
#[derive(Debug, Default)]
pub struct UctNode {
    mv: AtomicU32,
    /// Simulations attributed to the move entering this node.
    move_count: AtomicF32,
    /// Mean result of those simulations, in [0,1], from the perspective of
    /// the player who makes the move (the side to play at the parent).
    mean: AtomicF32,
    /// Simulations that passed through this node on the way to a deeper
    /// node. Differs from `move_count` at leaves and after prior seeding.
    pos_count: AtomicF32,
    rave_count: AtomicF32,
    rave_mean: AtomicF32,
    children: AtomicU64,
}

impl UctNode {
    pub fn new(mv: Move) -> Self {
        let node = UctNode::default();
        node.init(mv);
        node
    }

    /// Reset the node to a fresh, unexpanded state carrying `mv`.
    ///
    /// Also used to (re)initialise recycled allocator slots before they are
    /// published.
    pub fn init(&self, mv: Move) {
        self.mv.store(mv.raw() as u32, Ordering::Relaxed);
        self.move_count.store(0.0);
        self.mean.store(0.0);
        self.pos_count.store(0.0);
        self.rave_count.store(0.0);
        self.rave_mean.store(0.0);
        self.children.store(0, Ordering::Relaxed);
    }

    pub fn mv(&self) -> Move {
        Move::from_raw(self.mv.load(Ordering::Relaxed) as u16)
    }

    pub fn move_count(&self) -> f32 {
        self.move_count.load()
    }

    pub fn has_mean(&self) -> bool {
        self.move_count.load() > 0.0
    }

    /// Mean game result. Only meaningful when `has_mean()`.
    pub fn mean(&self) -> f32 {
        self.mean.load()
    }

    pub fn pos_count(&self) -> f32 {
        self.pos_count.load()
    }

    pub fn rave_count(&self) -> f32 {
        self.rave_count.load()
    }

    pub fn has_rave_value(&self) -> bool {
        self.rave_count.load() > 0.0
    }

    pub fn rave_value(&self) -> f32 {
        self.rave_mean.load()
    }

    pub fn add_game_result(&self, eval: f32) {
        let count = self.move_count.load() + 1.0;
        let mean = self.mean.load();
        self.mean.store(mean + (eval - mean) / count);
        self.move_count.store(count);
    }

    /// Take back one game result, used to remove a virtual loss.
    pub fn remove_game_result(&self, eval: f32) {
        let count = self.move_count.load();
        if count > 1.0 {
            let mean = self.mean.load();
            self.mean.store((mean * count - eval) / (count - 1.0));
            self.move_count.store(count - 1.0);
        } else {
            self.mean.store(0.0);
            self.move_count.store(0.0);
        }
    }

    pub fn add_rave_value(&self, value: f32, weight: f32) {
        let count = self.rave_count.load() + weight;
        let mean = self.rave_mean.load();
        self.rave_mean.store(mean + weight * (value - mean) / count);
        self.rave_count.store(count);
    }

    pub fn remove_rave_value(&self, value: f32, weight: f32) {
        let count = self.rave_count.load();
        if count > weight {
            let mean = self.rave_mean.load();
            self.rave_mean
                .store((mean * count - value * weight) / (count - weight));
            self.rave_count.store(count - weight);
        } else {
            self.rave_mean.store(0.0);
            self.rave_count.store(0.0);
        }
    }

    pub fn inc_pos_count(&self) {
        self.pos_count.store(self.pos_count.load() + 1.0);
    }

    pub fn add_pos_count(&self, count: f32) {
        self.pos_count.store(self.pos_count.load() + count);
    }

    pub fn set_pos_count(&self, count: f32) {
        self.pos_count.store(count);
    }

    /// Seed the value statistics from prior knowledge.
    pub fn init_value(&self, value: f32, count: f32) {
        self.mean.store(value);
        self.move_count.store(count);
    }

    /// Seed the RAVE statistics from prior knowledge.
    pub fn init_rave_value(&self, value: f32, count: f32) {
        self.rave_mean.store(value);
        self.rave_count.store(count);
    }

    pub fn has_children(&self) -> bool {
        self.num_children() > 0
    }

    pub fn num_children(&self) -> usize {
        let (_, count) = unpack_children(self.children.load(Ordering::Acquire));
        count as usize
    }

    /// Consistent (first_child, num_children) pair; count 0 means
    /// unexpanded and the reference must not be used.
    pub fn children_info(&self) -> (NodeRef, usize) {
        let (first, count) = unpack_children(self.children.load(Ordering::Acquire));
        (first, count as usize)
    }

    /// Publish a child block. The block's slots must be fully initialised
    /// before this call; the release store makes them visible together with
    /// the reference.
    pub fn set_children(&self, first: NodeRef, count: usize) {
        debug_assert!(count > 0 && count <= u16::MAX as usize);
        self.children
            .store(pack_children(first, count as u16), Ordering::Release);
    }

    /// Copy move and statistics (not the child link) from another node.
    pub fn copy_data_from(&self, other: &UctNode) {
        self.mv.store(other.mv.load(Ordering::Relaxed), Ordering::Relaxed);
        self.move_count.store(other.move_count.load());
        self.mean.store(other.mean.load());
        self.pos_count.store(other.pos_count.load());
        self.rave_count.store(other.rave_count.load());
        self.rave_mean.store(other.rave_mean.load());
    }

    /// Copy the child link from another node. Used when a filtered child
    /// block keeps the surviving children's own subtrees.
    pub fn copy_children_from(&self, other: &UctNode) {
        self.children
            .store(other.children.load(Ordering::Acquire), Ordering::Release);
    }

    /// Unpublish the child block, returning the node to the unexpanded
    /// state. Only meaningful when a filter removes every child.
    pub fn clear_children(&self) {
        self.children.store(0, Ordering::Release);
    }
}
