//! Statistics primitives shared across the search.
//!
//! `AtomicF32` is the storage type for all node statistics: a plain f32
//! bit-cast into an `AtomicU32`, read and written with relaxed ordering.
//! Updates are not read-modify-write atomic; concurrent writers can lose an
//! increment, which keeps means within O(1/count) of the true value and
//! self-corrects as counts grow. Structural publication (which makes these
//! writes visible in the first place) carries the release/acquire ordering,
//! see `node.rs`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// An f32 readable and writable from several threads without locks.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        AtomicF32(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Incremental mean with a (possibly fractional) count.
///
/// The count is a float because RAVE updates add weighted results.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMean {
    count: f32,
    mean: f32,
}

impl RunningMean {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn add(&mut self, value: f32) {
        self.add_weighted(value, 1.0);
    }

    pub fn add_weighted(&mut self, value: f32, weight: f32) {
        let count = self.count + weight;
        self.mean += weight * (value - self.mean) / count;
        self.count = count;
    }

    /// Remove a previously added value. Used to take back virtual losses.
    pub fn remove(&mut self, value: f32) {
        if self.count > 1.0 {
            self.mean = (self.mean * self.count - value) / (self.count - 1.0);
            self.count -= 1.0;
        } else {
            self.clear();
        }
    }

    /// Fold another mean into this one, weighting by its count.
    pub fn merge(&mut self, other: &RunningMean) {
        if other.count > 0.0 {
            self.add_weighted(other.mean, other.count);
        }
    }

    pub fn is_defined(&self) -> bool {
        self.count > 0.0
    }

    pub fn count(&self) -> f32 {
        self.count
    }

    pub fn mean(&self) -> f32 {
        self.mean
    }
}

impl std::fmt::Display for RunningMean {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3} ({:.0})", self.mean, self.count)
    }
}

/// Per-point running means of final ownership, 1 = black, 0 = white,
/// 0.5 = shared. Maintained by the thread state when territory statistics
/// are enabled.
#[derive(Debug, Clone)]
pub struct TerritoryStats {
    size: usize,
    points: Vec<RunningMean>,
}

impl TerritoryStats {
    pub fn new(size: usize) -> Self {
        TerritoryStats {
            size,
            points: vec![RunningMean::default(); size * size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn clear(&mut self) {
        for p in &mut self.points {
            p.clear();
        }
    }

    pub fn add(&mut self, point: usize, ownership: f32) {
        self.points[point].add(ownership);
    }

    pub fn point(&self, point: usize) -> &RunningMean {
        &self.points[point]
    }

    /// True when every visited point is clearly owned by one side.
    ///
    /// `margin` is the distance from 0/1 within which a point counts as
    /// decided; unvisited points count as undecided.
    pub fn all_decided(&self, margin: f32) -> bool {
        self.points.iter().all(|p| {
            p.is_defined() && (p.mean() <= margin || p.mean() >= 1.0 - margin)
        })
    }
}

/// Wall-clock timer for search budgets.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Timer {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_f32_roundtrip() {
        let a = AtomicF32::new(0.25);
        assert_eq!(a.load(), 0.25);
        a.store(-1.5);
        assert_eq!(a.load(), -1.5);
    }

    #[test]
    fn test_running_mean_add() {
        let mut m = RunningMean::new();
        assert!(!m.is_defined());
        m.add(1.0);
        m.add(0.0);
        m.add(0.5);
        assert!(m.is_defined());
        assert_eq!(m.count(), 3.0);
        assert!((m.mean() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_running_mean_weighted() {
        let mut m = RunningMean::new();
        m.add_weighted(1.0, 2.0);
        m.add_weighted(0.0, 2.0);
        assert_eq!(m.count(), 4.0);
        assert!((m.mean() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_running_mean_remove_inverts_add() {
        let mut m = RunningMean::new();
        m.add(0.75);
        m.add(0.25);
        m.remove(0.25);
        assert_eq!(m.count(), 1.0);
        assert!((m.mean() - 0.75).abs() < 1e-5);

        let mut single = RunningMean::new();
        single.add(0.5);
        single.remove(0.5);
        assert!(!single.is_defined());
    }

    #[test]
    fn test_territory_decided() {
        let mut t = TerritoryStats::new(2);
        for p in 0..4 {
            t.add(p, if p % 2 == 0 { 1.0 } else { 0.0 });
        }
        assert!(t.all_decided(0.2));
        t.add(0, 0.0);
        assert!(!t.all_decided(0.2));
    }
}
