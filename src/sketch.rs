//! Count-Min Frequency Sketch
//!
//! A compact probabilistic frequency estimator used by the W-TinyLFU policy
//! and by fast-mode victim sampling. The sketch answers "roughly how often
//! was this key touched recently" in constant time and sublinear space,
//! with one-sided error: estimates never undercount, they may overcount.
//!
//! # Structure
//!
//! Four rows of `W` saturating 4-bit counters (stored one per byte, capped
//! at 15), where `W` is the smallest power of two at or above ten times the
//! cache capacity, bounded by [`MAX_WIDTH`]. Each key hashes to one slot
//! per row through four seeded mixes of its 64-bit hash:
//!
//! ```text
//!          row 0:  [ .. .. 07 .. .. .. 15 .. ]   <- slot = mix(h ^ seed0) & mask
//!          row 1:  [ .. 03 .. .. .. 09 .. .. ]   <- slot = mix(h ^ seed1) & mask
//!          row 2:  [ 01 .. .. .. 12 .. .. .. ]   <- slot = mix(h ^ seed2) & mask
//!          row 3:  [ .. .. .. 05 .. .. .. 02 ]   <- slot = mix(h ^ seed3) & mask
//!
//!          increment(key): bump all four slots (saturating at 15)
//!          frequency(key): min of the four slots
//! ```
//!
//! # Aging
//!
//! After every `W * 10` increments, all counters are halved (logical right
//! shift) and the operation counter is halved with them. This bounded
//! forgetting lets the sketch track shifts in the workload instead of
//! accumulating stale popularity forever.
//!
//! # Concurrency
//!
//! Counters are relaxed atomics. Increments are row-local saturating adds,
//! so contention is negligible; the aging sweep runs on whichever thread
//! crosses the sample threshold and races benignly with concurrent
//! increments (the sketch is probabilistic, a lost update only perturbs an
//! estimate by one).

use core::fmt;
use core::sync::atomic::{AtomicU8, AtomicU64, Ordering};

/// Number of hash rows.
const ROWS: usize = 4;

/// Saturation cap for the 4-bit counters.
const COUNTER_CAP: u8 = 15;

/// Upper bound on the per-row width, capping sketch memory at 4 MiB.
pub(crate) const MAX_WIDTH: usize = 1 << 20;

/// Lower bound on the per-row width.
const MIN_WIDTH: usize = 64;

/// Per-row seeds, fed to the mix function so the rows hash independently.
/// Large odd constants drawn from the golden-ratio family.
const SEEDS: [u64; ROWS] = [
    0x9e37_79b9_7f4a_7c15,
    0xc2b2_ae3d_27d4_eb4f,
    0x1656_67b1_9e37_79f9,
    0xd6e8_feb8_6659_fd93,
];

/// SplitMix64 finalizer; spreads entropy of the input across all 64 bits.
#[inline]
fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// A 4-row count-min sketch with periodic halving.
///
/// Operates on pre-hashed keys: callers hash once with the cache's hash
/// builder and pass the 64-bit hash to [`increment`](Self::increment) and
/// [`frequency`](Self::frequency).
pub struct FrequencySketch {
    /// Row-major counter table, `ROWS * width` single-byte counters.
    table: Box<[AtomicU8]>,

    /// Per-row width, a power of two.
    width: usize,

    /// `width - 1`, for masking mixed hashes into slot indices.
    mask: u64,

    /// Increments observed since the last halving.
    ops: AtomicU64,

    /// Halve all counters when `ops` reaches this.
    sample_period: u64,
}

impl FrequencySketch {
    /// Builds a sketch sized for a cache of `capacity` entries.
    ///
    /// The per-row width is the smallest power of two at or above
    /// `10 * capacity`, clamped to `[64, 2^20]`.
    pub fn with_capacity(capacity: usize) -> Self {
        let target = capacity.saturating_mul(10).max(MIN_WIDTH);
        // Clamp before rounding up: MAX_WIDTH is itself a power of two.
        let width = target.min(MAX_WIDTH).next_power_of_two();
        let table = (0..ROWS * width).map(|_| AtomicU8::new(0)).collect();
        FrequencySketch {
            table,
            width,
            mask: (width - 1) as u64,
            ops: AtomicU64::new(0),
            sample_period: (width as u64).saturating_mul(10),
        }
    }

    /// Per-row width of the counter table.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns the slot index for `hash` in the given row.
    #[inline]
    fn slot(&self, row: usize, hash: u64) -> usize {
        row * self.width + (mix64(hash ^ SEEDS[row]) & self.mask) as usize
    }

    /// Records one access for the hashed key, saturating each of the four
    /// counters at 15. Triggers the aging sweep when the sample period is
    /// reached.
    pub fn increment(&self, hash: u64) {
        for row in 0..ROWS {
            let cell = &self.table[self.slot(row, hash)];
            // Saturating increment; the CAS loop retries only while other
            // writers are moving the same counter below the cap.
            let mut current = cell.load(Ordering::Relaxed);
            while current < COUNTER_CAP {
                match cell.compare_exchange_weak(
                    current,
                    current + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(observed) => current = observed,
                }
            }
        }

        let n = self.ops.fetch_add(1, Ordering::Relaxed) + 1;
        if n == self.sample_period {
            self.age();
        }
    }

    /// Estimated access frequency for the hashed key: the minimum of its
    /// four row counters.
    pub fn frequency(&self, hash: u64) -> u8 {
        (0..ROWS)
            .map(|row| self.table[self.slot(row, hash)].load(Ordering::Relaxed))
            .min()
            .unwrap_or(0)
    }

    /// Resets every counter and the operation count to zero.
    pub fn clear(&self) {
        for cell in self.table.iter() {
            cell.store(0, Ordering::Relaxed);
        }
        self.ops.store(0, Ordering::Relaxed);
    }

    /// Halves every counter and the operation counter. Exactly one thread
    /// runs this per sample period (the one whose increment hit the
    /// threshold); concurrent increments race benignly.
    fn age(&self) {
        for cell in self.table.iter() {
            let mut current = cell.load(Ordering::Relaxed);
            loop {
                match cell.compare_exchange_weak(
                    current,
                    current >> 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(observed) => current = observed,
                }
            }
        }
        self.ops.store(self.sample_period / 2, Ordering::Relaxed);
    }
}

impl fmt::Debug for FrequencySketch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrequencySketch")
            .field("width", &self.width)
            .field("sample_period", &self.sample_period)
            .field("ops", &self.ops.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_is_power_of_two_and_bounded() {
        let sketch = FrequencySketch::with_capacity(100);
        assert!(sketch.width().is_power_of_two());
        assert!(sketch.width() >= 1_000);

        let tiny = FrequencySketch::with_capacity(1);
        assert_eq!(tiny.width(), MIN_WIDTH);

        let huge = FrequencySketch::with_capacity(usize::MAX / 16);
        assert_eq!(huge.width(), MAX_WIDTH);
    }

    #[test]
    fn test_unseen_key_has_zero_frequency() {
        let sketch = FrequencySketch::with_capacity(64);
        assert_eq!(sketch.frequency(0xdead_beef), 0);
    }

    #[test]
    fn test_increment_raises_frequency() {
        let sketch = FrequencySketch::with_capacity(64);
        for _ in 0..5 {
            sketch.increment(42);
        }
        assert!(sketch.frequency(42) >= 5);
    }

    #[test]
    fn test_counters_saturate_at_fifteen() {
        let sketch = FrequencySketch::with_capacity(64);
        for _ in 0..100 {
            sketch.increment(42);
        }
        assert_eq!(sketch.frequency(42), COUNTER_CAP);
    }

    #[test]
    fn test_estimates_never_undercount() {
        let sketch = FrequencySketch::with_capacity(256);
        for key in 0..50u64 {
            for _ in 0..(key % 7) {
                sketch.increment(key);
            }
        }
        for key in 0..50u64 {
            let true_count = (key % 7) as u8;
            assert!(sketch.frequency(key) >= true_count, "key {key} undercounted");
        }
    }

    #[test]
    fn test_clear_zeroes_everything() {
        let sketch = FrequencySketch::with_capacity(64);
        for _ in 0..10 {
            sketch.increment(7);
        }
        sketch.clear();
        assert_eq!(sketch.frequency(7), 0);
    }

    #[test]
    fn test_aging_halves_counters() {
        let sketch = FrequencySketch::with_capacity(100);
        for _ in 0..10 {
            sketch.increment(42);
        }
        assert_eq!(sketch.frequency(42), 10);

        // Drive a single unrelated key until the aging sweep fires; its
        // counters saturate but every increment still advances the clock.
        for _ in 0..(sketch.sample_period - 10) {
            sketch.increment(7_777);
        }
        assert_eq!(sketch.frequency(42), 5, "counter should have been halved");
    }

    #[test]
    fn test_concurrent_increments_do_not_lose_saturation() {
        use std::sync::Arc;
        let sketch = Arc::new(FrequencySketch::with_capacity(64));
        let mut pool = scoped_threadpool::Pool::new(4);
        pool.scoped(|scope| {
            for _ in 0..4 {
                let sketch = Arc::clone(&sketch);
                scope.execute(move || {
                    for _ in 0..50 {
                        sketch.increment(99);
                    }
                });
            }
        });
        assert_eq!(sketch.frequency(99), COUNTER_CAP);
    }
}
