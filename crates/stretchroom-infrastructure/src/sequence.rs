//! Process-wide atomic sequence generators.
//!
//! Each generator starts from a random value and hands out strictly
//! increasing (wrapping) values to any number of concurrent callers.

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use rand::{rngs::StdRng, Rng, SeedableRng};

/// A source of unique values.
pub trait AtomGenerator<T> {
    fn next(&self) -> T;
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// 64-bit sequence.
#[derive(Debug)]
pub struct AtomicLongGenerator {
    current: AtomicI64,
}

impl AtomicLongGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        Self::starting_at(seeded_rng(seed).gen())
    }

    pub fn starting_at(value: i64) -> Self {
        Self {
            current: AtomicI64::new(value),
        }
    }
}

impl Default for AtomicLongGenerator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AtomGenerator<i64> for AtomicLongGenerator {
    fn next(&self) -> i64 {
        self.current.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }
}

/// 32-bit sequence.
#[derive(Debug)]
pub struct AtomicIntGenerator {
    current: AtomicI32,
}

impl AtomicIntGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        Self::starting_at(seeded_rng(seed).gen())
    }

    pub fn starting_at(value: i32) -> Self {
        Self {
            current: AtomicI32::new(value),
        }
    }
}

impl Default for AtomicIntGenerator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AtomGenerator<i32> for AtomicIntGenerator {
    fn next(&self) -> i32 {
        self.current.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }
}
