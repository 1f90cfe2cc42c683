//! Seeded random test data.
//!
//! ```
//! use stretchroom_testing::SrRandomizer;
//!
//! let mut a = SrRandomizer::new(42);
//! let mut b = SrRandomizer::new(42);
//! assert_eq!(a.string(16), b.string(16));
//! ```

use chrono::{DateTime, FixedOffset, Offset, Utc};
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use thiserror::Error;

const ALPHANUMERIC: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789abcdefghijklmnopqrstuvwxyz";
const HEX: &str = "ABCDEF1234567890";

/// Upper bound (exclusive) for randomly chosen string lengths.
const MAX_STRING_LENGTH: usize = 255;
/// Upper bound for randomly chosen array lengths.
const MAX_ARRAY_LENGTH: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RandomizerError {
    #[error("cannot take {count} elements from a collection of {len}")]
    CountOutOfRange { count: usize, len: usize },
}

/// Random values for tests. The same seed yields the same sequence.
#[derive(Debug, Clone)]
pub struct SrRandomizer {
    rng: StdRng,
    chars: Vec<char>,
}

impl Default for SrRandomizer {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SrRandomizer {
    /// Seed 0 picks a random seed.
    pub fn new(seed: u64) -> Self {
        let rng = if seed == 0 {
            StdRng::from_entropy()
        } else {
            StdRng::seed_from_u64(seed)
        };
        Self {
            rng,
            chars: ALPHANUMERIC.chars().collect(),
        }
    }

    /// Replace the alphabet used by [`string`](Self::string).
    pub fn with_chars(mut self, chars: &str) -> Self {
        if !chars.is_empty() {
            self.chars = chars.chars().collect();
        }
        self
    }

    fn string_from(&mut self, len: usize, chars: &[char]) -> String {
        let len = if len == 0 {
            self.rng.gen_range(0..MAX_STRING_LENGTH)
        } else {
            len
        };
        (0..len)
            .filter_map(|_| chars.choose(&mut self.rng))
            .collect()
    }

    /// Alphanumeric string. A length of 0 picks one in `[0, 255)`.
    pub fn string(&mut self, len: usize) -> String {
        let chars = std::mem::take(&mut self.chars);
        let s = self.string_from(len, &chars);
        self.chars = chars;
        s
    }

    /// Uppercase hex string. A length of 0 picks one in `[0, 255)`.
    pub fn hex_string(&mut self, len: usize) -> String {
        let chars: Vec<char> = HEX.chars().collect();
        self.string_from(len, &chars)
    }

    /// Value in `[min, max)`, or `min` when the range is empty.
    pub fn int(&mut self, min: i32, max: i32) -> i32 {
        if min >= max { min } else { self.rng.gen_range(min..max) }
    }

    /// Value in `[min, max)`, or `min` when the range is empty.
    pub fn uint(&mut self, min: u32, max: u32) -> u32 {
        if min >= max { min } else { self.rng.gen_range(min..max) }
    }

    /// Value in `[min, max)`, or `min` when the range is empty.
    pub fn long(&mut self, min: i64, max: i64) -> i64 {
        if min >= max { min } else { self.rng.gen_range(min..max) }
    }

    /// Value in `[min, max]`, or `min` when the range is inverted.
    pub fn byte(&mut self, min: u8, max: u8) -> u8 {
        if min >= max { min } else { self.rng.gen_range(min..=max) }
    }

    /// Value between `min` and `max`, or `min` when the range is empty.
    ///
    /// Interpolates instead of sampling a width, so extreme bounds do not
    /// overflow.
    pub fn double(&mut self, min: f64, max: f64) -> f64 {
        if min.is_nan() || max.is_nan() || min >= max {
            return min;
        }
        let t: f64 = self.rng.r#gen();
        min * (1.0 - t) + max * t
    }

    pub fn bool(&mut self) -> bool {
        self.rng.r#gen()
    }

    /// `len` elements built by `f(index, randomizer)`. A length of 0 picks
    /// one up to 256.
    pub fn array<T>(&mut self, len: usize, mut f: impl FnMut(usize, &mut Self) -> T) -> Vec<T> {
        let len = if len == 0 {
            self.rng.gen_range(0..=MAX_ARRAY_LENGTH)
        } else {
            len
        };
        (0..len).map(|i| f(i, self)).collect()
    }

    /// Strings of at most `max_string_len` characters.
    pub fn string_array(&mut self, len: usize, max_string_len: usize) -> Vec<String> {
        self.array(len, |_, r| {
            let n = r.rng.gen_range(0..=max_string_len.max(1));
            if n == 0 { String::new() } else { r.string(n) }
        })
    }

    pub fn long_array(&mut self, len: usize) -> Vec<i64> {
        self.array(len, |_, r| r.long(i64::MIN, i64::MAX))
    }

    pub fn int_array(&mut self, len: usize) -> Vec<i32> {
        self.array(len, |_, r| r.int(i32::MIN, i32::MAX))
    }

    pub fn byte_array(&mut self, len: usize) -> Vec<u8> {
        self.array(len, |_, r| r.byte(u8::MIN, u8::MAX))
    }

    pub fn double_array(&mut self, len: usize) -> Vec<f64> {
        self.array(len, |_, r| r.double(f64::MIN / 2.0, f64::MAX / 2.0))
    }

    /// Uniform instant in `[min, max]` at millisecond precision.
    pub fn date_time(&mut self, min: DateTime<Utc>, max: DateTime<Utc>) -> DateTime<Utc> {
        let (lo, hi) = (min.timestamp_millis(), max.timestamp_millis());
        if lo >= hi {
            return min;
        }
        let millis = self.rng.gen_range(lo..=hi);
        DateTime::from_timestamp_millis(millis).unwrap_or(min)
    }

    /// Uniform instant in `[min, max]`, shown at a whole-hour offset in `[-12, 14]`.
    pub fn date_time_offset(&mut self, min: DateTime<Utc>, max: DateTime<Utc>) -> DateTime<FixedOffset> {
        let instant = self.date_time(min, max);
        let hours = self.rng.gen_range(-12..=14);
        let offset = FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix());
        instant.with_timezone(&offset)
    }

    /// Random element, `None` for an empty slice.
    pub fn element<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    /// `count` elements from distinct positions.
    pub fn elements<'a, T>(&mut self, items: &'a [T], count: usize) -> Result<Vec<&'a T>, RandomizerError> {
        if count > items.len() {
            return Err(RandomizerError::CountOutOfRange {
                count,
                len: items.len(),
            });
        }
        Ok(index::sample(&mut self.rng, items.len(), count)
            .into_iter()
            .map(|i| &items[i])
            .collect())
    }
}
