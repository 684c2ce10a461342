//! Fuzzy lexical similarity used to re-rank vector candidates.
//!
//! [`partial_ratio`] aligns the shorter string against every window of the
//! longer one and reports the best indel similarity, so a short query that
//! appears (or nearly appears) inside a long chunk scores close to 100.
//!
//! Similarity of two sequences `a`, `b` is `2·LCS(a, b) / (|a| + |b|)`. The
//! LCS length is computed with the bit-parallel algorithm of Hyyrö (2004),
//! one machine word per 64 pattern characters.

use std::collections::HashMap;

/// Best indel similarity of the shorter input against any window of the
/// longer one, in `[0, 100]`. Works on Unicode scalar values. Either input
/// empty → `0.0`.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let (needle, haystack) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let m = needle.len();
    let n = haystack.len();

    if haystack.windows(m).any(|w| w == needle.as_slice()) {
        return 100.0;
    }

    let pattern = Pattern::new(&needle);
    let mut best = 0.0f64;

    // Edge-aligned partial windows: prefixes and suffixes shorter than the needle.
    for len in 1..m.min(n + 1) {
        best = best.max(pattern.similarity(&haystack[..len]));
        best = best.max(pattern.similarity(&haystack[n - len..]));
    }
    for window in haystack.windows(m) {
        best = best.max(pattern.similarity(window));
        if best >= 100.0 {
            break;
        }
    }

    best
}

/// [`partial_ratio`] scaled to `[0, 1]`.
pub fn lexical_score(query: &str, text: &str) -> f64 {
    partial_ratio(query, text) / 100.0
}

/// Precomputed match masks of a pattern for the bit-parallel LCS.
struct Pattern {
    len: usize,
    words: usize,
    masks: HashMap<char, Vec<u64>>,
}

impl Pattern {
    fn new(chars: &[char]) -> Self {
        let len = chars.len();
        let words = len.div_ceil(64);
        let mut masks: HashMap<char, Vec<u64>> = HashMap::new();
        for (i, &c) in chars.iter().enumerate() {
            let entry = masks.entry(c).or_insert_with(|| vec![0u64; words]);
            entry[i / 64] |= 1u64 << (i % 64);
        }
        Self { len, words, masks }
    }

    fn lcs(&self, text: &[char]) -> usize {
        let mut v = vec![u64::MAX; self.words];
        for c in text {
            let Some(mask) = self.masks.get(c) else {
                continue;
            };
            let mut carry = 0u64;
            for (w, word) in v.iter_mut().enumerate() {
                let u = *word & mask[w];
                let (sum, c1) = word.overflowing_add(u);
                let (sum, c2) = sum.overflowing_add(carry);
                carry = (c1 || c2) as u64;
                // U ⊆ V, so V − U needs no borrow.
                *word = sum | (*word & !u);
            }
        }

        let mut zeros = 0usize;
        for (w, word) in v.iter().enumerate() {
            let bits = if w + 1 == self.words && self.len % 64 != 0 {
                self.len % 64
            } else {
                64
            };
            let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
            zeros += bits - (word & mask).count_ones() as usize;
        }
        zeros
    }

    fn similarity(&self, text: &[char]) -> f64 {
        let total = self.len + text.len();
        if total == 0 {
            return 0.0;
        }
        100.0 * 2.0 * self.lcs(text) as f64 / total as f64
    }
}
