//! Capabilities the index consumes from the outside world: counting tokens
//! and embedding text.
//!
//! Model inference is not part of this crate. Callers plug their tokenizer
//! and embedding model in through [`TokenCounter`] and [`Embedder`]; the
//! built-in implementations below are deterministic stand-ins that make the
//! index usable (and testable) without a model.

use crate::error::{Error, Result};

/// Approximate characters per token for English text.
pub const CHARS_PER_TOKEN: usize = 4;

/// Counts tokens the way the downstream language model would.
pub trait TokenCounter {
    fn count_tokens(&self, text: &str) -> usize;
}

impl<F> TokenCounter for F
where
    F: Fn(&str) -> usize,
{
    fn count_tokens(&self, text: &str) -> usize {
        self(text)
    }
}

/// Maps text to a fixed-length vector.
pub trait Embedder {
    /// Length of every vector returned by [`Embedder::embed`].
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// One token per whitespace-separated word.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenCounter;

impl TokenCounter for WhitespaceTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// Character-length estimate, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharsPerTokenCounter;

impl TokenCounter for CharsPerTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }
}

/// Signed feature hashing over lower-cased alphanumeric words.
///
/// Words are hashed with BLAKE3, so vectors stored by one build keep
/// matching the queries of another.
///
/// Texts sharing vocabulary land close to each other, which is enough for
/// lexical-ish dense retrieval and for exercising the dense backend.
/// Vectors are L2-normalized unless the text has no words.
///
/// # Examples
///
/// ```
/// use docindex::embed::{Embedder, HashingEmbedder};
///
/// let embedder = HashingEmbedder::new(64);
/// let v = embedder.embed("submit a batch job").unwrap();
/// assert_eq!(v.len(), 64);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.dimension == 0 {
            return Err(Error::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }

        let mut vector = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let h = word_hash(&word.to_lowercase());
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(vector)
    }
}

fn word_hash(word: &str) -> u64 {
    let digest = blake3::hash(word.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn whitespace_counter_counts_words() {
        assert_eq!(WhitespaceTokenCounter.count_tokens("a  b\nc"), 3);
        assert_eq!(WhitespaceTokenCounter.count_tokens("   "), 0);
    }

    #[test]
    fn chars_counter_rounds_up() {
        assert_eq!(CharsPerTokenCounter.count_tokens(""), 0);
        assert_eq!(CharsPerTokenCounter.count_tokens("abcde"), 2);
    }

    #[test]
    fn closures_are_token_counters() {
        let counter = |text: &str| text.len();
        assert_eq!(counter.count_tokens("four"), 4);
    }

    #[test]
    fn hashing_is_deterministic_and_normalized() {
        let e = HashingEmbedder::new(32);
        let a = e.embed("Slurm batch queue").unwrap();
        let b = e.embed("slurm BATCH queue").unwrap();
        assert_eq!(a, b);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_vocabulary_scores_higher() {
        let e = HashingEmbedder::new(256);
        let query = e.embed("gpu nodes").unwrap();
        let close = e.embed("requesting gpu nodes on the cluster").unwrap();
        let far = e.embed("password reset instructions").unwrap();
        assert!(dot(&query, &close) > dot(&query, &far));
    }

    #[test]
    fn word_buckets_follow_blake3() {
        let e = HashingEmbedder::new(64);
        let digest = blake3::hash(b"queue");
        let h = u64::from_le_bytes(digest.as_bytes()[..8].try_into().unwrap());
        let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };

        let mut expected = vec![0.0f32; 64];
        expected[(h % 64) as usize] = sign;
        assert_eq!(e.embed("Queue").unwrap(), expected);
    }

    #[test]
    fn empty_text_embeds_to_zero() {
        let e = HashingEmbedder::new(8);
        assert_eq!(e.embed("  ... ").unwrap(), vec![0.0; 8]);
    }

    #[test]
    fn zero_dimension_is_rejected() {
        let e = HashingEmbedder::new(0);
        assert!(matches!(
            e.embed("x"),
            Err(Error::DimensionMismatch { .. })
        ));
    }
}
