//! Built-in token-projection embedder
//!
//! Maps each token onto a pseudo-random unit direction seeded by the token's
//! hash, sums the directions and L2-normalizes the result. Texts sharing
//! tokens point in correlated directions; unrelated texts land near
//! orthogonal in 384 dimensions. Fully deterministic, no model file.

use crate::embed::Embedder;
use crate::error::Result;

/// Projection embedding dimension
pub const PROJECTION_DIM: usize = 384;

/// Deterministic hash-projection embedder
pub struct ProjectionEmbedder {
    dim: usize,
}

impl ProjectionEmbedder {
    pub fn new() -> Self {
        Self {
            dim: PROJECTION_DIM,
        }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    /// Pseudo-random direction for one token, seeded by its hash
    fn token_direction(&self, seed: u64) -> Vec<f32> {
        // splitmix-style state avoids short cycles for adjacent seeds
        let mut state = seed ^ 0x9e37_79b9_7f4a_7c15;
        (0..self.dim)
            .map(|_| {
                state = state.wrapping_mul(0x2545_f491_4f6c_dd1d).wrapping_add(1);
                let mut x = state;
                x ^= x >> 12;
                x ^= x << 25;
                x ^= x >> 27;
                // top 53 bits to a float in [-1, 1]
                ((x >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0) as f32
            })
            .collect()
    }
}

impl Default for ProjectionEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for ProjectionEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = Self::tokenize(text);

        let mut acc = vec![0.0f32; self.dim];
        if tokens.is_empty() {
            // No tokens survived (empty or punctuation-only input): derive a
            // single direction from the raw bytes so the contract of a valid
            // D-length vector holds for every input.
            let direction = self.token_direction(fnv1a(text.as_bytes()));
            acc.copy_from_slice(&direction);
        } else {
            for token in &tokens {
                let direction = self.token_direction(fnv1a(token.as_bytes()));
                for (slot, value) in acc.iter_mut().zip(direction) {
                    *slot += value;
                }
            }
        }

        let norm = acc.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut acc {
                *v /= norm;
            }
        } else {
            acc[0] = 1.0;
        }

        Ok(acc)
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn name(&self) -> &str {
        "projection-384"
    }
}

/// FNV-1a 64-bit hash
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_dimension_and_determinism() {
        let embedder = ProjectionEmbedder::new();

        let a = embedder.embed("standard adult aspirin dose").unwrap();
        let b = embedder.embed("standard adult aspirin dose").unwrap();
        assert_eq!(a.len(), PROJECTION_DIM);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_and_short_input() {
        let embedder = ProjectionEmbedder::new();

        for text in ["", " ", "!!!", "a"] {
            let v = embedder.embed(text).unwrap();
            assert_eq!(v.len(), PROJECTION_DIM, "input {text:?}");
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5, "input {text:?} not unit length");
        }
    }

    #[test]
    fn test_identical_text_similarity_is_one() {
        let embedder = ProjectionEmbedder::new();
        let a = embedder.embed("aspirin dosage guidance").unwrap();
        let b = embedder.embed("aspirin dosage guidance").unwrap();
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_token_overlap_beats_disjoint_text() {
        let embedder = ProjectionEmbedder::new();
        let query = embedder.embed("how much aspirin should I take").unwrap();
        let related = embedder
            .embed("Standard adult aspirin dose is 81-325mg daily")
            .unwrap();
        let unrelated = embedder
            .embed("quarterly revenue grew across all regions")
            .unwrap();

        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
        assert!(cosine(&query, &related) > 0.1);
    }

    #[test]
    fn test_case_insensitive_tokens() {
        let embedder = ProjectionEmbedder::new();
        let a = embedder.embed("Aspirin").unwrap();
        let b = embedder.embed("aspirin").unwrap();
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-6);
    }
}
