//! Embedding backends
//!
//! A backend turns text into a fixed-length vector. Construction happens
//! once at startup; the instance is read-only afterwards and shared across
//! the request path and the index worker via `Arc`.

mod model2vec;
mod projection;

use std::sync::Arc;

pub use model2vec::Model2VecEmbedder;
pub use projection::{ProjectionEmbedder, PROJECTION_DIM};

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::Result;

/// Embedding model abstraction
///
/// Implementations must be deterministic: embedding the same text twice
/// yields the same vector, and the vector always has exactly `dimension()`
/// elements, including for empty input.
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embedding dimension
    fn dimension(&self) -> usize;

    /// Model name/identifier
    fn name(&self) -> &str;
}

/// Create the configured embedder
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.backend {
        EmbeddingBackend::Projection => Ok(Arc::new(ProjectionEmbedder::new())),
        EmbeddingBackend::Model2Vec => {
            let embedder = match &config.model_path {
                Some(path) => Model2VecEmbedder::from_path(std::path::Path::new(path))?,
                None => Model2VecEmbedder::from_pretrained(&config.model_id)?,
            };
            Ok(Arc::new(embedder))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_default_embedder() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.dimension(), PROJECTION_DIM);
        assert_eq!(embedder.name(), "projection-384");
    }
}
