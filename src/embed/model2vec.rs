//! Model2Vec embedding backend
//!
//! Neural embeddings via a distilled static model, loaded once from a local
//! directory or the Hugging Face hub.

use model2vec::Model2Vec;
use std::path::Path;

use crate::embed::Embedder;
use crate::error::{Error, Result};

/// Model2Vec based embedder
pub struct Model2VecEmbedder {
    model: Model2Vec,
    source: String,
    dimension: usize,
}

impl Model2VecEmbedder {
    /// Load a model from a local directory
    pub fn from_path(path: &Path) -> Result<Self> {
        let model = Model2Vec::from_pretrained(path.to_string_lossy().as_ref(), None, None)
            .map_err(|e| Error::model(format!("load from {}: {e}", path.display())))?;
        Self::build(model, path.to_string_lossy().into_owned())
    }

    /// Load a model from the Hugging Face hub
    pub fn from_pretrained(model_id: &str) -> Result<Self> {
        let model = Model2Vec::from_pretrained(model_id, None, None)
            .map_err(|e| Error::model(format!("load {model_id}: {e}")))?;
        Self::build(model, model_id.to_string())
    }

    fn build(model: Model2Vec, source: String) -> Result<Self> {
        // Probe the output width once; the rest of the system treats it as a
        // fixed constant for the process lifetime.
        let probe = model
            .encode(&["dimension probe"])
            .map_err(|e| Error::model(format!("probe encode: {e}")))?;
        let dimension = probe.row(0).len();

        Ok(Self {
            model,
            source,
            dimension,
        })
    }
}

impl Embedder for Model2VecEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text];
        let embeddings = self
            .model
            .encode(&texts)
            .map_err(|e| Error::model(format!("encode via {}: {e}", self.source)))?;
        Ok(embeddings.row(0).to_vec())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "model2vec"
    }
}
