//! Search engine - embeds the query and runs the owner-scoped top-K query
//!
//! Fails closed: if the embedding backend is down the whole search fails,
//! it never silently degrades to stale or empty results. A document whose
//! indexing job has not completed yet is legitimately absent from results
//! (eventual-consistency window), while staying fetchable by id.

use std::sync::Arc;

use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::store::{DocumentStore, ScoredDocument};

/// Search engine combining the embedding backend and the document store
pub struct SearchEngine {
    store: Arc<DocumentStore>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl SearchEngine {
    pub fn new(store: Arc<DocumentStore>, embedder: Arc<dyn Embedder>, top_k: usize) -> Self {
        Self {
            store,
            embedder,
            top_k: top_k.max(1),
        }
    }

    /// Top-K documents of `owner_id` by similarity to `query`
    pub async fn search(&self, owner_id: i64, query: &str) -> Result<Vec<ScoredDocument>> {
        if query.trim().is_empty() {
            return Err(Error::EmptyQuery);
        }

        let embedder = self.embedder.clone();
        let text = query.to_string();
        let vector = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| Error::model(format!("embedding task panicked: {e}")))??;

        self.store.top_k_by_similarity(owner_id, &vector, self.top_k)
    }
}
