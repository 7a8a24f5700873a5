//! Semvault
//!
//! Per-user document store with asynchronous embedding indexing and
//! cosine-similarity search.
//!
//! Documents are created with no embedding; an indexing job is enqueued
//! fire-and-forget and a background worker writes the vector back later.
//! Search embeds the query and runs a top-K similarity query scoped to the
//! owner, over documents whose embedding is already present. A freshly
//! created document is therefore invisible to search until its job
//! completes; this eventual-consistency window is intentional.
//!
//! ## Example
//!
//! ```ignore
//! use semvault::{create_embedder, DocumentStore, IndexJob, JobQueue, SearchEngine};
//!
//! let embedder = create_embedder(&config.embedding)?;
//! let store = Arc::new(DocumentStore::open(&db_path, embedder.dimension())?);
//!
//! let (queue, rx) = JobQueue::new();
//! tokio::spawn(IndexWorker::new(store.clone(), embedder.clone(), rx, policy).run());
//!
//! let doc = store.insert_document(user.id, "Aspirin dosage", "81-325mg daily")?;
//! queue.enqueue(IndexJob::new(doc.id, doc.content.clone()));
//!
//! let engine = SearchEngine::new(store, embedder, 3);
//! let hits = engine.search(user.id, "how much aspirin should I take").await?;
//! ```

pub mod api;
pub mod audit;
pub mod config;
pub mod embed;
pub mod error;
pub mod indexer;
pub mod search;
pub mod store;

// Re-exports for convenience
pub use config::Config;
pub use embed::{create_embedder, Embedder};
pub use error::{Error, Result};
pub use indexer::{IndexJob, IndexWorker, JobQueue, RetryPolicy};
pub use search::SearchEngine;
pub use store::{DocumentRecord, DocumentStore, ScoredDocument, UserRecord};
