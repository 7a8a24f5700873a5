//! Asynchronous embedding indexing
//!
//! Document creation enqueues an [`IndexJob`] carrying the document id and a
//! snapshot of its content; the creating request never waits on the result.
//! A background [`IndexWorker`] embeds the snapshot and writes the vector
//! back with one idempotent column update, so at-least-once delivery is safe
//! and redelivery after a partial failure converges to the same state.
//!
//! Failures are retried with exponential backoff up to a bounded number of
//! attempts. A job that exhausts its attempts is logged and dropped: the
//! document stays valid and fetchable by id, it just never shows up in
//! similarity results.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::IndexingConfig;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::store::DocumentStore;

/// One unit of indexing work: (document, content at enqueue time)
#[derive(Debug, Clone)]
pub struct IndexJob {
    pub document_id: i64,
    pub content: String,
}

impl IndexJob {
    pub fn new(document_id: i64, content: String) -> Self {
        Self {
            document_id,
            content,
        }
    }
}

/// Producer half of the indexing queue; cheap to clone into request state
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<IndexJob>,
}

impl JobQueue {
    /// Create the queue; the receiver goes to the worker
    pub fn new() -> (Self, mpsc::UnboundedReceiver<IndexJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire-and-forget enqueue. Never blocks and exposes no result to the
    /// caller; a missing worker is logged, not surfaced.
    pub fn enqueue(&self, job: IndexJob) {
        let document_id = job.document_id;
        if self.tx.send(job).is_err() {
            warn!(document_id, "index worker gone, dropping job");
        }
    }
}

/// Retry policy for the worker loop
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub job_timeout: Duration,
}

impl From<&IndexingConfig> for RetryPolicy {
    fn from(config: &IndexingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            job_timeout: Duration::from_secs(config.job_timeout_secs.max(1)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&IndexingConfig::default())
    }
}

/// Background worker consuming the indexing queue
pub struct IndexWorker {
    store: Arc<DocumentStore>,
    embedder: Arc<dyn Embedder>,
    rx: mpsc::UnboundedReceiver<IndexJob>,
    policy: RetryPolicy,
}

impl IndexWorker {
    pub fn new(
        store: Arc<DocumentStore>,
        embedder: Arc<dyn Embedder>,
        rx: mpsc::UnboundedReceiver<IndexJob>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            embedder,
            rx,
            policy,
        }
    }

    /// Process jobs until every sender is dropped
    pub async fn run(mut self) {
        info!(model = self.embedder.name(), "index worker started");
        while let Some(job) = self.rx.recv().await {
            self.process_with_retry(job).await;
        }
        info!("index worker stopped");
    }

    /// Drain everything queued so far, then return. Used by the CLI and by
    /// tests to step past the eventual-consistency window deterministically.
    pub async fn run_until_idle(&mut self) {
        while let Ok(job) = self.rx.try_recv() {
            self.process_with_retry(job).await;
        }
    }

    async fn process_with_retry(&self, job: IndexJob) {
        let document_id = job.document_id;

        for attempt in 1..=self.policy.max_attempts {
            match timeout(self.policy.job_timeout, self.process(&job)).await {
                Ok(Ok(true)) => {
                    debug!(document_id, attempt, "document indexed");
                    return;
                }
                Ok(Ok(false)) => {
                    // Deleted while the job was in flight: delete wins
                    debug!(document_id, "document gone before indexing, skipping");
                    return;
                }
                Ok(Err(e)) => {
                    warn!(document_id, attempt, error = %e, "indexing attempt failed");
                }
                Err(_) => {
                    warn!(
                        document_id,
                        attempt,
                        timeout_secs = self.policy.job_timeout.as_secs(),
                        "indexing attempt timed out"
                    );
                }
            }

            if attempt < self.policy.max_attempts {
                sleep(self.policy.base_backoff * 2u32.pow(attempt - 1)).await;
            }
        }

        error!(
            document_id,
            attempts = self.policy.max_attempts,
            "indexing abandoned; document stays absent from similarity search"
        );
    }

    /// Embed the content snapshot and store the vector.
    ///
    /// `Ok(false)` means the document was deleted in the meantime.
    async fn process(&self, job: &IndexJob) -> Result<bool> {
        let embedder = self.embedder.clone();
        let content = job.content.clone();
        let vector = tokio::task::spawn_blocking(move || embedder.embed(&content))
            .await
            .map_err(|e| Error::model(format!("embedding task panicked: {e}")))??;

        self.store.set_embedding(job.document_id, &vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::ProjectionEmbedder;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn harness() -> (Arc<DocumentStore>, Arc<dyn Embedder>) {
        let embedder: Arc<dyn Embedder> = Arc::new(ProjectionEmbedder::new());
        let store = Arc::new(DocumentStore::open_in_memory(embedder.dimension()).unwrap());
        (store, embedder)
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            job_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_worker_indexes_enqueued_document() {
        let (store, embedder) = harness();
        let user = store.create_user("a@example.com").unwrap();
        let doc = store.insert_document(user.id, "t", "some content").unwrap();

        let (queue, rx) = JobQueue::new();
        let mut worker = IndexWorker::new(store.clone(), embedder.clone(), rx, fast_policy());

        queue.enqueue(IndexJob::new(doc.id, doc.content.clone()));
        assert!(store.embedding_of(doc.id).unwrap().is_none());

        worker.run_until_idle().await;

        let stored = store.embedding_of(doc.id).unwrap().unwrap();
        assert_eq!(stored, embedder.embed("some content").unwrap());
    }

    #[tokio::test]
    async fn test_deleted_document_is_skipped() {
        let (store, embedder) = harness();
        let user = store.create_user("a@example.com").unwrap();
        let doc = store.insert_document(user.id, "t", "content").unwrap();

        let (queue, rx) = JobQueue::new();
        let mut worker = IndexWorker::new(store.clone(), embedder, rx, fast_policy());

        queue.enqueue(IndexJob::new(doc.id, doc.content.clone()));
        assert!(store.delete_document(user.id, doc.id).unwrap());

        worker.run_until_idle().await;

        // Nothing recreated, nothing corrupted
        assert!(store.get_document(user.id, doc.id).unwrap().is_none());
        assert!(store.embedding_of(doc.id).unwrap().is_none());
    }

    /// Embedder that fails a fixed number of times before succeeding
    struct FlakyEmbedder {
        inner: ProjectionEmbedder,
        failures_left: AtomicU32,
    }

    impl Embedder for FlakyEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::model("transient failure"));
            }
            self.inner.embed(text)
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let embedder: Arc<dyn Embedder> = Arc::new(FlakyEmbedder {
            inner: ProjectionEmbedder::new(),
            failures_left: AtomicU32::new(2),
        });
        let store = Arc::new(DocumentStore::open_in_memory(embedder.dimension()).unwrap());
        let user = store.create_user("a@example.com").unwrap();
        let doc = store.insert_document(user.id, "t", "content").unwrap();

        let (queue, rx) = JobQueue::new();
        let mut worker = IndexWorker::new(store.clone(), embedder, rx, fast_policy());

        queue.enqueue(IndexJob::new(doc.id, doc.content.clone()));
        worker.run_until_idle().await;

        // Third attempt succeeded
        assert!(store.embedding_of(doc.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_document_intact() {
        let embedder: Arc<dyn Embedder> = Arc::new(FlakyEmbedder {
            inner: ProjectionEmbedder::new(),
            failures_left: AtomicU32::new(u32::MAX),
        });
        let store = Arc::new(DocumentStore::open_in_memory(embedder.dimension()).unwrap());
        let user = store.create_user("a@example.com").unwrap();
        let doc = store.insert_document(user.id, "t", "content").unwrap();

        let (queue, rx) = JobQueue::new();
        let mut worker = IndexWorker::new(store.clone(), embedder, rx, fast_policy());

        queue.enqueue(IndexJob::new(doc.id, doc.content.clone()));
        worker.run_until_idle().await;

        // Abandoned: still fetchable by id, never embedded
        assert!(store.get_document(user.id, doc.id).unwrap().is_some());
        assert!(store.embedding_of(doc.id).unwrap().is_none());
    }

    #[test]
    fn test_enqueue_without_worker_does_not_panic() {
        let (queue, rx) = JobQueue::new();
        drop(rx);
        queue.enqueue(IndexJob::new(1, "content".to_string()));
    }
}
