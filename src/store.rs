//! Document and vector storage
//!
//! SQLite persistence for users and documents. The `embedding` column is
//! nullable and holds the vector in the bracketed decimal text form
//! (`[0.0123,-0.451,...]`), always bound as a statement parameter. That text
//! form exists only at this boundary; everything above works with `Vec<f32>`.
//!
//! Similarity queries run through a registered deterministic SQL scalar
//! function, so the top-K statement stays an ordinary parameterized query:
//!
//! ```sql
//! SELECT ..., cosine_similarity(embedding, ?1) AS similarity
//! FROM documents
//! WHERE user_id = ?2 AND embedding IS NOT NULL
//! ORDER BY similarity DESC, id ASC
//! LIMIT ?3
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A registered user
#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub api_key: String,
    pub created_at: DateTime<Utc>,
}

/// A stored document; `created_at` is immutable after insert
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A document scored against a query vector
#[derive(Debug, Clone, Serialize)]
pub struct ScoredDocument {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub similarity: f32,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed store for users, documents and their embeddings
pub struct DocumentStore {
    conn: Mutex<Connection>,
    dimension: usize,
}

impl DocumentStore {
    /// Open or create a store at `path` for vectors of the given dimension
    pub fn open(path: &Path, dimension: usize) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn, dimension)
    }

    /// In-memory store (tests, throwaway CLI runs)
    pub fn open_in_memory(dimension: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, dimension)
    }

    fn init(conn: Connection, dimension: usize) -> Result<Self> {
        // journal_mode echoes the new mode back, so it can't go in the batch
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT UNIQUE NOT NULL,
                api_key TEXT UNIQUE NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_user ON documents(user_id);

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        register_cosine_similarity(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            dimension,
        };
        store.check_dimension()?;
        Ok(store)
    }

    /// Refuse to reuse a database indexed with a different embedding backend
    fn check_dimension(&self) -> Result<()> {
        let conn = self.conn.lock();
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'embedding_dim'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match stored {
            Some(value) => {
                let actual: usize = value
                    .parse()
                    .map_err(|_| Error::MalformedVector(format!("meta embedding_dim: {value}")))?;
                if actual != self.dimension {
                    return Err(Error::DimensionMismatch {
                        expected: self.dimension,
                        actual,
                    });
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('embedding_dim', ?1)",
                    [self.dimension.to_string()],
                )?;
            }
        }
        Ok(())
    }

    /// Vector dimension this store was opened with
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    // ===== users =====

    /// Register a user and issue an opaque API key
    pub fn create_user(&self, email: &str) -> Result<UserRecord> {
        let api_key = Uuid::new_v4().simple().to_string();
        let created_at = Utc::now();

        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO users (email, api_key, created_at) VALUES (?1, ?2, ?3)",
            params![email, api_key, created_at.to_rfc3339()],
        );

        match result {
            Ok(_) => Ok(UserRecord {
                id: conn.last_insert_rowid(),
                email: email.to_string(),
                api_key,
                created_at,
            }),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::EmailTaken(email.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a bearer API key to its user
    pub fn find_user_by_api_key(&self, api_key: &str) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock();
        let user = conn
            .query_row(
                "SELECT id, email, api_key, created_at FROM users WHERE api_key = ?1",
                [api_key],
                |row| {
                    Ok(UserRecord {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        api_key: row.get(2)?,
                        created_at: parse_timestamp(3, row.get(3)?)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    /// Look up a user by email (CLI convenience)
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock();
        let user = conn
            .query_row(
                "SELECT id, email, api_key, created_at FROM users WHERE email = ?1",
                [email],
                |row| {
                    Ok(UserRecord {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        api_key: row.get(2)?,
                        created_at: parse_timestamp(3, row.get(3)?)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    // ===== documents =====

    /// Insert a document with no embedding yet
    pub fn insert_document(&self, user_id: i64, title: &str, content: &str) -> Result<DocumentRecord> {
        let created_at = Utc::now();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO documents (user_id, title, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, title, content, created_at.to_rfc3339()],
        )?;

        Ok(DocumentRecord {
            id: conn.last_insert_rowid(),
            user_id,
            title: title.to_string(),
            content: content.to_string(),
            created_at,
        })
    }

    /// Fetch one document, scoped to its owner
    pub fn get_document(&self, user_id: i64, document_id: i64) -> Result<Option<DocumentRecord>> {
        let conn = self.conn.lock();
        let doc = conn
            .query_row(
                "SELECT id, user_id, title, content, created_at
                 FROM documents WHERE id = ?1 AND user_id = ?2",
                params![document_id, user_id],
                map_document_row,
            )
            .optional()?;
        Ok(doc)
    }

    /// All of one owner's documents, newest first
    pub fn list_documents(&self, user_id: i64) -> Result<Vec<DocumentRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, content, created_at
             FROM documents WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC",
        )?;
        let docs = stmt
            .query_map([user_id], map_document_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(docs)
    }

    /// Delete a document; `false` when absent or owned by someone else
    pub fn delete_document(&self, user_id: i64, document_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "DELETE FROM documents WHERE id = ?1 AND user_id = ?2",
            params![document_id, user_id],
        )?;
        Ok(rows > 0)
    }

    // ===== vectors =====

    /// Write a document's embedding in one atomic column update.
    ///
    /// Idempotent per (document, vector). Returns `false` when the document
    /// no longer exists: a delete that raced the index worker wins, and the
    /// write becomes a no-op instead of an error.
    pub fn set_embedding(&self, document_id: i64, vector: &[f32]) -> Result<bool> {
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let encoded = encode_vector(vector);
        let conn = self.conn.lock();
        let rows = conn.execute(
            "UPDATE documents SET embedding = ?1 WHERE id = ?2",
            params![encoded, document_id],
        )?;
        Ok(rows > 0)
    }

    /// Stored embedding for a document, if already indexed
    pub fn embedding_of(&self, document_id: i64) -> Result<Option<Vec<f32>>> {
        let conn = self.conn.lock();
        let encoded: Option<Option<String>> = conn
            .query_row(
                "SELECT embedding FROM documents WHERE id = ?1",
                [document_id],
                |row| row.get(0),
            )
            .optional()?;

        match encoded.flatten() {
            Some(text) => Ok(Some(parse_vector(&text)?)),
            None => Ok(None),
        }
    }

    /// Top-K documents of one owner by cosine similarity to `query`.
    ///
    /// Rows without an embedding are excluded, not scored as zero. Ties
    /// break by ascending document id. Exact scan; fine at the scale of one
    /// user's documents, and the signature leaves room for an ANN-backed
    /// implementation later.
    pub fn top_k_by_similarity(
        &self,
        user_id: i64,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let encoded = encode_vector(query);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, title, content, created_at,
                    cosine_similarity(embedding, ?1) AS similarity
             FROM documents
             WHERE user_id = ?2 AND embedding IS NOT NULL
             ORDER BY similarity DESC, id ASC
             LIMIT ?3",
        )?;

        let rows = stmt
            .query_map(params![encoded, user_id, k as i64], |row| {
                Ok(ScoredDocument {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    content: row.get(2)?,
                    created_at: parse_timestamp(3, row.get(3)?)?,
                    similarity: row.get::<_, f64>(4)? as f32,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn map_document_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRecord> {
    Ok(DocumentRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        created_at: parse_timestamp(4, row.get(4)?)?,
    })
}

fn parse_timestamp(idx: usize, text: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Register `cosine_similarity(a, b)` on a connection.
///
/// Both arguments are bracketed vector literals; the result matches
/// pgvector's `1 - (a <=> b)`, range [-1, 1].
fn register_cosine_similarity(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "cosine_similarity",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let a = parse_vector(&ctx.get::<String>(0)?)
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            let b = parse_vector(&ctx.get::<String>(1)?)
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            if a.len() != b.len() {
                return Err(rusqlite::Error::UserFunctionError(Box::new(
                    Error::DimensionMismatch {
                        expected: a.len(),
                        actual: b.len(),
                    },
                )));
            }
            Ok(cosine_similarity(&a, &b) as f64)
        },
    )
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

/// Encode a vector as the bracketed decimal text form
pub fn encode_vector(vector: &[f32]) -> String {
    let mut out = String::with_capacity(vector.len() * 10 + 2);
    out.push('[');
    for (i, value) in vector.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{value}");
    }
    out.push(']');
    out
}

/// Parse the bracketed decimal text form back into a vector
pub fn parse_vector(text: &str) -> Result<Vec<f32>> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| Error::MalformedVector(truncate_for_error(text)))?;

    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|_| Error::MalformedVector(truncate_for_error(part)))
        })
        .collect()
}

fn truncate_for_error(text: &str) -> String {
    const MAX: usize = 48;
    if text.len() > MAX {
        format!("{}...", &text[..MAX])
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dim: usize) -> DocumentStore {
        DocumentStore::open_in_memory(dim).unwrap()
    }

    #[test]
    fn test_vector_codec_roundtrip() {
        let original = vec![0.1, -0.451, 0.0, 3.5];
        let encoded = encode_vector(&original);
        assert!(encoded.starts_with('[') && encoded.ends_with(']'));

        let recovered = parse_vector(&encoded).unwrap();
        assert_eq!(original, recovered);
    }

    #[test]
    fn test_vector_codec_rejects_garbage() {
        assert!(parse_vector("").is_err());
        assert!(parse_vector("[1,2").is_err());
        assert!(parse_vector("1,2]").is_err());
        assert!(parse_vector("[1,x,3]").is_err());
    }

    #[test]
    fn test_user_registration_and_lookup() {
        let store = store(3);
        let user = store.create_user("a@example.com").unwrap();
        assert!(!user.api_key.is_empty());

        let found = store.find_user_by_api_key(&user.api_key).unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.email, "a@example.com");

        assert!(store.find_user_by_api_key("bogus").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let store = store(3);
        store.create_user("a@example.com").unwrap();
        match store.create_user("a@example.com") {
            Err(Error::EmailTaken(email)) => assert_eq!(email, "a@example.com"),
            other => panic!("expected EmailTaken, got {other:?}"),
        }
    }

    #[test]
    fn test_document_crud_scoped_to_owner() {
        let store = store(3);
        let u1 = store.create_user("u1@example.com").unwrap();
        let u2 = store.create_user("u2@example.com").unwrap();

        let doc = store.insert_document(u1.id, "title", "content").unwrap();
        assert!(store.get_document(u1.id, doc.id).unwrap().is_some());
        // Another owner's lookup is a miss, not an error
        assert!(store.get_document(u2.id, doc.id).unwrap().is_none());

        assert_eq!(store.list_documents(u1.id).unwrap().len(), 1);
        assert!(store.list_documents(u2.id).unwrap().is_empty());

        assert!(!store.delete_document(u2.id, doc.id).unwrap());
        assert!(store.delete_document(u1.id, doc.id).unwrap());
        assert!(store.get_document(u1.id, doc.id).unwrap().is_none());
    }

    #[test]
    fn test_set_embedding_is_idempotent() {
        let store = store(3);
        let user = store.create_user("a@example.com").unwrap();
        let doc = store.insert_document(user.id, "t", "c").unwrap();

        let vector = vec![0.6, 0.8, 0.0];
        assert!(store.set_embedding(doc.id, &vector).unwrap());
        let first = store.embedding_of(doc.id).unwrap().unwrap();

        assert!(store.set_embedding(doc.id, &vector).unwrap());
        let second = store.embedding_of(doc.id).unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(second, vector);
    }

    #[test]
    fn test_set_embedding_after_delete_is_noop() {
        let store = store(3);
        let user = store.create_user("a@example.com").unwrap();
        let doc = store.insert_document(user.id, "t", "c").unwrap();
        assert!(store.delete_document(user.id, doc.id).unwrap());

        // Delete-wins: the late write succeeds as a no-op
        assert!(!store.set_embedding(doc.id, &[1.0, 0.0, 0.0]).unwrap());
        assert!(store.get_document(user.id, doc.id).unwrap().is_none());
        assert!(store.embedding_of(doc.id).unwrap().is_none());
    }

    #[test]
    fn test_set_embedding_rejects_wrong_dimension() {
        let store = store(3);
        let user = store.create_user("a@example.com").unwrap();
        let doc = store.insert_document(user.id, "t", "c").unwrap();

        match store.set_embedding(doc.id, &[1.0, 0.0]) {
            Err(Error::DimensionMismatch { expected, actual }) => {
                assert_eq!(expected, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("expected DimensionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_top_k_ranking_known_similarities() {
        let store = store(3);
        let user = store.create_user("a@example.com").unwrap();

        let identical = store.insert_document(user.id, "identical", "").unwrap();
        let orthogonal = store.insert_document(user.id, "orthogonal", "").unwrap();
        let opposite = store.insert_document(user.id, "opposite", "").unwrap();

        store.set_embedding(identical.id, &[1.0, 0.0, 0.0]).unwrap();
        store.set_embedding(orthogonal.id, &[0.0, 1.0, 0.0]).unwrap();
        store.set_embedding(opposite.id, &[-1.0, 0.0, 0.0]).unwrap();

        let hits = store
            .top_k_by_similarity(user.id, &[1.0, 0.0, 0.0], 10)
            .unwrap();
        assert_eq!(hits.len(), 3);

        assert_eq!(hits[0].title, "identical");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].title, "orthogonal");
        assert!(hits[1].similarity.abs() < 1e-6);
        assert_eq!(hits[2].title, "opposite");
        assert!((hits[2].similarity + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_top_k_bounds_and_null_exclusion() {
        let store = store(3);
        let user = store.create_user("a@example.com").unwrap();

        for i in 0..4 {
            let doc = store
                .insert_document(user.id, &format!("doc{i}"), "")
                .unwrap();
            // Leave the last one unindexed
            if i < 3 {
                store.set_embedding(doc.id, &[1.0, i as f32, 0.0]).unwrap();
            }
        }

        let hits = store
            .top_k_by_similarity(user.id, &[1.0, 0.0, 0.0], 2)
            .unwrap();
        assert_eq!(hits.len(), 2);

        let all = store
            .top_k_by_similarity(user.id, &[1.0, 0.0, 0.0], 10)
            .unwrap();
        // The unindexed document is excluded, not scored as zero
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|h| h.title != "doc3"));
    }

    #[test]
    fn test_top_k_owner_isolation() {
        let store = store(3);
        let u1 = store.create_user("u1@example.com").unwrap();
        let u2 = store.create_user("u2@example.com").unwrap();

        // Identical content and identical embeddings across owners
        let d1 = store.insert_document(u1.id, "shared", "same text").unwrap();
        let d2 = store.insert_document(u2.id, "shared", "same text").unwrap();
        store.set_embedding(d1.id, &[1.0, 0.0, 0.0]).unwrap();
        store.set_embedding(d2.id, &[1.0, 0.0, 0.0]).unwrap();

        let hits = store
            .top_k_by_similarity(u1.id, &[1.0, 0.0, 0.0], 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, d1.id);
    }

    #[test]
    fn test_tie_break_by_document_id() {
        let store = store(3);
        let user = store.create_user("a@example.com").unwrap();

        let a = store.insert_document(user.id, "a", "").unwrap();
        let b = store.insert_document(user.id, "b", "").unwrap();
        store.set_embedding(a.id, &[0.0, 1.0, 0.0]).unwrap();
        store.set_embedding(b.id, &[0.0, 1.0, 0.0]).unwrap();

        let hits = store
            .top_k_by_similarity(user.id, &[0.0, 1.0, 0.0], 10)
            .unwrap();
        assert_eq!(hits[0].id, a.id);
        assert_eq!(hits[1].id, b.id);
    }

    #[test]
    fn test_dimension_recorded_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("semvault.db");

        {
            let store = DocumentStore::open(&path, 3).unwrap();
            store.create_user("a@example.com").unwrap();
        }

        // Same dimension reopens fine
        DocumentStore::open(&path, 3).unwrap();

        // A different backend dimension is refused
        match DocumentStore::open(&path, 5) {
            Err(Error::DimensionMismatch { expected, actual }) => {
                assert_eq!(expected, 5);
                assert_eq!(actual, 3);
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected DimensionMismatch"),
        }
    }
}
