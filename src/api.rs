//! HTTP API
//!
//! Thin axum layer over the store, queue and search engine. Owner identity
//! comes from an opaque bearer API key issued at registration; every other
//! concern (similarity, indexing, consistency) lives below this module.
//!
//! Creating a document enqueues its indexing job fire-and-forget: the 201
//! response never waits for the embedding, so a search issued right after a
//! create may not see the new document yet.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::audit;
use crate::error::Error;
use crate::indexer::{IndexJob, JobQueue};
use crate::search::SearchEngine;
use crate::store::{DocumentRecord, DocumentStore, ScoredDocument, UserRecord};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DocumentStore>,
    pub engine: Arc<SearchEngine>,
    pub queue: JobQueue,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct DocumentCreateRequest {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(register))
        .route("/documents", post(create_document).get(list_documents))
        .route("/documents/search", post(search_documents))
        .route("/documents/:id", get(get_document).delete(delete_document))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserRecord>), ApiError> {
    let email = request.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(error_response(Error::invalid("email must be a valid address")));
    }

    let user = state.store.create_user(email).map_err(error_response)?;
    audit::log_user_action(user.id, audit::USER_REGISTERED, json!({}));
    // The API key is returned exactly once, here
    Ok((StatusCode::CREATED, Json(user)))
}

async fn create_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DocumentCreateRequest>,
) -> Result<(StatusCode, Json<DocumentRecord>), ApiError> {
    let user = authenticate(&state, &headers)?;

    if request.title.trim().is_empty() {
        return Err(error_response(Error::invalid("title must not be empty")));
    }
    if request.content.trim().is_empty() {
        return Err(error_response(Error::invalid("content must not be empty")));
    }

    let doc = state
        .store
        .insert_document(user.id, &request.title, &request.content)
        .map_err(error_response)?;

    // Fire-and-forget: the response does not wait for the embedding
    state
        .queue
        .enqueue(IndexJob::new(doc.id, doc.content.clone()));

    audit::log_user_action(
        user.id,
        audit::DOCUMENT_CREATED,
        json!({ "document_id": doc.id }),
    );
    Ok((StatusCode::CREATED, Json(doc)))
}

async fn search_documents(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Vec<ScoredDocument>>, ApiError> {
    let user = authenticate(&state, &headers)?;

    let hits = state
        .engine
        .search(user.id, &request.query)
        .await
        .map_err(error_response)?;

    audit::log_user_action(
        user.id,
        audit::DOCUMENT_SEARCH,
        json!({ "query": request.query }),
    );
    Ok(Json(hits))
}

async fn list_documents(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<DocumentRecord>>, ApiError> {
    let user = authenticate(&state, &headers)?;

    let docs = state.store.list_documents(user.id).map_err(error_response)?;
    audit::log_user_action(user.id, audit::DOCUMENTS_LISTED, json!({}));
    Ok(Json(docs))
}

async fn get_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(document_id): Path<i64>,
) -> Result<Json<DocumentRecord>, ApiError> {
    let user = authenticate(&state, &headers)?;

    let doc = state
        .store
        .get_document(user.id, document_id)
        .map_err(error_response)?
        .ok_or_else(|| error_response(Error::NotFound(document_id)))?;

    audit::log_user_action(
        user.id,
        audit::DOCUMENT_VIEWED,
        json!({ "document_id": document_id }),
    );
    Ok(Json(doc))
}

async fn delete_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(document_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let user = authenticate(&state, &headers)?;

    let deleted = state
        .store
        .delete_document(user.id, document_id)
        .map_err(error_response)?;
    if !deleted {
        return Err(error_response(Error::NotFound(document_id)));
    }

    audit::log_user_action(
        user.id,
        audit::DOCUMENT_DELETED,
        json!({ "document_id": document_id }),
    );
    Ok(StatusCode::NO_CONTENT)
}

/// Resolve the bearer API key to a user
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserRecord, ApiError> {
    let key = bearer_token(headers).ok_or_else(|| error_response(Error::Unauthorized))?;
    state
        .store
        .find_user_by_api_key(key)
        .map_err(error_response)?
        .ok_or_else(|| error_response(Error::Unauthorized))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn error_response(err: Error) -> ApiError {
    let status = match err {
        Error::EmptyQuery | Error::InvalidInput(_) | Error::EmailTaken(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::Unauthorized => StatusCode::UNAUTHORIZED,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::ModelUnavailable(_)
        | Error::DimensionMismatch { .. }
        | Error::MalformedVector(_)
        | Error::Storage(_)
        | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorBody {
            message: err.to_string(),
        }),
    )
}
