//! Audit trail for user-visible actions
//!
//! Every API operation emits one structured event on the `audit` tracing
//! target, so deployments can route the trail to its own sink with an
//! `EnvFilter` directive (e.g. `audit=info`).

use serde_json::Value;

/// Action names, matching the operations the API exposes
pub const USER_REGISTERED: &str = "USER_REGISTERED";
pub const DOCUMENT_CREATED: &str = "DOCUMENT_CREATED";
pub const DOCUMENT_SEARCH: &str = "DOCUMENT_SEARCH";
pub const DOCUMENTS_LISTED: &str = "DOCUMENTS_LISTED";
pub const DOCUMENT_VIEWED: &str = "DOCUMENT_VIEWED";
pub const DOCUMENT_DELETED: &str = "DOCUMENT_DELETED";

/// Record one user action with optional structured detail
pub fn log_user_action(user_id: i64, action: &str, details: Value) {
    tracing::info!(
        target: "audit",
        user_id,
        action,
        details = %details,
        "user action"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_log_user_action_accepts_any_detail_shape() {
        log_user_action(1, USER_REGISTERED, json!({}));
        log_user_action(1, DOCUMENT_CREATED, json!({"document_id": 42}));
        log_user_action(1, DOCUMENT_SEARCH, json!({"query": "aspirin"}));
    }
}
