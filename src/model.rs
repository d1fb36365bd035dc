//! Document and step entities.
//!
//! Both entity types live in a [`Collection`](crate::store::Collection).
//! Mutation goes through the whitelisted setters below only; there is no
//! merge-style update path, so no caller can overwrite identity or
//! ordering fields through a generic payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A collaborative document: the authoritative version counter plus the
/// latest full snapshot of its content.
///
/// The identity is always externally supplied — the `doc_id` named by the
/// first submission that references the document. There is no internal
/// counter behind it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// External identity from the creating submission.
    pub id: i64,
    /// Number of successful commits. Advances by exactly one per commit,
    /// never decreases.
    pub version: u64,
    /// Opaque full-content snapshot, replaced wholesale on each commit.
    pub editor_state: Value,
    /// Creation timestamp (epoch millis).
    pub created_at: u64,
    /// Last-commit timestamp (epoch millis).
    pub updated_at: u64,
}

impl Document {
    /// Create a document seeded from the first submission that names it.
    pub fn new(id: i64, version: u64, editor_state: Value) -> Self {
        let now = now_millis();
        Self {
            id,
            version,
            editor_state,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply an accepted submission: advance the version by one and replace
    /// the snapshot. The only mutation path for a document.
    pub(crate) fn commit(&mut self, editor_state: Value) {
        self.version += 1;
        self.editor_state = editor_state;
        self.updated_at = now_millis();
    }
}

/// A single accepted edit operation.
///
/// Immutable once recorded, never deleted. `id` is a store-assigned
/// per-document sequence number used purely as the replay-ordering and
/// tie-break key; `key` is the client-chosen idempotency token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Store-assigned sequence number, strictly increasing in insertion
    /// order within the owning document's log. Never reused.
    pub id: u64,
    /// Client-supplied idempotency token, unique per document.
    pub key: String,
    /// Owning document's external id.
    pub doc_id: i64,
    /// The version the submitting client believed the document to be at.
    pub version: u64,
    /// Submitting user's id.
    pub created_by: i64,
    /// Opaque edit-operation payload.
    pub data: Value,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Step {
    pub fn new(
        id: u64,
        key: impl Into<String>,
        doc_id: i64,
        version: u64,
        created_by: i64,
        data: Value,
    ) -> Self {
        let now = now_millis();
        Self {
            id,
            key: key.into(),
            doc_id,
            version,
            created_by,
            data,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_new_seeds_version_and_state() {
        let doc = Document::new(7, 3, json!({"text": "hello"}));
        assert_eq!(doc.id, 7);
        assert_eq!(doc.version, 3);
        assert_eq!(doc.editor_state, json!({"text": "hello"}));
        assert!(doc.created_at > 0);
        assert_eq!(doc.created_at, doc.updated_at);
    }

    #[test]
    fn test_document_commit_advances_by_one() {
        let mut doc = Document::new(1, 0, json!({"text": ""}));
        doc.commit(json!({"text": "a"}));
        assert_eq!(doc.version, 1);
        assert_eq!(doc.editor_state, json!({"text": "a"}));

        doc.commit(json!({"text": "ab"}));
        assert_eq!(doc.version, 2);
        assert!(doc.updated_at >= doc.created_at);
    }

    #[test]
    fn test_document_commit_replaces_state_wholesale() {
        let mut doc = Document::new(1, 0, json!({"text": "old", "marks": [1, 2]}));
        doc.commit(json!({"text": "new"}));
        assert_eq!(doc.editor_state, json!({"text": "new"}));
    }

    #[test]
    fn test_step_new_stamps_fields() {
        let step = Step::new(4, "abc", 1, 9, 42, json!({"insert": "x"}));
        assert_eq!(step.id, 4);
        assert_eq!(step.key, "abc");
        assert_eq!(step.doc_id, 1);
        assert_eq!(step.version, 9);
        assert_eq!(step.created_by, 42);
        assert_eq!(step.data, json!({"insert": "x"}));
    }

    #[test]
    fn test_step_serializes_camel_case() {
        let step = Step::new(1, "k", 2, 3, 4, Value::Null);
        let v = serde_json::to_value(&step).unwrap();
        assert!(v.get("docId").is_some());
        assert!(v.get("createdBy").is_some());
        assert!(v.get("createdAt").is_some());
        assert!(v.get("doc_id").is_none());
    }
}
