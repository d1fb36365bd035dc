//! Submission and decision records at the engine boundary.
//!
//! The transport adapter parses inbound requests into a [`Submission`] and
//! encodes a [`Decision`] back to the client; the engine never sees framing.
//! Wire JSON is camelCase:
//! ```text
//! { "docId": 1, "userId": 7, "version": 0,
//!   "steps": [ { "key": "a", "data": { ... } } ],
//!   "editorState": { ... } }
//! ```
//!
//! [`Submission::from_value`] is the validation front gate: every scalar
//! field is checked for presence and type before the engine touches any
//! store, so a malformed submission can never cause a partial write.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::Step;

/// A required field was absent or of the wrong type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Wire name of the offending field (`docId`, `steps`, ...).
    pub field: &'static str,
    /// What the field was expected to be.
    pub expected: &'static str,
}

impl ValidationError {
    fn new(field: &'static str, expected: &'static str) -> Self {
        Self { field, expected }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is missing or not {}", self.field, self.expected)
    }
}

impl std::error::Error for ValidationError {}

/// One proposed edit operation within a submission batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepInput {
    /// Client-chosen idempotency token.
    pub key: String,
    /// Opaque edit payload, passed through untouched.
    #[serde(default)]
    pub data: Value,
}

/// A client's proposed batch of steps against one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub doc_id: i64,
    pub user_id: i64,
    /// The version the client believes the document to be at.
    pub version: u64,
    /// Ordered batch of proposed steps.
    pub steps: Vec<StepInput>,
    /// Full document snapshot as the client sees it after its steps.
    pub editor_state: Value,
}

impl Submission {
    /// Parse and validate a loosely-typed submission.
    ///
    /// `docId` and `version` also accept strings of digits, matching the
    /// query-string coercion the transport applies to those two fields.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ValidationError::new("submission", "an object"))?;

        let doc_id = coerce_i64(obj, "docId")?;
        let user_id = require_i64(obj, "userId")?;
        let version = coerce_u64(obj, "version")?;
        let editor_state = match obj.get("editorState") {
            Some(state) if state.is_object() => state.clone(),
            _ => return Err(ValidationError::new("editorState", "an object")),
        };

        let raw_steps = obj
            .get("steps")
            .and_then(Value::as_array)
            .ok_or_else(|| ValidationError::new("steps", "an array"))?;

        let mut steps = Vec::with_capacity(raw_steps.len());
        for raw in raw_steps {
            let key = raw
                .get("key")
                .and_then(Value::as_str)
                .ok_or_else(|| ValidationError::new("steps[].key", "a string"))?;
            let data = raw.get("data").cloned().unwrap_or(Value::Null);
            steps.push(StepInput {
                key: key.to_string(),
                data,
            });
        }

        Ok(Self {
            doc_id,
            user_id,
            version,
            steps,
            editor_state,
        })
    }

    /// The set of idempotency keys present in this batch.
    pub fn step_keys(&self) -> HashSet<String> {
        self.steps.iter().map(|s| s.key.clone()).collect()
    }
}

fn require_i64(obj: &Map<String, Value>, field: &'static str) -> Result<i64, ValidationError> {
    obj.get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| ValidationError::new(field, "a number"))
}

/// Integer field that the transport may deliver as a decimal string.
fn coerce_i64(obj: &Map<String, Value>, field: &'static str) -> Result<i64, ValidationError> {
    match obj.get(field) {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| ValidationError::new(field, "a number")),
        Some(Value::String(s)) => s
            .parse::<i64>()
            .map_err(|_| ValidationError::new(field, "a number")),
        _ => Err(ValidationError::new(field, "a number")),
    }
}

fn coerce_u64(obj: &Map<String, Value>, field: &'static str) -> Result<u64, ValidationError> {
    match obj.get(field) {
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| ValidationError::new(field, "a non-negative number")),
        Some(Value::String(s)) => s
            .parse::<u64>()
            .map_err(|_| ValidationError::new(field, "a non-negative number")),
        _ => Err(ValidationError::new(field, "a non-negative number")),
    }
}

/// Wire view of a recorded step, as returned in rebase decisions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub id: u64,
    pub key: String,
    pub doc_id: i64,
    pub version: u64,
    pub created_by: i64,
    pub data: Value,
}

impl From<&Step> for StepRecord {
    fn from(step: &Step) -> Self {
        Self {
            id: step.id,
            key: step.key.clone(),
            doc_id: step.doc_id,
            version: step.version,
            created_by: step.created_by,
            data: step.data.clone(),
        }
    }
}

/// The engine's answer to one submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Whether the submission committed.
    pub accepted: bool,
    /// Steps the client must rebase onto, ascending by id. Empty on commit
    /// and on forced resync.
    pub steps: Vec<StepRecord>,
    /// Server snapshot, present only on forced resync.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editor_state: Option<Value>,
    /// Document identity and version after the decision.
    pub doc_id: i64,
    pub version: u64,
}

impl Decision {
    /// The submission committed; the document advanced one version.
    pub fn commit(doc_id: i64, version: u64) -> Self {
        Self {
            accepted: true,
            steps: Vec::new(),
            editor_state: None,
            doc_id,
            version,
        }
    }

    /// The client must replay the returned steps, then resubmit.
    pub fn rebase(doc_id: i64, version: u64, steps: Vec<StepRecord>) -> Self {
        Self {
            accepted: false,
            steps,
            editor_state: None,
            doc_id,
            version,
        }
    }

    /// The client is too far behind; it must adopt the server snapshot.
    pub fn resync(doc_id: i64, version: u64, editor_state: Value) -> Self {
        Self {
            accepted: false,
            steps: Vec::new(),
            editor_state: Some(editor_state),
            doc_id,
            version,
        }
    }
}
