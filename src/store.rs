//! In-memory entity stores.
//!
//! Layout:
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                  SyncStore                     │
//! │                                               │
//! │  ┌──────────────────┐  ┌───────────────────┐  │
//! │  │ DocumentStore     │  │ StepLog           │  │
//! │  │ Collection<Doc>   │  │ Collection<Step>  │  │
//! │  └──────────────────┘  └───────────────────┘  │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! A [`Collection`] keeps entities in insertion order (a `Vec`) with an
//! id-indexed map layered on top for O(1) id lookup. Predicate search
//! (`find_by`, `filter`) scans in insertion order, so "first match" and
//! "all matches, insertion order" are deterministic.
//!
//! A `SyncStore` is a plain value with no interior locking. The engine
//! constructs one store per document shard and serializes access to it;
//! tests construct isolated stores directly.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use serde_json::Value;

use crate::model::{Document, Step};

/// An entity that can live in a [`Collection`].
pub trait Record {
    /// Primary identity type.
    type Id: Copy + Eq + Hash + fmt::Debug + fmt::Display;

    fn id(&self) -> Self::Id;
}

impl Record for Document {
    type Id = i64;

    fn id(&self) -> i64 {
        self.id
    }
}

impl Record for Step {
    type Id = u64;

    fn id(&self) -> u64 {
        self.id
    }
}

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// An insert targeted an id already present. Indicates a sequencing
    /// defect in the caller, not a client-triggerable condition.
    DuplicateId(String),
    /// A record that was just resolved is missing from its collection.
    NotFound(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::DuplicateId(id) => write!(f, "Duplicate record id: {id}"),
            StoreError::NotFound(id) => write!(f, "Record not found: {id}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Generic identity + insertion-ordered entity store.
#[derive(Debug, Clone)]
pub struct Collection<T: Record> {
    /// Entities in insertion order.
    entries: Vec<T>,
    /// id → position in `entries`.
    index: HashMap<T::Id, usize>,
    /// Sequence counter for store-assigned ids.
    sequence: u64,
}

impl<T: Record> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> Collection<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            sequence: 0,
        }
    }

    /// Hand out the next sequence value. Strictly increasing, never reused.
    pub fn next_id(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Append an entity, preserving insertion order.
    ///
    /// Fails with [`StoreError::DuplicateId`] if an entity with the same id
    /// is already present; the store is left unchanged in that case.
    pub fn insert(&mut self, entity: T) -> Result<&T, StoreError> {
        let id = entity.id();
        if self.index.contains_key(&id) {
            return Err(StoreError::DuplicateId(id.to_string()));
        }
        let pos = self.entries.len();
        self.entries.push(entity);
        self.index.insert(id, pos);
        Ok(&self.entries[pos])
    }

    /// O(1) lookup by id.
    pub fn get(&self, id: T::Id) -> Option<&T> {
        self.index.get(&id).map(|&pos| &self.entries[pos])
    }

    /// O(1) mutable lookup by id.
    pub fn get_mut(&mut self, id: T::Id) -> Option<&mut T> {
        match self.index.get(&id) {
            Some(&pos) => Some(&mut self.entries[pos]),
            None => None,
        }
    }

    /// First entity matching a predicate, in insertion order.
    pub fn find_by<P>(&self, pred: P) -> Option<&T>
    where
        P: Fn(&T) -> bool,
    {
        self.entries.iter().find(|entity| pred(entity))
    }

    /// All entities matching a predicate, insertion order preserved.
    pub fn filter<P>(&self, pred: P) -> Vec<&T>
    where
        P: Fn(&T) -> bool,
    {
        self.entries.iter().filter(|entity| pred(entity)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Document store: one record per external document id.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    documents: Collection<Document>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self {
            documents: Collection::new(),
        }
    }

    /// Look up a document by external id, creating it if absent.
    ///
    /// A created document is seeded with the submitted version and state;
    /// its persisted identity is the external `doc_id`.
    pub fn resolve_or_create(
        &mut self,
        doc_id: i64,
        version: u64,
        editor_state: &Value,
    ) -> Result<&Document, StoreError> {
        if self.documents.get(doc_id).is_none() {
            log::info!("creating document {doc_id} at version {version}");
            self.documents
                .insert(Document::new(doc_id, version, editor_state.clone()))?;
        }
        self.documents
            .get(doc_id)
            .ok_or_else(|| StoreError::NotFound(doc_id.to_string()))
    }

    pub fn get(&self, doc_id: i64) -> Option<&Document> {
        self.documents.get(doc_id)
    }

    pub fn get_mut(&mut self, doc_id: i64) -> Option<&mut Document> {
        self.documents.get_mut(doc_id)
    }

    /// Insert a pre-built document (tests, imports).
    pub fn insert(&mut self, document: Document) -> Result<&Document, StoreError> {
        self.documents.insert(document)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Append-only log of every accepted edit step.
#[derive(Debug, Clone, Default)]
pub struct StepLog {
    steps: Collection<Step>,
}

impl StepLog {
    pub fn new() -> Self {
        Self {
            steps: Collection::new(),
        }
    }

    /// Record a step unless one with the same key already exists for the
    /// document. Returns whether a new step was inserted.
    pub fn record(
        &mut self,
        doc_id: i64,
        version: u64,
        created_by: i64,
        key: &str,
        data: Value,
    ) -> Result<bool, StoreError> {
        if self
            .steps
            .find_by(|s| s.doc_id == doc_id && s.key == key)
            .is_some()
        {
            log::debug!("step {key} already recorded for document {doc_id}");
            return Ok(false);
        }
        let id = self.steps.next_id();
        log::trace!("recording step {key} (id {id}) for document {doc_id} at version {version}");
        self.steps
            .insert(Step::new(id, key, doc_id, version, created_by, data))?;
        Ok(true)
    }

    /// Steps the submitting client has not yet seen: recorded for this
    /// document at `version >= since_version`, excluding the submission's
    /// own keys. Ascending by step id, which is arrival order.
    pub fn conflicting(
        &self,
        doc_id: i64,
        since_version: u64,
        submitted_keys: &std::collections::HashSet<String>,
    ) -> Vec<&Step> {
        let mut found = self.steps.filter(|s| {
            s.doc_id == doc_id && s.version >= since_version && !submitted_keys.contains(&s.key)
        });
        found.sort_by_key(|s| s.id);
        found
    }

    /// All steps for a document, insertion order.
    pub fn for_document(&self, doc_id: i64) -> Vec<&Step> {
        self.steps.filter(|s| s.doc_id == doc_id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// The dependency-injected store object: documents plus their step log.
///
/// Constructed once per document shard by the engine, or directly by tests
/// that want an isolated store.
#[derive(Debug, Clone, Default)]
pub struct SyncStore {
    pub documents: DocumentStore,
    pub steps: StepLog,
}

impl SyncStore {
    pub fn new() -> Self {
        Self {
            documents: DocumentStore::new(),
            steps: StepLog::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn step(id: u64, key: &str, doc_id: i64, version: u64) -> Step {
        Step::new(id, key, doc_id, version, 1, Value::Null)
    }

    #[test]
    fn test_collection_insert_and_get() {
        let mut col: Collection<Step> = Collection::new();
        col.insert(step(1, "a", 1, 0)).unwrap();
        col.insert(step(2, "b", 1, 0)).unwrap();

        assert_eq!(col.len(), 2);
        assert_eq!(col.get(1).unwrap().key, "a");
        assert_eq!(col.get(2).unwrap().key, "b");
        assert!(col.get(3).is_none());
    }

    #[test]
    fn test_collection_duplicate_id_rejected() {
        let mut col: Collection<Step> = Collection::new();
        col.insert(step(1, "a", 1, 0)).unwrap();

        let err = col.insert(step(1, "b", 1, 0)).unwrap_err();
        assert_eq!(err, StoreError::DuplicateId("1".into()));
        // Store unchanged
        assert_eq!(col.len(), 1);
        assert_eq!(col.get(1).unwrap().key, "a");
    }

    #[test]
    fn test_collection_next_id_strictly_increasing() {
        let mut col: Collection<Step> = Collection::new();
        let a = col.next_id();
        let b = col.next_id();
        let c = col.next_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_collection_find_by_first_match_insertion_order() {
        let mut col: Collection<Step> = Collection::new();
        col.insert(step(10, "x", 1, 0)).unwrap();
        col.insert(step(3, "x", 2, 0)).unwrap();

        // Insertion order wins over id order
        let found = col.find_by(|s| s.key == "x").unwrap();
        assert_eq!(found.id, 10);
    }

    #[test]
    fn test_collection_filter_preserves_insertion_order() {
        let mut col: Collection<Step> = Collection::new();
        col.insert(step(5, "a", 1, 0)).unwrap();
        col.insert(step(2, "b", 2, 0)).unwrap();
        col.insert(step(9, "c", 1, 0)).unwrap();

        let ids: Vec<u64> = col.filter(|s| s.doc_id == 1).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![5, 9]);
    }

    #[test]
    fn test_document_store_resolve_or_create() {
        let mut docs = DocumentStore::new();
        let created = docs
            .resolve_or_create(42, 3, &json!({"text": "seed"}))
            .unwrap();
        assert_eq!(created.id, 42);
        assert_eq!(created.version, 3);

        // Second resolve returns the same record unchanged
        let resolved = docs
            .resolve_or_create(42, 99, &json!({"text": "other"}))
            .unwrap();
        assert_eq!(resolved.version, 3);
        assert_eq!(resolved.editor_state, json!({"text": "seed"}));
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn test_step_log_record_idempotent() {
        let mut steps = StepLog::new();
        assert!(steps.record(1, 0, 7, "a", Value::Null).unwrap());
        assert!(!steps.record(1, 0, 7, "a", Value::Null).unwrap());
        assert!(!steps.record(1, 5, 9, "a", Value::Null).unwrap());
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn test_step_log_same_key_different_documents() {
        let mut steps = StepLog::new();
        assert!(steps.record(1, 0, 7, "a", Value::Null).unwrap());
        assert!(steps.record(2, 0, 7, "a", Value::Null).unwrap());
        assert_eq!(steps.len(), 2);
    }

    #[test]
    fn test_step_log_conflicting_excludes_own_keys_and_older_versions() {
        let mut steps = StepLog::new();
        steps.record(1, 0, 7, "old", Value::Null).unwrap();
        steps.record(1, 1, 7, "other", Value::Null).unwrap();
        steps.record(1, 1, 8, "mine", Value::Null).unwrap();
        steps.record(2, 1, 7, "elsewhere", Value::Null).unwrap();

        let mine: HashSet<String> = ["mine".to_string()].into_iter().collect();
        let conflicts = steps.conflicting(1, 1, &mine);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].key, "other");
    }

    #[test]
    fn test_step_log_conflicting_ascending_by_id() {
        let mut steps = StepLog::new();
        for key in ["a", "b", "c", "d"] {
            steps.record(1, 2, 7, key, Value::Null).unwrap();
        }

        let conflicts = steps.conflicting(1, 0, &HashSet::new());
        let ids: Vec<u64> = conflicts.iter().map(|s| s.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        assert_eq!(conflicts.len(), 4);
    }

    #[test]
    fn test_sync_store_starts_empty() {
        let store = SyncStore::new();
        assert!(store.documents.is_empty());
        assert!(store.steps.is_empty());
    }
}
