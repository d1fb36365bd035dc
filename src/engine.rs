//! Step reconciliation engine.
//!
//! Architecture:
//! ```text
//! Transport Adapter ──► Submission ──► SyncEngine
//!                                          │
//!                               shard(doc_id) ── Mutex<SyncStore>
//!                                          │
//!                                     reconcile()
//!                                          │
//!                        ┌────────────────┼────────────────┐
//!                        ▼                ▼                ▼
//!                     commit           rebase        forced resync
//!                  (version +1)   (unseen steps)   (server snapshot)
//! ```
//!
//! One submission runs as a single atomic unit per document: the shard
//! mutex is held from document resolution through the final decision, so
//! two concurrent submissions for the same document can never both observe
//! "no conflicting steps" and both commit. Submissions for different
//! documents take different shards and proceed in parallel.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 5
//! (leader-based replication and write conflicts)

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::model::{now_millis, Document};
use crate::protocol::{Decision, StepRecord, Submission, ValidationError};
use crate::store::{StoreError, SyncStore};

/// Version gap beyond which incremental rebase is abandoned in favor of a
/// full resync. A gap of exactly this many versions still rebases.
pub const STALE_VERSION_GAP: u64 = 50;

/// Engine errors. All are classified before any store mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Malformed submission (client error).
    Validation(ValidationError),
    /// The submission claims to be ahead of the authoritative version
    /// (conflict-class client error; the document is left unmutated).
    VersionTooNew { submitted: u64, current: u64 },
    /// Store invariant violation (internal defect, not client-triggerable).
    Store(StoreError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Validation(e) => write!(f, "Validation error: {e}"),
            EngineError::VersionTooNew { submitted, current } => write!(
                f,
                "Version {submitted} is ahead of the current version {current}"
            ),
            EngineError::Store(e) => write!(f, "Store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e)
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}

/// Reconcile one submission against a store.
///
/// The caller must hold exclusive access to the store for the whole call;
/// [`SyncEngine::submit`] does this per document shard. Mutations happen
/// only after the version precondition passes: step ingestion first, then
/// the commit itself on the accept path.
pub fn reconcile(store: &mut SyncStore, submission: &Submission) -> Result<Decision, EngineError> {
    let doc_id = submission.doc_id;

    // 1. Resolve (or bootstrap) the document.
    let current_version = store
        .documents
        .resolve_or_create(doc_id, submission.version, &submission.editor_state)?
        .version;

    // 2. A submission must never claim to be ahead of the server.
    if submission.version > current_version {
        log::warn!(
            "document {doc_id}: submitted version {} is ahead of current {current_version}",
            submission.version
        );
        return Err(EngineError::VersionTooNew {
            submitted: submission.version,
            current: current_version,
        });
    }

    // 3. Ingest the batch, deduplicating by key.
    let submitted_keys = submission.step_keys();
    for step in &submission.steps {
        store.steps.record(
            doc_id,
            submission.version,
            submission.user_id,
            &step.key,
            step.data.clone(),
        )?;
    }
    log::debug!(
        "document {doc_id}: step log size {} after batch of {}",
        store.steps.len(),
        submission.steps.len()
    );

    // 4. Steps other submissions recorded that this client has not seen.
    let new_steps: Vec<StepRecord> = store
        .steps
        .conflicting(doc_id, submission.version, &submitted_keys)
        .into_iter()
        .map(StepRecord::from)
        .collect();

    // 5. Decide.
    if new_steps.is_empty() {
        let doc = store
            .documents
            .get_mut(doc_id)
            .ok_or_else(|| StoreError::NotFound(doc_id.to_string()))?;
        doc.commit(submission.editor_state.clone());
        log::info!(
            "document {doc_id}: committed to version {} by user {}",
            doc.version,
            submission.user_id
        );
        return Ok(Decision::commit(doc_id, doc.version));
    }

    if current_version - submission.version > STALE_VERSION_GAP {
        let doc = store
            .documents
            .get(doc_id)
            .ok_or_else(|| StoreError::NotFound(doc_id.to_string()))?;
        log::info!(
            "document {doc_id}: forcing resync, client at {} vs server {current_version}",
            submission.version
        );
        return Ok(Decision::resync(
            doc_id,
            doc.version,
            doc.editor_state.clone(),
        ));
    }

    log::debug!(
        "document {doc_id}: rebase required, {} unseen steps",
        new_steps.len()
    );
    Ok(Decision::rebase(doc_id, current_version, new_steps))
}

/// Engine-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub submissions: u64,
    pub commits: u64,
    pub rebases: u64,
    pub resyncs: u64,
    pub steps_recorded: u64,
    pub steps_deduplicated: u64,
    pub documents_created: u64,
    /// Engine start time (epoch millis).
    pub started_at: u64,
}

/// Concurrency front for the reconciliation engine.
///
/// Owns one [`SyncStore`] shard per document id. `submit` holds the shard's
/// mutex across the entire reconcile sequence, giving per-document
/// atomicity while leaving unrelated documents fully parallel.
pub struct SyncEngine {
    shards: RwLock<HashMap<i64, Arc<Mutex<SyncStore>>>>,
    stats: RwLock<EngineStats>,
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncEngine {
    pub fn new() -> Self {
        Self {
            shards: RwLock::new(HashMap::new()),
            stats: RwLock::new(EngineStats {
                started_at: now_millis(),
                ..EngineStats::default()
            }),
        }
    }

    /// Get or create the store shard for a document.
    async fn shard(&self, doc_id: i64) -> Arc<Mutex<SyncStore>> {
        // Fast path: read lock
        {
            let shards = self.shards.read().await;
            if let Some(shard) = shards.get(&doc_id) {
                return shard.clone();
            }
        }

        // Slow path: write lock to create
        let mut shards = self.shards.write().await;
        // Double-check after acquiring write lock
        if let Some(shard) = shards.get(&doc_id) {
            return shard.clone();
        }

        let shard = Arc::new(Mutex::new(SyncStore::new()));
        shards.insert(doc_id, shard.clone());
        shard
    }

    /// Run one submission to a decision.
    ///
    /// Exclusive per document: the shard lock is acquired before document
    /// resolution and released after the decision.
    pub async fn submit(&self, submission: &Submission) -> Result<Decision, EngineError> {
        let shard = self.shard(submission.doc_id).await;
        let mut store = shard.lock().await;

        let docs_before = store.documents.len();
        let steps_before = store.steps.len();
        let result = reconcile(&mut store, submission);

        let mut stats = self.stats.write().await;
        stats.submissions += 1;
        stats.documents_created += (store.documents.len() - docs_before) as u64;
        let recorded = (store.steps.len() - steps_before) as u64;
        stats.steps_recorded += recorded;
        if let Ok(decision) = &result {
            stats.steps_deduplicated += submission.steps.len() as u64 - recorded;
            if decision.accepted {
                stats.commits += 1;
            } else if decision.editor_state.is_some() {
                stats.resyncs += 1;
            } else {
                stats.rebases += 1;
            }
        }

        result
    }

    /// Validate and run a loosely-typed submission.
    pub async fn submit_value(&self, value: &serde_json::Value) -> Result<Decision, EngineError> {
        let submission = Submission::from_value(value)?;
        self.submit(&submission).await
    }

    /// Snapshot of a document's current record, if it exists.
    pub async fn document(&self, doc_id: i64) -> Option<Document> {
        let shard = {
            let shards = self.shards.read().await;
            shards.get(&doc_id)?.clone()
        };
        let store = shard.lock().await;
        store.documents.get(doc_id).cloned()
    }

    /// Number of steps recorded for a document.
    pub async fn step_count(&self, doc_id: i64) -> usize {
        let shard = {
            let shards = self.shards.read().await;
            match shards.get(&doc_id) {
                Some(shard) => shard.clone(),
                None => return 0,
            }
        };
        let store = shard.lock().await;
        store.steps.for_document(doc_id).len()
    }

    /// Number of live documents.
    pub async fn document_count(&self) -> usize {
        self.shards.read().await.len()
    }

    /// Snapshot of the engine counters.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }
}
