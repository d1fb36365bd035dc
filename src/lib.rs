//! # stepwise — Collaborative-document step reconciliation engine
//!
//! Reconciles each client's proposed batch of edit operations ("steps")
//! against the server's authoritative step log and decides whether to
//! accept the batch, reject it with a rebase set, or force a full resync.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   Submission    ┌─────────────┐
//! │ Transport   │ ──────────────► │ SyncEngine   │
//! │ Adapter     │ ◄────────────── │ (per-doc     │
//! │ (external)  │    Decision     │  serialized) │
//! └─────────────┘                 └──────┬───────┘
//!                                        │
//!                                ┌───────┴───────┐
//!                                │  SyncStore    │
//!                                │  ┌──────────┐ │
//!                                │  │Documents │ │
//!                                │  ├──────────┤ │
//!                                │  │Step Log  │ │
//!                                │  └──────────┘ │
//!                                └───────────────┘
//! ```
//!
//! The engine consumes a parsed [`Submission`] and produces a [`Decision`];
//! transport framing, key bindings, and rendering live outside it. It does
//! not transform steps against each other — it detects whether the client's
//! view is behind and returns the raw unseen steps for client-side replay.
//!
//! ## Modules
//!
//! - [`protocol`] — Submission/decision records and input validation
//! - [`model`] — Document and step entities
//! - [`store`] — Insertion-ordered entity collections and the step log
//! - [`engine`] — The reconciliation algorithm and its concurrency front

pub mod engine;
pub mod model;
pub mod protocol;
pub mod store;

// Re-exports for convenience
pub use engine::{reconcile, EngineError, EngineStats, SyncEngine, STALE_VERSION_GAP};
pub use model::{Document, Step};
pub use protocol::{Decision, StepInput, StepRecord, Submission, ValidationError};
pub use store::{Collection, DocumentStore, Record, StepLog, StoreError, SyncStore};
