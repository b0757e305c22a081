//! Profile merge engine for the roster administration tool.
//!
//! Consolidates duplicate user records into one primary record: conflicting
//! fields are resolved interactively or by a fixed policy, every registered
//! foreign-key reference is repointed at the primary, and the duplicates are
//! soft-deleted, all in one transaction. Each committed merge is recorded as
//! a schema-validated audit event.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use roster_audit::{AuditResult, AuditSink, MergeEvent};
//! use roster_merge::{MergeConfig, MergeEngine, MergeRequest, ResolutionMode};
//! use roster_store::InMemoryRecordStore;
//! use roster_types::{MergeField, ReferenceRegistry, UserId, UserRecord};
//!
//! struct Discard;
//! impl AuditSink for Discard {
//!     fn record(&self, _: &MergeEvent) -> AuditResult<()> { Ok(()) }
//! }
//!
//! let store = Arc::new(InMemoryRecordStore::new());
//! let main = UserRecord::new(UserId::new(3).unwrap(), "Kim", "Ono")
//!     .with(MergeField::Phone, "555-1234");
//! let dup = UserRecord::new(UserId::new(5).unwrap(), "Kim", "Ono")
//!     .with(MergeField::Phone, "555-5678");
//! store.insert_user(main).unwrap();
//! store.insert_user(dup).unwrap();
//!
//! let engine = MergeEngine::new(
//!     store,
//!     ReferenceRegistry::empty(),
//!     Arc::new(Discard),
//!     MergeConfig::default(),
//! );
//! let request = MergeRequest::new(3, [5]).with_mode(ResolutionMode::PreferPrimary);
//! let report = engine.merge(&request).unwrap();
//! assert!(report.committed().is_some());
//! ```

pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod phase;
pub mod relinker;
pub mod report;
pub mod resolver;
pub mod validator;

// Re-exports for convenience.
pub use config::MergeConfig;
pub use detector::{Conflict, FieldComparison, Fill};
pub use engine::{MergeEngine, MergeRequest};
pub use error::{MergeError, MergeResult, ValidationError};
pub use phase::{MergePhase, PhaseTracker};
pub use relinker::RelinkPlan;
pub use report::{DuplicateSummary, FieldChange, MergePreview, MergeReport, MergeSuccess};
pub use resolver::{Choice, ConflictPrompter, Resolution, ResolutionMode, Side};
pub use validator::{MergeCandidates, MergeIds};
