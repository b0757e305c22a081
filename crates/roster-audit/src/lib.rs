//! Audit trail for roster profile merges.
//!
//! Every committed merge produces exactly one [`MergeEvent`]. Events are
//! validated against the bundled JSON Schema and appended as one JSON object
//! per line to an append-only file. Lines are never rewritten.

pub mod error;
pub mod event;
pub mod log;
pub mod schema;

pub use error::{AuditError, AuditResult};
pub use event::{MergeEvent, MERGE_PROFILE_EVENT};
pub use log::{AuditLog, AuditSink, AuditVerification, InvalidLine, SyncMode};
pub use schema::MergeEventSchema;
