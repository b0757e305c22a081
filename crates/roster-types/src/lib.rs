//! Foundation types for the roster administration tool.
//!
//! This crate provides the identity, record, and descriptor types shared by
//! every other roster crate. It performs no I/O.
//!
//! # Key Types
//!
//! - [`UserId`]: Stable integer identifier of a user record, never reused
//! - [`UserRecord`]: A user profile with its mergeable contact fields
//! - [`RecordStatus`]: Active or soft-deleted (with deletion timestamp)
//! - [`MergeField`]: The closed set of fields a profile merge may touch
//! - [`ResolutionTag`]: How a conflicting field was resolved
//! - [`DependentReference`] / [`ReferenceRegistry`]: Tables that store a user id

pub mod error;
pub mod field;
pub mod identity;
pub mod record;
pub mod reference;
pub mod resolution;

pub use error::TypeError;
pub use field::MergeField;
pub use identity::UserId;
pub use record::{RecordStatus, UserRecord};
pub use reference::{DependentReference, ReferenceRegistry};
pub use resolution::ResolutionTag;
