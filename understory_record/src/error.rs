// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error type for record operations and memoization.

use alloc::string::String;

/// Errors returned by record updates and [`Memo`](crate::Memo) lookups.
///
/// Every variant is a configuration error: the call itself was malformed.
/// None of them are transient, so retrying the same call fails the same way.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// The key is not part of the record's schema.
    #[error("record `{record}` has no field `{key}`")]
    UnknownField {
        /// Name of the record type.
        record: String,
        /// The key that was requested.
        key: String,
    },
    /// A path descended through a field that does not hold a record.
    #[error("field `{key}` does not hold a record")]
    NotARecord {
        /// The field that was expected to hold a record.
        key: String,
    },
    /// A path operation was given an empty path.
    #[error("path must name at least one field")]
    EmptyPath,
    /// A memoized computation was given no dependencies.
    #[error("memoized value `{name}` needs at least one dependency")]
    EmptyDependencies {
        /// Name of the memoized computation.
        name: String,
    },
    /// A memoized computation was read back as a different type than it was stored as.
    #[error("memoized value `{name}` was cached with a different type")]
    MemoTypeMismatch {
        /// Name of the memoized computation.
        name: String,
    },
}
