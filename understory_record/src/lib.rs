// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=understory_record --heading-base-level=0

//! Understory Record: persistent, structurally shared records.
//!
//! Understory Record is the value layer underneath a scoped state store.
//!
//! - Define a record type once with [`define`] or [`RecordFactory::new`], giving every field a default.
//! - Read with [`Record::get`] and [`Record::get_in`]; update with [`Record::set`], [`Record::merge`],
//!   and [`Record::set_in`]. Updates never mutate; they return a new record that shares every untouched field.
//! - Compare with `==`. Hash codes are computed once per instance and equality results are remembered, so
//!   repeated comparisons of long-lived values are cheap.
//! - Memoize derived values keyed by dependency identity with [`Record::get_or_calculate`] or a standalone [`Memo`].
//!
//! # Example
//!
//! ```rust
//! use understory_record::{define, Value};
//!
//! let todo = define([("title", Value::from("")), ("done", Value::from(false))]);
//! let list = define([("first", todo.create()), ("second", todo.create())]);
//!
//! let before = list.create();
//! let after = before.set_in(&["first", "done"], true).unwrap();
//!
//! assert_eq!(after.get_in(&["first", "done"]), Some(&Value::Bool(true)));
//! assert_eq!(before.get_in(&["first", "done"]), Some(&Value::Bool(false)));
//!
//! // The untouched branch is the same instance in both versions.
//! let untouched = |r: &understory_record::Record| r.get_record("second").unwrap().clone();
//! assert!(untouched(&before).ptr_eq(&untouched(&after)));
//!
//! // Setting a value to what it already is returns the receiver.
//! assert!(after.set_in(&["first", "done"], true).unwrap().ptr_eq(&after));
//! ```
//!
//! ## Identity and equality
//!
//! Two different notions matter to consumers:
//!
//! - *Identity* ([`Record::ptr_eq`]): the same instance. No-op updates preserve identity, so identity-keyed
//!   caches such as [`Memo`] keep hitting.
//! - *Equality* (`==`): the same record type with equal fields. Equal records always report the same
//!   [`Record::hash_code`], which makes records usable as hash keys.
//!
//! ## Memoization
//!
//! [`Memo`] stores dependencies as weak references. An entry never keeps its dependencies alive, and
//! entries whose dependencies were dropped are removed lazily.
//!
//! This crate is `no_std` and uses `alloc`.

#![no_std]

extern crate alloc;

pub mod error;
pub mod memo;
pub mod record;
pub mod value;

pub use error::RecordError;
pub use memo::{Dependency, Memo, MemoKey};
pub use record::{Record, RecordFactory, define};
pub use value::Value;
