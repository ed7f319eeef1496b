// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=understory_store --heading-base-level=0

//! Understory Store: a scoped state store for UI trees.
//!
//! Understory Store holds one immutable state value and lets many components
//! watch different, possibly overlapping, slices of it.
//!
//! - Bind a component kind with [`Store::connect`] and [`ConnectOptions`]: a selector picks the
//!   component's *scope* out of the state, and a `get`/`set` pair maps between the scope and the
//!   component's local state.
//! - Create one [`Subscriber`] per component instance and [`mount`](Subscriber::mount) it.
//! - Update with [`Store::send_update`], or through a subscriber with
//!   [`set_store`](Subscriber::set_store) and [`set_global_store`](Subscriber::set_global_store).
//!
//! ## Groups
//!
//! Subscribers with the same selector and an equal scope form a *group*. On every update the store
//! recomputes each group's scope and compares it with the previous one by value. Equal scopes are
//! skipped outright, even though the state itself was replaced. A changed group is moved to its new
//! scope and each member re-derives its local state; members whose derived state is unchanged are
//! not rendered.
//!
//! Groups are bucketed by the hash of their scope and confirmed by equality, so scopes that happen
//! to share a hash are still routed correctly. Such collisions are logged with `tracing` and flagged
//! in the returned [`Report`].
//!
//! ## Example
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use understory_store::{ConnectOptions, LocalState, Store};
//!
//! #[derive(Clone, PartialEq, Hash)]
//! struct App {
//!     count: i64,
//!     title: Rc<str>,
//! }
//!
//! let store = Store::new(App { count: 0, title: "hello".into() });
//!
//! // A component that only cares about `count`.
//! let counter = store.connect(ConnectOptions::scoped(
//!     |app: &App| app.count,
//!     |app: &App, count| App { count, ..app.clone() },
//!     |count: &i64, _: &()| *count,
//!     |_: &i64, count| count,
//! ));
//!
//! let renders = Rc::new(Cell::new(0));
//! let seen = Rc::clone(&renders);
//! let sub = counter.subscriber_with_host((), move |_: &LocalState<i64>| seen.set(seen.get() + 1));
//! sub.mount().unwrap();
//!
//! // Changing the title does not touch the counter.
//! store.send_update(|app| App { title: "world".into(), ..app.clone() });
//! assert_eq!(renders.get(), 0);
//!
//! // Incrementing through the subscriber renders it once.
//! sub.set_store(|count| count + 1).unwrap();
//! assert_eq!(renders.get(), 1);
//! assert_eq!(sub.state().store, 1);
//! assert_eq!(store.current().count, 1);
//! ```
//!
//! ## Re-entrancy
//!
//! Dispatch is synchronous and runs to completion. An update issued while another is being
//! dispatched (from a render, a selector, or a transform) is queued and applied when the running
//! dispatch finishes; see [`ReportFlags`].
//!
//! ## Lifecycle
//!
//! Subscribers move through [`Lifecycle`] once: created, mounted, unmounted. Dropping a mounted
//! subscriber unmounts it. Misuse is reported as [`StoreError`].
//!
//! This crate is `no_std` and uses `alloc`. It is single-threaded: the store and its subscribers are `!Send`.

#![no_std]

extern crate alloc;

pub mod connect;
pub mod error;
mod registry;
pub mod store;
pub mod types;

pub use connect::{ConnectOptions, Connection, Host, Subscriber};
pub use error::StoreError;
pub use store::{Store, StoreConfig};
pub use types::{
    GroupId, GroupInfo, Lifecycle, LocalState, Report, ReportFlags, ScopeValue, SelectorId,
    SubscriberId,
};
