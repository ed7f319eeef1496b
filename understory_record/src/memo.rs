// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Identity-keyed memoization over weak references.
//!
//! ## Overview
//!
//! A [`Memo`] caches the result of a named computation for an ordered tuple of
//! dependencies. Dependencies are compared by *reference identity*, not by
//! value: they are persistent values, so a structurally different state is
//! always a different allocation, and the same allocation always holds the
//! same value.
//!
//! ## Layout
//!
//! Each name owns a chain of levels, one level per dependency position:
//!
//! ```text
//! "total" ─▶ level 0 { a₁ ─▶ level 1 { b₁ ─▶ value, b₂ ─▶ value },
//!                      a₂ ─▶ level 1 { b₁ ─▶ value } }
//! ```
//!
//! A lookup walks the chain in dependency order; a miss at any level is a
//! cache miss. On a miss the supplier runs once and the chain is extended so
//! the same tuple hits in O(depth) afterwards.
//!
//! ## Weak keys
//!
//! Keys are stored as [`Weak`] references, so the cache never keeps a
//! dependency alive. A `Weak` does keep its allocation reserved, which makes
//! the address a sound identity even after the value has been dropped: no new
//! value can be placed at that address while the key exists.
//! Links whose key has no strong references left are swept whenever their
//! level is written, and on demand with [`Memo::sweep`].
//!
//! A cached value that itself holds a strong reference to one of its own keys
//! keeps that key alive for as long as the entry exists.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::rc::{Rc, Weak};
use alloc::string::ToString;
use alloc::vec::Vec;
use core::any::Any;
use core::cell::RefCell;

use crate::error::RecordError;

/// Something that can be used as a memoization dependency.
///
/// Implemented for [`Record`](crate::Record) and for any `Rc<T>`.
pub trait Dependency {
    /// The identity key of this dependency.
    fn memo_key(&self) -> MemoKey;
}

impl<T: Any> Dependency for Rc<T> {
    fn memo_key(&self) -> MemoKey {
        MemoKey::of(self)
    }
}

/// Identity of a dependency: its allocation address plus a weak handle.
#[derive(Clone)]
pub struct MemoKey {
    addr: usize,
    weak: Weak<dyn Any>,
}

impl MemoKey {
    /// Create the key for a reference-counted value.
    pub fn of<T: Any>(rc: &Rc<T>) -> Self {
        let weak = Rc::downgrade(rc);
        let weak: Weak<dyn Any> = weak;
        Self {
            addr: Rc::as_ptr(rc).cast::<()>() as usize,
            weak,
        }
    }

    /// Whether the keyed value still has strong references.
    pub fn is_alive(&self) -> bool {
        self.weak.strong_count() > 0
    }
}

impl core::fmt::Debug for MemoKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoKey")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[derive(Default)]
struct Level {
    links: BTreeMap<usize, Link>,
}

struct Link {
    key: MemoKey,
    value: Option<Rc<dyn Any>>,
    next: Level,
}

impl Level {
    fn live_link(&self, key: &MemoKey) -> Option<&Link> {
        self.links.get(&key.addr).filter(|link| link.key.is_alive())
    }

    /// Drop links whose key is gone, and links that lead nowhere.
    fn sweep(&mut self) {
        self.links.retain(|_, link| {
            if !link.key.is_alive() {
                return false;
            }
            link.next.sweep();
            link.value.is_some() || !link.next.links.is_empty()
        });
    }

    fn insert(&mut self, keys: &[MemoKey], value: Rc<dyn Any>) {
        let Some((first, rest)) = keys.split_first() else {
            return;
        };
        self.links.retain(|_, link| link.key.is_alive());
        let link = self.links.entry(first.addr).or_insert_with(|| Link {
            key: first.clone(),
            value: None,
            next: Level::default(),
        });
        if rest.is_empty() {
            link.value = Some(value);
        } else {
            link.next.insert(rest, value);
        }
    }

    fn count(&self) -> usize {
        self.links
            .values()
            .map(|link| usize::from(link.value.is_some()) + link.next.count())
            .sum()
    }
}

/// A named, identity-keyed memoization cache.
///
/// Every [`RecordFactory`](crate::RecordFactory) owns one, shared by all records
/// it creates, which backs [`Record::get_or_calculate`](crate::Record::get_or_calculate).
/// It can also be used on its own.
///
/// ```
/// use std::rc::Rc;
/// use understory_record::{Dependency, Memo};
///
/// let memo = Memo::new();
/// let input = Rc::new(vec![1, 2, 3]);
/// let mut calls = 0;
/// for _ in 0..3 {
///     let sum: i32 = memo
///         .get_or_calculate("sum", &[&input as &dyn Dependency], || {
///             calls += 1;
///             input.iter().sum()
///         })
///         .unwrap();
///     assert_eq!(sum, 6);
/// }
/// assert_eq!(calls, 1);
/// ```
#[derive(Default)]
pub struct Memo {
    roots: RefCell<BTreeMap<Box<str>, Level>>,
}

impl core::fmt::Debug for Memo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let roots = self.roots.borrow();
        f.debug_struct("Memo")
            .field("names", &roots.len())
            .field("entries", &roots.values().map(Level::count).sum::<usize>())
            .finish()
    }
}

impl Memo {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `name` and `dependencies`, or compute it
    /// with `supplier` and cache it.
    ///
    /// `supplier` runs at most once per distinct dependency tuple (by
    /// reference). It runs without any borrow of the cache held, so it may
    /// itself call `get_or_calculate` on the same cache.
    ///
    /// # Errors
    ///
    /// - [`RecordError::EmptyDependencies`] when `dependencies` is empty.
    /// - [`RecordError::MemoTypeMismatch`] when `name` was cached with a
    ///   different result type for the same dependencies.
    pub fn get_or_calculate<T, F>(
        &self,
        name: &str,
        dependencies: &[&dyn Dependency],
        supplier: F,
    ) -> Result<T, RecordError>
    where
        T: Clone + 'static,
        F: FnOnce() -> T,
    {
        if dependencies.is_empty() {
            return Err(RecordError::EmptyDependencies {
                name: name.to_string(),
            });
        }
        let keys: Vec<MemoKey> = dependencies.iter().map(|d| d.memo_key()).collect();

        if let Some(hit) = self.lookup(name, &keys) {
            return hit.downcast_ref::<T>().cloned().ok_or_else(|| {
                RecordError::MemoTypeMismatch {
                    name: name.to_string(),
                }
            });
        }

        let value = supplier();
        let stored: Rc<dyn Any> = Rc::new(value.clone());
        self.roots
            .borrow_mut()
            .entry(name.into())
            .or_default()
            .insert(&keys, stored);
        Ok(value)
    }

    /// Number of cached values across all names.
    pub fn len(&self) -> usize {
        self.roots.borrow().values().map(Level::count).sum()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry whose dependencies are no longer alive.
    pub fn sweep(&self) {
        let mut roots = self.roots.borrow_mut();
        for level in roots.values_mut() {
            level.sweep();
        }
        roots.retain(|_, level| !level.links.is_empty());
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.roots.borrow_mut().clear();
    }

    fn lookup(&self, name: &str, keys: &[MemoKey]) -> Option<Rc<dyn Any>> {
        let roots = self.roots.borrow();
        let mut level = roots.get(name)?;
        let (last, init) = keys.split_last()?;
        for key in init {
            level = &level.live_link(key)?.next;
        }
        level.live_link(last)?.value.clone()
    }
}
