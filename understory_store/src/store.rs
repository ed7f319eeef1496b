// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The store: current state, update dispatch, and the group registry.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use tracing::{debug, trace, warn};

use crate::registry::{Registry, Select};
use crate::types::{GroupId, GroupInfo, Report, ReportFlags, ScopeValue, SelectorId, SubscriberId};

/// Store-wide settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// Free a group as soon as its last member leaves.
    ///
    /// Keeping empty groups around never changes which subscribers are
    /// notified; it only trades memory for fewer allocations when subscribers
    /// come and go under the same scope. Empty groups can still be dropped
    /// later with [`Store::prune_groups`].
    pub prune_empty_groups: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            prune_empty_groups: true,
        }
    }
}

/// Outcome of delivering a scope to one member.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// The derived state changed and the host was rendered.
    Rendered,
    /// The derived state equalled the previous one.
    Unchanged,
    /// The member left the store earlier in the same pass.
    Inactive,
}

/// Something the store can deliver a new scope to.
pub(crate) trait Member {
    /// Re-derive from `scope` and render if the derived state changed.
    fn deliver(&self, scope: &dyn ScopeValue) -> Delivery;
}

type Transform<S> = Box<dyn FnOnce(&S) -> S>;

struct StoreInner<S> {
    state: RefCell<S>,
    registry: RefCell<Registry<S, Weak<dyn Member>>>,
    queue: RefCell<VecDeque<Transform<S>>>,
    dispatching: Cell<bool>,
    next_selector: Cell<u32>,
    next_subscriber: Cell<u64>,
    config: StoreConfig,
}

/// Ends a dispatch: clears the dispatching flag and discards updates still
/// queued, including when the dispatch unwinds.
struct DispatchGuard<'a, S>(&'a StoreInner<S>);

impl<'a, S> DispatchGuard<'a, S> {
    fn enter(inner: &'a StoreInner<S>) -> Self {
        inner.dispatching.set(true);
        Self(inner)
    }
}

impl<S> Drop for DispatchGuard<'_, S> {
    fn drop(&mut self) {
        self.0.dispatching.set(false);
        let stale = core::mem::take(&mut *self.0.queue.borrow_mut());
        if !stale.is_empty() {
            warn!(dropped = stale.len(), "discarding updates queued by an aborted dispatch");
        }
    }
}

/// A single immutable state value plus the subscribers watching slices of it.
///
/// `Store` is a cheap handle; clones share the same state and registry. All
/// mutation goes through [`send_update`](Self::send_update), which replaces
/// the state and notifies exactly the groups whose scope changed.
///
/// ```
/// use understory_store::Store;
///
/// let store = Store::new(1_i64);
/// let report = store.send_update(|n| n + 1);
/// assert_eq!(store.current(), 2);
/// assert!(report.notified.is_empty());
/// ```
pub struct Store<S> {
    inner: Rc<StoreInner<S>>,
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S> core::fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Store")
            .field("registry", &*self.inner.registry.borrow())
            .field("queued", &self.inner.queue.borrow().len())
            .field("dispatching", &self.inner.dispatching.get())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl<S> Store<S> {
    /// Create a store with default settings.
    pub fn new(initial: S) -> Self {
        Self::with_config(initial, StoreConfig::default())
    }

    /// Create a store with explicit settings.
    pub fn with_config(initial: S, config: StoreConfig) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                state: RefCell::new(initial),
                registry: RefCell::new(Registry::new()),
                queue: RefCell::new(VecDeque::new()),
                dispatching: Cell::new(false),
                next_selector: Cell::new(SelectorId::IDENTITY.0 + 1),
                next_subscriber: Cell::new(1),
                config,
            }),
        }
    }

    /// The settings this store was created with.
    pub fn config(&self) -> StoreConfig {
        self.inner.config
    }

    /// Returns true while an update is being dispatched.
    pub fn is_dispatching(&self) -> bool {
        self.inner.dispatching.get()
    }

    /// Number of groups in the registry.
    pub fn group_count(&self) -> usize {
        self.inner.registry.borrow().len()
    }

    /// Every group in registry order: ascending scope hash, then creation
    /// order among groups sharing a hash.
    pub fn groups(&self) -> Vec<GroupInfo> {
        self.inner.registry.borrow().infos()
    }

    /// The group a subscriber is currently registered in.
    pub fn group_of(&self, subscriber: SubscriberId) -> Option<GroupId> {
        self.inner.registry.borrow().group_of(subscriber)
    }

    /// Free every group without members. Returns how many were freed.
    pub fn prune_groups(&self) -> usize {
        self.inner.registry.borrow_mut().prune()
    }

    pub(crate) fn next_selector_id(&self) -> SelectorId {
        let id = self.inner.next_selector.get();
        self.inner.next_selector.set(id + 1);
        SelectorId(id)
    }

    pub(crate) fn next_subscriber_id(&self) -> SubscriberId {
        let id = self.inner.next_subscriber.get();
        self.inner.next_subscriber.set(id + 1);
        SubscriberId(id)
    }

    pub(crate) fn register(
        &self,
        selector: SelectorId,
        select: &Select<S>,
        scope: Rc<dyn ScopeValue>,
        subscriber: SubscriberId,
        handle: Weak<dyn Member>,
    ) -> GroupId {
        let hash = scope.scope_hash();
        let (group, collided) = self.inner.registry.borrow_mut().register(
            selector, select, scope, subscriber, handle,
        );
        if collided {
            warn!(hash, ?group, "scope hash shared by different scopes");
        }
        debug!(?subscriber, ?group, ?selector, "subscriber mounted");
        group
    }

    pub(crate) fn unregister(&self, subscriber: SubscriberId) {
        let prune = self.inner.config.prune_empty_groups;
        let group = self.inner.registry.borrow_mut().unregister(subscriber, prune);
        debug!(?subscriber, ?group, "subscriber unmounted");
    }
}

impl<S: Clone + PartialEq + 'static> Store<S> {
    /// The current state. Cloning is expected to be cheap (a reference bump
    /// for persistent values).
    pub fn current(&self) -> S {
        self.inner.state.borrow().clone()
    }

    /// Replace the state with `transform(current)` and notify every group
    /// whose scope changed.
    ///
    /// Groups whose scope is equal before and after are skipped without
    /// calling any subscriber. Within a changed group, each member re-derives
    /// its local state and is rendered only if that changed.
    ///
    /// An update issued while another is being dispatched (from a render, a
    /// selector, or a transform) is queued: this call returns a report flagged
    /// [`ReportFlags::QUEUED`] and the running dispatch applies the update
    /// once its own pass is done, folding the outcome into its report.
    pub fn send_update<F>(&self, transform: F) -> Report
    where
        F: FnOnce(&S) -> S + 'static,
    {
        if self.inner.dispatching.get() {
            self.inner.queue.borrow_mut().push_back(Box::new(transform));
            trace!("update queued behind running dispatch");
            return Report::queued();
        }
        let _guard = DispatchGuard::enter(&self.inner);
        let mut report = self.apply(Box::new(transform));
        loop {
            let Some(queued) = self.inner.queue.borrow_mut().pop_front() else {
                break;
            };
            trace!("draining queued update");
            report.absorb(self.apply(queued));
        }
        report
    }

    fn apply(&self, transform: Transform<S>) -> Report {
        let previous = self.current();
        let next = transform(&previous);
        let mut report = Report::default();
        if next == previous {
            // Keep the old instance so identity-keyed caches still hit.
            report.skipped = self.group_count();
            trace!(skipped = report.skipped, "update left the state unchanged");
            return report;
        }
        *self.inner.state.borrow_mut() = next.clone();

        let ids = self.inner.registry.borrow().snapshot();
        for id in ids {
            let entry = self
                .inner
                .registry
                .borrow()
                .group(id)
                .map(|g| (Rc::clone(&g.select), Rc::clone(&g.scope)));
            // Freed by an earlier relocation or an unmount during this pass.
            let Some((select, scope)) = entry else {
                continue;
            };
            let next_scope = select(&next);
            if scope.scope_eq(&*next_scope) {
                report.skipped += 1;
                continue;
            }

            let members = self.inner.registry.borrow().members(id);
            // Relocate before notifying, so a subscriber mounted by a render
            // joins the group under its new scope.
            let moved = self
                .inner
                .registry
                .borrow_mut()
                .relocate(id, Rc::clone(&next_scope));
            let Some(moved) = moved else {
                continue;
            };
            if moved.collided {
                report.flags |= ReportFlags::COLLISION;
                warn!(hash = moved.to_hash, group = ?moved.target, "scope hash shared by different scopes");
            }
            debug!(
                group = ?id,
                target = ?moved.target,
                from = moved.from_hash,
                to = moved.to_hash,
                members = members.len(),
                "group relocated"
            );
            report.relocated.push((moved.from_hash, moved.to_hash));

            for (subscriber, handle) in members {
                let Some(member) = handle.upgrade() else {
                    continue;
                };
                match member.deliver(&*next_scope) {
                    Delivery::Rendered => {
                        trace!(?subscriber, "rendered");
                        report.notified.push(subscriber);
                    }
                    Delivery::Unchanged => report.unchanged += 1,
                    Delivery::Inactive => {}
                }
            }
        }
        report
    }
}
