// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Public types for the store: identifiers, scope values, local state, and dispatch reports.

use alloc::vec::Vec;
use core::any::Any;
use core::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

/// Identifier of a selector within one store.
///
/// Every scoped [`connect`](crate::Store::connect) call gets a fresh selector id.
/// All whole-store connections share [`SelectorId::IDENTITY`], so subscribers
/// that watch the whole state always land in the same group.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SelectorId(pub(crate) u32);

impl SelectorId {
    /// The whole-store selector.
    pub const IDENTITY: Self = Self(0);
}

/// Identifier for a group in the registry.
///
/// A generational handle: slot index plus generation. A freed slot is reused
/// with a higher generation, so a stale `GroupId` never aliases a live group.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct GroupId(pub(crate) u32, pub(crate) u32);

impl GroupId {
    pub(crate) const fn new(idx: u32, generation: u32) -> Self {
        Self(idx, generation)
    }

    pub(crate) const fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Identifier of a subscriber. Unique for the lifetime of its store and never reused.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubscriberId(pub(crate) u64);

/// A type-erased scope value.
///
/// Implemented for every `T: Any + PartialEq + Hash`; there is no need to
/// implement it by hand. A selector whose output does not hash or compare is
/// rejected at compile time.
pub trait ScopeValue: Any {
    /// Content hash of the scope, used as the registry bucket key.
    fn scope_hash(&self) -> u64;
    /// Value equality against another scope of any type.
    ///
    /// Scopes of different concrete types are never equal.
    fn scope_eq(&self, other: &dyn ScopeValue) -> bool;
    /// Upcast for downcasting to the concrete scope type.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + PartialEq + Hash> ScopeValue for T {
    fn scope_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }

    fn scope_eq(&self, other: &dyn ScopeValue) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl core::fmt::Debug for dyn ScopeValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ScopeValue({:#018x})", self.scope_hash())
    }
}

/// The local state of a subscriber.
///
/// `store` is derived from the scope by the connection's `get`; `own` is
/// private to the subscriber. Store notifications only ever replace `store`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalState<D, O = ()> {
    /// The store-derived part.
    pub store: D,
    /// The subscriber-private part.
    pub own: O,
}

/// Where a subscriber is in its life.
///
/// Transitions only go forward: `Created → Mounted → Unmounted`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Lifecycle {
    /// Constructed; not registered and not notified.
    Created,
    /// Registered in its group and receiving notifications.
    Mounted,
    /// Deregistered for good.
    Unmounted,
}

bitflags::bitflags! {
    /// Notes about how an update was dispatched.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ReportFlags: u8 {
        /// The update was issued during another dispatch and has been queued.
        /// It runs when the outer dispatch drains its queue.
        const QUEUED    = 0b0000_0001;
        /// Queued updates were applied as part of this dispatch.
        const DRAINED   = 0b0000_0010;
        /// Two different scopes shared a registry bucket. Routing was still
        /// correct; the flag is diagnostic.
        const COLLISION = 0b0000_0100;
    }
}

/// What a call to [`Store::send_update`](crate::Store::send_update) did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    /// Subscribers whose store-derived state changed and who were rendered, in delivery order.
    pub notified: Vec<SubscriberId>,
    /// Deliveries whose re-derived state equalled the previous one, so no render happened.
    pub unchanged: usize,
    /// Groups whose scope changed, as `(old hash, new hash)`.
    pub relocated: Vec<(u64, u64)>,
    /// Groups whose scope was equal before and after the update.
    pub skipped: usize,
    /// Dispatch notes.
    pub flags: ReportFlags,
}

impl Report {
    pub(crate) fn queued() -> Self {
        Self {
            flags: ReportFlags::QUEUED,
            ..Self::default()
        }
    }

    /// Returns true if the update was queued behind a running dispatch.
    pub fn is_queued(&self) -> bool {
        self.flags.contains(ReportFlags::QUEUED)
    }

    /// Returns true if `id` was rendered by this dispatch.
    pub fn was_notified(&self, id: SubscriberId) -> bool {
        self.notified.contains(&id)
    }

    /// Fold a drained update's report into this one.
    pub(crate) fn absorb(&mut self, other: Self) {
        self.notified.extend(other.notified);
        self.unchanged += other.unchanged;
        self.relocated.extend(other.relocated);
        self.skipped += other.skipped;
        self.flags |= other.flags & ReportFlags::COLLISION;
        self.flags |= ReportFlags::DRAINED;
    }
}

/// A snapshot of one registry group, for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupInfo {
    /// The group's handle.
    pub id: GroupId,
    /// The selector every member shares.
    pub selector: SelectorId,
    /// Hash of the group's current scope.
    pub hash: u64,
    /// Member ids in registration order.
    pub members: Vec<SubscriberId>,
}
