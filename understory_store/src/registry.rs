// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Group registry: subscribers bucketed by the hash of their current scope.
//!
//! The registry is two-level. The first level maps a scope hash to a bucket;
//! the bucket lists every group whose scope has that hash, in creation order.
//! A group is identified by `(selector, scope)` and looked up by comparing the
//! scope for equality, so two different scopes that share a hash still land
//! in different groups. Such a shared bucket is reported as a collision.

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::vec::Vec;

use crate::types::{GroupId, GroupInfo, ScopeValue, SelectorId, SubscriberId};

/// A type-erased selector: maps the state to its scope.
pub(crate) type Select<S> = Rc<dyn Fn(&S) -> Rc<dyn ScopeValue>>;

pub(crate) struct Group<S, M> {
    generation: u32,
    pub(crate) selector: SelectorId,
    pub(crate) select: Select<S>,
    pub(crate) scope: Rc<dyn ScopeValue>,
    pub(crate) hash: u64,
    pub(crate) members: Vec<(SubscriberId, M)>,
}

/// Result of moving a group to a new scope.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Relocation {
    pub(crate) from_hash: u64,
    pub(crate) to_hash: u64,
    /// The group now holding the moved members. Differs from the relocated
    /// group when it was merged into an existing one.
    pub(crate) target: GroupId,
    pub(crate) collided: bool,
}

pub(crate) struct Registry<S, M> {
    slots: Vec<Option<Group<S, M>>>,
    generations: Vec<u32>,
    free_list: Vec<usize>,
    buckets: BTreeMap<u64, Vec<GroupId>>,
    /// Each member's group and its registration sequence number.
    by_member: BTreeMap<SubscriberId, (GroupId, u64)>,
    next_seq: u64,
}

impl<S, M> core::fmt::Debug for Registry<S, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registry")
            .field("groups", &self.len())
            .field("buckets", &self.buckets.len())
            .field("members", &self.by_member.len())
            .field("free_list", &self.free_list.len())
            .finish_non_exhaustive()
    }
}

impl<S, M> Default for Registry<S, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, M> Registry<S, M> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            buckets: BTreeMap::new(),
            by_member: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Number of live groups.
    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|g| g.is_some()).count()
    }

    pub(crate) fn group(&self, id: GroupId) -> Option<&Group<S, M>> {
        self.slots
            .get(id.idx())
            .and_then(Option::as_ref)
            .filter(|g| g.generation == id.1)
    }

    fn group_mut(&mut self, id: GroupId) -> Option<&mut Group<S, M>> {
        self.slots
            .get_mut(id.idx())
            .and_then(Option::as_mut)
            .filter(|g| g.generation == id.1)
    }

    /// The group a subscriber is registered in.
    pub(crate) fn group_of(&self, member: SubscriberId) -> Option<GroupId> {
        self.by_member.get(&member).map(|&(id, _)| id)
    }

    /// Every live group id, in registry order: ascending hash, then creation
    /// order within a bucket.
    pub(crate) fn snapshot(&self) -> Vec<GroupId> {
        self.buckets.values().flatten().copied().collect()
    }

    /// Find the group for `(selector, scope)` in the bucket for `hash`.
    ///
    /// Also reports whether the bucket holds a group with a different scope.
    fn find(
        &self,
        hash: u64,
        selector: SelectorId,
        scope: &dyn ScopeValue,
        except: Option<GroupId>,
    ) -> (Option<GroupId>, bool) {
        let mut found = None;
        let mut collided = false;
        for &id in self.buckets.get(&hash).into_iter().flatten() {
            if Some(id) == except {
                continue;
            }
            let Some(group) = self.group(id) else {
                continue;
            };
            if !group.scope.scope_eq(scope) {
                collided = true;
            } else if group.selector == selector && found.is_none() {
                found = Some(id);
            }
        }
        (found, collided)
    }

    fn alloc(&mut self, group: impl FnOnce(u32) -> Group<S, M>) -> GroupId {
        if let Some(idx) = self.free_list.pop() {
            let generation = self.generations[idx].saturating_add(1);
            self.generations[idx] = generation;
            self.slots[idx] = Some(group(generation));
            #[allow(
                clippy::cast_possible_truncation,
                reason = "GroupId uses 32-bit indices by design."
            )]
            GroupId::new(idx as u32, generation)
        } else {
            let generation = 1_u32;
            self.slots.push(Some(group(generation)));
            self.generations.push(generation);
            #[allow(
                clippy::cast_possible_truncation,
                reason = "GroupId uses 32-bit indices by design."
            )]
            GroupId::new((self.slots.len() - 1) as u32, generation)
        }
    }

    fn unlink_bucket(&mut self, hash: u64, id: GroupId) {
        if let Some(bucket) = self.buckets.get_mut(&hash) {
            bucket.retain(|&g| g != id);
            if bucket.is_empty() {
                self.buckets.remove(&hash);
            }
        }
    }

    fn free(&mut self, id: GroupId) {
        if let Some(group) = self.slots.get_mut(id.idx()).and_then(Option::take) {
            let hash = group.hash;
            self.unlink_bucket(hash, id);
            self.free_list.push(id.idx());
        }
    }

    /// Add `member` to the group for `(selector, scope)`, creating the group
    /// if needed. Returns the group and whether its bucket was shared with a
    /// different scope.
    pub(crate) fn register(
        &mut self,
        selector: SelectorId,
        select: &Select<S>,
        scope: Rc<dyn ScopeValue>,
        member: SubscriberId,
        handle: M,
    ) -> (GroupId, bool) {
        let hash = scope.scope_hash();
        let (found, collided) = self.find(hash, selector, &*scope, None);
        let id = match found {
            Some(id) => id,
            None => {
                let select = Rc::clone(select);
                let id = self.alloc(|generation| Group {
                    generation,
                    selector,
                    select,
                    scope,
                    hash,
                    members: Vec::new(),
                });
                self.buckets.entry(hash).or_default().push(id);
                id
            }
        };
        if let Some(group) = self.group_mut(id) {
            group.members.push((member, handle));
        }
        self.by_member.insert(member, (id, self.next_seq));
        self.next_seq += 1;
        (id, collided)
    }

    /// Remove `member` from its group. Empty groups are freed when `prune` is set.
    pub(crate) fn unregister(&mut self, member: SubscriberId, prune: bool) -> Option<GroupId> {
        let (id, _) = self.by_member.remove(&member)?;
        let empty = match self.group_mut(id) {
            Some(group) => {
                group.members.retain(|(m, _)| *m != member);
                group.members.is_empty()
            }
            None => false,
        };
        if empty && prune {
            self.free(id);
        }
        Some(id)
    }

    /// Move a group to `scope`. If a group for the same selector already holds
    /// an equal scope, the members join it in registration order and this
    /// group is freed.
    pub(crate) fn relocate(&mut self, id: GroupId, scope: Rc<dyn ScopeValue>) -> Option<Relocation> {
        let (selector, from_hash) = {
            let group = self.group(id)?;
            (group.selector, group.hash)
        };
        let to_hash = scope.scope_hash();
        let (existing, collided) = self.find(to_hash, selector, &*scope, Some(id));
        self.unlink_bucket(from_hash, id);

        let target = if let Some(target) = existing {
            let members = self
                .group_mut(id)
                .map(|g| core::mem::take(&mut g.members))
                .unwrap_or_default();
            for (member, _) in &members {
                if let Some(entry) = self.by_member.get_mut(member) {
                    entry.0 = target;
                }
            }
            let mut merged = self
                .group_mut(target)
                .map(|g| core::mem::take(&mut g.members))
                .unwrap_or_default();
            merged.extend(members);
            merged.sort_by_key(|(member, _)| self.by_member.get(member).map(|&(_, seq)| seq));
            if let Some(group) = self.group_mut(target) {
                group.members = merged;
            }
            // Already unlinked from its bucket; just release the slot.
            if let Some(slot) = self.slots.get_mut(id.idx()) {
                *slot = None;
                self.free_list.push(id.idx());
            }
            target
        } else {
            if let Some(group) = self.group_mut(id) {
                group.scope = scope;
                group.hash = to_hash;
            }
            self.buckets.entry(to_hash).or_default().push(id);
            id
        };
        Some(Relocation {
            from_hash,
            to_hash,
            target,
            collided,
        })
    }

    /// Free every empty group.
    pub(crate) fn prune(&mut self) -> usize {
        let empty: Vec<GroupId> = self
            .snapshot()
            .into_iter()
            .filter(|&id| self.group(id).is_some_and(|g| g.members.is_empty()))
            .collect();
        for &id in &empty {
            self.free(id);
        }
        empty.len()
    }

    pub(crate) fn infos(&self) -> Vec<GroupInfo> {
        self.snapshot()
            .into_iter()
            .filter_map(|id| {
                let g = self.group(id)?;
                Some(GroupInfo {
                    id,
                    selector: g.selector,
                    hash: g.hash,
                    members: g.members.iter().map(|(m, _)| *m).collect(),
                })
            })
            .collect()
    }
}

impl<S, M: Clone> Registry<S, M> {
    /// Member handles of a group, in registration order.
    pub(crate) fn members(&self, id: GroupId) -> Vec<(SubscriberId, M)> {
        self.group(id)
            .map(|g| g.members.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::hash::{Hash, Hasher};

    type State = (u8, u8);

    fn select_first() -> Select<State> {
        Rc::new(|s: &State| Rc::new(s.0) as Rc<dyn ScopeValue>)
    }

    fn scope<T: ScopeValue>(v: T) -> Rc<dyn ScopeValue> {
        Rc::new(v)
    }

    const A: SelectorId = SelectorId(1);
    const B: SelectorId = SelectorId(2);

    #[test]
    fn equal_scopes_share_a_group() {
        let mut reg: Registry<State, ()> = Registry::new();
        let sel = select_first();
        let (g1, c1) = reg.register(A, &sel, scope(1_u8), SubscriberId(1), ());
        let (g2, c2) = reg.register(A, &sel, scope(1_u8), SubscriberId(2), ());
        let (g3, _) = reg.register(A, &sel, scope(2_u8), SubscriberId(3), ());
        assert_eq!(g1, g2);
        assert_ne!(g1, g3);
        assert!(!c1 && !c2);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.members(g1).len(), 2);
    }

    #[test]
    fn selectors_are_part_of_the_key() {
        let mut reg: Registry<State, ()> = Registry::new();
        let sel = select_first();
        let (g1, _) = reg.register(A, &sel, scope(1_u8), SubscriberId(1), ());
        let (g2, collided) = reg.register(B, &sel, scope(1_u8), SubscriberId(2), ());
        assert_ne!(g1, g2);
        assert!(!collided, "same scope under another selector is not a collision");
    }

    #[test]
    fn unregister_prunes_empty_groups() {
        let mut reg: Registry<State, ()> = Registry::new();
        let sel = select_first();
        let (g, _) = reg.register(A, &sel, scope(1_u8), SubscriberId(1), ());
        reg.register(A, &sel, scope(1_u8), SubscriberId(2), ());
        assert_eq!(reg.unregister(SubscriberId(1), true), Some(g));
        assert!(reg.group(g).is_some());
        assert_eq!(reg.unregister(SubscriberId(2), true), Some(g));
        assert!(reg.group(g).is_none());
        assert_eq!(reg.len(), 0);
        assert!(reg.snapshot().is_empty());
        assert_eq!(reg.unregister(SubscriberId(2), true), None);
    }

    #[test]
    fn unpruned_groups_linger_until_pruned() {
        let mut reg: Registry<State, ()> = Registry::new();
        let sel = select_first();
        let (g, _) = reg.register(A, &sel, scope(1_u8), SubscriberId(1), ());
        reg.unregister(SubscriberId(1), false);
        assert!(reg.group(g).is_some());
        assert_eq!(reg.prune(), 1);
        assert!(reg.group(g).is_none());
    }

    #[test]
    fn freed_slots_are_reused_with_a_new_generation() {
        let mut reg: Registry<State, ()> = Registry::new();
        let sel = select_first();
        let (old, _) = reg.register(A, &sel, scope(1_u8), SubscriberId(1), ());
        reg.unregister(SubscriberId(1), true);
        let (new, _) = reg.register(A, &sel, scope(2_u8), SubscriberId(2), ());
        assert_eq!(old.idx(), new.idx());
        assert_ne!(old, new);
        assert!(reg.group(old).is_none());
    }

    #[test]
    fn relocate_moves_between_buckets() {
        let mut reg: Registry<State, ()> = Registry::new();
        let sel = select_first();
        let (g, _) = reg.register(A, &sel, scope(1_u8), SubscriberId(1), ());
        let r = reg.relocate(g, scope(5_u8)).unwrap();
        assert_eq!(r.target, g);
        assert_eq!(r.from_hash, 1_u8.scope_hash());
        assert_eq!(r.to_hash, 5_u8.scope_hash());
        assert!(reg.group(g).unwrap().scope.scope_eq(&5_u8));
        assert_eq!(reg.snapshot(), [g]);
    }

    #[test]
    fn relocate_into_an_equal_scope_merges() {
        let mut reg: Registry<State, ()> = Registry::new();
        let sel = select_first();
        let (g1, _) = reg.register(A, &sel, scope(1_u8), SubscriberId(1), ());
        let (g2, _) = reg.register(A, &sel, scope(2_u8), SubscriberId(2), ());
        let r = reg.relocate(g1, scope(2_u8)).unwrap();
        assert_eq!(r.target, g2);
        assert!(reg.group(g1).is_none());
        assert_eq!(reg.group_of(SubscriberId(1)), Some(g2));
        let ids: Vec<_> = reg.members(g2).into_iter().map(|(m, _)| m).collect();
        assert_eq!(ids, [SubscriberId(1), SubscriberId(2)]);
    }

    #[test]
    fn merge_follows_registration_not_id_order() {
        let mut reg: Registry<State, ()> = Registry::new();
        let sel = select_first();
        // Registered first under scope 1, despite the larger id.
        let (g1, _) = reg.register(A, &sel, scope(1_u8), SubscriberId(9), ());
        let (g2, _) = reg.register(A, &sel, scope(2_u8), SubscriberId(3), ());
        reg.register(A, &sel, scope(1_u8), SubscriberId(4), ());
        let r = reg.relocate(g1, scope(2_u8)).unwrap();
        assert_eq!(r.target, g2);
        let ids: Vec<_> = reg.members(g2).into_iter().map(|(m, _)| m).collect();
        assert_eq!(ids, [SubscriberId(9), SubscriberId(3), SubscriberId(4)]);
    }

    #[derive(PartialEq, Eq)]
    struct Colliding(u8);

    impl Hash for Colliding {
        fn hash<H: Hasher>(&self, state: &mut H) {
            state.write_u8(0);
        }
    }

    #[test]
    fn colliding_scopes_stay_apart() {
        let mut reg: Registry<State, ()> = Registry::new();
        let sel = select_first();
        let (g1, c1) = reg.register(A, &sel, scope(Colliding(1)), SubscriberId(1), ());
        let (g2, c2) = reg.register(A, &sel, scope(Colliding(2)), SubscriberId(2), ());
        assert!(!c1);
        assert!(c2);
        assert_ne!(g1, g2);
        assert_eq!(reg.group(g1).unwrap().hash, reg.group(g2).unwrap().hash);

        // Still sharing the bucket with g2, but not merged into it.
        let r = reg.relocate(g1, scope(Colliding(3))).unwrap();
        assert!(r.collided);
        assert_eq!(r.target, g1);
        assert_eq!(reg.len(), 2);
    }
}
