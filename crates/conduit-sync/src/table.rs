//! Sync group registry and lock table
//!
//! Both maps sit behind a single mutex so that registration, lock
//! acquisition, release and unregistration are linearizable with respect to
//! each other. No method awaits or performs I/O while holding the guard.
//!
//! Invariants maintained by every operation:
//! - a member belongs to at most one group (its last observed annotation)
//! - a lock for group `G` is only ever held by a current member of `G`
//! - a group with no members has neither a membership entry nor a lock

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::identity::{GroupKey, MemberId};

#[derive(Debug, Default)]
struct TableState {
    /// Members per group
    groups: HashMap<GroupKey, BTreeSet<MemberId>>,
    /// Current lock holder per group
    locks: HashMap<GroupKey, MemberId>,
    /// Reverse index: the group each member last declared
    assignments: HashMap<MemberId, GroupKey>,
}

impl TableState {
    /// Add `member` to `group`, moving it out of any other group first
    fn insert(&mut self, group: &GroupKey, member: &MemberId) -> bool {
        if let Some(previous) = self.assignments.get(member).cloned() {
            if &previous == group {
                return self
                    .groups
                    .entry(group.clone())
                    .or_default()
                    .insert(member.clone());
            }
            self.remove(&previous, member);
        }
        self.assignments.insert(member.clone(), group.clone());
        self.groups
            .entry(group.clone())
            .or_default()
            .insert(member.clone())
    }

    /// Remove `member` from `group`, releasing its lock and dropping the
    /// group when it becomes empty. Returns whether a lock was released.
    fn remove(&mut self, group: &GroupKey, member: &MemberId) -> bool {
        if self.assignments.get(member) == Some(group) {
            self.assignments.remove(member);
        }

        let released = self.release(group, member);

        if let Some(members) = self.groups.get_mut(group) {
            members.remove(member);
            if members.is_empty() {
                self.groups.remove(group);
                self.locks.remove(group);
                debug!(group = %group, "sync group has no members left, removed");
            }
        }
        released
    }

    fn release(&mut self, group: &GroupKey, member: &MemberId) -> bool {
        if self.locks.get(group) == Some(member) {
            self.locks.remove(group);
            true
        } else {
            false
        }
    }
}

/// Result of recording the group a member currently declares
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Membership {
    /// Group the member belonged to before this observation
    pub previous: Option<GroupKey>,
    /// Whether the declared group differs from `previous`
    pub changed: bool,
    /// Whether a lock on `previous` was released because of the change
    pub released_lock: bool,
}

/// Point-in-time view of one sync group
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupSnapshot {
    /// The group
    pub group: GroupKey,
    /// Members currently declaring the group, sorted
    pub members: Vec<MemberId>,
    /// Member holding the group's update lock, if any
    pub holder: Option<MemberId>,
}

/// In-memory registry of sync group membership plus the per-group update lock
///
/// Construct one per controller; nothing here is global, so tests can run
/// isolated tables side by side.
#[derive(Debug, Default)]
pub struct SyncGroupTable {
    state: Mutex<TableState>,
}

impl SyncGroupTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `member` to `group`. Idempotent.
    ///
    /// A member registered in another group is moved, which releases any
    /// lock it held there. Returns true if the member was not yet in `group`.
    pub fn register_member(&self, group: &GroupKey, member: &MemberId) -> bool {
        let added = self.state.lock().insert(group, member);
        if added {
            debug!(group = %group, member = %member, "registered sync group member");
        }
        added
    }

    /// Remove `member` from `group`
    ///
    /// Releases the group's lock if `member` held it and deletes the group
    /// entirely once its last member is gone. Returns whether a lock was
    /// released.
    pub fn unregister_member(&self, group: &GroupKey, member: &MemberId) -> bool {
        let released = self.state.lock().remove(group, member);
        if released {
            info!(group = %group, member = %member, "released update lock on unregister");
        }
        released
    }

    /// Take the lock for `group` if nobody holds it
    ///
    /// Atomic test-and-set; never blocks. Fails if the lock is held by anyone,
    /// including `member` itself, and if `member` is not registered in `group`.
    pub fn try_acquire(&self, group: &GroupKey, member: &MemberId) -> bool {
        let mut state = self.state.lock();

        let is_member = state
            .groups
            .get(group)
            .is_some_and(|members| members.contains(member));
        if !is_member {
            debug!(group = %group, member = %member, "lock refused to non-member");
            return false;
        }

        if let Some(holder) = state.locks.get(group) {
            debug!(group = %group, member = %member, holder = %holder, "lock in use");
            return false;
        }

        state.locks.insert(group.clone(), member.clone());
        true
    }

    /// Release the lock for `group` if `member` holds it
    ///
    /// A non-holder can never evict the real holder; the call is then a no-op.
    pub fn release(&self, group: &GroupKey, member: &MemberId) -> bool {
        self.state.lock().release(group, member)
    }

    /// Current lock holder of `group`
    pub fn holder(&self, group: &GroupKey) -> Option<MemberId> {
        self.state.lock().locks.get(group).cloned()
    }

    /// Whether `member` currently holds the lock of `group`
    pub fn is_holder(&self, group: &GroupKey, member: &MemberId) -> bool {
        self.state.lock().locks.get(group) == Some(member)
    }

    /// Group `member` was last observed in
    pub fn group_of(&self, member: &MemberId) -> Option<GroupKey> {
        self.state.lock().assignments.get(member).cloned()
    }

    /// Record the group `member` declares right now
    ///
    /// If it differs from the last observation the member leaves its old
    /// group (releasing any lock held there) and, when `group` is present,
    /// joins the new one. The new group's lock is never taken here.
    pub fn observe(&self, member: &MemberId, group: Option<&GroupKey>) -> Membership {
        let mut state = self.state.lock();
        let previous = state.assignments.get(member).cloned();

        if previous.as_ref() == group {
            if let Some(group) = group {
                state.insert(group, member);
            }
            return Membership {
                previous,
                changed: false,
                released_lock: false,
            };
        }

        let released_lock = match &previous {
            Some(old) => state.remove(old, member),
            None => false,
        };
        if let Some(group) = group {
            state.insert(group, member);
        }

        Membership {
            previous,
            changed: true,
            released_lock,
        }
    }

    /// Drop every trace of `member`, returning the group it was in
    pub fn forget(&self, member: &MemberId) -> Option<(GroupKey, bool)> {
        let mut state = self.state.lock();
        let group = state.assignments.get(member).cloned()?;
        let released = state.remove(&group, member);
        Some((group, released))
    }

    /// Snapshot of every group with its members and holder, sorted by group
    pub fn groups(&self) -> Vec<GroupSnapshot> {
        let state = self.state.lock();
        let mut groups: Vec<GroupSnapshot> = state
            .groups
            .iter()
            .map(|(group, members)| GroupSnapshot {
                group: group.clone(),
                members: members.iter().cloned().collect(),
                holder: state.locks.get(group).cloned(),
            })
            .collect();
        groups.sort_by(|a, b| a.group.cmp(&b.group));
        groups
    }

    /// Snapshot of the held locks
    pub fn locks(&self) -> BTreeMap<GroupKey, MemberId> {
        self.state
            .lock()
            .locks
            .iter()
            .map(|(group, holder)| (group.clone(), holder.clone()))
            .collect()
    }

    /// Number of members that currently declare a group
    pub fn member_count(&self) -> usize {
        self.state.lock().assignments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    fn g(key: &str) -> GroupKey {
        GroupKey::from(key)
    }

    fn m(name: &str) -> MemberId {
        MemberId::new("default", name)
    }

    #[test]
    fn register_is_idempotent() {
        let table = SyncGroupTable::new();
        assert!(table.register_member(&g("g1"), &m("a")));
        assert!(!table.register_member(&g("g1"), &m("a")));
        assert_eq!(table.groups()[0].members, vec![m("a")]);
        assert_eq!(table.member_count(), 1);
    }

    #[test]
    fn member_belongs_to_one_group_only() {
        let table = SyncGroupTable::new();
        table.register_member(&g("g1"), &m("a"));
        assert!(table.try_acquire(&g("g1"), &m("a")));

        table.register_member(&g("g2"), &m("a"));

        let groups = table.groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group, g("g2"));
        assert!(table.holder(&g("g1")).is_none());
        assert_eq!(table.group_of(&m("a")), Some(g("g2")));
    }

    #[test]
    fn lock_is_exclusive_and_not_reentrant() {
        let table = SyncGroupTable::new();
        table.register_member(&g("g1"), &m("a"));
        table.register_member(&g("g1"), &m("b"));

        assert!(table.try_acquire(&g("g1"), &m("a")));
        assert!(!table.try_acquire(&g("g1"), &m("b")));
        assert!(!table.try_acquire(&g("g1"), &m("a")));
        assert_eq!(table.holder(&g("g1")), Some(m("a")));
    }

    #[test]
    fn non_member_cannot_acquire() {
        let table = SyncGroupTable::new();
        table.register_member(&g("g1"), &m("a"));
        assert!(!table.try_acquire(&g("g1"), &m("stranger")));
        assert!(!table.try_acquire(&g("unknown"), &m("a")));
        assert!(table.locks().is_empty());
    }

    #[test]
    fn non_holder_cannot_release() {
        let table = SyncGroupTable::new();
        table.register_member(&g("g1"), &m("a"));
        table.register_member(&g("g1"), &m("b"));
        table.try_acquire(&g("g1"), &m("a"));

        assert!(!table.release(&g("g1"), &m("b")));
        assert!(table.is_holder(&g("g1"), &m("a")));

        assert!(table.release(&g("g1"), &m("a")));
        assert!(table.holder(&g("g1")).is_none());
        // released lock leaves membership alone
        assert_eq!(table.groups()[0].members.len(), 2);
    }

    #[test]
    fn unregistering_holder_releases_its_lock() {
        let table = SyncGroupTable::new();
        table.register_member(&g("g1"), &m("a"));
        table.register_member(&g("g1"), &m("b"));
        table.try_acquire(&g("g1"), &m("a"));

        assert!(table.unregister_member(&g("g1"), &m("a")));
        assert!(table.holder(&g("g1")).is_none());
        assert!(table.try_acquire(&g("g1"), &m("b")));
    }

    #[test]
    fn removing_last_member_drops_group_and_lock() {
        let table = SyncGroupTable::new();
        table.register_member(&g("g1"), &m("a"));
        table.try_acquire(&g("g1"), &m("a"));

        table.unregister_member(&g("g1"), &m("a"));

        assert!(table.groups().is_empty());
        assert!(table.locks().is_empty());
        assert_eq!(table.member_count(), 0);
    }

    #[test]
    fn unregister_from_wrong_group_keeps_assignment() {
        let table = SyncGroupTable::new();
        table.register_member(&g("g1"), &m("a"));
        table.try_acquire(&g("g1"), &m("a"));

        assert!(!table.unregister_member(&g("g2"), &m("a")));
        assert_eq!(table.group_of(&m("a")), Some(g("g1")));
        assert!(table.is_holder(&g("g1"), &m("a")));
    }

    #[test]
    fn observe_detects_rename_and_releases_old_lock() {
        let table = SyncGroupTable::new();
        let first = table.observe(&m("a"), Some(&g("g1")));
        assert!(first.changed);
        assert_eq!(first.previous, None);
        table.try_acquire(&g("g1"), &m("a"));

        let same = table.observe(&m("a"), Some(&g("g1")));
        assert!(!same.changed);
        assert!(table.is_holder(&g("g1"), &m("a")));

        let renamed = table.observe(&m("a"), Some(&g("g2")));
        assert_eq!(
            renamed,
            Membership {
                previous: Some(g("g1")),
                changed: true,
                released_lock: true,
            }
        );
        assert!(table.locks().is_empty());
        assert_eq!(table.group_of(&m("a")), Some(g("g2")));
        // never granted the new group's lock on the move
        assert!(table.holder(&g("g2")).is_none());
    }

    #[test]
    fn observe_without_group_leaves_table() {
        let table = SyncGroupTable::new();
        assert!(!table.observe(&m("a"), None).changed);

        table.observe(&m("a"), Some(&g("g1")));
        table.try_acquire(&g("g1"), &m("a"));
        let removed = table.observe(&m("a"), None);
        assert!(removed.changed);
        assert!(removed.released_lock);
        assert!(table.groups().is_empty());
        assert_eq!(table.group_of(&m("a")), None);
    }

    #[test]
    fn forget_returns_group_and_release_state() {
        let table = SyncGroupTable::new();
        assert_eq!(table.forget(&m("a")), None);

        table.register_member(&g("g1"), &m("a"));
        table.register_member(&g("g1"), &m("b"));
        table.try_acquire(&g("g1"), &m("a"));

        assert_eq!(table.forget(&m("a")), Some((g("g1"), true)));
        assert_eq!(table.forget(&m("b")), Some((g("g1"), false)));
        assert!(table.groups().is_empty());
    }

    #[test]
    fn snapshots_are_sorted_and_serializable() {
        let table = SyncGroupTable::new();
        table.register_member(&g("b"), &m("y"));
        table.register_member(&g("a"), &m("x"));
        table.try_acquire(&g("b"), &m("y"));

        let groups = table.groups();
        assert_eq!(groups[0].group, g("a"));
        assert_eq!(groups[1].holder, Some(m("y")));

        let json = serde_json::to_value(&groups).unwrap();
        assert_eq!(json[1]["holder"], "default/y");
    }

    #[test]
    fn concurrent_acquire_has_single_winner() {
        const CONTENDERS: usize = 16;

        for _ in 0..50 {
            let table = Arc::new(SyncGroupTable::new());
            let group = g("contended");
            for i in 0..CONTENDERS {
                table.register_member(&group, &m(&format!("member-{i}")));
            }

            let barrier = Arc::new(Barrier::new(CONTENDERS));
            let winners = Arc::new(AtomicUsize::new(0));
            let handles: Vec<_> = (0..CONTENDERS)
                .map(|i| {
                    let table = Arc::clone(&table);
                    let barrier = Arc::clone(&barrier);
                    let winners = Arc::clone(&winners);
                    let group = group.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        if table.try_acquire(&group, &m(&format!("member-{i}"))) {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(winners.load(Ordering::SeqCst), 1);
            assert_eq!(table.locks().len(), 1);
        }
    }

    #[test]
    fn concurrent_acquire_release_never_overlaps() {
        const WORKERS: usize = 8;
        const ROUNDS: usize = 500;

        let table = Arc::new(SyncGroupTable::new());
        let group = g("shared");
        for i in 0..WORKERS {
            table.register_member(&group, &m(&format!("w{i}")));
        }
        let inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..WORKERS)
            .map(|i| {
                let table = Arc::clone(&table);
                let inside = Arc::clone(&inside);
                let group = group.clone();
                std::thread::spawn(move || {
                    let me = m(&format!("w{i}"));
                    for _ in 0..ROUNDS {
                        if table.try_acquire(&group, &me) {
                            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                            std::thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                            assert!(table.release(&group, &me));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(table.locks().is_empty());
    }
}
