//! Incremental grouping.
//!
//! Source items are bucketed by a key. Each bucket is a `Group`, itself an
//! observable collection holding its members in source order. Groups are
//! ordered by the source index of their first member.

use crate::binding::{source_item, SourceBinding};
use crate::computation::Computation;
use crate::gate::PropagationGate;
use crate::options::{OperatorOptions, SourceParam};
use alloc::rc::{Rc, Weak};
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::hash::Hash;
use hashbrown::HashMap;
use rivulet_core::{CollectionChange, Error, PositionId, PositionRegistry, Result};
use rivulet_reactive::{
    callback, watch, ChangeCallback, CollectionCallback, Edit, IncrementalCollection,
    ObservableCollection, OutputBuffer, Selector, SharedCollection, SubscriptionId, WatchHandle,
};

const OPERATOR: &str = "Grouping";

/// One key bucket of a `Grouping`.
pub struct Group<K, T> {
    key: K,
    items: OutputBuffer<T>,
}

impl<K, T: Clone> Group<K, T> {
    fn new(key: K, items: Vec<T>) -> Self {
        Self {
            key,
            items: OutputBuffer::from_vec(items),
        }
    }

    /// Returns the key shared by every member.
    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K, T: Clone> ObservableCollection<T> for Group<K, T> {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.items.get(index)
    }

    fn to_vec(&self) -> Vec<T> {
        self.items.to_vec()
    }

    fn subscribe(&self, callback: CollectionCallback<T>) -> SubscriptionId {
        self.items.subscribe(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.items.unsubscribe(id)
    }

    fn change_marker(&self) -> Option<bool> {
        self.items.change_marker()
    }
}

struct GroupItem<K> {
    watch: WatchHandle,
    key: K,
}

struct GroupEntry<K, T> {
    group: Rc<Group<K, T>>,
    /// Member entries of the items registry, in source order.
    members: Vec<PositionId>,
}

enum GroupEdit<K, T> {
    Outer(Edit<Rc<Group<K, T>>>),
    Inner(Rc<Group<K, T>>, Edit<T>),
}

struct GroupingState<K, T> {
    items: PositionRegistry<GroupItem<K>>,
    groups: PositionRegistry<GroupEntry<K, T>>,
    by_key: HashMap<K, PositionId>,
}

fn source_index<K>(items: &PositionRegistry<GroupItem<K>>, id: PositionId) -> Result<usize> {
    items
        .index_of(id)
        .ok_or_else(|| Error::invalid_operation("group member is not registered"))
}

/// Position of a member at source `index` among `members`.
fn member_position<K>(
    items: &PositionRegistry<GroupItem<K>>,
    members: &[PositionId],
    index: usize,
) -> usize {
    members.partition_point(|&m| items.index_of(m).is_some_and(|i| i < index))
}

fn first_index<K, T>(
    items: &PositionRegistry<GroupItem<K>>,
    entry: &GroupEntry<K, T>,
) -> Result<usize> {
    let first = entry
        .members
        .first()
        .ok_or_else(|| Error::invalid_operation("group has no members"))?;
    source_index(items, *first)
}

impl<K, T> GroupingState<K, T>
where
    K: Clone + Eq + Hash,
    T: Clone,
{
    fn new(capacity: usize) -> Self {
        Self {
            items: PositionRegistry::with_capacity(capacity),
            groups: PositionRegistry::new(),
            by_key: HashMap::new(),
        }
    }

    fn group_of(&self, item: PositionId) -> Result<PositionId> {
        let key = &self
            .items
            .get(item)
            .ok_or_else(|| Error::invalid_operation("item is not registered"))?
            .key;
        self.by_key
            .get(key)
            .copied()
            .ok_or_else(|| Error::invalid_operation("item key has no group"))
    }

    /// Takes the item out of its group. An emptied group is removed.
    fn detach(&mut self, item: PositionId, edits: &mut Vec<GroupEdit<K, T>>) -> Result<()> {
        let gid = self.group_of(item)?;
        let index = source_index(&self.items, item)?;
        let Self {
            items,
            groups,
            by_key,
        } = self;
        let entry = groups
            .get_mut(gid)
            .ok_or_else(|| Error::invalid_operation("stale group"))?;
        let position = member_position(items, &entry.members, index);
        entry.members.remove(position);
        edits.push(GroupEdit::Inner(
            entry.group.clone(),
            Edit::Remove { index: position },
        ));

        if entry.members.is_empty() {
            let at = groups
                .index_of(gid)
                .ok_or_else(|| Error::invalid_operation("stale group"))?;
            let removed = groups.remove(at)?;
            by_key.remove(removed.group.key());
            edits.push(GroupEdit::Outer(Edit::Remove { index: at }));
        } else if position == 0 {
            self.reposition(gid, edits)?;
        }
        Ok(())
    }

    /// Puts the item, whose key is already stored, into the group for its
    /// key, creating the group if needed.
    fn join(&mut self, item: PositionId, value: &T, edits: &mut Vec<GroupEdit<K, T>>) -> Result<()> {
        let index = source_index(&self.items, item)?;
        let key = self
            .items
            .get(item)
            .map(|entry| entry.key.clone())
            .ok_or_else(|| Error::invalid_operation("item is not registered"))?;

        match self.by_key.get(&key).copied() {
            Some(gid) => {
                let Self { items, groups, .. } = self;
                let entry = groups
                    .get_mut(gid)
                    .ok_or_else(|| Error::invalid_operation("stale group"))?;
                let position = member_position(items, &entry.members, index);
                entry.members.insert(position, item);
                edits.push(GroupEdit::Inner(
                    entry.group.clone(),
                    Edit::Insert {
                        index: position,
                        item: value.clone(),
                    },
                ));
                if position == 0 {
                    self.reposition(gid, edits)?;
                }
            }
            None => {
                let at = self.group_insertion_index(index, None)?;
                let group = Rc::new(Group::new(key.clone(), vec![value.clone()]));
                let gid = self.groups.insert(
                    at,
                    GroupEntry {
                        group: group.clone(),
                        members: vec![item],
                    },
                )?;
                self.by_key.insert(key, gid);
                edits.push(GroupEdit::Outer(Edit::Insert { index: at, item: group }));
            }
        }
        Ok(())
    }

    /// Index among the groups, `skip` excluded, for a group whose first
    /// member sits at source `index`.
    fn group_insertion_index(&self, index: usize, skip: Option<usize>) -> Result<usize> {
        let count = self.groups.len() - usize::from(skip.is_some());
        let (mut low, mut high) = (0, count);
        while low < high {
            let mid = low + (high - low) / 2;
            let at = match skip {
                Some(skip) if mid >= skip => mid + 1,
                _ => mid,
            };
            let entry = self
                .groups
                .at(at)
                .ok_or_else(|| Error::not_found(at, self.groups.len()))?;
            if first_index(&self.items, entry)? < index {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        Ok(low)
    }

    /// Moves a group whose first member changed to its ordered position.
    fn reposition(&mut self, gid: PositionId, edits: &mut Vec<GroupEdit<K, T>>) -> Result<()> {
        let from = self
            .groups
            .index_of(gid)
            .ok_or_else(|| Error::invalid_operation("stale group"))?;
        let entry = self
            .groups
            .get(gid)
            .ok_or_else(|| Error::invalid_operation("stale group"))?;
        let first = first_index(&self.items, entry)?;
        let to = self.group_insertion_index(first, Some(from))?;
        if from != to {
            self.groups.move_position(from, to)?;
            edits.push(GroupEdit::Outer(Edit::Move {
                old_index: from,
                new_index: to,
            }));
        }
        Ok(())
    }

    /// Re-sorts the item within its group after a source move.
    fn resort_member(
        &mut self,
        item: PositionId,
        old_index: usize,
        edits: &mut Vec<GroupEdit<K, T>>,
    ) -> Result<()> {
        let gid = self.group_of(item)?;
        let index = source_index(&self.items, item)?;
        let Self { items, groups, .. } = self;
        let entry = groups
            .get_mut(gid)
            .ok_or_else(|| Error::invalid_operation("stale group"))?;
        let from = entry
            .members
            .iter()
            .position(|&m| m == item)
            .ok_or_else(|| Error::not_found(old_index, entry.members.len()))?;
        entry.members.remove(from);
        let to = member_position(items, &entry.members, index);
        entry.members.insert(to, item);
        if from != to {
            edits.push(GroupEdit::Inner(
                entry.group.clone(),
                Edit::Move {
                    old_index: from,
                    new_index: to,
                },
            ));
        }
        if from == 0 || to == 0 {
            self.reposition(gid, edits)?;
        }
        Ok(())
    }
}

/// Items of a source collection bucketed by key.
///
/// Each output item is a shared `Group` exposing its key and its members in
/// source order. A group appears where its first member appears in the
/// source and disappears with its last member.
pub struct Grouping<T, K> {
    binding: SourceBinding<T>,
    key_selector: Selector<T, K>,
    gate: PropagationGate,
    state: RefCell<GroupingState<K, T>>,
    output: OutputBuffer<Rc<Group<K, T>>>,
    capacity: usize,
    this: Weak<Self>,
}

impl<T, K> Grouping<T, K>
where
    T: Clone + 'static,
    K: Clone + Eq + Hash + 'static,
{
    /// Creates a grouping of `source` by `key_selector`.
    pub fn new(source: impl Into<SourceParam<T>>, key_selector: Selector<T, K>) -> Result<Rc<Self>> {
        Self::with_options(source, key_selector, OperatorOptions::default())
    }

    /// Creates a grouping with explicit options.
    pub fn with_options(
        source: impl Into<SourceParam<T>>,
        key_selector: Selector<T, K>,
        options: OperatorOptions,
    ) -> Result<Rc<Self>> {
        let this = Rc::new_cyclic(|weak| Self {
            binding: SourceBinding::new(source.into()),
            key_selector,
            gate: PropagationGate::new(OPERATOR, options.diagnostics.clone()),
            state: RefCell::new(GroupingState::new(options.capacity)),
            output: OutputBuffer::new(),
            capacity: options.capacity,
            this: weak.clone(),
        });
        this.binding.watch_param(this.rebind_callback());
        this.attach(false)?;
        Ok(this)
    }

    /// Returns the group holding `key`, if any.
    pub fn group(&self, key: &K) -> Option<Rc<Group<K, T>>> {
        let state = self.state.borrow();
        let gid = state.by_key.get(key)?;
        state.groups.get(*gid).map(|entry| entry.group.clone())
    }

    /// Returns the source collection.
    pub fn source(&self) -> Result<SharedCollection<T>> {
        self.binding.source()
    }

    fn source_callback(&self) -> CollectionCallback<T> {
        let weak = self.this.clone();
        callback(move |change: &CollectionChange<T>| match weak.upgrade() {
            Some(this) => this.on_source_change(change),
            None => Ok(()),
        })
    }

    fn rebind_callback(&self) -> ChangeCallback<()> {
        let weak = self.this.clone();
        callback(move |_: &()| match weak.upgrade() {
            Some(this) => this.attach(true),
            None => Ok(()),
        })
    }

    fn watcher(&self, id: PositionId) -> ChangeCallback<()> {
        let weak = self.this.clone();
        callback(move |_: &()| match weak.upgrade() {
            Some(this) => this.on_value_changed(id),
            None => Ok(()),
        })
    }

    fn evaluate(&self, item: &T, id: PositionId) -> (K, WatchHandle) {
        self.gate
            .diagnostics()
            .evaluate(OPERATOR, || watch(&self.key_selector, item, self.watcher(id)))
    }

    fn attach(&self, notify: bool) -> Result<()> {
        let source = self.binding.attach(self.source_callback());
        tracing::debug!(operator = OPERATOR, len = source.len(), "attached source");
        self.gate
            .initialize(source.change_marker(), || self.rebuild(&source, notify))?;
        self.gate.settle(|id| self.replay(id))
    }

    fn rebuild(&self, source: &SharedCollection<T>, notify: bool) -> Result<()> {
        let values = source.to_vec();
        let groups = {
            let mut state = self.state.borrow_mut();
            *state = GroupingState::new(self.capacity.max(values.len()));
            let mut buckets: Vec<(K, Vec<PositionId>, Vec<T>)> = Vec::new();
            let mut slots: HashMap<K, usize> = HashMap::new();
            for value in &values {
                let id = state.items.next_id();
                let (key, watch) = self.evaluate(value, id);
                state.items.push(GroupItem {
                    watch,
                    key: key.clone(),
                });
                let slot = *slots.entry(key.clone()).or_insert_with(|| {
                    buckets.push((key, Vec::new(), Vec::new()));
                    buckets.len() - 1
                });
                buckets[slot].1.push(id);
                buckets[slot].2.push(value.clone());
            }

            let mut groups = Vec::with_capacity(buckets.len());
            for (key, members, members_values) in buckets {
                let group = Rc::new(Group::new(key.clone(), members_values));
                let gid = state.groups.push(GroupEntry {
                    group: group.clone(),
                    members,
                });
                state.by_key.insert(key, gid);
                groups.push(group);
            }
            groups
        };
        if notify {
            self.output.reset_items(groups)
        } else {
            self.output.load(groups);
            Ok(())
        }
    }

    fn emit(&self, edits: Vec<GroupEdit<K, T>>) -> Result<()> {
        for edit in edits {
            match edit {
                GroupEdit::Outer(edit) => self.output.apply(edit)?,
                GroupEdit::Inner(group, edit) => group.items.apply(edit)?,
            }
        }
        Ok(())
    }

    fn on_source_change(&self, change: &CollectionChange<T>) -> Result<()> {
        let source = self.binding.source()?;
        self.gate.structural(source.change_marker(), change, || match change {
            CollectionChange::Add { index, items } => self.insert(*index, &items[0]),
            CollectionChange::Remove { index, .. } => self.remove(*index),
            CollectionChange::Replace {
                index, new_items, ..
            } => self.rekey(*index, &new_items[0], true),
            CollectionChange::Move {
                old_index,
                new_index,
                ..
            } => self.move_item(*old_index, *new_index),
            CollectionChange::Reset => self.rebuild(&source, true),
        })?;
        self.gate.settle(|id| self.replay(id))
    }

    fn on_value_changed(&self, id: PositionId) -> Result<()> {
        if self.gate.should_defer(self.binding.marker()) {
            self.gate.defer(id);
            return Ok(());
        }
        self.gate.value_change(|| self.replay(id))?;
        self.gate.settle(|id| self.replay(id))
    }

    fn replay(&self, id: PositionId) -> Result<()> {
        let index = self.state.borrow().items.index_of(id);
        let Some(index) = index else { return Ok(()) };
        let value = source_item(&self.binding.source()?, index)?;
        tracing::trace!(operator = OPERATOR, index, "re-evaluating key");
        self.rekey(index, &value, false)
    }

    fn insert(&self, index: usize, value: &T) -> Result<()> {
        let mut edits = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            let id = state.items.next_id();
            let (key, watch) = self.evaluate(value, id);
            state.items.insert(index, GroupItem { watch, key })?;
            state.join(id, value, &mut edits)?;
        }
        self.emit(edits)
    }

    fn remove(&self, index: usize) -> Result<()> {
        let mut edits = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            let id = state
                .items
                .id_at(index)
                .ok_or_else(|| Error::not_found(index, state.items.len()))?;
            state.detach(id, &mut edits)?;
            state.items.remove(index)?;
        }
        self.emit(edits)
    }

    /// Re-evaluates the key of the item at `index`. A changed key moves the
    /// item between groups; a replaced item keeping its key is set in place.
    fn rekey(&self, index: usize, value: &T, replaced: bool) -> Result<()> {
        let mut edits = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            let id = state
                .items
                .id_at(index)
                .ok_or_else(|| Error::not_found(index, state.items.len()))?;
            let (key, watch) = self.evaluate(value, id);
            let unchanged = {
                let item = state
                    .items
                    .get_mut(id)
                    .ok_or_else(|| Error::not_found(index, 0))?;
                item.watch = watch;
                item.key == key
            };

            if unchanged {
                if replaced {
                    let gid = state.group_of(id)?;
                    let entry = state
                        .groups
                        .get(gid)
                        .ok_or_else(|| Error::invalid_operation("stale group"))?;
                    let position = member_position(&state.items, &entry.members, index);
                    edits.push(GroupEdit::Inner(
                        entry.group.clone(),
                        Edit::Set {
                            index: position,
                            item: value.clone(),
                        },
                    ));
                }
            } else {
                state.detach(id, &mut edits)?;
                if let Some(item) = state.items.get_mut(id) {
                    item.key = key;
                }
                state.join(id, value, &mut edits)?;
            }
        }
        self.emit(edits)
    }

    fn move_item(&self, old_index: usize, new_index: usize) -> Result<()> {
        if old_index == new_index {
            return Ok(());
        }
        let mut edits = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            let id = state
                .items
                .id_at(old_index)
                .ok_or_else(|| Error::not_found(old_index, state.items.len()))?;
            state.items.move_position(old_index, new_index)?;
            state.resort_member(id, old_index, &mut edits)?;
        }
        self.emit(edits)
    }
}

impl<T, K> Computation for Grouping<T, K>
where
    T: Clone + PartialEq + 'static,
    K: Clone + Eq + Hash + 'static,
{
    fn operator(&self) -> &'static str {
        OPERATOR
    }

    fn is_consistent(&self) -> bool {
        self.gate.is_consistent()
    }

    fn validate_consistency(&self) -> Result<()> {
        let violation = |tag| Error::consistency_violation(OPERATOR, tag);
        let source = self.binding.source()?.to_vec();
        let keys: Vec<K> = self.gate.diagnostics().evaluate(OPERATOR, || {
            source
                .iter()
                .map(|item| self.key_selector.evaluate(item))
                .collect()
        });

        let mut expected: Vec<(K, Vec<T>)> = Vec::new();
        for (key, item) in keys.iter().zip(&source) {
            match expected.iter_mut().find(|(k, _)| k == key) {
                Some((_, members)) => members.push(item.clone()),
                None => expected.push((key.clone(), vec![item.clone()])),
            }
        }

        let state = self.state.borrow();
        state.items.validate_consistency()?;
        state.groups.validate_consistency()?;

        if state.items.len() != source.len() {
            return Err(violation(1));
        }
        for (j, (_, item)) in state.items.iter().enumerate() {
            if item.key != keys[j] {
                return Err(violation(2));
            }
        }

        let output = self.output.to_vec();
        if output.len() != expected.len() || state.groups.len() != expected.len() {
            return Err(violation(3));
        }
        if state.by_key.len() != expected.len() {
            return Err(violation(4));
        }
        for (((gid, entry), group), (key, members)) in
            state.groups.iter().zip(&output).zip(&expected)
        {
            if !Rc::ptr_eq(&entry.group, group) {
                return Err(violation(5));
            }
            if group.key() != key {
                return Err(violation(6));
            }
            if group.items.with_items(|items| items != members.as_slice()) {
                return Err(violation(7));
            }
            if state.by_key.get(key) != Some(&gid) {
                return Err(violation(8));
            }
            let indices: Vec<usize> = entry
                .members
                .iter()
                .map(|&m| source_index(&state.items, m))
                .collect::<Result<_>>()?;
            if indices.windows(2).any(|w| w[0] >= w[1])
                || indices.iter().any(|&i| state.items.at(i).map(|it| &it.key) != Some(key))
            {
                return Err(violation(9));
            }
        }
        Ok(())
    }

    fn subscribe_consistency_restored(&self, callback: ChangeCallback<()>) -> SubscriptionId {
        self.gate.subscribe_restored(callback)
    }

    fn unsubscribe_consistency_restored(&self, id: SubscriptionId) -> bool {
        self.gate.unsubscribe_restored(id)
    }
}

impl<T: Clone, K> ObservableCollection<Rc<Group<K, T>>> for Grouping<T, K> {
    fn len(&self) -> usize {
        self.output.len()
    }

    fn get(&self, index: usize) -> Option<Rc<Group<K, T>>> {
        self.output.get(index)
    }

    fn to_vec(&self) -> Vec<Rc<Group<K, T>>> {
        self.output.to_vec()
    }

    fn subscribe(&self, callback: CollectionCallback<Rc<Group<K, T>>>) -> SubscriptionId {
        self.output.subscribe(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.output.unsubscribe(id)
    }

    fn change_marker(&self) -> Option<bool> {
        self.output.change_marker()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::ChangeAction;
    use rivulet_reactive::{ReadSet, SourceList, Var};

    fn snapshot(grouping: &Grouping<i32, i32>) -> Vec<(i32, Vec<i32>)> {
        grouping
            .to_vec()
            .iter()
            .map(|g| (*g.key(), g.to_vec()))
            .collect()
    }

    fn parity(source: &Rc<SourceList<i32>>) -> Rc<Grouping<i32, i32>> {
        Grouping::new(source.clone(), Selector::plain(|x: &i32| x % 2)).unwrap()
    }

    #[test]
    fn test_groups_in_first_occurrence_order() {
        let source = SourceList::from_vec(vec![1, 2, 3, 4]);
        let grouping = parity(&source);
        assert_eq!(snapshot(&grouping), vec![(1, vec![1, 3]), (0, vec![2, 4])]);
        grouping.validate_consistency().unwrap();
    }

    #[test]
    fn test_removing_last_member_removes_group() {
        let source = SourceList::from_vec(vec![1, 2, 3, 4]);
        let grouping = parity(&source);
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        grouping.subscribe(callback(move |change: &CollectionChange<Rc<Group<i32, i32>>>| {
            sink.borrow_mut().push(change.action());
            Ok(())
        }));

        source.remove(0).unwrap();
        assert_eq!(snapshot(&grouping), vec![(0, vec![2, 4]), (1, vec![3])]);
        grouping.validate_consistency().unwrap();

        source.remove(1).unwrap();
        assert_eq!(snapshot(&grouping), vec![(0, vec![2, 4])]);
        assert!(grouping.group(&1).is_none());
        assert_eq!(*log.borrow(), vec![ChangeAction::Move, ChangeAction::Remove]);
        grouping.validate_consistency().unwrap();
    }

    #[test]
    fn test_group_collections_emit_member_edits() {
        let source = SourceList::from_vec(vec![1, 2, 3]);
        let grouping = parity(&source);
        let odd = grouping.group(&1).unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        odd.subscribe(callback(move |change: &CollectionChange<i32>| {
            sink.borrow_mut().push(change.clone());
            Ok(())
        }));

        source.push(5).unwrap();
        source.replace(0, 7).unwrap();
        assert_eq!(odd.to_vec(), vec![7, 3, 5]);
        assert_eq!(
            *log.borrow(),
            vec![CollectionChange::add(2, 5), CollectionChange::replace(0, 1, 7)]
        );
        grouping.validate_consistency().unwrap();
    }

    #[test]
    fn test_replace_with_new_key_moves_between_groups() {
        let source = SourceList::from_vec(vec![1, 2, 3]);
        let grouping = parity(&source);
        source.replace(2, 4).unwrap();
        assert_eq!(snapshot(&grouping), vec![(1, vec![1]), (0, vec![2, 4])]);
        source.replace(0, 6).unwrap();
        assert_eq!(snapshot(&grouping), vec![(0, vec![6, 2, 4])]);
        grouping.validate_consistency().unwrap();
    }

    #[test]
    fn test_moves_reorder_members_and_groups() {
        let source = SourceList::from_vec(vec![1, 2, 3, 4, 5]);
        let grouping = parity(&source);

        source.move_item(0, 4).unwrap();
        assert_eq!(snapshot(&grouping), vec![(0, vec![2, 4]), (1, vec![3, 5, 1])]);
        source.move_item(3, 0).unwrap();
        assert_eq!(snapshot(&grouping), vec![(1, vec![5, 3, 1]), (0, vec![2, 4])]);
        source.move_item(2, 1).unwrap();
        grouping.validate_consistency().unwrap();
    }

    #[test]
    fn test_key_depending_on_var() {
        let source = SourceList::from_vec(vec![1, 2, 3, 4, 5, 6]);
        let modulus = Var::new(2);
        let m = modulus.clone();
        let grouping = Grouping::new(
            source.clone(),
            Selector::new(move |x: &i32, cx: &mut ReadSet| x % cx.read(&m)),
        )
        .unwrap();

        modulus.set(3).unwrap();
        assert_eq!(
            snapshot(&grouping),
            vec![(1, vec![1, 4]), (2, vec![2, 5]), (0, vec![3, 6])]
        );
        grouping.validate_consistency().unwrap();
    }

    #[test]
    fn test_key_change_during_structural_edit_is_deferred() {
        let source = SourceList::from_vec(vec![1, 2, 3, 4]);
        let modulus = Var::new(2);

        // subscribed ahead of the grouping, so every key changes before the
        // grouping has seen the edit
        let bump = modulus.clone();
        source.subscribe(callback(move |_: &CollectionChange<i32>| bump.update(|m| m + 1)));

        let m = modulus.clone();
        let grouping = Grouping::new(
            source.clone(),
            Selector::new(move |x: &i32, cx: &mut ReadSet| x % cx.read(&m)),
        )
        .unwrap();

        source.push(5).unwrap();
        assert_eq!(modulus.get(), 3);
        assert_eq!(
            snapshot(&grouping),
            vec![(1, vec![1, 4]), (2, vec![2, 5]), (0, vec![3])]
        );
        assert!(grouping.is_consistent());
        grouping.validate_consistency().unwrap();

        source.remove(0).unwrap();
        assert_eq!(
            snapshot(&grouping),
            vec![(2, vec![2]), (3, vec![3]), (0, vec![4]), (1, vec![5])]
        );
        grouping.validate_consistency().unwrap();
    }

    #[test]
    fn test_reset_and_multi_item_rejection() {
        let source = SourceList::from_vec(vec![1, 2]);
        let grouping = parity(&source);
        assert!(source.insert_many(0, vec![3, 4]).unwrap_err().is_unsupported());
        source.reset(vec![4, 5, 6]).unwrap();
        assert_eq!(snapshot(&grouping), vec![(0, vec![4, 6]), (1, vec![5])]);
        grouping.validate_consistency().unwrap();
    }
}
