use crate::{osm_data::*, utils::locks::lock_or_recover};
use get_size::GetSize;
use rayon::prelude::*;
use std::sync::Mutex;

/// Outer and inner member ways of one relation.
#[derive(Debug, Clone, PartialEq, Eq, Default, GetSize)]
pub struct RelationWayLists {
    pub relation_id: RelationId,
    pub outer: Vec<WayId>,
    pub inner: Vec<WayId>,
}

impl RelationWayLists {
    pub fn new(relation_id: RelationId, outer: Vec<WayId>, inner: Vec<WayId>) -> Self {
        RelationWayLists {
            relation_id,
            outer,
            inner,
        }
    }
}

/// Append-only store of relation member lists.
///
/// Written during the relation scan, read afterwards, when relations are assembled
/// into geometries.
#[derive(Default)]
pub struct RelationWayListStore {
    inner: Mutex<Entries>,
}

#[derive(Default)]
struct Entries {
    lists: Vec<RelationWayLists>,
    sorted: bool,
}

impl RelationWayListStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything, including the allocated capacity.
    pub fn reopen(&self) {
        let mut guard = lock_or_recover(&self.inner, "relation way lists");
        *guard = Entries::default();
    }

    /// Move all of `batch` to the end of the store, leaving `batch` empty.
    pub fn append(&self, batch: &mut Vec<RelationWayLists>) {
        if batch.is_empty() {
            return;
        }
        let mut guard = lock_or_recover(&self.inner, "relation way lists");
        guard.lists.append(batch);
        guard.sorted = false;
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.inner, "relation way lists").lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the store empty, keeping its allocation.
    pub fn clear(&self) {
        let mut guard = lock_or_recover(&self.inner, "relation way lists");
        guard.lists.clear();
        guard.sorted = true;
    }

    /// Order entries by relation id (stable for duplicate ids), so [find](Self::find)
    /// can binary search.
    pub fn sort(&self) {
        let mut guard = lock_or_recover(&self.inner, "relation way lists");
        if !guard.sorted {
            guard.lists.par_sort_by_key(|entry| entry.relation_id);
            guard.sorted = true;
        }
    }

    /// Member lists of `relation_id`. The first stored entry wins for duplicate ids.
    pub fn find(&self, relation_id: RelationId) -> Option<RelationWayLists> {
        let guard = lock_or_recover(&self.inner, "relation way lists");
        if guard.sorted {
            let start = guard
                .lists
                .partition_point(|entry| entry.relation_id < relation_id);
            guard
                .lists
                .get(start)
                .filter(|entry| entry.relation_id == relation_id)
                .cloned()
        } else {
            guard
                .lists
                .iter()
                .find(|entry| entry.relation_id == relation_id)
                .cloned()
        }
    }

    /// Copy of every entry, in store order.
    pub fn snapshot(&self) -> Vec<RelationWayLists> {
        lock_or_recover(&self.inner, "relation way lists")
            .lists
            .clone()
    }

    /// Approximate heap bytes held by the entries.
    pub fn heap_size(&self) -> usize {
        lock_or_recover(&self.inner, "relation way lists")
            .lists
            .get_heap_size()
    }
}
