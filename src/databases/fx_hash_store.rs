use super::*;
use crate::utils::locks::{read_or_recover, write_or_recover};
use rustc_hash::FxHashMap;
use std::sync::RwLock;

/// Node positions in a hash map.
///
/// Works for any id distribution, at the price of roughly three times the memory of
/// the [CompactNodeStore](super::CompactNodeStore).
#[derive(Default)]
pub struct FxHashNodeStore {
    nodes: RwLock<FxHashMap<NodeId, LatpLon>>,
}

impl FxHashNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        FxHashNodeStore {
            nodes: RwLock::new(FxHashMap::with_capacity_and_hasher(
                capacity,
                Default::default(),
            )),
        }
    }
}

impl NodeStore for FxHashNodeStore {
    fn insert(&self, nodes: Vec<(NodeId, LatpLon)>) -> Result<(), StoreError> {
        let mut guard = write_or_recover(&self.nodes, "node store");
        guard.extend(nodes);
        Ok(())
    }

    fn at(&self, id: NodeId) -> Option<LatpLon> {
        read_or_recover(&self.nodes, "node store").get(&id).copied()
    }

    fn len(&self) -> usize {
        read_or_recover(&self.nodes, "node store").len()
    }

    fn clear(&self) -> Result<(), StoreError> {
        write_or_recover(&self.nodes, "node store").clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct FxHashWayStore {
    ways: RwLock<FxHashMap<WayId, Vec<NodeId>>>,
}

impl FxHashWayStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WayStore for FxHashWayStore {
    fn insert(&self, ways: Vec<(WayId, Vec<NodeId>)>) {
        let mut guard = write_or_recover(&self.ways, "way store");
        guard.extend(ways);
    }

    fn nodes_for(&self, id: WayId) -> Option<Vec<NodeId>> {
        read_or_recover(&self.ways, "way store").get(&id).cloned()
    }

    fn contains(&self, id: WayId) -> bool {
        read_or_recover(&self.ways, "way store").contains_key(&id)
    }

    fn len(&self) -> usize {
        read_or_recover(&self.ways, "way store").len()
    }

    fn clear(&self) {
        write_or_recover(&self.ways, "way store").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_store() {
        let store = FxHashNodeStore::with_capacity(4);
        assert!(store.is_empty());
        store
            .insert(vec![(1, LatpLon::new(10, 20)), (7, LatpLon::new(-5, 3))])
            .expect("insert");
        assert_eq!(store.len(), 2);
        assert_eq!(store.at(7), Some(LatpLon::new(-5, 3)));
        assert_eq!(store.at(2), None);
        store.insert(vec![(7, LatpLon::new(1, 1))]).expect("insert");
        assert_eq!(store.len(), 2);
        assert_eq!(store.at(7), Some(LatpLon::new(1, 1)));
        store.clear().expect("clear");
        assert!(store.is_empty());
        assert_eq!(store.at(1), None);
    }

    #[test]
    fn test_way_store() {
        let store = FxHashWayStore::new();
        store.insert(vec![(100, vec![1, 2, 3]), (101, vec![3, 4])]);
        assert!(store.contains(100));
        assert!(!store.contains(102));
        assert_eq!(store.nodes_for(101), Some(vec![3, 4]));
        assert_eq!(store.nodes_for(102), None);
        assert_eq!(store.len(), 2);
        store.clear();
        assert!(store.is_empty());
    }
}
