use crate::{
    osm_data::*,
    utils::locks::{read_or_recover, write_or_recover},
};
use rustc_hash::FxHashMap;
use std::sync::RwLock;

/// Relations seen during the relation scan, indexed for the way pass.
///
/// Holds two independent forward mappings: way → containing relations,
/// and relation → its tags. Neither side references the other's data.
#[derive(Default)]
pub struct RelationIndex {
    relations_for_ways: RwLock<FxHashMap<WayId, Vec<RelationId>>>,
    relation_tags: RwLock<FxHashMap<RelationId, TagMap>>,
}

impl RelationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that `relation_id` has `way_id` as a member.
    ///
    /// Repeated calls append again, no deduplication takes place.
    pub fn record_containment(&self, relation_id: RelationId, way_id: WayId) {
        let mut guard = write_or_recover(&self.relations_for_ways, "relation index");
        guard.entry(way_id).or_default().push(relation_id);
    }

    /// Replace the tags stored for `relation_id`.
    pub fn store_tags(&self, relation_id: RelationId, tags: TagMap) {
        let mut guard = write_or_recover(&self.relation_tags, "relation tags");
        guard.insert(relation_id, tags);
    }

    pub fn contains_way(&self, way_id: WayId) -> bool {
        read_or_recover(&self.relations_for_ways, "relation index").contains_key(&way_id)
    }

    /// Relations containing `way_id` in the order they were recorded.
    pub fn relations_for_way(&self, way_id: WayId) -> Vec<RelationId> {
        read_or_recover(&self.relations_for_ways, "relation index")
            .get(&way_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Value of tag `key` on relation `relation_id`, or `""` if either is unknown.
    pub fn tag_value(&self, relation_id: RelationId, key: &str) -> String {
        read_or_recover(&self.relation_tags, "relation tags")
            .get(&relation_id)
            .and_then(|tags| tags.get(key))
            .cloned()
            .unwrap_or_default()
    }

    pub fn tags_for(&self, relation_id: RelationId) -> Option<TagMap> {
        read_or_recover(&self.relation_tags, "relation tags")
            .get(&relation_id)
            .cloned()
    }

    /// Number of ways that belong to at least one relation.
    pub fn way_count(&self) -> usize {
        read_or_recover(&self.relations_for_ways, "relation index").len()
    }

    /// Number of relations with stored tags.
    pub fn relation_count(&self) -> usize {
        read_or_recover(&self.relation_tags, "relation tags").len()
    }

    pub fn clear(&self) {
        write_or_recover(&self.relations_for_ways, "relation index").clear();
        write_or_recover(&self.relation_tags, "relation tags").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_containment_preserves_order_and_duplicates() {
        let index = RelationIndex::new();
        assert!(!index.contains_way(10));
        assert!(index.relations_for_way(10).is_empty());
        index.record_containment(3, 10);
        index.record_containment(1, 10);
        index.record_containment(3, 10);
        index.record_containment(2, 11);
        assert!(index.contains_way(10));
        assert_eq!(index.relations_for_way(10), vec![3, 1, 3]);
        assert_eq!(index.relations_for_way(11), vec![2]);
        assert_eq!(index.way_count(), 2);
    }

    #[test]
    fn test_tag_lookups_never_fail() {
        let index = RelationIndex::new();
        assert_eq!(index.tag_value(5, "type"), "");
        index.store_tags(5, tag_map([("type", "multipolygon"), ("natural", "water")]));
        assert_eq!(index.tag_value(5, "natural"), "water");
        assert_eq!(index.tag_value(5, "name"), "");
        assert_eq!(index.tag_value(6, "natural"), "");
        index.store_tags(5, tag_map([("type", "route")]));
        assert_eq!(index.tag_value(5, "type"), "route");
        assert_eq!(index.tag_value(5, "natural"), "");
        assert_eq!(index.relation_count(), 1);
        assert_eq!(index.tags_for(5).map(|tags| tags.len()), Some(1));
        assert_eq!(index.tags_for(6), None);
        index.clear();
        assert_eq!(index.tag_value(5, "type"), "");
        assert_eq!(index.relation_count(), 0);
    }

    #[test]
    fn test_parallel_recording() {
        let index = RelationIndex::new();
        (0..1000i64).into_par_iter().for_each(|relation_id| {
            index.record_containment(relation_id, relation_id % 10);
            index.store_tags(relation_id, tag_map([("ref", relation_id.to_string())]));
        });
        for way_id in 0..10 {
            let mut relations = index.relations_for_way(way_id);
            assert_eq!(relations.len(), 100);
            relations.sort();
            assert!(relations.iter().all(|r| r % 10 == way_id));
        }
        assert_eq!(index.tag_value(999, "ref"), "999");
    }
}
