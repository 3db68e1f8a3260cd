//! The shared object store.
//!
//! [ObjectStore] owns node positions, the node lists of retained ways, the used-way set,
//! the relation index and the way lists of scanned relations. One instance is shared by
//! reference between all worker threads of a run, so every method takes `&self`.

use crate::{
    config::StoreConfig,
    databases::{CompactNodeStore, FxHashNodeStore, FxHashWayStore, NodeStore, WayStore},
    geometry::{
        assembly,
        correct_polygon,
        linestring_from,
        Linestring,
        MultiLinestring,
        MultiPolygon,
        Polygon,
    },
    osm_data::*,
    MissingNodeSnafu,
    MissingWaySnafu,
    StoreError,
};
use std::sync::atomic::{AtomicI64, Ordering};

pub mod relation_index;
pub mod relation_way_lists;
pub mod used_ways;

pub use relation_index::RelationIndex;
pub use relation_way_lists::{RelationWayListStore, RelationWayLists};
pub use used_ways::UsedWaySet;

pub struct ObjectStore {
    config: StoreConfig,
    nodes: Box<dyn NodeStore>,
    ways: Box<dyn WayStore>,
    used_ways: UsedWaySet,
    relation_index: RelationIndex,
    relation_way_lists: RelationWayListStore,
    next_relation_way_id: AtomicI64,
}

impl ObjectStore {
    /// Create the stores `config` asks for.
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let nodes: Box<dyn NodeStore> = if config.compact_storage {
            let store = match &config.store_path {
                Some(path) => CompactNodeStore::at_path(path, config.compact_node_capacity)?,
                None => CompactNodeStore::temporary(config.compact_node_capacity)?,
            };
            Box::new(store)
        } else {
            Box::new(FxHashNodeStore::new())
        };
        Ok(ObjectStore::with_stores(
            config,
            nodes,
            Box::new(FxHashWayStore::new()),
        ))
    }

    /// Use the given node and way stores instead of the ones `config` would pick.
    pub fn with_stores(
        config: StoreConfig,
        nodes: Box<dyn NodeStore>,
        ways: Box<dyn WayStore>,
    ) -> Self {
        ObjectStore {
            config,
            nodes,
            ways,
            used_ways: UsedWaySet::new(),
            relation_index: RelationIndex::new(),
            relation_way_lists: RelationWayListStore::new(),
            next_relation_way_id: AtomicI64::new(-1),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn nodes(&self) -> &dyn NodeStore {
        self.nodes.as_ref()
    }

    pub fn ways(&self) -> &dyn WayStore {
        self.ways.as_ref()
    }

    pub fn used_ways(&self) -> &UsedWaySet {
        &self.used_ways
    }

    pub fn relation_index(&self) -> &RelationIndex {
        &self.relation_index
    }

    pub fn relation_way_lists(&self) -> &RelationWayListStore {
        &self.relation_way_lists
    }

    pub fn insert_nodes(&self, batch: Vec<(NodeId, LatpLon)>) -> Result<(), StoreError> {
        self.nodes.insert(batch)
    }

    pub fn insert_ways(&self, batch: Vec<(WayId, Vec<NodeId>)>) {
        self.ways.insert(batch)
    }

    pub fn point_for(&self, node_id: NodeId) -> Result<LatpLon, StoreError> {
        match self.nodes.at(node_id) {
            Some(point) => Ok(point),
            None => MissingNodeSnafu { node_id }.fail(),
        }
    }

    pub fn nodes_for(&self, way_id: WayId) -> Result<Vec<NodeId>, StoreError> {
        match self.ways.nodes_for(way_id) {
            Some(node_ids) => Ok(node_ids),
            None => MissingWaySnafu { way_id }.fail(),
        }
    }

    /// Size the used-way set for `estimated_node_count` nodes, or for the nodes stored so far
    /// if there are more of those.
    ///
    /// Only the first call has an effect.
    pub fn ensure_used_ways_inited(&self, estimated_node_count: usize) {
        self.used_ways.reserve(
            estimated_node_count.max(self.nodes.len()),
            self.config.compact_storage,
        );
    }

    /// Hand out the next synthetic way id for a relation, counting down from -1.
    pub fn next_relation_way_id(&self) -> WayId {
        self.next_relation_way_id.fetch_sub(1, Ordering::Relaxed)
    }

    /// Move all entries of `batch` into the relation way lists.
    pub fn relations_insert_front(&self, batch: &mut Vec<RelationWayLists>) {
        self.relation_way_lists.append(batch)
    }

    /// Sort the relation way lists by relation id, so lookups can use binary search.
    pub fn relations_sort(&self) {
        self.relation_way_lists.sort()
    }

    /// Look up the positions of `node_ids` in order.
    ///
    /// Missing nodes are an error if integrity is enforced, otherwise they are left out.
    pub fn fill_points(&self, node_ids: &[NodeId]) -> Result<Vec<LatpLon>, StoreError> {
        let mut points = Vec::with_capacity(node_ids.len());
        let mut missing = 0usize;
        for node_id in node_ids.iter().copied() {
            match self.nodes.at(node_id) {
                Some(point) => points.push(point),
                None if self.config.enforce_integrity => {
                    return MissingNodeSnafu { node_id }.fail();
                }
                None => missing += 1,
            }
        }
        if missing > 0 {
            log::trace!("Skipped {missing} missing nodes while filling points");
        }
        Ok(points)
    }

    /// Points of the way with id `way_id`, or `None` if it is missing and integrity is not
    /// enforced.
    fn way_points(&self, way_id: WayId) -> Result<Option<Vec<LatpLon>>, StoreError> {
        match self.ways.nodes_for(way_id) {
            Some(node_ids) => self.fill_points(&node_ids).map(Some),
            None if self.config.enforce_integrity => MissingWaySnafu { way_id }.fail(),
            None => {
                log::warn!("Way {way_id} is referenced, but missing. Skipping it.");
                Ok(None)
            }
        }
    }

    pub fn way_to_linestring(&self, node_ids: &[NodeId]) -> Result<Linestring, StoreError> {
        let points = self.fill_points(node_ids)?;
        Ok(linestring_from(&points))
    }

    /// The polygon spanned by the way's nodes, closed and wound clockwise.
    pub fn way_to_polygon(&self, node_ids: &[NodeId]) -> Result<Polygon, StoreError> {
        let points = self.fill_points(node_ids)?;
        Ok(correct_polygon(&Polygon::new(
            linestring_from(&points),
            vec![],
        )))
    }

    /// Assemble a corrected multi-polygon from the relation's outer and inner ways.
    ///
    /// Fragments are merged into rings first, the result is empty if no outer ring closes.
    pub fn relation_to_multi_polygon(
        &self,
        outer_way_ids: &[WayId],
        inner_way_ids: &[WayId],
    ) -> Result<MultiPolygon, StoreError> {
        let outer_rings = assembly::merge_rings(self.collect_way_points(outer_way_ids)?);
        if outer_rings.is_empty() {
            return Ok(MultiPolygon::new(vec![]));
        }
        let inner_rings = assembly::merge_rings(self.collect_way_points(inner_way_ids)?);
        Ok(assembly::build_multi_polygon(outer_rings, inner_rings))
    }

    /// One linestring per way, without any merging or ring closure.
    ///
    /// Ways that resolve to fewer than two points are left out.
    pub fn relation_to_multi_linestring(
        &self,
        way_ids: &[WayId],
    ) -> Result<MultiLinestring, StoreError> {
        let lines = self
            .collect_way_points(way_ids)?
            .into_iter()
            .filter(|points| points.len() > 1)
            .map(|points| linestring_from(&points))
            .collect();
        Ok(MultiLinestring::new(lines))
    }

    fn collect_way_points(&self, way_ids: &[WayId]) -> Result<Vec<Vec<LatpLon>>, StoreError> {
        let mut sequences = Vec::with_capacity(way_ids.len());
        for way_id in way_ids.iter().copied() {
            if let Some(points) = self.way_points(way_id)? {
                sequences.push(points);
            }
        }
        Ok(sequences)
    }

    /// The outer ring of the first polygon, or an empty linestring.
    pub fn multi_polygon_as_linestring(multi_polygon: &MultiPolygon) -> Linestring {
        multi_polygon
            .0
            .first()
            .map(|polygon| polygon.exterior().clone())
            .unwrap_or_else(|| Linestring::new(vec![]))
    }

    /// Log the sizes of all stores.
    pub fn report_size(&self) {
        log::info!(
            "Stored {} nodes, {} ways, {} used ways ({} bytes), {} relations ({} bytes of way lists), {} ways in relations",
            self.nodes.len(),
            self.ways.len(),
            self.used_ways.count(),
            self.used_ways.heap_size(),
            self.relation_way_lists.len(),
            self.relation_way_lists.heap_size(),
            self.relation_index.way_count(),
        );
    }

    /// Drop all relation way lists and release their memory.
    pub fn reopen(&self) {
        self.relation_way_lists.reopen();
    }

    /// Empty every store, so the instance can be reused for another run.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.nodes.clear()?;
        self.ways.clear();
        self.used_ways.clear();
        self.relation_index.clear();
        self.relation_way_lists.clear();
        self.next_relation_way_id.store(-1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        geometry::validity::{check_multi_polygon, check_polygon},
        tests::{fixture_vertex_set, store_with, vertex_set, SQUARE_WITH_HOLE_NODES},
    };
    use approx::assert_abs_diff_eq;
    use geo::{Area, EuclideanLength, Winding};
    use rayon::prelude::*;

    #[test]
    fn test_missing_node_under_integrity() {
        let store = store_with(true, SQUARE_WITH_HOLE_NODES, &[]);
        let res = store.way_to_linestring(&[1, 2, 99]);
        assert!(matches!(res, Err(StoreError::MissingNode { node_id: 99, .. })));
        assert!(res.unwrap_err().is_missing_reference());
        assert!(matches!(
            store.point_for(99),
            Err(StoreError::MissingNode { node_id: 99, .. })
        ));
        assert_eq!(store.point_for(2).expect("point"), LatpLon::new(0, 100_000_000));
    }

    #[test]
    fn test_missing_node_skipped_without_integrity() {
        let store = store_with(false, SQUARE_WITH_HOLE_NODES, &[]);
        let line = store.way_to_linestring(&[1, 99, 2]).expect("line");
        assert_eq!(line.0.len(), 2);
        assert_abs_diff_eq!(line.euclidean_length(), 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_way_to_polygon_closes_ring() {
        let store = store_with(true, SQUARE_WITH_HOLE_NODES, &[]);
        let polygon = store.way_to_polygon(&[1, 2, 3, 4]).expect("polygon");
        assert!(polygon.exterior().is_closed());
        assert_abs_diff_eq!(polygon.unsigned_area(), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_way_to_polygon_winds_clockwise() {
        let store = store_with(true, SQUARE_WITH_HOLE_NODES, &[]);
        // 1, 2, 3, 4 runs counter-clockwise, the reverse clockwise
        for node_ids in [[1, 2, 3, 4, 1], [1, 4, 3, 2, 1]] {
            let polygon = store.way_to_polygon(&node_ids).expect("polygon");
            let exterior = polygon.exterior();
            assert!(exterior.is_cw(), "{node_ids:?} was not corrected");
            assert_eq!(exterior.0.len(), 5);
            assert_eq!(vertex_set(exterior), fixture_vertex_set(&[1, 2, 3, 4]));
            assert!(polygon.interiors().is_empty());
        }
    }

    #[test]
    fn test_relation_to_multi_polygon() {
        // outer square split into two ways, hole in one way, triangle as a second outer
        let store = store_with(
            true,
            SQUARE_WITH_HOLE_NODES,
            &[
                (100, &[1, 2, 3]),
                (101, &[3, 4, 1]),
                (102, &[11, 12, 13, 14, 11]),
                (103, &[21, 22, 23, 21]),
            ],
        );
        let multi_polygon = store
            .relation_to_multi_polygon(&[100, 101, 103], &[102])
            .expect("multi-polygon");
        assert_eq!(multi_polygon.0.len(), 2);
        assert_eq!(check_multi_polygon(&multi_polygon), Ok(()));
        let square = &multi_polygon.0[0];
        assert_eq!(square.interiors().len(), 1);
        assert!(square.exterior().is_cw());
        assert!(square.interiors()[0].is_ccw());
        assert_abs_diff_eq!(square.unsigned_area(), 96.0, epsilon = 1e-9);
        assert_abs_diff_eq!(multi_polygon.0[1].unsigned_area(), 6.0, epsilon = 1e-9);
        assert_eq!(vertex_set(square.exterior()), fixture_vertex_set(&[1, 2, 3, 4]));
        assert_eq!(
            vertex_set(&square.interiors()[0]),
            fixture_vertex_set(&[11, 12, 13, 14])
        );
        assert_eq!(square.interiors()[0].0.len(), 5);
        assert_eq!(
            vertex_set(multi_polygon.0[1].exterior()),
            fixture_vertex_set(&[21, 22, 23])
        );

        let outline = ObjectStore::multi_polygon_as_linestring(&multi_polygon);
        assert_eq!(&outline, square.exterior());
        let empty = ObjectStore::multi_polygon_as_linestring(&MultiPolygon::new(vec![]));
        assert!(empty.0.is_empty());
    }

    #[test]
    fn test_relation_with_missing_way() {
        let ways: &[(WayId, &[NodeId])] = &[(100, &[1, 2, 3, 4, 1])];
        let strict = store_with(true, SQUARE_WITH_HOLE_NODES, ways);
        assert!(matches!(
            strict.relation_to_multi_polygon(&[100, 200], &[]),
            Err(StoreError::MissingWay { way_id: 200, .. })
        ));
        let lenient = store_with(false, SQUARE_WITH_HOLE_NODES, ways);
        let multi_polygon = lenient
            .relation_to_multi_polygon(&[100, 200], &[201])
            .expect("multi-polygon");
        assert_eq!(multi_polygon.0.len(), 1);
        assert_eq!(check_polygon(&multi_polygon.0[0]), Ok(()));
    }

    #[test]
    fn test_unclosed_relation_is_empty() {
        let store = store_with(true, SQUARE_WITH_HOLE_NODES, &[(100, &[1, 2, 3])]);
        let multi_polygon = store.relation_to_multi_polygon(&[100], &[]).expect("mp");
        assert!(multi_polygon.0.is_empty());
    }

    #[test]
    fn test_relation_to_multi_linestring() {
        let store = store_with(
            true,
            SQUARE_WITH_HOLE_NODES,
            &[(100, &[1, 2, 3]), (101, &[3, 4]), (102, &[21])],
        );
        let lines = store
            .relation_to_multi_linestring(&[100, 101, 102])
            .expect("lines");
        assert_eq!(lines.0.len(), 2);
        assert!(!lines.0[0].is_closed());
        assert_abs_diff_eq!(lines.euclidean_length(), 30.0, epsilon = 1e-9);
    }

    #[test]
    fn test_relation_way_ids_count_down() {
        let store = store_with(true, &[], &[]);
        assert_eq!(store.next_relation_way_id(), -1);
        assert_eq!(store.next_relation_way_id(), -2);
        let mut ids: Vec<WayId> = (0..1000)
            .into_par_iter()
            .map(|_| store.next_relation_way_id())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| *id <= -3));
        store.clear().expect("clear");
        assert_eq!(store.next_relation_way_id(), -1);
    }

    #[test]
    fn test_relation_way_lists_and_reopen() {
        let store = store_with(true, &[], &[]);
        let mut batch = vec![
            RelationWayLists::new(7, vec![1, 2], vec![3]),
            RelationWayLists::new(5, vec![4], vec![]),
        ];
        store.relations_insert_front(&mut batch);
        assert!(batch.is_empty());
        store.relations_sort();
        assert_eq!(store.relation_way_lists().len(), 2);
        assert_eq!(
            store.relation_way_lists().find(7).map(|lists| lists.outer),
            Some(vec![1, 2])
        );
        store.report_size();
        store.reopen();
        assert!(store.relation_way_lists().is_empty());
    }

    #[test]
    fn test_compact_mode_store() {
        let config = StoreConfig {
            compact_storage: true,
            compact_node_capacity: 64,
            ..StoreConfig::default()
        };
        let store = ObjectStore::new(config).expect("store");
        store
            .insert_nodes(vec![(3, LatpLon::new(1, 1))])
            .expect("insert");
        assert_eq!(store.point_for(3).expect("point"), LatpLon::new(1, 1));
        assert!(matches!(
            store.insert_nodes(vec![(64, LatpLon::new(1, 1))]),
            Err(StoreError::CompactRangeExceeded { .. })
        ));
        store.used_ways().mark(10);
        store.ensure_used_ways_inited(0);
        assert!(store.used_ways().query(10));
    }
}
