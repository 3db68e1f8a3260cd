use snafu::{prelude::*, Backtrace};

pub mod config;
pub mod databases;
pub mod geometry;
pub mod ingest;
pub mod osm_data;
pub mod processing;
pub mod store;
pub mod utils;

pub use config::{Config, StoreConfig};
pub use processing::{FeatureProcessor, ProcessingError};
pub use store::ObjectStore;

/// Errors raised by the shared stores.
///
/// Only [MissingNode](StoreError::MissingNode) and [MissingWay](StoreError::MissingWay)
/// can occur during geometry assembly, and only when integrity is enforced.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("Node {node_id} is referenced, but missing from the node store"))]
    MissingNode {
        node_id: osm_data::NodeId,
        backtrace: Backtrace,
    },
    #[snafu(display("Way {way_id} is referenced, but missing from the way store"))]
    MissingWay {
        way_id: osm_data::WayId,
        backtrace: Backtrace,
    },
    #[snafu(display(
        "Node {node_id} does not fit into the compact node store (capacity {capacity})"
    ))]
    CompactRangeExceeded {
        node_id: osm_data::NodeId,
        capacity: u64,
        backtrace: Backtrace,
    },
    #[snafu(display("Error accessing store backing file: {source}"))]
    StorageIo {
        source: std::io::Error,
        backtrace: Backtrace,
    },
}

impl StoreError {
    /// Is this a dangling reference in the input topology?
    pub fn is_missing_reference(&self) -> bool {
        matches!(
            self,
            StoreError::MissingNode { .. } | StoreError::MissingWay { .. }
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::{
        databases::NodeStore,
        geometry::Linestring,
        osm_data::*,
        store::ObjectStore,
        StoreConfig,
    };
    use std::collections::BTreeSet;

    /// Build a store in hash mode holding `nodes` (given in projected degrees) and `ways`.
    pub(crate) fn store_with(
        enforce_integrity: bool,
        nodes: &[(NodeId, f64, f64)],
        ways: &[(WayId, &[NodeId])],
    ) -> ObjectStore {
        let config = StoreConfig {
            enforce_integrity,
            ..StoreConfig::default()
        };
        let store = ObjectStore::new(config).expect("store");
        store
            .insert_nodes(
                nodes
                    .iter()
                    .map(|(id, lon, latp)| (*id, LatpLon::from_projected_degrees(*latp, *lon)))
                    .collect(),
            )
            .expect("insert nodes");
        store.insert_ways(
            ways.iter()
                .map(|(id, node_ids)| (*id, node_ids.to_vec()))
                .collect(),
        );
        assert_eq!(store.nodes().len(), nodes.len());
        store
    }

    /// A 10x10 square with a 2x2 hole in the middle, plus a detached triangle.
    ///
    /// Outer square nodes 1..=4, hole nodes 11..=14, triangle nodes 21..=23.
    pub(crate) const SQUARE_WITH_HOLE_NODES: &[(NodeId, f64, f64)] = &[
        (1, 0.0, 0.0),
        (2, 10.0, 0.0),
        (3, 10.0, 10.0),
        (4, 0.0, 10.0),
        (11, 4.0, 4.0),
        (12, 6.0, 4.0),
        (13, 6.0, 6.0),
        (14, 4.0, 6.0),
        (21, 20.0, 0.0),
        (22, 24.0, 0.0),
        (23, 22.0, 3.0),
    ];

    /// Distinct vertices of `line` in fixed point, so they compare exactly.
    pub(crate) fn vertex_set(line: &Linestring) -> BTreeSet<(i64, i64)> {
        line.coords()
            .map(|c| ((c.x * 1e7).round() as i64, (c.y * 1e7).round() as i64))
            .collect()
    }

    /// Positions of the fixture nodes `node_ids`, in the form [vertex_set] reports them.
    pub(crate) fn fixture_vertex_set(node_ids: &[NodeId]) -> BTreeSet<(i64, i64)> {
        SQUARE_WITH_HOLE_NODES
            .iter()
            .filter(|(id, _, _)| node_ids.contains(id))
            .map(|(_, lon, latp)| ((lon * 1e7).round() as i64, (latp * 1e7).round() as i64))
            .collect()
    }
}
