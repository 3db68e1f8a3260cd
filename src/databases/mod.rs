//! Coordinate and topology stores.
//!
//! These hold the bulk of the data during ingestion (one point per node, one node list per
//! retained way), so their layout is kept behind two small traits and the [ObjectStore](crate::store::ObjectStore)
//! never depends on a concrete representation.

use crate::{osm_data::*, StoreError};

pub mod compact_node_store;
pub mod fx_hash_store;

pub use compact_node_store::CompactNodeStore;
pub use fx_hash_store::{FxHashNodeStore, FxHashWayStore};

pub trait NodeStore: Send + Sync {
    /// Store a batch of node positions, replacing any previous position for the same id.
    fn insert(&self, nodes: Vec<(NodeId, LatpLon)>) -> Result<(), StoreError>;

    /// Position of the node `id`, if it was stored.
    fn at(&self, id: NodeId) -> Option<LatpLon>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self) -> Result<(), StoreError>;
}

pub trait WayStore: Send + Sync {
    /// Store a batch of way node lists, replacing any previous list for the same id.
    fn insert(&self, ways: Vec<(WayId, Vec<NodeId>)>);

    /// Ordered node ids of the way `id`, if it was stored.
    fn nodes_for(&self, id: WayId) -> Option<Vec<NodeId>>;

    fn contains(&self, id: WayId) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);
}
