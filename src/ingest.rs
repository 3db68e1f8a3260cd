//! The multi-pass ingestion driver.
//!
//! 1. [scan_relations](Ingestor::scan_relations) records every relation the classifier is
//!    interested in, and marks their member ways as used.
//! 2. [process_blocks](Ingestor::process_blocks) stores node positions and the node lists
//!    of used ways, and classifies significant nodes and tagged ways.
//! 3. [process_relations](Ingestor::process_relations) classifies the scanned relations,
//!    once all their ways are known.
//!
//! Passes 2 and 3 are spread over the rayon pool, with one [FeatureProcessor] per worker.

use crate::{
    osm_data::*,
    processing::{
        Classifier,
        FeatureProcessor,
        LayerMetadata,
        OutputSink,
        PassOrderSnafu,
        ProcessingError,
        ReferenceLayers,
        StorageSnafu,
    },
    store::{ObjectStore, RelationWayLists},
    utils::locks::lock_or_recover,
};
use rayon::prelude::*;
use snafu::{ensure, ResultExt};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Instant,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ScannedRelation {
    pub id: RelationId,
    pub outer: Vec<WayId>,
    pub inner: Vec<WayId>,
    pub tags: TagMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedNode {
    pub id: NodeId,
    pub point: LatpLon,
    pub tags: TagMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedWay {
    pub id: WayId,
    pub node_ids: Vec<NodeId>,
    pub tags: TagMap,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedElement {
    Node(DecodedNode),
    Way(DecodedWay),
}

/// Elements decoded from one input block.
pub type Block = Vec<DecodedElement>;

/// Counters of one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassStats {
    /// Elements handed to the pass.
    pub elements: usize,
    /// Elements written to the shared stores.
    pub stored: usize,
    /// Elements handed to the classifier.
    pub classified: usize,
    /// Classified elements that produced at least one feature.
    pub with_output: usize,
}

impl PassStats {
    pub fn merge(&mut self, other: PassStats) {
        self.elements += other.elements;
        self.stored += other.stored;
        self.classified += other.classified;
        self.with_output += other.with_output;
    }
}

#[derive(Default)]
struct PassCounters {
    elements: AtomicUsize,
    stored: AtomicUsize,
    classified: AtomicUsize,
    with_output: AtomicUsize,
}

impl PassCounters {
    fn add(counter: &AtomicUsize, value: usize) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    fn stats(&self) -> PassStats {
        PassStats {
            elements: self.elements.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            classified: self.classified.load(Ordering::Relaxed),
            with_output: self.with_output.load(Ordering::Relaxed),
        }
    }
}

pub struct Ingestor<'s, F> {
    store: &'s ObjectStore,
    reference_layers: &'s ReferenceLayers,
    sink: &'s dyn OutputSink,
    classifier_factory: F,
    relations_scanned: AtomicBool,
    layer_metadata: Mutex<LayerMetadata>,
}

impl<'s, F, C> Ingestor<'s, F>
where
    F: Fn() -> C + Send + Sync,
    C: Classifier,
{
    /// `classifier_factory` is called once per worker to create its classifier.
    pub fn new(
        store: &'s ObjectStore,
        reference_layers: &'s ReferenceLayers,
        sink: &'s dyn OutputSink,
        classifier_factory: F,
    ) -> Self {
        Ingestor {
            store,
            reference_layers,
            sink,
            classifier_factory,
            relations_scanned: AtomicBool::new(false),
            layer_metadata: Mutex::new(LayerMetadata::default()),
        }
    }

    pub fn relations_scanned(&self) -> bool {
        self.relations_scanned.load(Ordering::Acquire)
    }

    fn processor(&self) -> FeatureProcessor<'s, C> {
        FeatureProcessor::new(
            self.store,
            self.reference_layers,
            (self.classifier_factory)(),
            self.sink,
        )
    }

    fn ensure_scanned(&self, pass: &'static str) -> Result<(), ProcessingError> {
        ensure!(self.relations_scanned(), PassOrderSnafu { pass });
        Ok(())
    }

    fn collect_metadata(&self, processor: &mut FeatureProcessor<'s, C>) {
        let metadata = processor.take_layer_metadata();
        if !metadata.is_empty() {
            lock_or_recover(&self.layer_metadata, "layer metadata").merge(metadata);
        }
    }

    /// Pass 1: record the relations the classifier wants to see.
    ///
    /// Must be given all relations of the input at once. Afterwards the relation way lists
    /// are sorted and the other passes are unlocked. No nodes are stored yet at this point,
    /// so the used-way set is sized from `estimated_node_count`.
    pub fn scan_relations(
        &self,
        relations: Vec<ScannedRelation>,
        estimated_node_count: usize,
    ) -> PassStats {
        let start = Instant::now();
        let classifier = (self.classifier_factory)();
        let total = relations.len();
        let accepted: Vec<ScannedRelation> = relations
            .into_iter()
            .filter(|relation| classifier.scan_relation(&relation.tags))
            .collect();
        let stored = accepted.len();
        self.store.ensure_used_ways_inited(estimated_node_count);

        let store = self.store;
        accepted
            .into_par_iter()
            .fold(Vec::new, |mut batch: Vec<RelationWayLists>, relation| {
                let index = store.relation_index();
                for way_id in relation.outer.iter().chain(relation.inner.iter()) {
                    index.record_containment(relation.id, *way_id);
                    store.used_ways().mark(*way_id);
                }
                index.store_tags(relation.id, relation.tags);
                batch.push(RelationWayLists::new(
                    relation.id,
                    relation.outer,
                    relation.inner,
                ));
                batch
            })
            .for_each(|mut batch| store.relations_insert_front(&mut batch));
        store.relations_sort();
        self.relations_scanned.store(true, Ordering::Release);

        log::info!(
            "Scanned {stored} of {total} relations in {}ms, {} ways are in use",
            start.elapsed().as_millis(),
            store.used_ways().count()
        );
        PassStats {
            elements: total,
            stored,
            ..PassStats::default()
        }
    }

    /// Pass 2: store and classify the nodes of all `blocks`, then their ways.
    ///
    /// Ways can only be built from nodes stored in this or an earlier call, so node blocks
    /// have to be delivered before way blocks.
    pub fn process_blocks(&self, blocks: Vec<Block>) -> Result<PassStats, ProcessingError> {
        self.ensure_scanned("block pass")?;
        let start = Instant::now();
        let (node_blocks, way_blocks): (Vec<Vec<DecodedNode>>, Vec<Vec<DecodedWay>>) =
            blocks.into_iter().map(split_block).unzip();
        let counters = PassCounters::default();

        node_blocks
            .into_par_iter()
            .filter(|nodes| !nodes.is_empty())
            .try_for_each_init(
                || self.processor(),
                |processor, nodes| self.process_nodes(processor, nodes, &counters),
            )?;
        way_blocks
            .into_par_iter()
            .filter(|ways| !ways.is_empty())
            .try_for_each_init(
                || self.processor(),
                |processor, ways| self.process_ways(processor, ways, &counters),
            )?;

        let stats = counters.stats();
        log::debug!(
            "Processed {} elements in {}ms",
            stats.elements,
            start.elapsed().as_millis()
        );
        Ok(stats)
    }

    fn process_nodes(
        &self,
        processor: &mut FeatureProcessor<'s, C>,
        nodes: Vec<DecodedNode>,
        counters: &PassCounters,
    ) -> Result<(), ProcessingError> {
        PassCounters::add(&counters.elements, nodes.len());
        let positions: Vec<(NodeId, LatpLon)> =
            nodes.iter().map(|node| (node.id, node.point)).collect();
        PassCounters::add(&counters.stored, positions.len());
        self.store.insert_nodes(positions).context(StorageSnafu)?;
        for node in nodes {
            if !processor.is_significant_node(&node.tags) {
                continue;
            }
            processor.on_node(node.id, node.point, node.tags)?;
            PassCounters::add(&counters.classified, 1);
            if processor.has_output() {
                PassCounters::add(&counters.with_output, 1);
            }
        }
        self.collect_metadata(processor);
        Ok(())
    }

    fn process_ways(
        &self,
        processor: &mut FeatureProcessor<'s, C>,
        ways: Vec<DecodedWay>,
        counters: &PassCounters,
    ) -> Result<(), ProcessingError> {
        PassCounters::add(&counters.elements, ways.len());
        let used_ways = self.store.used_ways();
        let retained: Vec<(WayId, Vec<NodeId>)> = ways
            .iter()
            .filter(|way| used_ways.query(way.id))
            .map(|way| (way.id, way.node_ids.clone()))
            .collect();
        PassCounters::add(&counters.stored, retained.len());
        self.store.insert_ways(retained);
        for way in ways {
            if way.tags.is_empty() {
                continue;
            }
            processor.on_way(way.id, &way.node_ids, way.tags)?;
            PassCounters::add(&counters.classified, 1);
            if processor.has_output() {
                PassCounters::add(&counters.with_output, 1);
            }
        }
        self.collect_metadata(processor);
        Ok(())
    }

    /// Pass 3: classify all scanned relations.
    pub fn process_relations(&self) -> Result<PassStats, ProcessingError> {
        self.ensure_scanned("relation pass")?;
        let start = Instant::now();
        let counters = PassCounters::default();
        let relations = self.store.relation_way_lists().snapshot();
        PassCounters::add(&counters.elements, relations.len());

        relations.into_par_iter().try_for_each_init(
            || self.processor(),
            |processor, way_lists| {
                let tags = self
                    .store
                    .relation_index()
                    .tags_for(way_lists.relation_id)
                    .unwrap_or_default();
                processor.on_relation(way_lists.relation_id, &way_lists, tags)?;
                PassCounters::add(&counters.classified, 1);
                if processor.has_output() {
                    PassCounters::add(&counters.with_output, 1);
                }
                self.collect_metadata(processor);
                Ok::<(), ProcessingError>(())
            },
        )?;

        let stats = counters.stats();
        log::info!(
            "Processed {} relations in {}ms, {} produced output",
            stats.classified,
            start.elapsed().as_millis(),
            stats.with_output
        );
        Ok(stats)
    }

    /// The attribute keys seen per layer by all workers so far.
    pub fn layer_metadata(&self) -> LayerMetadata {
        lock_or_recover(&self.layer_metadata, "layer metadata").clone()
    }
}

fn split_block(block: Block) -> (Vec<DecodedNode>, Vec<DecodedWay>) {
    let mut nodes = Vec::new();
    let mut ways = Vec::new();
    for element in block {
        match element {
            DecodedElement::Node(node) => nodes.push(node),
            DecodedElement::Way(way) => ways.push(way),
        }
    }
    (nodes, ways)
}
