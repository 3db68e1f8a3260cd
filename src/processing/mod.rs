//! Turning tagged elements into layer features.
//!
//! A [FeatureProcessor] is owned by exactly one worker. For every element it loads the
//! element into its [ElementContext], lets the [Classifier] query and emit against it,
//! and drains the emitted features into the shared [OutputSink].

use crate::{
    osm_data::*,
    store::{ObjectStore, RelationWayLists},
    StoreError,
};
use serde::Deserialize;
use snafu::{prelude::*, Backtrace};
use std::fmt;

pub mod classifier;
pub mod element;
pub mod output;
pub mod reference_layers;

pub use classifier::{Classifier, RuleClassifier};
pub use element::{ElementContext, ProcessingState};
pub use output::{
    AttributeSet,
    AttributeType,
    AttributeValue,
    CollectingSink,
    LayerMetadata,
    OutputFeature,
    OutputSink,
};
pub use reference_layers::ReferenceLayers;

use element::{CurrentElement, ElementSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Node,
    Way,
    Relation,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Node => f.write_str("Node"),
            ElementKind::Way => f.write_str("Way"),
            ElementKind::Relation => f.write_str("Relation"),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProcessingError {
    #[snafu(display("Could not build the geometry of {kind} {id}: {source}"))]
    Store {
        kind: ElementKind,
        id: i64,
        source: StoreError,
    },
    #[snafu(display("Could not store input elements: {source}"))]
    Storage { source: StoreError },
    #[snafu(display("Classification failed: {message}"))]
    Classification {
        message: String,
        backtrace: Backtrace,
    },
    #[snafu(display("The {pass} can only run after the relation scan completed"))]
    PassOrder {
        pass: &'static str,
        backtrace: Backtrace,
    },
}

impl ProcessingError {
    /// Is this caused by a dangling node or way reference?
    pub fn is_missing_reference(&self) -> bool {
        match self {
            ProcessingError::Store { source, .. } => source.is_missing_reference(),
            _ => false,
        }
    }
}

pub struct FeatureProcessor<'s, C> {
    classifier: C,
    element: ElementContext<'s>,
    sink: &'s dyn OutputSink,
    significant_node_keys: Vec<String>,
    last_output_count: usize,
}

impl<'s, C> FeatureProcessor<'s, C>
where
    C: Classifier,
{
    pub fn new(
        store: &'s ObjectStore,
        reference_layers: &'s ReferenceLayers,
        classifier: C,
        sink: &'s dyn OutputSink,
    ) -> Self {
        let significant_node_keys = classifier.significant_node_keys();
        FeatureProcessor {
            classifier,
            element: ElementContext::new(store, reference_layers),
            sink,
            significant_node_keys,
            last_output_count: 0,
        }
    }

    /// Does a node with `tags` need to be classified at all?
    pub fn is_significant_node(&self, tags: &TagMap) -> bool {
        self.significant_node_keys
            .iter()
            .any(|key| tags.contains_key(key))
    }

    pub fn on_node(
        &mut self,
        id: NodeId,
        point: LatpLon,
        tags: TagMap,
    ) -> Result<(), ProcessingError> {
        self.element
            .begin(CurrentElement::new(id, id, tags, ElementSource::Node(point)));
        self.run(|classifier, element| classifier.classify_node(element))
    }

    pub fn on_way(
        &mut self,
        id: WayId,
        node_ids: &[NodeId],
        tags: TagMap,
    ) -> Result<(), ProcessingError> {
        self.element.begin(CurrentElement::new(
            id,
            id,
            tags,
            ElementSource::Way(node_ids.to_vec()),
        ));
        self.run(|classifier, element| classifier.classify_way(element))
    }

    /// Classify a relation. Its features carry a fresh synthetic (negative) way id.
    pub fn on_relation(
        &mut self,
        id: RelationId,
        way_lists: &RelationWayLists,
        tags: TagMap,
    ) -> Result<(), ProcessingError> {
        let osm_id = self.element_store().next_relation_way_id();
        self.element.begin(CurrentElement::new(
            id,
            osm_id,
            tags,
            ElementSource::Relation(way_lists.clone()),
        ));
        self.run(|classifier, element| classifier.classify_relation(element))
    }

    fn element_store(&self) -> &'s ObjectStore {
        self.element.store()
    }

    fn run<F>(&mut self, classify: F) -> Result<(), ProcessingError>
    where
        F: FnOnce(&mut C, &mut ElementContext<'s>) -> Result<(), ProcessingError>,
    {
        let result = classify(&mut self.classifier, &mut self.element);
        self.element.mark_classified();
        let outputs = self.element.reset();
        self.last_output_count = 0;
        result?;
        self.last_output_count = outputs.len();
        for feature in outputs {
            self.sink.accept(feature);
        }
        Ok(())
    }

    /// Did the last element produce any features?
    pub fn has_output(&self) -> bool {
        self.last_output_count > 0
    }

    pub fn state(&self) -> ProcessingState {
        self.element.state()
    }

    pub fn layer_metadata(&self) -> &LayerMetadata {
        self.element.layer_metadata()
    }

    /// Hand out the layer metadata collected so far and start afresh.
    pub fn take_layer_metadata(&mut self) -> LayerMetadata {
        self.element.take_layer_metadata()
    }
}
