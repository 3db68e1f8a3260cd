//! The per-element state and the query/emission interface classifiers work against.

use super::{
    output::{AttributeValue, LayerMetadata, OutputFeature},
    reference_layers::{QueryGeometry, ReferenceLayers},
    ElementKind,
    ProcessingError,
    StoreSnafu,
};
use crate::{
    geometry::{
        validity::{check_linestring, check_multi_polygon, check_polygon, ValidityFailure},
        Geometry,
        Linestring,
        MultiLinestring,
        MultiPolygon,
        Point,
        Polygon,
    },
    osm_data::*,
    store::{ObjectStore, RelationWayLists},
};
use geo::{Area, Centroid, EuclideanLength};
use snafu::ResultExt;
use std::collections::BTreeSet;

/// Observable phase of an [ElementContext].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    /// No element loaded, all queries return empty results.
    Idle,
    /// An element is loaded and its geometry can be built on demand.
    GeometryBuilt,
    /// Classification finished, the pending features are about to be drained.
    Classified,
}

pub(crate) enum ElementSource {
    Node(LatpLon),
    Way(Vec<NodeId>),
    Relation(RelationWayLists),
}

/// A lazily built geometry.
enum Cached<T> {
    Unbuilt,
    /// Nothing usable, e.g. too few points after assembly.
    Absent,
    Built {
        geometry: T,
        valid: bool,
    },
}

impl<T> Cached<T> {
    fn is_unbuilt(&self) -> bool {
        matches!(self, Cached::Unbuilt)
    }

    fn get(&self) -> Option<&T> {
        match self {
            Cached::Built { geometry, .. } => Some(geometry),
            _ => None,
        }
    }

    fn get_valid(&self) -> Option<&T> {
        match self {
            Cached::Built {
                geometry,
                valid: true,
            } => Some(geometry),
            _ => None,
        }
    }
}

struct GeometryCache {
    linestring: Cached<Linestring>,
    polygon: Cached<Polygon>,
    multi_linestring: Cached<MultiLinestring>,
    multi_polygon: Cached<MultiPolygon>,
}

impl Default for GeometryCache {
    fn default() -> Self {
        GeometryCache {
            linestring: Cached::Unbuilt,
            polygon: Cached::Unbuilt,
            multi_linestring: Cached::Unbuilt,
            multi_polygon: Cached::Unbuilt,
        }
    }
}

pub(crate) struct CurrentElement {
    /// The id in the input.
    id: i64,
    /// The id features are emitted with (the synthetic way id for relations).
    osm_id: i64,
    tags: TagMap,
    source: ElementSource,
    cache: GeometryCache,
}

impl CurrentElement {
    pub(crate) fn new(id: i64, osm_id: i64, tags: TagMap, source: ElementSource) -> Self {
        CurrentElement {
            id,
            osm_id,
            tags,
            source,
            cache: GeometryCache::default(),
        }
    }

    fn kind(&self) -> ElementKind {
        match self.source {
            ElementSource::Node(_) => ElementKind::Node,
            ElementSource::Way(_) => ElementKind::Way,
            ElementSource::Relation(_) => ElementKind::Relation,
        }
    }

    fn is_closed(&self) -> bool {
        match &self.source {
            ElementSource::Node(_) => false,
            ElementSource::Way(node_ids) => node_ids.len() > 1 && node_ids.first() == node_ids.last(),
            ElementSource::Relation(_) => true,
        }
    }

    /// Turn the result of a geometry build into a cache entry.
    ///
    /// Geometries with too few points become absent, other validity failures are kept but
    /// marked invalid.
    fn settle<T>(
        &self,
        built: Option<T>,
        check: fn(&T) -> Result<(), ValidityFailure>,
        verbose: bool,
    ) -> Cached<T> {
        let Some(geometry) = built else {
            return Cached::Absent;
        };
        match check(&geometry) {
            Ok(()) => Cached::Built {
                geometry,
                valid: true,
            },
            Err(failure) if failure.is_degenerate() => Cached::Absent,
            Err(failure) => {
                if verbose {
                    log::info!("{} {} has {}", self.kind(), self.id, failure);
                }
                Cached::Built {
                    geometry,
                    valid: false,
                }
            }
        }
    }

    fn linestring(
        &mut self,
        store: &ObjectStore,
        verbose: bool,
    ) -> Result<&Cached<Linestring>, ProcessingError> {
        if self.cache.linestring.is_unbuilt() {
            let built = if let ElementSource::Relation(_) = self.source {
                self.multi_polygon(store, verbose)?
                    .get()
                    .map(ObjectStore::multi_polygon_as_linestring)
            } else if let ElementSource::Way(node_ids) = &self.source {
                let line = store.way_to_linestring(node_ids).context(StoreSnafu {
                    kind: ElementKind::Way,
                    id: self.id,
                })?;
                Some(line)
            } else {
                None
            };
            self.cache.linestring = self.settle(built, check_linestring, verbose);
        }
        Ok(&self.cache.linestring)
    }

    fn polygon(
        &mut self,
        store: &ObjectStore,
        verbose: bool,
    ) -> Result<&Cached<Polygon>, ProcessingError> {
        if self.cache.polygon.is_unbuilt() {
            let built = match &self.source {
                ElementSource::Way(node_ids) => Some(store.way_to_polygon(node_ids).context(
                    StoreSnafu {
                        kind: ElementKind::Way,
                        id: self.id,
                    },
                )?),
                _ => None,
            };
            self.cache.polygon = self.settle(built, check_polygon, verbose);
        }
        Ok(&self.cache.polygon)
    }

    fn multi_polygon(
        &mut self,
        store: &ObjectStore,
        verbose: bool,
    ) -> Result<&Cached<MultiPolygon>, ProcessingError> {
        if self.cache.multi_polygon.is_unbuilt() {
            let built = match &self.source {
                ElementSource::Relation(lists) => Some(
                    store
                        .relation_to_multi_polygon(&lists.outer, &lists.inner)
                        .context(StoreSnafu {
                            kind: ElementKind::Relation,
                            id: self.id,
                        })?,
                ),
                _ => None,
            };
            self.cache.multi_polygon = self.settle(built, check_multi_polygon, verbose);
        }
        Ok(&self.cache.multi_polygon)
    }

    fn multi_linestring(
        &mut self,
        store: &ObjectStore,
        verbose: bool,
    ) -> Result<&Cached<MultiLinestring>, ProcessingError> {
        if self.cache.multi_linestring.is_unbuilt() {
            let built = match &self.source {
                ElementSource::Relation(lists) => {
                    let lines = store
                        .relation_to_multi_linestring(&lists.outer)
                        .context(StoreSnafu {
                            kind: ElementKind::Relation,
                            id: self.id,
                        })?;
                    Some(lines)
                }
                _ => None,
            };
            self.cache.multi_linestring = self.settle(built, check_multi_linestring, verbose);
        }
        Ok(&self.cache.multi_linestring)
    }

    /// The geometry spatial queries are answered for.
    fn query_geometry(
        &mut self,
        store: &ObjectStore,
        verbose: bool,
    ) -> Result<Option<QueryGeometry<'_>>, ProcessingError> {
        match self.source {
            ElementSource::Node(point) => Ok(Some(QueryGeometry::Point(point_from(point)))),
            ElementSource::Way(_) if self.is_closed() => Ok(self
                .polygon(store, verbose)?
                .get()
                .map(QueryGeometry::Polygon)),
            ElementSource::Way(_) => Ok(self
                .linestring(store, verbose)?
                .get()
                .map(QueryGeometry::Linestring)),
            ElementSource::Relation(_) => Ok(self
                .multi_polygon(store, verbose)?
                .get()
                .map(QueryGeometry::MultiPolygon)),
        }
    }

    fn output_geometry(
        &mut self,
        area: bool,
        store: &ObjectStore,
        verbose: bool,
    ) -> Result<Option<Geometry>, ProcessingError> {
        let geometry = match self.source {
            ElementSource::Node(point) => Some(Geometry::Point(point_from(point))),
            ElementSource::Way(_) if area && self.is_closed() => self
                .polygon(store, verbose)?
                .get()
                .cloned()
                .map(Geometry::Polygon),
            ElementSource::Way(_) => self
                .linestring(store, verbose)?
                .get()
                .cloned()
                .map(Geometry::LineString),
            ElementSource::Relation(_) if area => self
                .multi_polygon(store, verbose)?
                .get()
                .cloned()
                .map(Geometry::MultiPolygon),
            // an area relation forced into a line keeps only its outline
            ElementSource::Relation(_) if self.tag("type") == "multipolygon" => self
                .linestring(store, verbose)?
                .get()
                .cloned()
                .map(Geometry::LineString),
            ElementSource::Relation(_) => self
                .multi_linestring(store, verbose)?
                .get()
                .cloned()
                .map(Geometry::MultiLineString),
        };
        Ok(geometry)
    }

    fn centroid(
        &mut self,
        store: &ObjectStore,
        verbose: bool,
    ) -> Result<Option<Point>, ProcessingError> {
        let centroid = match self.source {
            ElementSource::Node(point) => Some(point_from(point)),
            ElementSource::Way(_) if self.is_closed() => self
                .polygon(store, verbose)?
                .get()
                .and_then(|polygon| polygon.centroid()),
            ElementSource::Way(_) => self
                .linestring(store, verbose)?
                .get()
                .and_then(|line| line.centroid()),
            ElementSource::Relation(_) => self
                .multi_polygon(store, verbose)?
                .get()
                .and_then(|multi_polygon| multi_polygon.centroid()),
        };
        Ok(centroid)
    }

    fn tag(&self, key: &str) -> &str {
        self.tags.get(key).map(String::as_str).unwrap_or("")
    }
}

fn check_multi_linestring(lines: &MultiLinestring) -> Result<(), ValidityFailure> {
    if lines.0.is_empty() {
        return Err(ValidityFailure::TooFewPoints);
    }
    lines.iter().try_for_each(check_linestring)
}

fn point_from(point: LatpLon) -> Point {
    Point::from(point.to_coord())
}

enum ElementState {
    Idle,
    GeometryBuilt(CurrentElement),
    Classified(CurrentElement),
}

/// Everything a classifier may ask about, or do with, the element being processed.
///
/// Lookups for unknown tags, relations or reference layers return empty results. Only
/// geometry construction can fail, and only with a missing reference under enforced
/// integrity.
pub struct ElementContext<'s> {
    store: &'s ObjectStore,
    reference_layers: &'s ReferenceLayers,
    verbose: bool,
    state: ElementState,
    outputs: Vec<OutputFeature>,
    layer_metadata: LayerMetadata,
}

impl<'s> ElementContext<'s> {
    pub(crate) fn new(store: &'s ObjectStore, reference_layers: &'s ReferenceLayers) -> Self {
        ElementContext {
            store,
            reference_layers,
            verbose: store.config().verbose,
            state: ElementState::Idle,
            outputs: Vec::new(),
            layer_metadata: LayerMetadata::default(),
        }
    }

    pub(crate) fn store(&self) -> &'s ObjectStore {
        self.store
    }

    pub(crate) fn begin(&mut self, element: CurrentElement) {
        self.outputs.clear();
        self.state = ElementState::GeometryBuilt(element);
    }

    pub(crate) fn mark_classified(&mut self) {
        self.state = match std::mem::replace(&mut self.state, ElementState::Idle) {
            ElementState::GeometryBuilt(element) => ElementState::Classified(element),
            other => other,
        };
    }

    /// Return to idle, dropping the element with all its cached geometry, and hand out the
    /// pending features.
    pub(crate) fn reset(&mut self) -> Vec<OutputFeature> {
        self.state = ElementState::Idle;
        std::mem::take(&mut self.outputs)
    }

    pub(crate) fn layer_metadata(&self) -> &LayerMetadata {
        &self.layer_metadata
    }

    pub(crate) fn take_layer_metadata(&mut self) -> LayerMetadata {
        std::mem::take(&mut self.layer_metadata)
    }

    pub fn state(&self) -> ProcessingState {
        match self.state {
            ElementState::Idle => ProcessingState::Idle,
            ElementState::GeometryBuilt(_) => ProcessingState::GeometryBuilt,
            ElementState::Classified(_) => ProcessingState::Classified,
        }
    }

    fn current(&self) -> Option<&CurrentElement> {
        match &self.state {
            ElementState::GeometryBuilt(element) | ElementState::Classified(element) => {
                Some(element)
            }
            ElementState::Idle => None,
        }
    }

    fn current_mut(&mut self) -> Option<&mut CurrentElement> {
        match &mut self.state {
            ElementState::GeometryBuilt(element) | ElementState::Classified(element) => {
                Some(element)
            }
            ElementState::Idle => None,
        }
    }

    pub fn kind(&self) -> Option<ElementKind> {
        self.current().map(CurrentElement::kind)
    }

    /// Id of the element in the input, 0 when idle.
    pub fn id(&self) -> i64 {
        self.current().map_or(0, |element| element.id)
    }

    pub fn has(&self, key: &str) -> bool {
        self.current()
            .is_some_and(|element| element.tags.contains_key(key))
    }

    /// Value of tag `key`, or `""` if the element does not have it.
    pub fn find(&self, key: &str) -> &str {
        self.current().map_or("", |element| element.tag(key))
    }

    pub fn tags(&self) -> Option<&TagMap> {
        self.current().map(|element| &element.tags)
    }

    /// Relations the current way is a member of. Empty for nodes and relations.
    pub fn relation_ids(&self) -> Vec<RelationId> {
        match self.current() {
            Some(element) if element.kind() == ElementKind::Way => self
                .store
                .relation_index()
                .relations_for_way(element.id),
            _ => Vec::new(),
        }
    }

    /// Tag `key` of relation `relation_id`, `""` if either is unknown.
    pub fn find_in_relation(&self, relation_id: RelationId, key: &str) -> String {
        self.store.relation_index().tag_value(relation_id, key)
    }

    /// Closed ways and all relations count as closed.
    pub fn is_closed_ring(&self) -> bool {
        self.current().is_some_and(CurrentElement::is_closed)
    }

    /// Area in squared projected degrees, 0 for anything that is not a valid polygon.
    pub fn area(&mut self) -> Result<f64, ProcessingError> {
        let (store, verbose) = (self.store, self.verbose);
        let Some(element) = self.current_mut() else {
            return Ok(0.0);
        };
        let area = match element.kind() {
            ElementKind::Way if element.is_closed() => element
                .polygon(store, verbose)?
                .get_valid()
                .map_or(0.0, |polygon| polygon.unsigned_area()),
            ElementKind::Relation => element
                .multi_polygon(store, verbose)?
                .get_valid()
                .map_or(0.0, |multi_polygon| multi_polygon.unsigned_area()),
            _ => 0.0,
        };
        Ok(area)
    }

    /// Length in projected degrees, 0 for nodes.
    pub fn length(&mut self) -> Result<f64, ProcessingError> {
        let (store, verbose) = (self.store, self.verbose);
        let Some(element) = self.current_mut() else {
            return Ok(0.0);
        };
        let length = match element.kind() {
            ElementKind::Way => element
                .linestring(store, verbose)?
                .get()
                .map_or(0.0, |line| line.euclidean_length()),
            ElementKind::Relation => element
                .multi_linestring(store, verbose)?
                .get()
                .map_or(0.0, |lines| lines.euclidean_length()),
            ElementKind::Node => 0.0,
        };
        Ok(length)
    }

    fn with_query_geometry<R>(
        &mut self,
        empty: R,
        query: impl FnOnce(&ReferenceLayers, &QueryGeometry<'_>) -> R,
    ) -> Result<R, ProcessingError> {
        let (store, verbose, layers) = (self.store, self.verbose, self.reference_layers);
        let Some(element) = self.current_mut() else {
            return Ok(empty);
        };
        match element.query_geometry(store, verbose)? {
            Some(geometry) => Ok(query(layers, &geometry)),
            None => Ok(empty),
        }
    }

    /// Labels of all shapes in reference layer `layer` the element intersects.
    pub fn find_intersecting_layers(
        &mut self,
        layer: &str,
    ) -> Result<BTreeSet<String>, ProcessingError> {
        self.with_query_geometry(BTreeSet::new(), |layers, geometry| {
            layers
                .intersecting(layer, geometry, false)
                .into_iter()
                .map(|shape| shape.label.clone())
                .collect()
        })
    }

    pub fn intersects(&mut self, layer: &str) -> Result<bool, ProcessingError> {
        self.with_query_geometry(false, |layers, geometry| {
            !layers.intersecting(layer, geometry, true).is_empty()
        })
    }

    pub fn intersection_area(&mut self, layer: &str) -> Result<f64, ProcessingError> {
        self.with_query_geometry(0.0, |layers, geometry| {
            layers.intersection_area(layer, geometry)
        })
    }

    /// Labels of all shapes in reference layer `layer` that cover the element completely.
    pub fn find_covering_layers(
        &mut self,
        layer: &str,
    ) -> Result<BTreeSet<String>, ProcessingError> {
        self.with_query_geometry(BTreeSet::new(), |layers, geometry| {
            layers
                .covering(layer, geometry, false)
                .into_iter()
                .map(|shape| shape.label.clone())
                .collect()
        })
    }

    pub fn covered_by(&mut self, layer: &str) -> Result<bool, ProcessingError> {
        self.with_query_geometry(false, |layers, geometry| {
            !layers.covering(layer, geometry, true).is_empty()
        })
    }

    /// Emit the element's geometry into `layer`.
    ///
    /// Closed ways become polygons and relations multi-polygons if `area` is set.
    /// Returns `false` if the element has no usable geometry, in which case nothing is emitted.
    pub fn assign_to_layer(&mut self, layer: &str, area: bool) -> Result<bool, ProcessingError> {
        let (store, verbose) = (self.store, self.verbose);
        let Some(element) = self.current_mut() else {
            return Ok(false);
        };
        let geometry = element.output_geometry(area, store, verbose)?;
        Ok(self.push_output(layer, geometry))
    }

    /// Emit the centroid of the element's geometry into `layer`.
    pub fn assign_centroid_to_layer(&mut self, layer: &str) -> Result<bool, ProcessingError> {
        let (store, verbose) = (self.store, self.verbose);
        let Some(element) = self.current_mut() else {
            return Ok(false);
        };
        let geometry = element.centroid(store, verbose)?.map(Geometry::Point);
        Ok(self.push_output(layer, geometry))
    }

    fn push_output(&mut self, layer: &str, geometry: Option<Geometry>) -> bool {
        let Some(element) = self.current() else {
            return false;
        };
        let (kind, osm_id) = (element.kind(), element.osm_id);
        match geometry {
            Some(geometry) => {
                self.outputs.push(OutputFeature {
                    layer: layer.to_string(),
                    geometry,
                    attributes: Default::default(),
                    min_zoom: 0,
                    kind,
                    osm_id,
                });
                true
            }
            None => {
                log::debug!("{kind} {osm_id} has no usable geometry for layer {layer}");
                false
            }
        }
    }

    pub fn attribute(&mut self, key: &str, value: &str) {
        self.attribute_with_min_zoom(key, value, 0)
    }

    pub fn attribute_with_min_zoom(&mut self, key: &str, value: &str, min_zoom: u8) {
        self.set_attribute(key, AttributeValue::String(value.to_string()), min_zoom)
    }

    pub fn attribute_numeric(&mut self, key: &str, value: f64) {
        self.attribute_numeric_with_min_zoom(key, value, 0)
    }

    pub fn attribute_numeric_with_min_zoom(&mut self, key: &str, value: f64, min_zoom: u8) {
        self.set_attribute(key, AttributeValue::Number(value), min_zoom)
    }

    pub fn attribute_boolean(&mut self, key: &str, value: bool) {
        self.attribute_boolean_with_min_zoom(key, value, 0)
    }

    pub fn attribute_boolean_with_min_zoom(&mut self, key: &str, value: bool, min_zoom: u8) {
        self.set_attribute(key, AttributeValue::Boolean(value), min_zoom)
    }

    /// Set the minimum zoom of the most recently assigned feature.
    pub fn min_zoom(&mut self, min_zoom: u8) {
        match self.outputs.last_mut() {
            Some(feature) => feature.min_zoom = min_zoom,
            None => log::error!("Can't set a minimum zoom if no layer is set"),
        }
    }

    fn set_attribute(&mut self, key: &str, value: AttributeValue, min_zoom: u8) {
        match self.outputs.last_mut() {
            Some(feature) => {
                self.layer_metadata
                    .record(&feature.layer, key, value.attribute_type());
                feature.attributes.set(key, value, min_zoom);
            }
            None => log::error!("Can't add attribute {key} if no layer is set"),
        }
    }
}
