//! Named sets of labelled polygons that element geometries can be tested against.
//!
//! Every layer is indexed by an R-tree over the shapes' bounding boxes, so a query only
//! runs exact geometry tests against shapes near the element.
//!
//! The layers are built once before processing starts and only read afterwards, so they
//! are shared by plain reference between all workers.

use crate::geometry::{Linestring, MultiPolygon, Point, Polygon};
use geo::{Area, BooleanOps, BoundingRect, Contains, Intersects, Rect};
use rstar::{RTree, RTreeObject, AABB};
use rustc_hash::FxHashMap;

/// Borrowed view of the geometry a query is made for.
#[derive(Debug, Clone, Copy)]
pub enum QueryGeometry<'g> {
    Point(Point),
    Linestring(&'g Linestring),
    Polygon(&'g Polygon),
    MultiPolygon(&'g MultiPolygon),
}

impl QueryGeometry<'_> {
    fn bounding_rect(&self) -> Option<Rect<f64>> {
        match self {
            QueryGeometry::Point(point) => Some(point.bounding_rect()),
            QueryGeometry::Linestring(line) => line.bounding_rect(),
            QueryGeometry::Polygon(polygon) => polygon.bounding_rect(),
            QueryGeometry::MultiPolygon(multi_polygon) => multi_polygon.bounding_rect(),
        }
    }

    fn intersects(&self, reference: &Polygon) -> bool {
        match self {
            QueryGeometry::Point(point) => reference.intersects(point),
            QueryGeometry::Linestring(line) => reference.intersects(*line),
            QueryGeometry::Polygon(polygon) => reference.intersects(*polygon),
            QueryGeometry::MultiPolygon(multi_polygon) => multi_polygon
                .iter()
                .any(|polygon| reference.intersects(polygon)),
        }
    }

    /// Is the geometry completely inside `reference`, boundary included?
    fn covered_by(&self, reference: &Polygon) -> bool {
        match self {
            QueryGeometry::Point(point) => reference.intersects(point),
            QueryGeometry::Linestring(line) => reference.contains(*line),
            QueryGeometry::Polygon(polygon) => reference.contains(*polygon),
            QueryGeometry::MultiPolygon(multi_polygon) => {
                !multi_polygon.0.is_empty()
                    && multi_polygon
                        .iter()
                        .all(|polygon| reference.contains(polygon))
            }
        }
    }

    fn intersection_area(&self, reference: &Polygon) -> f64 {
        match self {
            QueryGeometry::Point(_) | QueryGeometry::Linestring(_) => 0.0,
            QueryGeometry::Polygon(polygon) => {
                reference.intersection(*polygon).unsigned_area()
            }
            QueryGeometry::MultiPolygon(multi_polygon) => multi_polygon
                .iter()
                .map(|polygon| reference.intersection(polygon).unsigned_area())
                .sum(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceShape {
    pub label: String,
    pub polygon: Polygon,
    /// Position among the shapes of its layer, in the order they were added.
    order: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for ReferenceShape {
    type Envelope = AABB<[f64; 2]>;

    #[inline]
    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

fn envelope_of(rect: Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

/// One R-tree of labelled polygons per layer name.
#[derive(Debug, Clone, Default)]
pub struct ReferenceLayers {
    layers: FxHashMap<String, RTree<ReferenceShape>>,
}

impl ReferenceLayers {
    pub fn new() -> Self {
        Self::default()
    }

    fn shape(label: &str, polygon: Polygon, order: usize) -> Option<ReferenceShape> {
        let bounds = polygon.bounding_rect()?;
        Some(ReferenceShape {
            label: label.to_string(),
            polygon,
            order,
            envelope: envelope_of(bounds),
        })
    }

    /// Add `polygon` with `label` to the layer `layer`. Empty polygons are ignored.
    pub fn add(&mut self, layer: &str, label: &str, polygon: Polygon) {
        let tree = self.layers.entry(layer.to_string()).or_default();
        match Self::shape(label, polygon, tree.size()) {
            Some(shape) => tree.insert(shape),
            None => log::debug!("Ignoring empty reference polygon {label} in layer {layer}"),
        }
    }

    /// Replace `layer` with `shapes`, bulk loading its index in one go.
    pub fn load_layer(&mut self, layer: &str, shapes: Vec<(String, Polygon)>) {
        let total = shapes.len();
        let shapes: Vec<ReferenceShape> = shapes
            .into_iter()
            .filter_map(|(label, polygon)| Self::shape(&label, polygon, 0))
            .enumerate()
            .map(|(order, shape)| ReferenceShape { order, ..shape })
            .collect();
        if shapes.len() < total {
            log::debug!(
                "Ignored {} empty reference polygons in layer {layer}",
                total - shapes.len()
            );
        }
        self.layers
            .insert(layer.to_string(), RTree::bulk_load(shapes));
    }

    pub fn has_layer(&self, layer: &str) -> bool {
        self.layers.contains_key(layer)
    }

    /// Number of shapes in `layer`, 0 for unknown layers.
    pub fn shape_count(&self, layer: &str) -> usize {
        self.layers.get(layer).map_or(0, |tree| tree.size())
    }

    /// Shapes of `layer` whose bounding box meets that of `geometry`.
    fn candidates<'a>(
        &'a self,
        layer: &str,
        geometry: &QueryGeometry<'_>,
    ) -> impl Iterator<Item = &'a ReferenceShape> {
        let envelope = geometry.bounding_rect().map(envelope_of);
        self.layers
            .get(layer)
            .zip(envelope)
            .into_iter()
            .flat_map(|(tree, envelope)| tree.locate_in_envelope_intersecting(&envelope))
    }

    fn matching<'a>(
        &'a self,
        layer: &str,
        geometry: &QueryGeometry<'_>,
        once: bool,
        test: impl Fn(&ReferenceShape) -> bool,
    ) -> Vec<&'a ReferenceShape> {
        let mut hits = self.candidates(layer, geometry).filter(|shape| test(shape));
        if once {
            return hits.next().into_iter().collect();
        }
        let mut hits: Vec<&ReferenceShape> = hits.collect();
        hits.sort_by_key(|shape| shape.order);
        hits
    }

    /// Shapes of `layer` that intersect `geometry`, in the order they were added.
    /// Stops after the first hit if `once`.
    pub fn intersecting<'a>(
        &'a self,
        layer: &str,
        geometry: &QueryGeometry<'_>,
        once: bool,
    ) -> Vec<&'a ReferenceShape> {
        self.matching(layer, geometry, once, |shape| {
            geometry.intersects(&shape.polygon)
        })
    }

    /// Shapes of `layer` that cover `geometry` completely. Stops after the first hit if `once`.
    pub fn covering<'a>(
        &'a self,
        layer: &str,
        geometry: &QueryGeometry<'_>,
        once: bool,
    ) -> Vec<&'a ReferenceShape> {
        self.matching(layer, geometry, once, |shape| {
            geometry.covered_by(&shape.polygon)
        })
    }

    /// Total area of `geometry` that overlaps shapes of `layer`.
    pub fn intersection_area(&self, layer: &str, geometry: &QueryGeometry<'_>) -> f64 {
        self.candidates(layer, geometry)
            .map(|shape| geometry.intersection_area(&shape.polygon))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use geo::{line_string, point, polygon};

    fn square(x: f64, y: f64, size: f64) -> Polygon {
        polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
        ]
    }

    fn layers() -> ReferenceLayers {
        let mut layers = ReferenceLayers::new();
        layers.add("countries", "left", square(0.0, 0.0, 10.0));
        layers.add("countries", "right", square(10.0, 0.0, 10.0));
        layers.add("countries", "empty", Polygon::new(Linestring::new(vec![]), vec![]));
        layers.add("lakes", "pond", square(2.0, 2.0, 2.0));
        layers
    }

    fn labels(shapes: Vec<&ReferenceShape>) -> Vec<&str> {
        shapes.into_iter().map(|shape| shape.label.as_str()).collect()
    }

    #[test]
    fn test_intersecting() {
        let layers = layers();
        assert_eq!(layers.shape_count("countries"), 2);
        let inside = point!(x: 5.0, y: 5.0);
        let query = QueryGeometry::Point(inside);
        assert_eq!(labels(layers.intersecting("countries", &query, false)), vec!["left"]);
        let border = line_string![(x: 8.0, y: 5.0), (x: 12.0, y: 5.0)];
        let query = QueryGeometry::Linestring(&border);
        assert_eq!(
            labels(layers.intersecting("countries", &query, false)),
            vec!["left", "right"]
        );
        assert_eq!(layers.intersecting("countries", &query, true).len(), 1);
        assert!(layers.intersecting("lakes", &query, false).is_empty());
        assert!(layers.intersecting("unknown", &query, false).is_empty());
    }

    #[test]
    fn test_covering() {
        let layers = layers();
        let inner = square(1.0, 1.0, 3.0);
        let query = QueryGeometry::Polygon(&inner);
        assert_eq!(labels(layers.covering("countries", &query, false)), vec!["left"]);
        let straddling = square(8.0, 1.0, 4.0);
        let query = QueryGeometry::Polygon(&straddling);
        assert!(layers.covering("countries", &query, false).is_empty());
        let multi = MultiPolygon::new(vec![inner.clone(), square(12.0, 1.0, 1.0)]);
        let query = QueryGeometry::MultiPolygon(&multi);
        assert!(layers.covering("countries", &query, true).is_empty());
        assert_eq!(labels(layers.intersecting("countries", &query, false)).len(), 2);
    }

    #[test]
    fn test_intersection_area() {
        let layers = layers();
        let straddling = square(8.0, 0.0, 4.0);
        let query = QueryGeometry::Polygon(&straddling);
        assert_abs_diff_eq!(layers.intersection_area("countries", &query), 16.0, epsilon = 1e-9);
        assert_abs_diff_eq!(layers.intersection_area("lakes", &query), 0.0);
        let point = QueryGeometry::Point(point!(x: 3.0, y: 3.0));
        assert_abs_diff_eq!(layers.intersection_area("lakes", &point), 0.0);
        assert_abs_diff_eq!(layers.intersection_area("unknown", &query), 0.0);
    }

    fn grid(cells: usize) -> Vec<(String, Polygon)> {
        (0..cells * cells)
            .map(|i| {
                let (x, y) = ((i % cells) as f64, (i / cells) as f64);
                (format!("{x}:{y}"), square(x, y, 1.0))
            })
            .collect()
    }

    #[test]
    fn test_load_layer() {
        let mut layers = layers();
        let mut shapes = grid(100);
        shapes.push(("empty".to_string(), Polygon::new(Linestring::new(vec![]), vec![])));
        layers.load_layer("grid", shapes);
        assert_eq!(layers.shape_count("grid"), 100 * 100);
        assert_eq!(layers.shape_count("countries"), 2);

        let inside = QueryGeometry::Point(point!(x: 42.5, y: 17.5));
        assert_eq!(labels(layers.intersecting("grid", &inside, false)), vec!["42:17"]);
        let cell = square(42.25, 17.25, 0.5);
        let query = QueryGeometry::Polygon(&cell);
        assert_eq!(labels(layers.covering("grid", &query, true)), vec!["42:17"]);

        let row = line_string![(x: 10.5, y: 50.5), (x: 13.5, y: 50.5)];
        let query = QueryGeometry::Linestring(&row);
        assert_eq!(
            labels(layers.intersecting("grid", &query, false)),
            vec!["10:50", "11:50", "12:50", "13:50"]
        );

        layers.load_layer("countries", vec![("island".to_string(), square(30.0, 30.0, 1.0))]);
        assert_eq!(layers.shape_count("countries"), 1);
    }

    #[test]
    fn test_added_shapes_keep_insertion_order() {
        let mut layers = ReferenceLayers::new();
        for (label, polygon) in grid(20).into_iter().rev() {
            layers.add("grid", &label, polygon);
        }
        let column = line_string![(x: 3.5, y: 0.5), (x: 3.5, y: 19.5)];
        let query = QueryGeometry::Linestring(&column);
        let expected: Vec<String> = (0..20).rev().map(|y| format!("3:{y}")).collect();
        assert_eq!(labels(layers.intersecting("grid", &query, false)), expected);
        let cell = square(3.0, 7.0, 1.0);
        let query = QueryGeometry::Polygon(&cell);
        assert_abs_diff_eq!(layers.intersection_area("grid", &query), 1.0, epsilon = 1e-9);
    }
}
