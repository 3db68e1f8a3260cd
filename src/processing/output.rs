use super::ElementKind;
use crate::{geometry::Geometry, utils::locks::lock_or_recover};
use std::{collections::BTreeMap, fmt, sync::Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Number(f64),
    Boolean(bool),
}

impl AttributeValue {
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            AttributeValue::String(_) => AttributeType::String,
            AttributeValue::Number(_) => AttributeType::Number,
            AttributeValue::Boolean(_) => AttributeType::Boolean,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => write!(f, "{s}"),
            AttributeValue::Number(n) => write!(f, "{n}"),
            AttributeValue::Boolean(b) => write!(f, "{b}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeType {
    String,
    Number,
    Boolean,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub key: String,
    pub value: AttributeValue,
    pub min_zoom: u8,
}

/// Attributes of one output feature, in the order their keys were first set.
///
/// Setting a key again replaces value and minimum zoom.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttributeSet {
    entries: Vec<Attribute>,
}

impl AttributeSet {
    pub fn set(&mut self, key: &str, value: AttributeValue, min_zoom: u8) {
        match self.entries.iter_mut().find(|entry| entry.key == key) {
            Some(entry) => {
                entry.value = value;
                entry.min_zoom = min_zoom;
            }
            None => self.entries.push(Attribute {
                key: key.to_string(),
                value,
                min_zoom,
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Attribute> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A geometry assigned to a layer, ready to be written into tiles.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFeature {
    pub layer: String,
    pub geometry: Geometry,
    pub attributes: AttributeSet,
    pub min_zoom: u8,
    pub kind: ElementKind,
    /// The id of the source element (for relations the synthetic way id).
    pub osm_id: i64,
}

/// Receives the features of every element once its classification finished.
pub trait OutputSink: Send + Sync {
    fn accept(&self, feature: OutputFeature);
}

/// Keeps all features in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    features: Mutex<Vec<OutputFeature>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.features, "collected features").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_features(self) -> Vec<OutputFeature> {
        match self.features.into_inner() {
            Ok(features) => features,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl OutputSink for CollectingSink {
    fn accept(&self, feature: OutputFeature) {
        lock_or_recover(&self.features, "collected features").push(feature);
    }
}

/// The attribute keys (and their types) seen per layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerMetadata {
    layers: BTreeMap<String, BTreeMap<String, AttributeType>>,
}

impl LayerMetadata {
    pub fn record(&mut self, layer: &str, key: &str, attribute_type: AttributeType) {
        // avoid allocating the key strings for the common case of a known pair
        if self.attribute_type(layer, key) == Some(attribute_type) {
            return;
        }
        self.layers
            .entry(layer.to_string())
            .or_default()
            .insert(key.to_string(), attribute_type);
    }

    pub fn attribute_type(&self, layer: &str, key: &str) -> Option<AttributeType> {
        self.layers.get(layer)?.get(key).copied()
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }

    pub fn attributes(&self, layer: &str) -> Option<&BTreeMap<String, AttributeType>> {
        self.layers.get(layer)
    }

    pub fn merge(&mut self, other: LayerMetadata) {
        for (layer, keys) in other.layers {
            self.layers.entry(layer).or_default().extend(keys);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}
