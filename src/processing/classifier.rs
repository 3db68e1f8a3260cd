//! The classification contract, and a declarative classifier driven by config rules.

use super::{ElementContext, ElementKind, ProcessingError};
use crate::{
    config::{AttributeKind, Config, RuleConfig},
    osm_data::TagMap,
};

/// Decides which layers an element goes into and with which attributes.
///
/// Implementations may call any of the [ElementContext] operations, as often and in any
/// order they like. Every worker owns its own instance.
pub trait Classifier {
    /// Nodes carrying none of these keys are never handed to [classify_node](Classifier::classify_node).
    fn significant_node_keys(&self) -> Vec<String> {
        Vec::new()
    }

    /// Should the relation with `tags` be recorded during the relation scan?
    fn scan_relation(&self, tags: &TagMap) -> bool {
        is_area_relation(tags)
    }

    fn classify_node(&mut self, element: &mut ElementContext<'_>) -> Result<(), ProcessingError>;

    fn classify_way(&mut self, element: &mut ElementContext<'_>) -> Result<(), ProcessingError>;

    fn classify_relation(
        &mut self,
        element: &mut ElementContext<'_>,
    ) -> Result<(), ProcessingError>;
}

/// Multipolygon and boundary relations describe areas.
pub fn is_area_relation(tags: &TagMap) -> bool {
    matches!(
        tags.get("type").map(String::as_str),
        Some("multipolygon") | Some("boundary")
    )
}

/// Applies the first rule whose element kinds and tag condition match.
#[derive(Debug, Clone)]
pub struct RuleClassifier {
    rules: Vec<RuleConfig>,
    node_keys: Vec<String>,
}

impl RuleClassifier {
    pub fn new(rules: Vec<RuleConfig>, node_keys: Vec<String>) -> Self {
        RuleClassifier { rules, node_keys }
    }

    pub fn from_config(config: &Config) -> Self {
        RuleClassifier::new(config.rules.clone(), config.node_keys())
    }

    fn apply(
        &self,
        kind: ElementKind,
        element: &mut ElementContext<'_>,
    ) -> Result<(), ProcessingError> {
        let Some(rule) = self
            .rules
            .iter()
            .find(|rule| rule.elements.contains(&kind) && rule_matches(rule, element.tags()))
        else {
            return Ok(());
        };
        let emitted = if rule.centroid {
            element.assign_centroid_to_layer(&rule.layer)?
        } else {
            element.assign_to_layer(&rule.layer, rule.area)?
        };
        if !emitted {
            return Ok(());
        }
        if let Some(min_zoom) = rule.min_zoom {
            element.min_zoom(min_zoom);
        }
        for attribute in rule.attributes.iter() {
            let value = element.find(&attribute.key).to_string();
            if value.is_empty() {
                continue;
            }
            let name = attribute.rename.as_deref().unwrap_or(&attribute.key);
            let min_zoom = attribute.min_zoom.unwrap_or(0);
            match attribute.kind {
                AttributeKind::String => element.attribute_with_min_zoom(name, &value, min_zoom),
                AttributeKind::Numeric => match value.trim().parse::<f64>() {
                    Ok(number) => element.attribute_numeric_with_min_zoom(name, number, min_zoom),
                    Err(_) => log::debug!(
                        "{kind} {} has a non-numeric {}={value}",
                        element.id(),
                        attribute.key
                    ),
                },
                AttributeKind::Boolean => {
                    let flag = matches!(value.as_str(), "yes" | "true" | "1");
                    element.attribute_boolean_with_min_zoom(name, flag, min_zoom)
                }
            }
        }
        Ok(())
    }
}

fn rule_matches(rule: &RuleConfig, tags: Option<&TagMap>) -> bool {
    let Some(value) = tags.and_then(|tags| tags.get(&rule.key)) else {
        return false;
    };
    rule.value.as_ref().map_or(true, |expected| expected == value)
}

impl Classifier for RuleClassifier {
    fn significant_node_keys(&self) -> Vec<String> {
        self.node_keys.clone()
    }

    fn scan_relation(&self, tags: &TagMap) -> bool {
        is_area_relation(tags)
            || self.rules.iter().any(|rule| {
                rule.elements.contains(&ElementKind::Relation) && rule_matches(rule, Some(tags))
            })
    }

    fn classify_node(&mut self, element: &mut ElementContext<'_>) -> Result<(), ProcessingError> {
        self.apply(ElementKind::Node, element)
    }

    fn classify_way(&mut self, element: &mut ElementContext<'_>) -> Result<(), ProcessingError> {
        self.apply(ElementKind::Way, element)
    }

    fn classify_relation(
        &mut self,
        element: &mut ElementContext<'_>,
    ) -> Result<(), ProcessingError> {
        self.apply(ElementKind::Relation, element)
    }
}
