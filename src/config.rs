//! Run configuration.
//!
//! Everything that influences how the stores behave is fixed here before ingestion starts
//! and handed to [ObjectStore::new](crate::store::ObjectStore::new); nothing can be toggled
//! afterwards.

use crate::processing::ElementKind;
use serde::Deserialize;
use snafu::{prelude::*, Backtrace};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Default capacity of the compact node store: ids below 2^24.
pub const DEFAULT_COMPACT_NODE_CAPACITY: u64 = 1 << 24;

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Could not read config file {}: {source}", path.display()))]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Could not parse config: {source}"))]
    ParseConfig {
        source: serde_json::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Invalid config: {description}"))]
    InvalidConfig {
        description: String,
        backtrace: Backtrace,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Keep node positions in a flat array indexed by id, instead of a hash map.
    ///
    /// Only valid if all node ids are below `compact_node_capacity`.
    pub compact_storage: bool,
    /// Treat references to missing nodes or ways as fatal.
    ///
    /// Otherwise the missing element is skipped and the geometry is built from what remains.
    pub enforce_integrity: bool,
    pub compact_node_capacity: u64,
    /// File to back the compact node store with. Uses an anonymous temp file if unset.
    pub store_path: Option<PathBuf>,
    /// Log validity problems of individual elements.
    pub verbose: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            compact_storage: false,
            enforce_integrity: true,
            compact_node_capacity: DEFAULT_COMPACT_NODE_CAPACITY,
            store_path: None,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    /// Nodes without any of these keys are not handed to the classifier.
    ///
    /// If empty, the keys used by `rules` are taken instead.
    pub significant_node_keys: Vec<String>,
    pub rules: Vec<RuleConfig>,
}

/// One rule of the [RuleClassifier](crate::processing::classifier::RuleClassifier).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuleConfig {
    /// Tag key that must be present.
    pub key: String,
    /// Required value of `key`, any value matches if unset.
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default = "all_element_kinds")]
    pub elements: Vec<ElementKind>,
    pub layer: String,
    /// Emit closed ways and relations as areas.
    #[serde(default)]
    pub area: bool,
    /// Emit only the centroid.
    #[serde(default)]
    pub centroid: bool,
    #[serde(default)]
    pub min_zoom: Option<u8>,
    #[serde(default)]
    pub attributes: Vec<AttributeRule>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttributeRule {
    /// Tag to copy.
    pub key: String,
    /// Attribute name in the output, defaults to `key`.
    #[serde(default)]
    pub rename: Option<String>,
    #[serde(default)]
    pub min_zoom: Option<u8>,
    #[serde(default)]
    pub kind: AttributeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    #[default]
    String,
    Numeric,
    Boolean,
}

fn all_element_kinds() -> Vec<ElementKind> {
    vec![ElementKind::Node, ElementKind::Way, ElementKind::Relation]
}

impl Config {
    pub fn from_file<P>(path: P) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let content = fs::read_to_string(path).context(ReadConfigSnafu { path })?;
        Config::from_json_str(&content)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json).context(ParseConfigSnafu)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            !self.store.compact_storage || self.store.compact_node_capacity > 0,
            InvalidConfigSnafu {
                description: "compact storage needs a compact_node_capacity above zero",
            }
        );
        for (index, rule) in self.rules.iter().enumerate() {
            ensure!(
                !rule.key.is_empty() && !rule.layer.is_empty(),
                InvalidConfigSnafu {
                    description: format!("rule #{index} needs both a key and a layer"),
                }
            );
            ensure!(
                !rule.elements.is_empty(),
                InvalidConfigSnafu {
                    description: format!("rule #{index} does not apply to any element kind"),
                }
            );
        }
        Ok(())
    }

    /// Keys that make a node worth classifying.
    pub fn node_keys(&self) -> Vec<String> {
        if self.significant_node_keys.is_empty() {
            let mut keys: Vec<String> = self
                .rules
                .iter()
                .filter(|rule| rule.elements.contains(&ElementKind::Node))
                .map(|rule| rule.key.clone())
                .collect();
            keys.sort();
            keys.dedup();
            keys
        } else {
            self.significant_node_keys.clone()
        }
    }
}
