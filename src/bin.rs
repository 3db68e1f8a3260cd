use clap::Parser;
use itertools::Itertools;
use osmpbf::{Element, ElementReader, RelMemberType};
use pretty_duration::pretty_duration;
use rustontiles::{
    ingest::{Block, DecodedElement, DecodedNode, DecodedWay, Ingestor, ScannedRelation},
    osm_data::{LatpLon, TagMap},
    processing::{OutputFeature, OutputSink, ReferenceLayers, RuleClassifier},
    utils::locks::lock_or_recover,
    Config,
    ObjectStore,
    ProcessingError,
};
use snafu::{prelude::*, Whatever};
use std::{collections::BTreeMap, path::PathBuf, sync::Mutex, time::Instant};

/// Elements per block handed to a worker.
const BLOCK_SIZE: usize = 8_000;
/// Blocks collected before they are processed together.
const BLOCKS_PER_BATCH: usize = 64;
/// Rough PBF size of a node including its share of the ways, for sizing stores up front.
const PBF_BYTES_PER_NODE: u64 = 10;

#[derive(Parser, Debug)]
#[command(name = "rustontiles-cli", version, about = "Classify OSM data into map layers")]
struct Args {
    /// OSM PBF file to read.
    input: PathBuf,

    /// JSON file with store settings and classification rules.
    #[arg(long)]
    config: PathBuf,

    /// Worker threads, defaults to one per core.
    #[arg(long)]
    threads: Option<usize>,
}

/// Counts features per layer.
#[derive(Debug, Default)]
struct LayerCounter {
    counts: Mutex<BTreeMap<String, usize>>,
}

impl OutputSink for LayerCounter {
    fn accept(&self, feature: OutputFeature) {
        *lock_or_recover(&self.counts, "layer counts")
            .entry(feature.layer)
            .or_default() += 1;
    }
}

fn tags_of<'a>(tags: impl Iterator<Item = (&'a str, &'a str)>) -> TagMap {
    tags.map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn estimate_node_count(args: &Args) -> Result<usize, Whatever> {
    let metadata = std::fs::metadata(&args.input)
        .with_whatever_context(|_| format!("Could not read {}", args.input.display()))?;
    Ok(usize::try_from(metadata.len() / PBF_BYTES_PER_NODE).unwrap_or(usize::MAX))
}

fn scan_relations(args: &Args) -> Result<Vec<ScannedRelation>, Whatever> {
    let reader = ElementReader::from_path(&args.input)
        .with_whatever_context(|_| format!("Could not open {}", args.input.display()))?;
    reader
        .par_map_reduce(
            |element| match element {
                Element::Relation(relation) => {
                    let mut scanned = ScannedRelation {
                        id: relation.id(),
                        outer: Vec::new(),
                        inner: Vec::new(),
                        tags: tags_of(relation.tags()),
                    };
                    for member in relation.members() {
                        if member.member_type != RelMemberType::Way {
                            continue;
                        }
                        match member.role() {
                            Ok("inner") => scanned.inner.push(member.member_id),
                            _ => scanned.outer.push(member.member_id),
                        }
                    }
                    vec![scanned]
                }
                _ => Vec::new(),
            },
            Vec::new,
            |mut left, right| {
                left.extend(right);
                left
            },
        )
        .whatever_context("Could not scan relations")
}

/// Buffers decoded elements into blocks and hands full batches to the ingestor.
struct BlockBuffer<'i, 's, F> {
    ingestor: &'i Ingestor<'s, F>,
    current: Block,
    batch: Vec<Block>,
    saw_ways: bool,
    error: Option<ProcessingError>,
}

impl<'i, 's, F> BlockBuffer<'i, 's, F>
where
    F: Fn() -> RuleClassifier + Send + Sync,
{
    fn new(ingestor: &'i Ingestor<'s, F>) -> Self {
        BlockBuffer {
            ingestor,
            current: Vec::with_capacity(BLOCK_SIZE),
            batch: Vec::new(),
            saw_ways: false,
            error: None,
        }
    }

    fn push(&mut self, element: DecodedElement) {
        if self.error.is_some() {
            return;
        }
        if let DecodedElement::Way(_) = element {
            if !self.saw_ways {
                // all nodes must be stored before the first way is built
                self.saw_ways = true;
                self.flush();
            }
        }
        self.current.push(element);
        if self.current.len() >= BLOCK_SIZE {
            self.batch.push(std::mem::take(&mut self.current));
            if self.batch.len() >= BLOCKS_PER_BATCH {
                self.flush();
            }
        }
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.batch.push(std::mem::take(&mut self.current));
        }
        if self.batch.is_empty() || self.error.is_some() {
            return;
        }
        let batch = std::mem::take(&mut self.batch);
        if let Err(e) = self.ingestor.process_blocks(batch) {
            self.error = Some(e);
        }
    }

    fn finish(mut self) -> Result<(), ProcessingError> {
        self.flush();
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[snafu::report]
fn main() -> Result<(), Whatever> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .whatever_context("Could not set up the worker pool")?;
    }
    let config = Config::from_file(&args.config)
        .with_whatever_context(|_| format!("Could not load {}", args.config.display()))?;
    let store =
        ObjectStore::new(config.store.clone()).whatever_context("Could not set up the stores")?;
    let reference_layers = ReferenceLayers::new();
    let counter = LayerCounter::default();
    let ingestor = Ingestor::new(&store, &reference_layers, &counter, || {
        RuleClassifier::from_config(&config)
    });
    let total_start = Instant::now();

    log::info!("Scanning relations...");
    let start = Instant::now();
    let estimated_nodes = estimate_node_count(&args)?;
    log::debug!("Expecting about {estimated_nodes} nodes");
    let relations = scan_relations(&args)?;
    let stats = ingestor.scan_relations(relations, estimated_nodes);
    log::info!(
        "Kept {} of {} relations in {}",
        stats.stored,
        stats.elements,
        pretty_duration(&start.elapsed(), None)
    );

    log::info!("Reading nodes and ways...");
    let start = Instant::now();
    let reader = ElementReader::from_path(&args.input)
        .with_whatever_context(|_| format!("Could not open {}", args.input.display()))?;
    let mut buffer = BlockBuffer::new(&ingestor);
    reader
        .for_each(|element| match element {
            Element::Node(node) => buffer.push(DecodedElement::Node(DecodedNode {
                id: node.id(),
                point: LatpLon::from_degrees(node.lat(), node.lon()),
                tags: tags_of(node.tags()),
            })),
            Element::DenseNode(node) => buffer.push(DecodedElement::Node(DecodedNode {
                id: node.id(),
                point: LatpLon::from_degrees(node.lat(), node.lon()),
                tags: tags_of(node.tags()),
            })),
            Element::Way(way) => buffer.push(DecodedElement::Way(DecodedWay {
                id: way.id(),
                node_ids: way.refs().collect(),
                tags: tags_of(way.tags()),
            })),
            Element::Relation(_) => (),
        })
        .whatever_context("Could not read nodes and ways")?;
    buffer
        .finish()
        .whatever_context("Could not process nodes and ways")?;
    log::info!(
        "Finished nodes and ways in {}",
        pretty_duration(&start.elapsed(), None)
    );
    store.report_size();

    log::info!("Processing relations...");
    let start = Instant::now();
    let stats = ingestor
        .process_relations()
        .whatever_context("Could not process relations")?;
    log::info!(
        "{} of {} relations produced features in {}",
        stats.with_output,
        stats.classified,
        pretty_duration(&start.elapsed(), None)
    );
    store.reopen();

    let counts = lock_or_recover(&counter.counts, "layer counts").clone();
    let metadata = ingestor.layer_metadata();
    for (layer, count) in counts.iter() {
        let attributes = metadata
            .attributes(layer)
            .into_iter()
            .flatten()
            .map(|(key, kind)| format!("{key}:{kind:?}"))
            .join(", ");
        println!("{layer}: {count} features [{attributes}]");
    }
    log::info!(
        "Done in {}",
        pretty_duration(&total_start.elapsed(), None)
    );
    Ok(())
}
