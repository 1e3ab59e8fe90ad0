use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};

use crate::area::{Area, AssemblerConfig, MultipolygonCollector, ResolvedWay};
use crate::config::{NodeCacheMode, PolicyKind, RuntimeConfig};
use crate::filter::{FeatureTally, NoiceWriter, TagPredicate};
use crate::osm::{EntityKinds, InputSource, OsmEntity};
use crate::sinks::{DataSink, GeoJsonSink, GeoJsonlSink, GeoPackageSink, GeoParquetSink};
use crate::storage::{Location, LocationIndex};
use crate::utils::ProgressCounter;

pub const DEFAULT_OUTPUT: &str = "noice.gpkg";

/// Write the polygons of an OSM file that are not icesheet.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Input OSM file (PBF or XML), `-` for stdin
    #[arg(value_name = "INFILE", default_value = "-")]
    pub input: PathBuf,

    /// Output file
    #[arg(value_name = "OUTFILE", default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Enable debug output
    #[arg(short, long)]
    pub debug: bool,

    /// Output format (detected from OUTFILE if omitted, else gpkg)
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Tag policy deciding which areas are kept
    #[arg(short, long, value_enum)]
    pub policy: Option<PolicyKind>,

    /// Settings file (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Node location index. The dense index reads a node at exactly
    /// lon 0, lat 0 back as missing.
    #[arg(long, value_enum, env = "NOICE_NODE_CACHE_MODE")]
    pub node_cache_mode: Option<NodeCacheMode>,

    /// Highest node id the dense index can hold
    #[arg(long)]
    pub node_cache_max_nodes: Option<u64>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum OutputFormat {
    #[value(name = "gpkg", aliases = ["sqlite", "GPKG", "SQLite"])]
    GeoPackage,
    #[value(name = "geojson")]
    GeoJson,
    #[value(name = "geojsonl", alias = "jsonl")]
    GeoJsonl,
    #[value(name = "geoparquet", alias = "parquet")]
    GeoParquet,
}

impl OutputFormat {
    pub fn label(&self) -> &'static str {
        match self {
            OutputFormat::GeoPackage => "gpkg",
            OutputFormat::GeoJson => "geojson",
            OutputFormat::GeoJsonl => "geojsonl",
            OutputFormat::GeoParquet => "geoparquet",
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        match ext.to_lowercase().as_str() {
            "gpkg" | "sqlite" => Some(OutputFormat::GeoPackage),
            "geojson" => Some(OutputFormat::GeoJson),
            "geojsonl" | "jsonl" => Some(OutputFormat::GeoJsonl),
            "parquet" => Some(OutputFormat::GeoParquet),
            _ => None,
        }
    }

    /// An explicit format wins; then the extension; then GeoPackage.
    pub fn resolve(requested: Option<Self>, output: &Path) -> Self {
        requested
            .or_else(|| Self::from_extension(output))
            .unwrap_or(OutputFormat::GeoPackage)
    }
}

pub fn init_sink(format: OutputFormat, output: &Path) -> Result<Box<dyn DataSink>> {
    let to_stdout = output == Path::new("-");
    match format {
        OutputFormat::GeoJsonl if to_stdout => {
            tracing::info!("Sink: {} -> stdout", format.label());
            Ok(Box::new(GeoJsonlSink::stdout()?))
        }
        _ if to_stdout => {
            anyhow::bail!(
                "CLI: {} output to stdout is not supported; use geojsonl instead",
                format.label()
            )
        }
        OutputFormat::GeoPackage => {
            tracing::info!("Sink: {} -> {:?}", format.label(), output);
            Ok(Box::new(GeoPackageSink::new(output)?))
        }
        OutputFormat::GeoJson => {
            tracing::info!("Sink: {} -> {:?}", format.label(), output);
            Ok(Box::new(GeoJsonSink::new(output)?))
        }
        OutputFormat::GeoJsonl => {
            tracing::info!("Sink: {} -> {:?}", format.label(), output);
            Ok(Box::new(GeoJsonlSink::new(output)?))
        }
        OutputFormat::GeoParquet => {
            tracing::info!("Sink: {} -> {:?}", format.label(), output);
            Ok(Box::new(GeoParquetSink::new(output)?))
        }
    }
}

/// What a run produced, reported once the sink is finished.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub tally: FeatureTally,
    pub rejected: u64,
    pub skipped_geometries: u64,
    pub incomplete_relations: Vec<i64>,
    pub relations_seen: u64,
    pub relations_collected: usize,
    pub nodes: u64,
    pub ways: u64,
    pub missing_locations: u64,
    pub way_areas: u64,
    pub relation_areas: u64,
}

#[derive(Debug, Default)]
struct AssembleCounts {
    nodes: u64,
    ways: u64,
    missing_locations: u64,
}

/// Pass 1: remember every multipolygon relation and its member ways.
pub fn pass1_collect_relations(
    source: &InputSource,
    collector: &mut MultipolygonCollector,
) -> Result<u64> {
    let mut progress = ProgressCounter::new("Pass 1/2: relations", 10_000);
    source
        .for_each_entity(EntityKinds::RELATIONS, |entity| {
            if let OsmEntity::Relation(relation) = entity {
                progress.inc(1);
                collector.add_relation(relation);
            }
            Ok(())
        })
        .context("Pipeline: Relation pass failed")?;
    Ok(progress.finish())
}

/// Pass 2: index node locations, resolve ways and hand every finished
/// area to the writer.
fn pass2_assemble(
    source: &InputSource,
    collector: &mut MultipolygonCollector,
    index: &mut LocationIndex,
    writer: &mut NoiceWriter<'_>,
) -> Result<AssembleCounts> {
    let mut counts = AssembleCounts::default();
    let mut progress = ProgressCounter::new("Pass 2/2: objects", 100_000);
    let mut on_area = |area: Area| -> Result<()> { writer.handle_area(area) };

    source
        .for_each_entity(EntityKinds::ALL, |entity| {
            progress.inc(1);
            match entity {
                OsmEntity::Node(node) => {
                    index
                        .set(node.id, Location::from_degrees(node.lon, node.lat))
                        .with_context(|| format!("Pipeline: Failed to index node {}", node.id))?;
                    counts.nodes += 1;
                }
                OsmEntity::Way(way) => {
                    index.prepare_lookups();
                    let way = ResolvedWay::resolve(way, index);
                    if way.missing_locations > 0 {
                        tracing::debug!(
                            "Way {}: {} of {} node locations missing",
                            way.id,
                            way.missing_locations,
                            way.ref_count
                        );
                        counts.missing_locations += way.missing_locations as u64;
                    }
                    counts.ways += 1;
                    collector.handle_way(way, &mut on_area)?;
                }
                OsmEntity::Relation(_) => {}
            }
            Ok(())
        })
        .context("Pipeline: Assembly pass failed")?;

    progress.finish();
    Ok(counts)
}

/// Run both passes over `source`, writing accepted areas to `sink`.
/// The caller finishes the sink.
pub fn run(
    source: &InputSource,
    runtime: &RuntimeConfig,
    sink: &mut dyn DataSink,
) -> Result<RunReport> {
    let mut collector = MultipolygonCollector::new(AssemblerConfig {
        debug: runtime.debug,
    });

    tracing::info!(
        "Pass 1: Collecting multipolygon relations from {:?} ({})...",
        source.path(),
        source.format().label()
    );
    let relations_seen = pass1_collect_relations(source, &mut collector)?;
    tracing::info!(
        "Collected {} of {} relations.",
        collector.relation_count(),
        relations_seen
    );

    let mut index = LocationIndex::new(runtime.node_cache_mode, runtime.node_cache_max_nodes)
        .context("Pipeline: Failed to create node location index")?;
    tracing::info!("Node cache: {}", runtime.node_cache_mode.label());

    let predicate = TagPredicate::from_runtime(runtime);
    tracing::info!(
        "Policy: {} ({} values)",
        predicate.policy().label(),
        runtime.values.len()
    );
    let mut writer = NoiceWriter::new(predicate, sink);

    tracing::info!("Pass 2: Assembling areas...");
    let counts = pass2_assemble(source, &mut collector, &mut index, &mut writer)?;

    Ok(RunReport {
        tally: writer.tally(),
        rejected: writer.rejected(),
        skipped_geometries: writer.skipped_geometries(),
        incomplete_relations: collector.incomplete_relations(),
        relations_seen,
        relations_collected: collector.relation_count(),
        nodes: counts.nodes,
        ways: counts.ways,
        missing_locations: counts.missing_locations,
        way_areas: collector.way_areas(),
        relation_areas: collector.relation_areas(),
    })
}

pub fn log_summary(report: &RunReport) {
    tracing::debug!(
        "Read {} nodes and {} ways ({} node locations missing)",
        report.nodes,
        report.ways,
        report.missing_locations
    );
    tracing::debug!(
        "Assembled {} areas from ways and {} from relations; {} rejected by tags, {} with illegal geometry",
        report.way_areas,
        report.relation_areas,
        report.rejected,
        report.skipped_geometries
    );
    tracing::info!("noice features converted: {}", report.tally.noice);
    tracing::info!("glacier features converted: {}", report.tally.glacier);

    if !report.incomplete_relations.is_empty() {
        let ids: Vec<String> = report
            .incomplete_relations
            .iter()
            .map(|id| id.to_string())
            .collect();
        tracing::warn!(
            "Some member ways missing for these multipolygon relations: {}",
            ids.join(" ")
        );
    }
}
